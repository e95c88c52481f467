pub mod hub;
pub mod registry;

pub use hub::HubHttpClient;
pub use registry::RegistryClient;

pub mod docker;
pub mod fake;

pub use docker::{DockerBuildDriver, DockerBuildDriverFactory};
pub use fake::{FakeBuildDriver, FakeBuildDriverFactory};

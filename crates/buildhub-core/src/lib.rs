pub mod build_session;
pub mod config;
pub mod error;
pub mod launch_session;
pub mod metrics;
pub mod name;
pub mod sink;
pub mod traits;
pub mod types;

pub use build_session::{BuildOutcome, BuildSession};
pub use launch_session::{LaunchOutcome, LaunchResult, LaunchSession};
pub use name::{build_name, image_name, username_from_repo};
pub use types::{AbortSignal, BuildRequest, LaunchContext, OrchestratorState, PodPhase, ProgressItem};

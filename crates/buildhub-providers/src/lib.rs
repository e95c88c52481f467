pub mod git;

pub use git::{GitProvider, GitProviderFactory};

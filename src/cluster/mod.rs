pub mod builder;
pub mod runner;
pub mod submitter;

pub use builder::{CommandBuilder, JobSpec};
pub use runner::{JobRunner, RemoteJobRunner};
pub use submitter::{ClusterJobSubmitter, JobSubmitter};

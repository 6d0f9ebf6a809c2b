//! Controller error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Token renewal failed; the message is mirrored into `status.error`
    #[error("{0}")]
    Renewal(String),

    /// Deployment rollout failed after the access token secret was written
    #[error("{0}")]
    DeploymentUpgrade(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

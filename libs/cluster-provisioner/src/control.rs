//! The seam to whatever actually stands up machines.
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Everything needed to create one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterRequest {
    pub name: String,
    pub subnet_id: String,
    pub keypair: String,
    pub filesystem_id: String,
    pub security_group_id: String,
}

#[async_trait]
pub trait ClusterControl: Send + Sync + 'static {
    async fn create(&self, request: &ClusterRequest) -> Result<Value, ControlError>;
    async fn describe(&self, cluster: &str) -> Result<Value, ControlError>;
    async fn delete(&self, cluster: &str) -> Result<Value, ControlError>;
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to run `{binary}`")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("could not decode output of `{command}`")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not render cluster configuration")]
    Render(#[from] serde_yaml::Error),
    #[error("could not write cluster configuration to {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

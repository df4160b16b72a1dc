//! [`ClusterControl`] over the ParallelCluster `pcluster` command line tool.
//!
//! `create` renders a cluster configuration file into the working directory
//! and passes its path, every command prints JSON on stdout.
use std::{ffi::OsString, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use config::wire::ClusterSettings;
use resource_resolver::Tag;

use crate::control::{ClusterControl, ClusterRequest, ControlError};

#[derive(Debug, Clone)]
pub struct PclusterCli {
    settings: ClusterSettings,
    tags: Vec<Tag>,
}

impl PclusterCli {
    /// `tags` are put on every resource the cluster creates
    pub fn new(settings: ClusterSettings, tags: impl IntoIterator<Item = Tag>) -> Self {
        Self {
            settings,
            tags: tags.into_iter().collect(),
        }
    }

    pub fn config_path(&self, cluster: &str) -> PathBuf {
        self.settings.work_dir.join(format!("{cluster}.yaml"))
    }

    /// the cluster configuration file for `request`
    pub fn render(&self, request: &ClusterRequest) -> Result<String, ControlError> {
        let s = &self.settings;
        let config = PclusterConfig {
            region: s.region.clone(),
            image: Image { os: s.os.clone() },
            head_node: HeadNode {
                instance_type: s.head_node_instance_type.clone(),
                networking: HeadNodeNetworking {
                    subnet_id: request.subnet_id.clone(),
                    security_groups: vec![request.security_group_id.clone()],
                },
                ssh: Ssh {
                    key_name: request.keypair.clone(),
                },
            },
            scheduling: Scheduling {
                scheduler: "slurm",
                slurm_queues: vec![SlurmQueue {
                    name: s.queue_name.clone(),
                    compute_resources: vec![ComputeResource {
                        name: s.queue_name.clone(),
                        instance_type: s.compute_instance_type.clone(),
                        min_count: s.min_count,
                        max_count: s.max_count,
                    }],
                    networking: QueueNetworking {
                        subnet_ids: vec![request.subnet_id.clone()],
                        security_groups: vec![request.security_group_id.clone()],
                    },
                }],
            },
            shared_storage: vec![SharedStorage {
                mount_dir: s.mount_dir.clone(),
                name: "shared".to_owned(),
                storage_type: "Efs",
                efs_settings: EfsSettings {
                    file_system_id: request.filesystem_id.clone(),
                },
            }],
            tags: self
                .tags
                .iter()
                .map(|tag| ResourceTag {
                    key: tag.key.clone(),
                    value: tag.value.clone(),
                })
                .collect(),
        };
        Ok(serde_yaml::to_string(&config)?)
    }

    fn args(&self, op: &str, cluster: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![op.into(), "--cluster-name".into(), cluster.into()];
        if let Some(region) = &self.settings.region {
            args.push("--region".into());
            args.push(region.into());
        }
        args
    }

    async fn run(&self, args: Vec<OsString>) -> Result<Value, ControlError> {
        let binary = &self.settings.pcluster_binary;
        let command = format!(
            "pcluster {}",
            args.first().map(|op| op.to_string_lossy()).unwrap_or_default()
        );
        debug!(binary = %binary.display(), ?args, "running pcluster");

        let output = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ControlError::Spawn {
                binary: binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ControlError::CommandFailed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|source| ControlError::Decode { command, source })
    }
}

#[async_trait]
impl ClusterControl for PclusterCli {
    async fn create(&self, request: &ClusterRequest) -> Result<Value, ControlError> {
        let rendered = self.render(request)?;
        let path = self.config_path(&request.name);
        let write_err = |source| ControlError::Write {
            path: path.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.settings.work_dir)
            .await
            .map_err(write_err)?;
        tokio::fs::write(&path, rendered).await.map_err(write_err)?;
        info!(cluster = %request.name, path = %path.display(), "wrote cluster configuration");

        let mut args = self.args("create-cluster", &request.name);
        args.push("--cluster-configuration".into());
        args.push(path.into());
        self.run(args).await
    }

    async fn describe(&self, cluster: &str) -> Result<Value, ControlError> {
        self.run(self.args("describe-cluster", cluster)).await
    }

    async fn delete(&self, cluster: &str) -> Result<Value, ControlError> {
        self.run(self.args("delete-cluster", cluster)).await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PclusterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    image: Image,
    head_node: HeadNode,
    scheduling: Scheduling,
    shared_storage: Vec<SharedStorage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<ResourceTag>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Image {
    os: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HeadNode {
    instance_type: String,
    networking: HeadNodeNetworking,
    ssh: Ssh,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HeadNodeNetworking {
    subnet_id: String,
    security_groups: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Ssh {
    key_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Scheduling {
    scheduler: &'static str,
    slurm_queues: Vec<SlurmQueue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SlurmQueue {
    name: String,
    compute_resources: Vec<ComputeResource>,
    networking: QueueNetworking,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ComputeResource {
    name: String,
    instance_type: String,
    min_count: u32,
    max_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueueNetworking {
    subnet_ids: Vec<String>,
    security_groups: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SharedStorage {
    mount_dir: String,
    name: String,
    storage_type: &'static str,
    efs_settings: EfsSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EfsSettings {
    file_system_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceTag {
    key: String,
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ClusterRequest {
        ClusterRequest {
            name: "tenant-a".into(),
            subnet_id: "subnet-1".into(),
            keypair: "compute-cluster-key".into(),
            filesystem_id: "fs-123".into(),
            security_group_id: "sg-1".into(),
        }
    }

    fn settings() -> ClusterSettings {
        ClusterSettings {
            region: Some("us-east-1".into()),
            work_dir: std::env::temp_dir().join("pcluster-cli-tests"),
            ..ClusterSettings::default()
        }
    }

    fn cli(settings: ClusterSettings) -> PclusterCli {
        PclusterCli::new(
            settings,
            [
                Tag::new("HPC_Goal", "compute_cluster"),
                Tag::new("SBO_Billing", "hpc"),
            ],
        )
    }

    #[test]
    fn test_render() {
        let rendered = cli(settings()).render(&request()).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();

        assert_eq!(doc["Region"].as_str(), Some("us-east-1"));
        assert_eq!(doc["HeadNode"]["Networking"]["SubnetId"].as_str(), Some("subnet-1"));
        assert_eq!(
            doc["HeadNode"]["Ssh"]["KeyName"].as_str(),
            Some("compute-cluster-key")
        );
        let queue = &doc["Scheduling"]["SlurmQueues"][0];
        assert_eq!(queue["Networking"]["SubnetIds"][0].as_str(), Some("subnet-1"));
        assert_eq!(queue["Networking"]["SecurityGroups"][0].as_str(), Some("sg-1"));
        assert_eq!(queue["ComputeResources"][0]["MaxCount"].as_u64(), Some(4));
        assert_eq!(
            doc["SharedStorage"][0]["EfsSettings"]["FileSystemId"].as_str(),
            Some("fs-123")
        );
        assert_eq!(doc["Tags"][1]["Key"].as_str(), Some("SBO_Billing"));
    }

    #[test]
    fn test_render_without_region_or_tags() {
        let settings = ClusterSettings {
            region: None,
            ..settings()
        };
        let rendered = PclusterCli::new(settings, []).render(&request()).unwrap();
        assert!(!rendered.contains("Region"));
        assert!(!rendered.contains("Tags"));
    }

    #[test]
    fn test_args() {
        let args = cli(settings()).args("describe-cluster", "tenant-a");
        assert_eq!(
            args,
            [
                "describe-cluster",
                "--cluster-name",
                "tenant-a",
                "--region",
                "us-east-1"
            ]
            .map(OsString::from)
        );
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let settings = ClusterSettings {
            pcluster_binary: "/definitely/not/pcluster".into(),
            ..settings()
        };
        let err = cli(settings).describe("tenant-a").await.unwrap_err();
        assert!(matches!(err, ControlError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_writes_config_before_running() {
        let settings = ClusterSettings {
            pcluster_binary: "false".into(),
            ..settings()
        };
        let cli = cli(settings);
        let err = cli.create(&request()).await.unwrap_err();
        assert!(
            matches!(err, ControlError::CommandFailed { ref command, .. } if command == "pcluster create-cluster")
        );

        let written = tokio::fs::read_to_string(cli.config_path("tenant-a"))
            .await
            .unwrap();
        assert!(written.contains("fs-123"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_must_be_json() {
        // `echo` succeeds and prints its arguments
        let settings = ClusterSettings {
            pcluster_binary: "echo".into(),
            ..settings()
        };
        let err = cli(settings).delete("tenant-a").await.unwrap_err();
        assert!(matches!(err, ControlError::Decode { .. }));
    }
}

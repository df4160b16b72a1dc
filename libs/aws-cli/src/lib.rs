//! # aws-cli
//!
//! Subnet and tagged resource inventory read by running the `aws` command
//! line tool and decoding its JSON output. Credentials and profile come from
//! the usual aws environment, nothing here handles them.
//!
//! EC2 lookups filter by tag server side. `efs describe-file-systems` has no
//! tag filter so filesystems are filtered locally.
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

use resource_resolver::{ResourceInventory, ResourceKind, Tag, TagFilter, TaggedResource};
use subnet_lease::SubnetInventory;

pub mod wire;

#[derive(Debug, Error)]
pub enum AwsCliError {
    #[error("failed to run `{binary}`")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`aws {command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("could not decode output of `aws {command}`")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AwsCli {
    binary: PathBuf,
    region: Option<String>,
    subnet_filter: TagFilter,
}

impl AwsCli {
    /// `subnet_tags` select which subnets belong to the provisioning pool
    pub fn new(
        binary: impl Into<PathBuf>,
        region: Option<String>,
        subnet_tags: impl IntoIterator<Item = Tag>,
    ) -> Self {
        Self {
            binary: binary.into(),
            region,
            subnet_filter: TagFilter::new(subnet_tags),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn args(&self, service: &str, op: &str, filter: Option<&TagFilter>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![service.into(), op.into()];
        if let Some(filter) = filter
            && !filter.tags().is_empty()
        {
            args.push("--filters".into());
            args.extend(filter_args(filter).into_iter().map(OsString::from));
        }
        if let Some(region) = &self.region {
            args.push("--region".into());
            args.push(region.into());
        }
        args.push("--output".into());
        args.push("json".into());
        args
    }

    /// run `aws <service> <op>` and return stdout
    async fn run(
        &self,
        service: &str,
        op: &str,
        filter: Option<&TagFilter>,
    ) -> Result<(String, Vec<u8>), AwsCliError> {
        let command = format!("{service} {op}");
        let args = self.args(service, op, filter);
        debug!(binary = %self.binary.display(), ?args, "running aws cli");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AwsCliError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(AwsCliError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        trace!(command, bytes = output.stdout.len(), "aws cli finished");
        Ok((command, output.stdout))
    }
}

/// `Name=tag:<key>,Values=<value>` per tag, which ec2 ANDs together
fn filter_args(filter: &TagFilter) -> Vec<String> {
    filter
        .tags()
        .iter()
        .map(|tag| format!("Name=tag:{},Values={}", tag.key, tag.value))
        .collect()
}

fn decode<T>(
    (command, out): (String, Vec<u8>),
    parse: fn(&[u8]) -> serde_json::Result<T>,
) -> Result<T, AwsCliError> {
    parse(&out).map_err(|source| AwsCliError::Decode { command, source })
}

#[async_trait]
impl SubnetInventory for AwsCli {
    type Error = AwsCliError;

    async fn list_subnets(&self) -> Result<Vec<String>, Self::Error> {
        let out = self
            .run("ec2", "describe-subnets", Some(&self.subnet_filter))
            .await?;
        decode(out, wire::subnet_ids)
    }
}

#[async_trait]
impl ResourceInventory for AwsCli {
    type Error = AwsCliError;

    async fn list_matching(
        &self,
        kind: ResourceKind,
        filter: &TagFilter,
    ) -> Result<Vec<TaggedResource>, Self::Error> {
        match kind {
            ResourceKind::KeyPair => {
                let out = self.run("ec2", "describe-key-pairs", Some(filter)).await?;
                decode(out, wire::key_pairs)
            }
            ResourceKind::SecurityGroup => {
                let out = self
                    .run("ec2", "describe-security-groups", Some(filter))
                    .await?;
                decode(out, wire::security_groups)
            }
            ResourceKind::FileSystem => {
                let out = self.run("efs", "describe-file-systems", None).await?;
                let mut found = decode(out, wire::file_systems)?;
                found.retain(|fs| filter.matches(&fs.tags));
                Ok(found)
            }
        }
    }
}

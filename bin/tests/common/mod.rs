#![allow(dead_code)]
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

/// A scratch directory holding a provisioner config and, optionally, a fake
/// `pcluster` that prints `pcluster_output`. Removed on drop.
#[derive(Debug)]
pub struct TestEnv {
    dir: PathBuf,
}

impl TestEnv {
    pub fn new(name: &str, subnets: &[&str]) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "provisioner-bin-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("failed to create test dir");

        let subnets = subnets
            .iter()
            .map(|s| format!("    - {s}\n"))
            .collect::<String>();
        let config = format!(
            r#"
registry:
  backend: memory
inventory:
  source: static
  subnets:
{subnets}  keypairs:
    - id: compute-cluster-key
      tags:
        HPC_Goal: compute_cluster
  filesystems:
    - id: fs-1
      tags:
        HPC_Goal: compute_cluster
        SBO_Billing: hpc
  security_groups:
    - id: sg-1
      tags:
        HPC_Goal: compute_cluster
backoff:
  attempts: 1
  delay: 0
cluster:
  pcluster_binary: {pcluster}
  work_dir: {work_dir}
"#,
            subnets = if subnets.is_empty() {
                "    []\n".to_owned()
            } else {
                subnets
            },
            pcluster = dir.join("pcluster").display(),
            work_dir = dir.join("work").display(),
        );
        fs::write(dir.join("config.yaml"), config).expect("failed to write config");
        Self { dir }
    }

    /// install a `pcluster` that prints `output` and exits 0
    #[cfg(unix)]
    pub fn fake_pcluster(self, output: &str) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let path = self.dir.join("pcluster");
        fs::write(&path, format!("#!/bin/sh\necho '{output}'\n"))
            .expect("failed to write fake pcluster");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("failed to chmod fake pcluster");
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.yaml")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.join("work")
    }

    /// run the provisioner binary with `args` against this env's config
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_provisioner"))
            .arg("--config-path")
            .arg(self.config_path())
            .args(args)
            .env("PROVISIONER_LOG", "debug")
            .env("LOG_FORMAT", "standard")
            .current_dir(&self.dir)
            .output()
            .expect("failed to run provisioner")
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

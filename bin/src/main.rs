#![allow(clippy::cognitive_complexity)]
mod commands;

use aws_cli::AwsCli;
use config::{ProvisionerConfig, RegistryConfig, wire::InventorySource};
use provisioner_core::{
    anyhow::anyhow,
    config::{
        cli::{self, Parser},
        trace,
    },
    metrics,
    prelude::*,
    tokio::{runtime::Builder, signal},
};
use subnet_lease::{MemoryRegistry, Registry, StaticSubnets};

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.provisioner_log)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv::dotenv() {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    // build the runtime
    let rt = builder.build()?;

    let print_metrics = config.print_metrics;
    let res = rt.block_on(async move {
        tokio::select! {
            res = start(config) => res,
            res = signal::ctrl_c() => {
                res.context("failed to listen for ctrl-c")?;
                Err(anyhow!("interrupted"))
            }
        }
    });

    if print_metrics {
        match metrics::render_text() {
            Ok(text) => eprint!("{text}"),
            Err(err) => error!(?err, "failed to render metrics"),
        }
    }
    if let Err(err) = &res {
        error!(?err, "exited with error");
    }
    res
}

async fn start(config: cli::Config) -> Result<()> {
    debug!(path = %config.config_path.display(), "parsing provisioner config");
    let cfg = ProvisionerConfig::parse(&config.config_path)?;

    match cfg.registry() {
        RegistryConfig::Memory => {
            warn!("using the in-memory registry, claims only live as long as this process");
            with_inventory(config.command, &cfg, MemoryRegistry::new()).await
        }
        RegistryConfig::Nats(nats) => {
            info!(servers = ?nats.servers, bucket = %nats.bucket, "connecting to NATS claim registry");
            let registry = nats_registry::connect(nats)
                .await
                .context("failed to open the NATS claim registry")?;
            info!("NATS claim registry ready");
            with_inventory(config.command, &cfg, registry).await
        }
    }
}

async fn with_inventory<R: Registry>(
    command: cli::Command,
    cfg: &ProvisionerConfig,
    registry: R,
) -> Result<()> {
    let inventory = cfg.inventory();
    let goal = commands::tag(&cfg.tags().goal);
    match inventory.source {
        InventorySource::Static => {
            debug!(
                subnets = inventory.subnets.len(),
                "using static subnet and resource inventory"
            );
            let subnets = StaticSubnets::new(inventory.subnets.iter().cloned());
            let resources = commands::static_resources(inventory);
            commands::execute(command, cfg, registry, subnets, resources).await
        }
        InventorySource::AwsCli => {
            debug!(binary = %inventory.aws_binary.display(), region = ?inventory.region, "using aws cli inventory");
            let aws = AwsCli::new(&inventory.aws_binary, inventory.region.clone(), [goal]);
            commands::execute(command, cfg, registry, aws.clone(), aws).await
        }
    }
}

//! provisioner process configs

pub mod cli {
    //! Parse from either cli or env var

    /// tokio worker thread name
    pub static DEFAULT_THREAD_NAME: &str = "provisioner-worker";
    /// the default path to config
    pub static DEFAULT_CONFIG_PATH: &str = "/etc/provisioner/config.yaml";
    /// default log level. Can use this argument or PROVISIONER_LOG env var
    pub const DEFAULT_PROVISIONER_LOG: &str = "info";

    use std::path::PathBuf;

    pub use clap::Parser;
    use clap::Subcommand;

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[clap(author, name = "provisioner", bin_name = "provisioner", about, long_about = None)]
    /// parses from cli & environment var. the provisioner will load `.env` in the current dir as well
    pub struct Config {
        /// path to the provisioner's config
        #[clap(
            short,
            long,
            value_parser,
            env,
            default_value = DEFAULT_CONFIG_PATH
        )]
        pub config_path: PathBuf,
        /// Worker thread name
        #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
        pub thread_name: String,
        /// number of worker threads, defaults to the number of logical cpus
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_PROVISIONER_LOG)]
        pub provisioner_log: String,
        /// print prometheus metrics to stderr when the command finishes
        #[clap(long, env)]
        pub print_metrics: bool,
        /// what to do
        #[clap(subcommand)]
        pub command: Command,
    }

    /// provisioner subcommands
    #[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
    pub enum Command {
        /// claim a subnet and create the cluster
        Create {
            /// cluster name
            cluster: String,
        },
        /// show the cluster's status
        Describe {
            /// cluster name
            cluster: String,
        },
        /// delete the cluster and release its subnet
        Delete {
            /// cluster name
            cluster: String,
        },
        /// list every subnet claim
        Claims,
        /// release the cluster's subnet claims without touching the cluster
        Release {
            /// cluster name
            cluster: String,
        },
    }

    impl Command {
        /// the cluster this command acts on, if any
        pub fn cluster(&self) -> Option<&str> {
            match self {
                Command::Create { cluster }
                | Command::Describe { cluster }
                | Command::Delete { cluster }
                | Command::Release { cluster } => Some(cluster),
                Command::Claims => None,
            }
        }
    }

}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use crate::env::parse_var_with_err;

    /// log as "json", "pretty" or "standard" (unstructured)
    static DEFAULT_LOG_FORMAT: &str = "standard";

    /// Configuration for the tracing subscriber
    #[derive(Debug)]
    pub struct Config {
        /// formatting to apply to logs
        pub log_frmt: String,
    }

    impl Config {
        /// Install the global subscriber. Logs go to stderr so command
        /// output on stdout stays parseable.
        pub fn parse(provisioner_log: &str) -> Result<Self> {
            let log_frmt: String = parse_var_with_err("LOG_FORMAT", DEFAULT_LOG_FORMAT)?;

            // Log level comes from PROVISIONER_LOG
            let filter = EnvFilter::try_new(provisioner_log)
                .or_else(|_| EnvFilter::try_new("info"))?
                .add_directive("async_nats=warn".parse()?);

            match &log_frmt[..] {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json().with_writer(std::io::stderr))
                        .init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new())
                                .with_writer(std::io::stderr),
                        )
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().with_writer(std::io::stderr))
                        .init();
                }
            }

            Ok(Self { log_frmt })
        }
    }
}

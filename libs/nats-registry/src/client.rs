//! Opening a NATS connection and the claims bucket.
//!
//! The configured security mode picks how we authenticate. A configured CA
//! always pins the server certificate, whatever the mode.
use std::time::Duration;

use async_nats::{
    Client, ConnectOptions, ServerAddr,
    jetstream::{self, kv},
};
use tracing::{debug, info, warn};

use config::NatsConfig;
use config::wire::NatsSecurityMode;

use crate::error::{RegistryError, RegistryResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const FIRST_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// name the provisioner shows up as in NATS connection listings
const CLIENT_NAME: &str = "subnet-provisioner";

fn config_err(msg: impl Into<String>) -> RegistryError {
    RegistryError::Config(msg.into())
}

/// `value`, or a config error naming the field `mode` needs
fn required<'a, T: ?Sized>(
    value: Option<&'a T>,
    field: &str,
    mode: NatsSecurityMode,
) -> RegistryResult<&'a T> {
    value.ok_or_else(|| config_err(format!("{mode:?} auth needs `{field}` to be set")))
}

/// the configured server list, parsed
pub fn server_addrs(config: &NatsConfig) -> RegistryResult<Vec<ServerAddr>> {
    config
        .servers
        .iter()
        .map(|server| {
            server
                .parse::<ServerAddr>()
                .map_err(|e| config_err(format!("bad NATS server address {server:?}: {e}")))
        })
        .collect()
}

/// Connection options for `config`. Credential files are read here, so a
/// missing file fails before any network traffic.
pub async fn connect_options(config: &NatsConfig) -> RegistryResult<ConnectOptions> {
    let mode = config.security_mode;
    let opts = ConnectOptions::new()
        .name(CLIENT_NAME)
        .connection_timeout(config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT));

    let opts = match mode {
        NatsSecurityMode::None => opts,
        NatsSecurityMode::UserPassword => {
            let user = required(config.username.as_deref(), "username", mode)?;
            let pass = required(config.password.as_deref(), "password", mode)?;
            opts.user_and_password(user.to_owned(), pass.to_owned())
        }
        NatsSecurityMode::Token => {
            opts.token(required(config.token.as_deref(), "token", mode)?.to_owned())
        }
        NatsSecurityMode::Nkey => {
            let path = required(config.nkey_seed_path.as_deref(), "nkey_seed_path", mode)?;
            let seed = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| config_err(format!("cannot read nkey seed {}: {e}", path.display())))?;
            opts.nkey(seed.trim().to_owned())
        }
        NatsSecurityMode::Tls => {
            let cert = required(config.tls_cert_path.as_deref(), "tls_cert_path", mode)?;
            let key = required(config.tls_key_path.as_deref(), "tls_key_path", mode)?;
            opts.add_client_certificate(cert.to_path_buf(), key.to_path_buf())
                .require_tls(true)
        }
        NatsSecurityMode::CredsFile => {
            let path = required(config.creds_file_path.as_deref(), "creds_file_path", mode)?;
            opts.credentials_file(path).await.map_err(|e| {
                config_err(format!("cannot load credentials {}: {e}", path.display()))
            })?
        }
    };

    Ok(match &config.tls_ca_path {
        Some(ca) => opts.add_root_certificates(ca.clone()).require_tls(true),
        None => opts,
    })
}

/// Connect to the configured servers.
///
/// A failed connect is retried `connect_retry_max` times, doubling the wait
/// each time. Config errors are returned straight away.
pub async fn connect(config: &NatsConfig) -> RegistryResult<Client> {
    let addrs = server_addrs(config)?;
    let attempts = config.connect_retry_max.saturating_add(1);
    info!(servers = ?config.servers, mode = ?config.security_mode, attempts, "connecting to NATS");

    let mut delay = FIRST_RETRY_DELAY;
    let mut attempt = 1;
    loop {
        // ConnectOptions is consumed by connect
        let opts = connect_options(config).await?;
        let err = match opts.connect(addrs.clone()).await {
            Ok(client) => {
                debug!(attempt, "connected to NATS");
                return Ok(client);
            }
            Err(err) => err,
        };
        if attempt >= attempts {
            return Err(RegistryError::Transport(format!(
                "no NATS connection after {attempts} attempt(s): {err}"
            )));
        }
        warn!(attempt, attempts, %err, retry_in = ?delay, "NATS connect failed");
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2).min(MAX_RETRY_DELAY);
        attempt += 1;
    }
}

/// Open the KV bucket `bucket`, creating it when it doesn't exist yet.
pub async fn open_bucket(client: &Client, bucket: &str, history: i64) -> RegistryResult<kv::Store> {
    let js = jetstream::new(client.clone());
    match js.get_key_value(bucket).await {
        Ok(store) => Ok(store),
        Err(err) => {
            info!(bucket, %err, "claims bucket not found, creating it");
            js.create_key_value(kv::Config {
                bucket: bucket.to_owned(),
                history,
                ..Default::default()
            })
            .await
            .map_err(|e| RegistryError::Transport(format!("cannot create KV bucket {bucket}: {e}")))
        }
    }
}

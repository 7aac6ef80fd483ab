//! Process configuration
//!
//! Flags fall back to the environment variables of the same name, then to
//! defaults. [`Config::from_cli`] validates everything once; the result is
//! immutable and handed to each component.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use mediaboot_bmc::Credentials;
use mediaboot_iso::{LabelError, VolumeLabel};
use mediaboot_server::{MediaRoute, ServerConfig, TlsConfig};
use thiserror::Error;
use tracing::Level;
use url::Url;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Build a configuration ISO, serve it and boot a server from it via Redfish virtual media",
    long_about = None
)]
pub struct Cli {
    /// Data root; images are written to <DATA_DIR>/isos
    #[arg(long, env = "DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Default log level for mediaboot crates (RUST_LOG overrides)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0")]
    pub listen_addr: String,

    /// Externally reachable base URL of this server; required with --bmc-address
    /// [default: http(s)://localhost:<PORT>]
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// PEM private key; serve TLS when given together with --https-cert-file
    #[arg(long, env = "HTTPS_KEY_FILE")]
    pub https_key_file: Option<String>,

    /// PEM certificate chain
    #[arg(long, env = "HTTPS_CERT_FILE")]
    pub https_cert_file: Option<String>,

    /// Redfish address including the system path, e.g. https://10.0.0.2/redfish/v1/Systems/1
    #[arg(long, env = "BMC_ADDRESS")]
    pub bmc_address: Option<String>,

    #[arg(long, env = "BMC_USER", default_value = "")]
    pub bmc_user: String,

    #[arg(long, env = "BMC_PASSWORD", default_value = "", hide_env_values = true)]
    pub bmc_password: String,

    /// Skip TLS certificate verification toward the BMC
    #[arg(long, env = "BMC_INSECURE", default_value_t = false)]
    pub bmc_insecure: bool,

    #[arg(long, env = "BMC_TIMEOUT_SECS", default_value_t = 30)]
    pub bmc_timeout_secs: u64,

    /// Seconds to keep the media inserted after the reset before ejecting it; 0 disables
    #[arg(long, env = "DWELL_SECS", default_value_t = 300)]
    pub dwell_secs: u64,

    #[arg(long, env = "IMAGE_NAME", default_value = "test-config.iso")]
    pub image_name: String,

    #[arg(long, env = "VOLUME_LABEL", default_value = "test-config")]
    pub volume_label: String,

    /// Directory copied into the image instead of the default config payload
    #[arg(long, env = "INPUT_DIR")]
    pub input_dir: Option<String>,

    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

/// Error type for configuration validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),

    #[error("invalid listen address {addr:?}: {source}")]
    InvalidListenAddr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid BMC address {address:?}: {reason}")]
    InvalidBmcAddress { address: String, reason: String },

    #[error("BASE_URL must be set when BMC_ADDRESS is; the BMC fetches the image from it")]
    MissingBaseUrl,

    #[error("invalid volume label: {0}")]
    InvalidLabel(#[from] LabelError),

    #[error("invalid image name {0:?}: must be a plain file name")]
    InvalidImageName(String),
}

/// Management endpoint settings
#[derive(Debug, Clone)]
pub struct BmcSettings {
    pub address: String,
    pub credentials: Credentials,
    pub insecure: bool,
    pub timeout: Duration,
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_level: Level,
    pub listen_addr: SocketAddr,
    pub base_url: Url,
    pub route: MediaRoute,
    pub tls: Option<TlsConfig>,
    /// Set when only one TLS file was given; names the unset one
    pub tls_missing: Option<&'static str>,
    /// `None` disables orchestration
    pub bmc: Option<BmcSettings>,
    pub dwell: Option<Duration>,
    pub image_name: String,
    pub volume_label: VolumeLabel,
    pub input_dir: Option<PathBuf>,
    pub shutdown_grace: Duration,
}

/// Treat empty values (e.g. `HTTPS_KEY_FILE=`) as unset
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Config {
    /// Validate parsed arguments into a configuration
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let log_level = Level::from_str(&cli.log_level)
            .map_err(|_| ConfigError::InvalidLogLevel(cli.log_level.clone()))?;

        let ip = IpAddr::from_str(&cli.listen_addr).map_err(|source| {
            ConfigError::InvalidListenAddr {
                addr: cli.listen_addr.clone(),
                source,
            }
        })?;
        let listen_addr = SocketAddr::new(ip, cli.port);

        // TLS only when both files are given, plain HTTP otherwise
        let (tls, tls_missing) =
            match (non_empty(cli.https_key_file), non_empty(cli.https_cert_file)) {
                (Some(key_path), Some(cert_path)) => (
                    Some(TlsConfig {
                        cert_path: PathBuf::from(cert_path),
                        key_path: PathBuf::from(key_path),
                    }),
                    None,
                ),
                (None, None) => (None, None),
                (Some(_), None) => (None, Some("HTTPS_CERT_FILE")),
                (None, Some(_)) => (None, Some("HTTPS_KEY_FILE")),
            };

        let explicit_base_url = non_empty(cli.base_url);
        let base_url_given = explicit_base_url.is_some();
        let base_url = explicit_base_url.unwrap_or_else(|| {
            let scheme = if tls.is_some() { "https" } else { "http" };
            format!("{}://localhost:{}", scheme, cli.port)
        });
        let base_url = parse_http_url(&base_url).map_err(|reason| ConfigError::InvalidBaseUrl {
            url: base_url.clone(),
            reason,
        })?;

        let bmc = match non_empty(cli.bmc_address) {
            Some(address) => {
                if !base_url_given {
                    return Err(ConfigError::MissingBaseUrl);
                }
                parse_http_url(&address).map_err(|reason| ConfigError::InvalidBmcAddress {
                    address: address.clone(),
                    reason,
                })?;
                Some(BmcSettings {
                    address,
                    credentials: Credentials::new(cli.bmc_user, cli.bmc_password),
                    insecure: cli.bmc_insecure,
                    timeout: Duration::from_secs(cli.bmc_timeout_secs),
                })
            }
            None => None,
        };

        let image_name = cli.image_name;
        let plain_name = Path::new(&image_name).file_name().and_then(|n| n.to_str())
            == Some(image_name.as_str());
        if !plain_name {
            return Err(ConfigError::InvalidImageName(image_name));
        }

        Ok(Self {
            data_dir: cli.data_dir,
            log_level,
            listen_addr,
            base_url,
            route: MediaRoute::default(),
            tls,
            tls_missing,
            bmc,
            dwell: (cli.dwell_secs > 0).then(|| Duration::from_secs(cli.dwell_secs)),
            image_name,
            volume_label: VolumeLabel::new(cli.volume_label)?,
            input_dir: non_empty(cli.input_dir).map(PathBuf::from),
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }

    /// Directory served by the media server
    pub fn image_dir(&self) -> PathBuf {
        self.data_dir.join("isos")
    }

    /// Where the image is written inside the image directory
    pub fn image_path(&self) -> PathBuf {
        self.image_dir().join(&self.image_name)
    }

    /// Media server settings derived from this configuration
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.listen_addr, self.image_dir())
            .with_route(self.route.clone())
            .with_tls(self.tls.clone())
    }

    /// Default `EnvFilter` directives, used when RUST_LOG is not set
    pub fn log_directives(&self) -> String {
        format!(
            "mediaboot={level},mediaboot_iso={level},mediaboot_bmc={level},mediaboot_server={level},tower_http={level},hyper=warn,reqwest=warn,rustls=warn",
            level = self.log_level.as_str().to_lowercase()
        )
    }
}

fn parse_http_url(value: &str) -> Result<Url, String> {
    let url = Url::parse(value).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(url)
}

//! Mediaboot Media Server
//!
//! Serves the image directory read-only so a BMC (and the booting firmware)
//! can fetch the image by URL. TLS is used when both a certificate and a key
//! are configured.
//!
//! # Example
//!
//! ```no_run
//! use mediaboot_server::{MediaServer, ServerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::new("0.0.0.0:8080".parse()?, "/var/lib/mediaboot/isos");
//! let handle = MediaServer::new(config).start().await?;
//!
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown(Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod route;
pub mod server;
pub mod tls;

pub use error::{Result, ServerError, ShutdownError};
pub use route::{MediaRoute, DEFAULT_PREFIX};
pub use server::{
    media_router, MediaServer, ServerConfig, ServerHandle, ShutdownOutcome, TlsConfig,
};

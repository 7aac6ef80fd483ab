//! Common types for BMC operations

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{BmcError, Result};

/// Kind of removable media a virtual media slot can emulate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    /// Optical disc
    Cd,
    Dvd,
    Floppy,
    UsbStick,
    HardDrive,
    Other(String),
}

impl MediaKind {
    /// Parse a Redfish `MediaTypes` value
    pub fn from_redfish(value: &str) -> Self {
        match value {
            "CD" => MediaKind::Cd,
            "DVD" => MediaKind::Dvd,
            "Floppy" => MediaKind::Floppy,
            "USBStick" => MediaKind::UsbStick,
            "HardDrive" => MediaKind::HardDrive,
            other => MediaKind::Other(other.to_string()),
        }
    }

    /// Redfish `MediaTypes` value
    pub fn as_str(&self) -> &str {
        match self {
            MediaKind::Cd => "CD",
            MediaKind::Dvd => "DVD",
            MediaKind::Floppy => "Floppy",
            MediaKind::UsbStick => "USBStick",
            MediaKind::HardDrive => "HardDrive",
            MediaKind::Other(other) => other,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reset action applied to a managed system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    On,
}

impl ResetType {
    /// Redfish `ResetType` value
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetType::On => "On",
        }
    }
}

impl fmt::Display for ResetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote machine as seen through the management endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedSystem {
    pub endpoint: Url,
    pub id: String,
    pub resource_path: String,
    /// Resource paths of the managers of this system, in discovery order
    pub manager_refs: Vec<String>,
    /// Action name (e.g. `ComputerSystem.Reset`) to target path, as advertised
    pub action_targets: HashMap<String, String>,
}

/// A virtual media slot exposed by a manager
///
/// Always a snapshot of remote state taken at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMediaResource {
    pub id: String,
    pub resource_path: String,
    pub supported_media_kinds: BTreeSet<MediaKind>,
    pub inserted: bool,
    pub current_image_url: Option<String>,
    pub action_targets: HashMap<String, String>,
}

impl VirtualMediaResource {
    /// Whether the slot can emulate `kind`
    pub fn supports(&self, kind: &MediaKind) -> bool {
        self.supported_media_kinds.contains(kind)
    }
}

/// Parameters of an insert-by-URL request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertMedia {
    pub image_url: String,
    pub inserted: bool,
    pub write_protected: bool,
}

impl InsertMedia {
    /// Insert `image_url`, marked inserted and write-protected
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            inserted: true,
            write_protected: true,
        }
    }
}

/// Management credentials
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Create new credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where to boot and what to boot from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootTarget {
    /// Scheme, host and port of the management endpoint
    pub endpoint: Url,
    /// Resource path of the managed system; `None` selects the first system
    pub system_path: Option<String>,
    pub credentials: Credentials,
    pub image_url: Url,
}

impl BootTarget {
    /// Build a target from a management address such as
    /// `https://10.0.0.2/redfish/v1/Systems/System.Embedded.1`
    pub fn from_address(address: &str, credentials: Credentials, image_url: Url) -> Result<Self> {
        let parsed = Url::parse(address).map_err(|e| {
            BmcError::InvalidConfig(format!("invalid management address {}: {}", address, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(BmcError::InvalidConfig(format!(
                "management address {} must be an http(s) URL with a host",
                address
            )));
        }

        let path = parsed.path().trim_end_matches('/');
        let system_path = (!path.is_empty()).then(|| path.to_string());

        let mut endpoint = parsed.clone();
        endpoint.set_path("/");
        endpoint.set_query(None);
        endpoint.set_fragment(None);

        Ok(Self {
            endpoint,
            system_path,
            credentials,
            image_url,
        })
    }

    /// System path for log and error messages
    pub fn system_label(&self) -> &str {
        self.system_path.as_deref().unwrap_or("<first system>")
    }
}

/// Redfish client configuration
#[derive(Debug, Clone)]
pub struct RedfishConfig {
    /// Skip TLS verification (for self-signed certs)
    pub insecure: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RedfishConfig {
    /// Create new Redfish config with certificate verification and a 30s timeout
    pub fn new() -> Self {
        Self {
            insecure: false,
            timeout: Duration::from_secs(30),
        }
    }

    /// Allow insecure TLS (self-signed certs)
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RedfishConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_url() -> Url {
        Url::parse("http://10.0.0.5:8080/images/test-config.iso").unwrap()
    }

    #[test]
    fn test_media_kind_parsing() {
        assert_eq!(MediaKind::from_redfish("CD"), MediaKind::Cd);
        assert_eq!(MediaKind::from_redfish("USBStick"), MediaKind::UsbStick);
        assert_eq!(
            MediaKind::from_redfish("Tape"),
            MediaKind::Other("Tape".to_string())
        );
        assert_eq!(MediaKind::Dvd.to_string(), "DVD");
    }

    #[test]
    fn test_boot_target_from_address() {
        let target = BootTarget::from_address(
            "https://bmc.local:8443/redfish/v1/Systems/System.Embedded.1",
            Credentials::new("root", "calvin"),
            image_url(),
        )
        .unwrap();

        assert_eq!(target.endpoint.as_str(), "https://bmc.local:8443/");
        assert_eq!(
            target.system_path.as_deref(),
            Some("/redfish/v1/Systems/System.Embedded.1")
        );
    }

    #[test]
    fn test_boot_target_without_path() {
        for address in ["https://bmc.local", "https://bmc.local/"] {
            let target =
                BootTarget::from_address(address, Credentials::default(), image_url()).unwrap();
            assert_eq!(target.system_path, None);
            assert_eq!(target.system_label(), "<first system>");
        }
    }

    #[test]
    fn test_boot_target_invalid() {
        assert!(matches!(
            BootTarget::from_address("not a url", Credentials::default(), image_url()),
            Err(BmcError::InvalidConfig(_))
        ));
        assert!(matches!(
            BootTarget::from_address("ftp://bmc.local/x", Credentials::default(), image_url()),
            Err(BmcError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_redfish_config() {
        let config = RedfishConfig::new();
        assert!(!config.insecure);
        assert_eq!(config.timeout, Duration::from_secs(30));

        let config = config
            .with_insecure(true)
            .with_timeout(Duration::from_secs(5));
        assert!(config.insecure);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}

//! The URL space images are served under
//!
//! The server mounts the image directory at [`MediaRoute::mount_path`] and the
//! URL handed to the BMC is built with [`MediaRoute::url_for`], so the two
//! can't drift apart.

use url::Url;

/// Path prefix images are served under
pub const DEFAULT_PREFIX: &str = "images";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRoute {
    prefix: String,
}

impl MediaRoute {
    /// Leading and trailing slashes are ignored; an empty prefix serves from `/`
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.as_ref().trim_matches('/').to_string(),
        }
    }

    /// Prefix without leading or trailing slashes
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Absolute path the image directory is mounted at
    pub fn mount_path(&self) -> String {
        format!("/{}", self.prefix)
    }

    /// Public URL of `file_name` below an externally reachable `base` URL
    pub fn url_for(&self, base: &Url, file_name: &str) -> Result<Url, url::ParseError> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        if self.prefix.is_empty() {
            base.join(file_name)
        } else {
            base.join(&format!("{}/{}", self.prefix, file_name))
        }
    }
}

impl Default for MediaRoute {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_path() {
        assert_eq!(MediaRoute::default().mount_path(), "/images");
        assert_eq!(MediaRoute::new("/isos/").mount_path(), "/isos");
        assert_eq!(MediaRoute::new("").mount_path(), "/");
    }

    #[test]
    fn test_url_for() {
        let route = MediaRoute::default();

        let base = Url::parse("http://10.0.0.5:8080").unwrap();
        assert_eq!(
            route.url_for(&base, "test-config.iso").unwrap().as_str(),
            "http://10.0.0.5:8080/images/test-config.iso"
        );

        // base URLs behind a reverse proxy keep their path
        let base = Url::parse("https://boot.example.com/lab1").unwrap();
        assert_eq!(
            route.url_for(&base, "test-config.iso").unwrap().as_str(),
            "https://boot.example.com/lab1/images/test-config.iso"
        );
    }

    #[test]
    fn test_url_for_matches_mount_path() {
        let route = MediaRoute::new("media");
        let base = Url::parse("http://localhost:8080/").unwrap();
        let url = route.url_for(&base, "a.iso").unwrap();
        assert_eq!(url.path(), format!("{}/a.iso", route.mount_path()));
    }
}

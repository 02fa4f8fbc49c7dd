//! Locations of the benchmark files.

use dfbench_types::SizeTier;
use url::Url;
use uuid::Uuid;

use crate::error::Result;

/// Directory inside client pods that downloads are written to.
pub const OUTPUT_DIR: &str = "/tmp";

/// Resolves download URLs on the file server deployed alongside the benchmark.
#[derive(Clone, Debug)]
pub struct FileServer {
    namespace: String,
}

impl FileServer {
    /// Creates a resolver for the file server service in `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Returns the URL of the file for `tier`.
    ///
    /// Every call carries a fresh `uuid` query parameter, so no intermediate cache can serve a
    /// previous download and each observation is distinguishable.
    pub fn file_url(&self, tier: SizeTier, tag: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("http://file-server.{}.svc", self.namespace))?;
        url.set_path(tier.as_str());
        url.query_pairs_mut()
            .append_pair("tag", tag)
            .append_pair("uuid", &Uuid::new_v4().to_string());
        Ok(url)
    }
}

/// Returns a unique path in [`OUTPUT_DIR`] to write a download of `tier` to.
pub fn output_path(tier: SizeTier, tag: &str) -> String {
    format!("{OUTPUT_DIR}/{tier}-{tag}-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn url_layout() {
        let server = FileServer::new("dragonfly-system");
        for tier in SizeTier::ALL {
            let url = server.file_url(tier, "dfget").unwrap();
            assert_eq!(url.scheme(), "http");
            assert_eq!(url.host_str(), Some("file-server.dragonfly-system.svc"));
            assert_eq!(url.path(), format!("/{tier}"));

            let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
            assert_eq!(query["tag"], "dfget");
            assert!(Uuid::parse_str(&query["uuid"]).is_ok());
        }
    }

    #[test]
    fn token_is_unique_per_call() {
        let server = FileServer::new("dragonfly-system");
        let a = server.file_url(SizeTier::Small, "proxy").unwrap();
        let b = server.file_url(SizeTier::Small, "proxy").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.path(), b.path());
    }

    #[test]
    fn rejects_invalid_namespace() {
        let server = FileServer::new("not a host");
        assert!(server.file_url(SizeTier::Nano, "dfget").is_err());
    }

    #[test]
    fn output_paths_are_unique() {
        let a = output_path(SizeTier::Nano, "dfget");
        let b = output_path(SizeTier::Nano, "dfget");
        assert_ne!(a, b);
        assert!(a.starts_with("/tmp/nano-dfget-"));
    }
}

//! The fixed list of resources a version must cache before it is installed.

use pwacache_common::{Error, Result};
use url::Url;

/// Ordered, de-duplicated set of root-relative resource paths.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceManifest {
    paths: Vec<String>,
}

impl ResourceManifest {
    /// Build a manifest, keeping the first occurrence of duplicated paths.
    pub fn new<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut manifest = Self::default();
        for path in paths {
            let path = path.into();
            if !path.starts_with('/') {
                return Err(Error::InvalidArgument(format!(
                    "manifest path {path:?} must be root-relative"
                )));
            }
            if !manifest.paths.contains(&path) {
                manifest.paths.push(path);
            }
        }
        Ok(manifest)
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Resolve every path against the origin, in manifest order.
    pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>> {
        self.paths
            .iter()
            .map(|path| {
                origin
                    .join(path)
                    .map_err(|e| Error::InvalidArgument(format!("{path}: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_dedup() {
        let manifest = ResourceManifest::new(["/a.js", "/b.js", "/a.js", "/c.js"]).unwrap();
        assert_eq!(manifest.paths(), &["/a.js", "/b.js", "/c.js"]);
        assert_eq!(manifest.len(), 3);
    }

    #[test]
    fn test_relative_path_rejected() {
        assert!(ResourceManifest::new(["a.js"]).is_err());
    }

    #[test]
    fn test_resolve() {
        let origin = Url::parse("https://app.example/").unwrap();
        let manifest = ResourceManifest::new(["/", "/js/app.js?v=2"]).unwrap();
        let urls = manifest.resolve(&origin).unwrap();

        assert_eq!(urls[0].as_str(), "https://app.example/");
        assert_eq!(urls[1].as_str(), "https://app.example/js/app.js?v=2");
    }
}

//! An origin: its network, its cache storage and its deployed worker script.

use bytes::Bytes;
use pwacache_common::{CacheConfig, Error, Result};
use pwacache_worker::{CacheStorage, Fetcher, MemoryOrigin, Request, SharedStorage};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// A deployed worker script.
///
/// The script body is the JSON form of the version's [`CacheConfig`], so two
/// deployments are the same worker exactly when their bytes are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerScript {
    config: CacheConfig,
}

impl WorkerScript {
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Parse a script body fetched from the network.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let config: CacheConfig = serde_json::from_slice(body)
            .map_err(|e| Error::config_with_source("invalid worker script", e))?;
        Self::new(config)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(serde_json::to_vec(&self.config)?.into())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

/// Publish `config` as the worker script at `script_url`.
pub fn deploy(server: &MemoryOrigin, script_url: &str, config: &CacheConfig) -> Result<()> {
    let script = WorkerScript::new(config.clone())?;
    server.put(script_url, script.to_bytes()?);
    debug!(script = script_url, cache = %config.cache_name(), "Deployed worker script");
    Ok(())
}

/// Everything the host shares between the registrations and pages of one
/// origin.
pub struct Origin {
    url: Url,
    storage: SharedStorage,
    fetcher: Arc<dyn Fetcher>,
}

impl Origin {
    pub fn new(url: Url, fetcher: Arc<dyn Fetcher>) -> Arc<Self> {
        Arc::new(Self {
            url,
            storage: CacheStorage::shared(),
            fetcher,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Resolve a root-relative path on this origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.url
            .join(path)
            .map_err(|e| Error::InvalidArgument(format!("{path}: {e}")))
    }

    /// Names of the stores currently in cache storage, sorted.
    pub async fn cache_names(&self) -> Vec<String> {
        let storage = self.storage.read().await;
        storage.keys().into_iter().map(String::from).collect()
    }

    /// Fetch the worker script from the network, bypassing every cache.
    pub(crate) async fn fetch_script(&self, script_url: &str) -> Result<(Bytes, WorkerScript)> {
        let url = self.resolve(script_url)?;
        let response = self
            .fetcher
            .fetch(&Request::get(url.clone()))
            .await
            .map_err(|e| e.into_error(&url))?;
        if !response.ok() {
            return Err(Error::fetch_failed(
                url.as_str(),
                format!("status {}", response.status),
            ));
        }
        let script = WorkerScript::parse(&response.body)?;
        Ok((response.body, script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_round_trips_through_deploy() {
        let url = Url::parse("https://app.example/").unwrap();
        let server = MemoryOrigin::new(url);
        let config = CacheConfig {
            version: 3,
            ..Default::default()
        };
        deploy(&server, "/service-worker.js", &config).unwrap();

        let script = WorkerScript::new(config.clone()).unwrap();
        let parsed = WorkerScript::parse(&script.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.config(), &config);
    }

    #[test]
    fn test_invalid_script_rejected() {
        assert!(WorkerScript::parse(b"not json").is_err());

        let config = CacheConfig {
            prefix: String::new(),
            ..Default::default()
        };
        assert!(WorkerScript::new(config).is_err());
    }

    #[tokio::test]
    async fn test_fetch_script_missing() {
        let url = Url::parse("https://app.example/").unwrap();
        let origin = Origin::new(url.clone(), Arc::new(MemoryOrigin::new(url)));

        let err = origin.fetch_script("/service-worker.js").await.unwrap_err();
        assert_eq!(err.category(), "fetch_failed");
    }
}

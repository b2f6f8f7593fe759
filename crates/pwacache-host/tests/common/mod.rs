#![allow(dead_code)]

use pwacache_common::CacheConfig;
use pwacache_host::{deploy, Origin, ServiceWorkerContainer};
use pwacache_worker::MemoryOrigin;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const SCRIPT: &str = "/service-worker.js";
pub const INDEX: &str = "<html><script src=\"/sw-update.js?v=1\"></script></html>";

pub struct Site {
    pub server: Arc<MemoryOrigin>,
    pub origin: Arc<Origin>,
    pub container: Arc<ServiceWorkerContainer>,
}

impl Site {
    /// An origin serving the index document, the bootstrap script and `assets`.
    pub fn new(assets: &[(&str, &str)]) -> Self {
        let url = Url::parse("https://app.example/").unwrap();
        let server = Arc::new(MemoryOrigin::new(url.clone()));
        server.put("/", INDEX);
        server.put("/index.html", INDEX);
        server.put("/sw-update.js", "bootstrap");
        for (path, body) in assets {
            server.put(path, body.to_string());
        }

        let origin = Origin::new(url, server.clone());
        let container = ServiceWorkerContainer::new(origin.clone());
        Self {
            server,
            origin,
            container,
        }
    }

    pub fn deploy(&self, config: &CacheConfig) {
        deploy(&self.server, SCRIPT, config).unwrap();
    }

    pub async fn body(&self, page: &pwacache_host::Page, path: &str) -> String {
        let response = self.container.get(page, path).await.unwrap();
        String::from_utf8(response.body.to_vec()).unwrap()
    }
}

pub fn config(version: u64, manifest: &[&str]) -> CacheConfig {
    CacheConfig {
        prefix: "app".to_string(),
        version,
        manifest: manifest.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

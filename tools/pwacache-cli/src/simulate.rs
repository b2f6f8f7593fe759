//! Dry run of a full deploy and update cycle against a static directory.

use pwacache_common::{AppConfig, Error, OptionExt, Result};
use pwacache_coordinator::{PromptState, UpdateCoordinator};
use pwacache_host::{deploy, Origin, ServiceWorkerContainer};
use pwacache_worker::MemoryOrigin;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one simulated update cycle.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub installed_cache: String,
    pub next_cache: String,
    pub manifest: Vec<String>,
    /// Stores present while the new version was waiting.
    pub caches_while_waiting: Vec<String>,
    pub prompt_shown: bool,
    /// Stores present after the page reloaded.
    pub caches_after_reload: Vec<String>,
    pub reloads: usize,
    /// Manifest resources the reloaded page could load while offline.
    pub offline_hits: usize,
}

/// Serve `root` at `origin`, install the configured version, deploy the next
/// version, accept the prompt and report what happened.
pub async fn simulate(config: &AppConfig, root: &Path, origin: Url) -> Result<SimulationReport> {
    config.validate()?;
    let server = Arc::new(
        MemoryOrigin::from_dir(origin.clone(), root).map_err(|e| e.into_error(&origin))?,
    );
    let script_url = config.coordinator.script_url.as_str();
    deploy(&server, script_url, &config.cache)?;

    let host = Origin::new(origin, server.clone());
    let container = ServiceWorkerContainer::new(host.clone());
    let (page, events) = container.open_page("/").await?;
    let mut coordinator =
        UpdateCoordinator::start(container.clone(), page.clone(), events, config.coordinator.clone())
            .await?;
    let registration = container
        .registration_for(script_url)
        .await
        .ok_or_not_found(script_url)?;
    if registration.active().is_none() {
        if let Some(err) = registration.take_install_error() {
            coordinator.shutdown();
            return Err(err);
        }
    }
    wait_for(|| page.controller_id().is_some()).await?;
    let installed_cache = config.cache.cache_name();
    info!(cache = %installed_cache, "Initial version active");

    let mut next = config.cache.clone();
    next.version += 1;
    deploy(&server, script_url, &next)?;
    coordinator.check_now();

    tokio::time::timeout(STEP_TIMEOUT, coordinator.wait_for_prompt(PromptState::Shown))
        .await
        .map_err(|_| Error::Timeout(STEP_TIMEOUT))??;
    let prompt_shown = page.is_prompt_visible();
    let caches_while_waiting = host.cache_names().await;

    coordinator.apply();
    wait_for(|| page.reload_count() > 0).await?;
    let caches_after_reload = host.cache_names().await;
    info!(cache = %next.cache_name(), "Update applied");

    server.set_offline(true);
    let mut offline_hits = 0;
    for path in &next.manifest {
        if let Ok(response) = container.get(&page, path).await {
            if response.from_cache {
                offline_hits += 1;
            }
        }
    }

    Ok(SimulationReport {
        installed_cache,
        next_cache: next.cache_name(),
        manifest: next.manifest.clone(),
        caches_while_waiting,
        prompt_shown,
        caches_after_reload,
        reloads: page.reload_count(),
        offline_hits,
    })
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> Result<()> {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| Error::Timeout(STEP_TIMEOUT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwacache_common::CacheConfig;

    #[tokio::test]
    async fn test_simulate_static_site() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            r#"<script src="/sw-update.js?v=1"></script>"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("sw-update.js"), "// bootstrap").unwrap();
        std::fs::create_dir(dir.path().join("js")).unwrap();
        std::fs::write(dir.path().join("js").join("app.js"), "// app").unwrap();

        let config = AppConfig {
            cache: CacheConfig {
                prefix: "site".to_string(),
                manifest: vec!["/".into(), "/index.html".into(), "/js/app.js".into()],
                ..Default::default()
            },
            ..Default::default()
        };

        let origin = Url::parse("https://site.example/").unwrap();
        let report = simulate(&config, dir.path(), origin).await.unwrap();

        assert_eq!(report.installed_cache, "site-v1");
        assert_eq!(report.next_cache, "site-v2");
        assert!(report.prompt_shown);
        assert_eq!(report.caches_while_waiting, vec!["site-v1", "site-v2"]);
        assert_eq!(report.caches_after_reload, vec!["site-v2"]);
        assert_eq!(report.reloads, 1);
        assert_eq!(report.offline_hits, 3);
    }

    #[tokio::test]
    async fn test_simulate_missing_manifest_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        let config = AppConfig {
            cache: CacheConfig {
                manifest: vec!["/".into(), "/missing.js".into()],
                ..Default::default()
            },
            ..Default::default()
        };

        let origin = Url::parse("https://site.example/").unwrap();
        let err = simulate(&config, dir.path(), origin).await.unwrap_err();
        assert_eq!(err.category(), "install_failed");
        assert!(err.to_string().contains("/missing.js"));
    }
}

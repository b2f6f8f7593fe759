//! Version bumps for a new deployment.

use chrono::{DateTime, Utc};
use pwacache_common::{AppConfig, Error, Result};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// What a bump changed.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct BumpReport {
    pub previous_cache: String,
    pub cache: String,
    pub bootstrap_revision: u64,
    pub build_time: DateTime<Utc>,
    /// Number of script references rewritten in the index document.
    pub rewritten_references: usize,
}

/// Increment the cache version and bootstrap revision in `config_path`, stamp
/// the build time, and point the bootstrap script references in `index` at the
/// new revision.
pub fn bump(config_path: &Path, index: Option<&Path>) -> Result<BumpReport> {
    let mut config = AppConfig::load(config_path)?;
    let previous_cache = config.cache.cache_name();

    config.cache.version += 1;
    config.coordinator.bootstrap_revision += 1;
    let revision = config.coordinator.bootstrap_revision;
    let build_time = Utc::now();
    config.cache.build_time = Some(build_time);

    let mut rewritten_references = 0;
    if let Some(index) = index {
        let html = std::fs::read_to_string(index)?;
        let (updated, count) = rewrite_revisions(&html, &config.cache.no_cache, revision)?;
        if count == 0 {
            return Err(Error::NotFound(format!(
                "no bootstrap script reference in {}",
                index.display()
            )));
        }
        std::fs::write(index, updated)?;
        rewritten_references = count;
    }

    config.save(config_path)?;
    info!(from = %previous_cache, to = %config.cache.cache_name(), revision, %build_time, "Bumped deployment");

    Ok(BumpReport {
        previous_cache,
        cache: config.cache.cache_name(),
        bootstrap_revision: revision,
        build_time,
        rewritten_references,
    })
}

/// Replace `<script>?v=N` with `<script>?v=<revision>` for every script.
pub fn rewrite_revisions(html: &str, scripts: &[String], revision: u64) -> Result<(String, usize)> {
    let mut html = html.to_string();
    let mut count = 0;

    for script in scripts {
        let pattern = format!(r"{}\?v=\d+", regex::escape(script));
        let re = Regex::new(&pattern).map_err(|e| Error::internal(e.to_string()))?;
        count += re.find_iter(&html).count();
        html = re
            .replace_all(&html, format!("{script}?v={revision}").as_str())
            .into_owned();
    }

    Ok((html, count))
}

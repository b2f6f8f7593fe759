//! Routing of intercepted requests to a fetch strategy.

use http::Method;
use url::{Origin, Url};

use crate::request::Request;

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted: non-GET or cross-origin.
    Passthrough,
    /// Always from the network, never stored.
    NetworkOnly,
    /// Network, falling back to the store when offline.
    NetworkFirst,
    /// Store, falling back to the network on a miss.
    CacheFirst,
}

/// Decides the route of each request for one origin.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    origin: Origin,
    no_cache: Vec<String>,
}

impl FetchPolicy {
    pub fn new(origin: &Url, no_cache: impl IntoIterator<Item = String>) -> Self {
        Self {
            origin: origin.origin(),
            no_cache: no_cache.into_iter().collect(),
        }
    }

    /// Whether `path` is excluded from caching. Query strings are ignored, so
    /// `/sw-update.js?v=3` matches `/sw-update.js`.
    pub fn is_excluded(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.no_cache.iter().any(|excluded| excluded == path)
    }

    pub fn route(&self, request: &Request) -> Route {
        if request.method != Method::GET || request.url.origin() != self.origin {
            return Route::Passthrough;
        }
        if self.is_excluded(request.url.path()) {
            return Route::NetworkOnly;
        }
        if request.is_navigation() {
            Route::NetworkFirst
        } else {
            Route::CacheFirst
        }
    }
}

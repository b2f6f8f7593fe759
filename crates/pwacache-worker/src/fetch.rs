//! Network access for the worker.
//!
//! The worker only sees the [`Fetcher`] trait. [`HttpFetcher`] talks to a real
//! server; [`MemoryOrigin`] serves a static site from memory and can be taken
//! offline.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

use crate::request::{Request, Response, ResponseType};

/// Errors that can occur while fetching from the network.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network is offline")]
    Offline,

    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    /// Attach the failing URL.
    pub fn into_error(self, url: &Url) -> pwacache_common::Error {
        pwacache_common::Error::fetch_failed_with_source(url.as_str(), self.to_string(), self)
    }
}

/// Issues network requests on behalf of a worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

// ==================== HttpFetcher ====================

/// HTTP fetcher configuration.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("pwacache/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetcher backed by a reqwest client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        debug!(url = %request.url, method = %request.method, "Fetching from network");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let redirected = url != request.url;
        let response_type = if url.origin() == request.url.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        };

        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            redirected,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            body,
            response_type,
            redirected,
            from_cache: false,
        })
    }
}

// ==================== MemoryOrigin ====================

#[derive(Debug, Clone)]
struct Resource {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// An in-memory origin server.
pub struct MemoryOrigin {
    origin: Url,
    resources: Mutex<HashMap<String, Resource>>,
    offline: AtomicBool,
    requests: Mutex<Vec<String>>,
}

impl MemoryOrigin {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            resources: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Load every file under `root`; `index.html` also answers for its directory.
    pub fn from_dir(origin: Url, root: impl AsRef<Path>) -> Result<Self, FetchError> {
        let server = Self::new(origin);
        let root = root.as_ref();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                let mut route = String::new();
                for component in relative.components() {
                    route.push('/');
                    route.push_str(&component.as_os_str().to_string_lossy());
                }
                let body = std::fs::read(&path)?;
                if route.ends_with("/index.html") {
                    let dir_route = route.trim_end_matches("index.html").to_string();
                    server.put(&dir_route, body.clone());
                }
                server.put(&route, body);
            }
        }

        debug!(root = %root.display(), "Loaded static origin");
        Ok(server)
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Serve `body` with status 200 at `path`.
    pub fn put(&self, path: &str, body: impl Into<Bytes>) {
        self.put_with_status(path, StatusCode::OK, body);
    }

    /// Serve `body` with the given status at `path`.
    pub fn put_with_status(&self, path: &str, status: StatusCode, body: impl Into<Bytes>) {
        let mut headers = HeaderMap::new();
        let mime = mime_guess::from_path(path.split('?').next().unwrap_or(path))
            .first_or_octet_stream();
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            headers.insert(CONTENT_TYPE, value);
        }
        let resource = Resource {
            status,
            headers,
            body: body.into(),
        };
        lock(&self.resources).insert(path.to_string(), resource);
    }

    pub fn remove(&self, path: &str) -> bool {
        lock(&self.resources).remove(path).is_some()
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests received so far, as `"METHOD /path"`.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }

    /// Number of requests received for `path`.
    pub fn request_count(&self, path: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|line| line.split_once(' ').map(|(_, p)| p) == Some(path))
            .count()
    }

    pub fn clear_requests(&self) {
        lock(&self.requests).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Fetcher for MemoryOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Offline);
        }
        if request.url.origin() != self.origin.origin() {
            return Err(FetchError::Unreachable(
                request.url.host_str().unwrap_or_default().to_string(),
            ));
        }

        let mut route = request.url.path().to_string();
        if let Some(query) = request.url.query() {
            route.push('?');
            route.push_str(query);
        }
        lock(&self.requests).push(format!("{} {}", request.method, route));

        let resource = lock(&self.resources).get(&route).cloned();
        let response = match resource {
            Some(resource) => Response {
                headers: resource.headers,
                ..Response::new(request.url.clone(), resource.status, resource.body)
            },
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, Bytes::new()),
        };

        trace!(route = %route, status = %response.status, "Served from memory origin");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn origin() -> Url {
        Url::parse("https://app.example/").unwrap()
    }

    #[tokio::test]
    async fn test_memory_origin_serves_and_logs() {
        let server = MemoryOrigin::new(origin());
        server.put("/a.js", "console.log('a')");

        let request = Request::get(origin().join("/a.js").unwrap());
        let response = server.fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.response_type, ResponseType::Basic);
        let content_type = response.headers.get(CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().contains("javascript"));
        assert_eq!(server.request_count("/a.js"), 1);
    }

    #[tokio::test]
    async fn test_memory_origin_missing_is_404() {
        let server = MemoryOrigin::new(origin());
        let request = Request::get(origin().join("/missing.js").unwrap());
        let response = server.fetch(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_memory_origin_offline() {
        let server = MemoryOrigin::new(origin());
        server.put("/a.js", "a");
        server.set_offline(true);

        let request = Request::get(origin().join("/a.js").unwrap());
        assert!(matches!(server.fetch(&request).await, Err(FetchError::Offline)));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_memory_origin_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        std::fs::create_dir(dir.path().join("js")).unwrap();
        std::fs::write(dir.path().join("js").join("app.js"), "app").unwrap();

        let server = MemoryOrigin::from_dir(origin(), dir.path()).unwrap();

        for route in ["/", "/index.html", "/js/app.js"] {
            let request = Request::get(origin().join(route).unwrap());
            let response = server.fetch(&request).await.unwrap();
            assert_eq!(response.status, StatusCode::OK, "{route}");
        }
    }

    #[tokio::test]
    async fn test_http_fetcher_basic_response() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("app"))
            .mount(&mock)
            .await;

        let fetcher = HttpFetcher::new(HttpFetcherConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/app.js", mock.uri())).unwrap();
        let response = fetcher.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.response_type, ResponseType::Basic);
        assert!(!response.redirected);
        assert_eq!(&response.body[..], b"app");
        assert!(response.is_cacheable());
    }

    #[tokio::test]
    async fn test_http_fetcher_same_origin_redirect() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old.js"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new.js"))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("new"))
            .mount(&mock)
            .await;

        let fetcher = HttpFetcher::new(HttpFetcherConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/old.js", mock.uri())).unwrap();
        let response = fetcher.fetch(&Request::get(url)).await.unwrap();

        assert!(response.redirected);
        assert_eq!(response.response_type, ResponseType::Basic);
        assert_eq!(response.url.path(), "/new.js");
    }

    #[tokio::test]
    async fn test_http_fetcher_connection_refused() {
        let fetcher = HttpFetcher::new(HttpFetcherConfig {
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();
        let url = Url::parse("http://127.0.0.1:9/app.js").unwrap();
        let err = fetcher.fetch(&Request::get(url.clone())).await.unwrap_err();

        let err = err.into_error(&url);
        assert_eq!(err.category(), "fetch_failed");
    }
}

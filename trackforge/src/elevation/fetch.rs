//! Tile download abstraction.
//!
//! The elevation service only needs "download this URL to this path"; the
//! trait keeps the network swappable so tests can run against a mock.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// Default timeout for one tile download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors produced while fetching a tile.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Downloads a resource to a local path, overwriting any existing file.
pub trait TileFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), FetchError>>;
}

/// Real fetcher implementation using reqwest.
pub struct HttpTileFetcher {
    client: reqwest::Client,
}

impl HttpTileFetcher {
    /// Creates a fetcher with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Creates a fetcher with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            let body = response.bytes().await?;
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(dest, &body).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock fetcher for testing.
    ///
    /// Serves a fixed body (or fails every request) and counts calls plus
    /// the peak number of concurrently running fetches.
    pub struct MockTileFetcher {
        body: Option<String>,
        delay: Duration,
        fetches: AtomicUsize,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockTileFetcher {
        pub fn serving(body: impl Into<String>) -> Self {
            Self {
                body: Some(body.into()),
                delay: Duration::ZERO,
                fetches: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                body: None,
                delay: Duration::ZERO,
                fetches: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        pub fn peak_in_flight(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl TileFetcher for MockTileFetcher {
        fn fetch<'a>(
            &'a self,
            url: &'a str,
            dest: &'a Path,
        ) -> BoxFuture<'a, Result<(), FetchError>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(running, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.current.fetch_sub(1, Ordering::SeqCst);
                match &self.body {
                    Some(body) => {
                        if let Some(parent) = dest.parent() {
                            tokio::fs::create_dir_all(parent).await?;
                        }
                        tokio::fs::write(dest, body).await?;
                        Ok(())
                    }
                    None => Err(FetchError::Status {
                        status: 503,
                        url: url.to_string(),
                    }),
                }
            })
        }
    }

    #[tokio::test]
    async fn test_mock_fetcher_writes_body() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("N48E011.AAIGrid");
        let mock = MockTileFetcher::serving("ncols 1\nnrows 1\n7\n");

        mock.fetch("http://example.com/tile", &dest).await.unwrap();

        assert_eq!(mock.fetch_count(), 1);
        let written = std::fs::read_to_string(&dest).unwrap();
        assert!(written.starts_with("ncols 1"));
    }

    #[tokio::test]
    async fn test_mock_fetcher_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("N48E011.AAIGrid");
        let mock = MockTileFetcher::failing();

        let result = mock.fetch("http://example.com/tile", &dest).await;
        assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
        assert!(!dest.exists());
    }
}

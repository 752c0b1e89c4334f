//! Blocking asset fetchers
//!
//! Fetchers only turn a reference into `AssetData`. Timeouts, retries and
//! cancellation belong to the caller (see `Engine::load_workflow`).

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::data::{AssetData, DecodedAudio};
use super::manifest::{AssetKind, AssetReference};

/// Responses larger than this are rejected
const MAX_ASSET_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Transport error: {0}")]
    Io(String),

    #[error("Failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Loading cancelled")]
    Cancelled,
}

impl FetchError {
    /// Missing files and 4xx responses won't succeed on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::NotFound(_) | FetchError::Decode { .. } | FetchError::Cancelled => false,
            FetchError::Http { status, .. } => *status >= 500 || *status == 429,
            FetchError::Io(_) | FetchError::Timeout(_) => true,
        }
    }
}

pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, asset: &AssetReference) -> Result<AssetData, FetchError>;
}

fn has_wav_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

/// Turn fetched bytes into asset data: audio `.wav` files are decoded,
/// everything else (event streams, unknown formats) stays raw
pub fn decode_asset(asset: &AssetReference, bytes: Vec<u8>) -> Result<AssetData, FetchError> {
    if asset.kind() == AssetKind::Audio && has_wav_extension(asset.url()) {
        decode_wav(asset.url(), &bytes).map(AssetData::audio)
    } else {
        Ok(AssetData::bytes(bytes))
    }
}

/// Decode WAV to interleaved f32, normalizing integer formats to [-1, 1]
pub fn decode_wav(url: &str, bytes: &[u8]) -> Result<DecodedAudio, FetchError> {
    let decode_err = |e: hound::Error| FetchError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    };

    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(decode_err)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_err)?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(decode_err)?
        }
    };

    Ok(DecodedAudio::new(spec.sample_rate, spec.channels, samples))
}

// ═══════════════════════════════════════════════════════════════════════════
// Local files
// ═══════════════════════════════════════════════════════════════════════════

/// Reads assets from a directory; urls are paths relative to `root`
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl AssetFetcher for FileFetcher {
    fn fetch(&self, asset: &AssetReference) -> Result<AssetData, FetchError> {
        let path = self.resolve(asset.url());
        let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(asset.url().to_string()),
            _ => FetchError::Io(e.to_string()),
        })?;
        decode_asset(asset, bytes)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════

/// Fetches assets over HTTP(S); relative urls are joined onto `base_url`
pub struct HttpFetcher {
    agent: ureq::Agent,
    base_url: Option<String>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn resolve(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !is_http_url(url) => {
                format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
            }
            _ => url.to_string(),
        }
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, asset: &AssetReference) -> Result<AssetData, FetchError> {
        let url = self.resolve(asset.url());
        let response = self.agent.get(&url).call().map_err(|e| match e {
            ureq::Error::Status(404, _) => FetchError::NotFound(url.clone()),
            ureq::Error::Status(status, _) => FetchError::Http {
                status,
                url: url.clone(),
            },
            ureq::Error::Transport(t) => FetchError::Io(t.to_string()),
        })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_ASSET_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Io(e.to_string()))?;

        decode_asset(asset, bytes)
    }
}

pub(crate) fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Sends `http(s)://` urls to an `HttpFetcher` and everything else to a
/// `FileFetcher`
pub struct RoutingFetcher {
    files: FileFetcher,
    http: HttpFetcher,
}

impl RoutingFetcher {
    pub fn new(files: FileFetcher, http: HttpFetcher) -> Self {
        Self { files, http }
    }
}

impl AssetFetcher for RoutingFetcher {
    fn fetch(&self, asset: &AssetReference) -> Result<AssetData, FetchError> {
        if is_http_url(asset.url()) {
            self.http.fetch(asset)
        } else {
            self.files.fetch(asset)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// In-memory fetcher with per-url failures and an optional delay
    #[derive(Default)]
    pub struct MemoryFetcher {
        assets: HashMap<String, AssetData>,
        failures: Mutex<HashMap<String, (usize, FetchError)>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl MemoryFetcher {
        pub fn with_asset(mut self, url: &str, data: AssetData) -> Self {
            self.assets.insert(url.to_string(), data);
            self
        }

        /// Fail the next `times` fetches of `url` with `error`
        pub fn failing(self, url: &str, times: usize, error: FetchError) -> Self {
            if let Ok(mut failures) = self.failures.lock() {
                failures.insert(url.to_string(), (times, error));
            }
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AssetFetcher for MemoryFetcher {
        fn fetch(&self, asset: &AssetReference) -> Result<AssetData, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some((remaining, error)) = failures.get_mut(asset.url()) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(error.clone());
                    }
                }
            }
            self.assets
                .get(asset.url())
                .cloned()
                .ok_or_else(|| FetchError::NotFound(asset.url().to_string()))
        }
    }
}

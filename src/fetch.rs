use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use reqwest::header::{self, HeaderMap, HeaderValue};
use sha2::{Digest as _, Sha224};
use url::Url;

use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("storybookify/", env!("CARGO_PKG_VERSION"));

/// The source site serves the markup dialect this tool understands only when
/// the classic layout is requested.
const CLASSIC_LAYOUT_COOKIE: &str = "enable_classic=1";

/// Salt mixed into the cache file name hash.
const CACHE_SALT: &str = "la;l;vdoids";

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Vec<u8>,
    mime_type: String,
}

/// Blocking HTTP gateway with a layered URL cache.
///
/// Every successful fetch lands in an in-process map keyed by the URL; with a
/// cache directory configured, the same entries are mirrored on disk and a
/// later run can replay them without touching the network. The pipeline is
/// single-threaded, so interior mutability via `RefCell` is all the cache
/// needs.
pub struct Gateway {
    client: reqwest::blocking::Client,
    memory: RefCell<HashMap<String, CacheEntry>>,
    disk_dir: Option<PathBuf>,
}

impl Gateway {
    pub fn new(disk_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(dir) = &disk_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create cache directory: {}", dir.display()))?;
        }

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static(CLASSIC_LAYOUT_COOKIE));
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            memory: RefCell::new(HashMap::new()),
            disk_dir,
        })
    }

    /// Contents of `url` decoded as UTF-8 (lossily; no charset sniffing).
    pub fn fetch_text(&self, url: &Url) -> Result<String> {
        let entry = self.fetch_raw(url)?;
        Ok(String::from_utf8_lossy(&entry.payload).into_owned())
    }

    /// Raw contents of `url` plus the MIME type reported for it.
    pub fn fetch_bytes(&self, url: &Url) -> Result<(Vec<u8>, String)> {
        let entry = self.fetch_raw(url)?;
        Ok((entry.payload, entry.mime_type))
    }

    fn fetch_raw(&self, url: &Url) -> Result<CacheEntry> {
        let key = url.to_string();

        if let Some(entry) = self.memory.borrow().get(&key) {
            return Ok(entry.clone());
        }

        if let Some(entry) = self.disk_lookup(&key)? {
            tracing::info!(%url, "fetched from disk cache");
            self.memory.borrow_mut().insert(key, entry.clone());
            return Ok(entry);
        }

        tracing::info!(%url, "downloading");
        let response = self
            .client
            .get(url.clone())
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|source| Error::Fetch {
                url: key.clone(),
                source,
            })?;

        let mime_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_owned())
            .unwrap_or_else(|| "application/octet-stream".to_owned());
        let payload = response
            .bytes()
            .map_err(|source| Error::Fetch {
                url: key.clone(),
                source,
            })?
            .to_vec();

        let entry = CacheEntry { payload, mime_type };
        self.disk_store(&key, &entry)?;
        self.memory.borrow_mut().insert(key, entry.clone());
        Ok(entry)
    }

    fn cache_paths(&self, key: &str) -> Option<(PathBuf, PathBuf)> {
        let dir = self.disk_dir.as_deref()?;
        let name = cache_file_name(key);
        Some((dir.join(&name), dir.join(format!("{name}MIME"))))
    }

    /// A disk hit requires both the payload file and its MIME sidecar.
    fn disk_lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some((path, mime_path)) = self.cache_paths(key) else {
            return Ok(None);
        };
        if !path.is_file() || !mime_path.is_file() {
            return Ok(None);
        }

        let payload = read_cache_file(&path)?;
        let mime_type = String::from_utf8_lossy(&read_cache_file(&mime_path)?).into_owned();
        Ok(Some(CacheEntry { payload, mime_type }))
    }

    fn disk_store(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let Some((path, mime_path)) = self.cache_paths(key) else {
            return Ok(());
        };

        write_cache_file(&path, &entry.payload)?;
        write_cache_file(&mime_path, entry.mime_type.as_bytes())?;
        Ok(())
    }
}

fn read_cache_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::Cache {
        path: path.to_path_buf(),
        source,
    })
}

fn write_cache_file(path: &Path, payload: &[u8]) -> Result<()> {
    std::fs::write(path, payload).map_err(|source| Error::Cache {
        path: path.to_path_buf(),
        source,
    })
}

fn cache_file_name(key: &str) -> String {
    let mut hasher = Sha224::new();
    hasher.update(key.as_bytes());
    hasher.update(CACHE_SALT.as_bytes());
    hex::encode(hasher.finalize())
}

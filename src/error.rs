use std::path::PathBuf;

use thiserror::Error;

/// Failure classes of the core pipeline.
///
/// Both variants are fatal: nothing is retried against the network, and an
/// unexpected page layout means continuing would silently produce a corrupt
/// book.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or transport failure.
    #[error("could not fetch {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A disk cache entry could not be read or written.
    #[error("cache file {path} is unusable")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Expected markup structure absent or malformed.
    #[error("extraction failed: {0}")]
    Extraction(String),
}

impl Error {
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

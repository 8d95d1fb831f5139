use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use minify_fs::{atomic_write, AtomicWriteError};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://cdn.gea.esac.esa.int/Gaia/gdr3/gaia_source";

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("source identifier {0:?} is not a plain file name")]
    InvalidIdentifier(String),
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("download of {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Makes a source file available locally.
///
/// Implementations must leave `dest` either complete or absent.
pub trait Acquirer {
    fn acquire(&self, source_file_id: &str, dest: &Path) -> Result<(), AcquireError>;
}

#[derive(Clone, Debug)]
pub struct DownloadPolicy {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Downloads `<base_url>/<source_file_id>` over HTTP.
#[derive(Debug)]
pub struct HttpAcquirer {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpAcquirer {
    pub fn new(policy: DownloadPolicy) -> Result<Self, AcquireError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(policy.timeout)
            .build()
            .map_err(AcquireError::Client)?;
        Ok(Self {
            client,
            base_url: policy.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, source_file_id: &str) -> String {
        format!("{}/{source_file_id}", self.base_url)
    }
}

impl Acquirer for HttpAcquirer {
    fn acquire(&self, source_file_id: &str, dest: &Path) -> Result<(), AcquireError> {
        validate_identifier(source_file_id)?;
        let url = self.url_for(source_file_id);
        log::info!("Downloading {url}");

        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|source| AcquireError::Http {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let bytes = atomic_write(dest, |file| response.copy_to(file)).map_err(|err| match err {
            AtomicWriteError::Io(source) => AcquireError::Write {
                path: dest.to_path_buf(),
                source,
            },
            AtomicWriteError::Writer(source) => AcquireError::Http {
                url: url.clone(),
                source,
            },
        })?;
        log::debug!("{url}: wrote {bytes} bytes to {}", dest.display());
        Ok(())
    }
}

/// Identifiers become both a URL path segment and a local file name.
pub fn validate_identifier(source_file_id: &str) -> Result<(), AcquireError> {
    let plain = !source_file_id.is_empty()
        && source_file_id != "."
        && source_file_id != ".."
        && !source_file_id.contains(['/', '\\']);
    if plain {
        Ok(())
    } else {
        Err(AcquireError::InvalidIdentifier(source_file_id.to_string()))
    }
}

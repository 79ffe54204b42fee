// src/cache.rs

//! Binary cache client
//!
//! Before building locally, the builder can probe a remote cache for a
//! prebuilt artifact keyed by its build fingerprint. The wire format is a
//! zstd-compressed tarball at `<base>/<key>.tar.zst` containing the
//! artifact tree rooted at its key directory, with a SHA-256 sidecar at
//! `<base>/<key>.sha256`.
//!
//! Cache failures are never fatal; callers fall back to a local build.

use crate::error::{Error, Result};
use crate::hash::{sha256_file, Fingerprint};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Result of probing the cache for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
}

/// HTTP client for one cache base URL
pub struct BinaryCacheClient {
    base: String,
    client: reqwest::blocking::Client,
}

impl BinaryCacheClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("pygr/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::CacheError(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn archive_url(&self, key: &Fingerprint) -> String {
        format!("{}/{}.tar.zst", self.base, key)
    }

    fn digest_url(&self, key: &Fingerprint) -> String {
        format!("{}/{}.sha256", self.base, key)
    }

    /// Probe for a prebuilt artifact: HEAD request, 404 means miss
    pub fn lookup(&self, key: &Fingerprint) -> Result<CacheLookup> {
        let url = self.archive_url(key);
        let response = self
            .client
            .head(&url)
            .send()
            .map_err(|e| Error::CacheError(format!("HEAD {url}: {e}")))?;

        if response.status().is_success() {
            debug!("cache hit for {}", key.short());
            Ok(CacheLookup::Hit)
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("cache miss for {}", key.short());
            Ok(CacheLookup::Miss)
        } else {
            Err(Error::CacheError(format!(
                "HEAD {url}: status {}",
                response.status()
            )))
        }
    }

    /// Download, verify and extract an artifact into `staging`
    ///
    /// Returns the extracted artifact directory (`staging/<key>`). The
    /// declared size and the sidecar digest are both checked before
    /// extraction; a mismatch is `CacheCorrupt`.
    pub fn fetch_into(&self, key: &Fingerprint, staging: &Path) -> Result<PathBuf> {
        let url = self.archive_url(key);
        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::CacheError(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::CacheError(format!(
                "GET {url}: status {}",
                response.status()
            )));
        }
        let declared_len = response.content_length();

        std::fs::create_dir_all(staging)?;
        let archive_path = staging.join(format!("{key}.tar.zst"));
        let mut file = File::create(&archive_path)?;
        let written = io::copy(&mut response, &mut file)
            .map_err(|e| Error::CacheError(format!("streaming {url}: {e}")))?;
        drop(file);

        if let Some(expected) = declared_len {
            if expected != written {
                return Err(Error::CacheCorrupt {
                    key: key.to_string(),
                    reason: format!("size mismatch: declared {expected}, received {written}"),
                });
            }
        }

        let digest_url = self.digest_url(key);
        let expected_digest = self
            .client
            .get(&digest_url)
            .send()
            .map_err(|e| Error::CacheError(format!("GET {digest_url}: {e}")))?
            .error_for_status()
            .map_err(|e| Error::CacheError(format!("GET {digest_url}: {e}")))?
            .text()
            .map_err(|e| Error::CacheError(format!("reading {digest_url}: {e}")))?;

        let artifact = verify_and_extract(&archive_path, &expected_digest, key, staging)?;
        let _ = std::fs::remove_file(&archive_path);
        info!("imported {} from binary cache", key.short());
        Ok(artifact)
    }
}

/// Verify an archive against its sidecar digest and unpack it
///
/// Split from the HTTP path so the verification and extraction logic is
/// exercised against local fixtures.
pub fn verify_and_extract(
    archive_path: &Path,
    sidecar_text: &str,
    key: &Fingerprint,
    staging: &Path,
) -> Result<PathBuf> {
    // sidecar format: the digest, optionally followed by a file name
    let expected = sidecar_text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if expected.len() != 64 {
        return Err(Error::CacheCorrupt {
            key: key.to_string(),
            reason: format!("malformed digest sidecar: '{}'", sidecar_text.trim()),
        });
    }

    let actual = sha256_file(archive_path)?;
    if actual != expected {
        return Err(Error::CacheCorrupt {
            key: key.to_string(),
            reason: format!("digest mismatch: expected {expected}, got {actual}"),
        });
    }

    let file = File::open(archive_path)?;
    let decoder = zstd::Decoder::new(file)
        .map_err(|e| Error::CacheError(format!("zstd decoder: {e}")))?;
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(staging).map_err(|e| Error::CacheCorrupt {
        key: key.to_string(),
        reason: format!("extraction failed: {e}"),
    })?;

    let artifact = staging.join(key.as_str());
    if !artifact.is_dir() {
        return Err(Error::CacheCorrupt {
            key: key.to_string(),
            reason: "archive does not contain the key directory".into(),
        });
    }
    Ok(artifact)
}

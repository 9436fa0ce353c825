//! Bad-encoding cache
//!
//! Some inputs come out *larger* when re-encoded at a given CRF/preset.
//! Re-attempting those is wasted hours, so results that grew are remembered
//! in a JSON state file keyed by content hash plus the encoder settings, and
//! later requests for the same combination are downgraded to a copy. The
//! key is a hash of the file content, so renames and moves still hit.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use crate::error::EncodeError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    /// `{sha256}-{crf}-{preset}` -> output size in bytes
    entries: HashMap<String, u64>,
}

/// Persistent record of encodings that increased the file size, bound to
/// one input file for the lifetime of a request
///
/// The content hash dominates the cost of every lookup, so it is computed
/// at most once per handle; check and record within one invocation share
/// the digest.
#[derive(Debug)]
pub struct BadEncodingCache {
    path: PathBuf,
    input: PathBuf,
    input_hash: Option<String>,
}

impl BadEncodingCache {
    pub fn open(path: &Path, input: &Path) -> Self {
        BadEncodingCache {
            path: path.to_path_buf(),
            input: input.to_path_buf(),
            input_hash: None,
        }
    }

    /// Look up a previous bad result for this file and encoder settings,
    /// returning the recorded output size
    pub fn check(&mut self, crf: u8, preset: &str) -> Result<Option<u64>, EncodeError> {
        let key = cache_key(&self.input_hash()?, crf, preset);
        let file = self.load()?;
        Ok(file.entries.get(&key).copied())
    }

    /// Record a bad result for this file and encoder settings
    pub fn record(
        &mut self,
        crf: u8,
        preset: &str,
        output_bytes: u64,
    ) -> Result<(), EncodeError> {
        let key = cache_key(&self.input_hash()?, crf, preset);
        let mut file = self.load()?;
        file.entries.insert(key, output_bytes);
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| EncodeError::ConversionFailed(format!("cache serialization: {}", e)))?;
        std::fs::write(&self.path, json)?;
        debug!("recorded bad encoding in {}", self.path.display());
        Ok(())
    }

    fn input_hash(&mut self) -> Result<String, EncodeError> {
        if let Some(hash) = &self.input_hash {
            return Ok(hash.clone());
        }
        let hash = hash_file(&self.input)?;
        self.input_hash = Some(hash.clone());
        Ok(hash)
    }

    fn load(&self) -> Result<CacheFile, EncodeError> {
        if !self.path.exists() {
            return Ok(CacheFile::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            EncodeError::ConversionFailed(format!(
                "corrupt cache file '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}

fn cache_key(hash_hex: &str, crf: u8, preset: &str) -> String {
    format!("{}-{}-{}", hash_hex, crf, preset)
}

/// Streaming sha256 of a file's content, hex encoded
pub fn hash_file(path: &Path) -> Result<String, EncodeError> {
    info!("hashing '{}'", path.display());
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops::TempDir;

    #[test]
    fn test_hash_is_stable_and_content_addressed() {
        let dir = TempDir::create().unwrap();
        let a = dir.path().join("a.mkv");
        let b = dir.path().join("b.mkv");
        std::fs::write(&a, b"identical bytes").unwrap();
        std::fs::write(&b, b"identical bytes").unwrap();
        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());

        std::fs::write(&b, b"different bytes").unwrap();
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn test_record_then_check() {
        let dir = TempDir::create().unwrap();
        let input = dir.path().join("movie.mkv");
        std::fs::write(&input, b"some video").unwrap();
        let mut cache = BadEncodingCache::open(&dir.path().join("badencodings.json"), &input);

        assert_eq!(cache.check(23, "fast").unwrap(), None);
        cache.record(23, "fast", 123_456).unwrap();
        assert_eq!(cache.check(23, "fast").unwrap(), Some(123_456));
        // other settings for the same file miss
        assert_eq!(cache.check(30, "fast").unwrap(), None);
        assert_eq!(cache.check(23, "medium").unwrap(), None);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::create().unwrap();
        let input = dir.path().join("movie.mkv");
        std::fs::write(&input, b"some video").unwrap();
        let cache_path = dir.path().join("badencodings.json");

        BadEncodingCache::open(&cache_path, &input)
            .record(18, "medium", 99)
            .unwrap();
        let mut reopened = BadEncodingCache::open(&cache_path, &input);
        assert_eq!(reopened.check(18, "medium").unwrap(), Some(99));
    }

    #[test]
    fn test_input_hashed_once_per_handle() {
        let dir = TempDir::create().unwrap();
        let input = dir.path().join("movie.mkv");
        std::fs::write(&input, b"first content").unwrap();
        let cache_path = dir.path().join("badencodings.json");

        // The first lookup fixes the digest for the handle's lifetime;
        // rewriting the file afterwards must not change the key record uses.
        let mut handle = BadEncodingCache::open(&cache_path, &input);
        assert_eq!(handle.check(23, "fast").unwrap(), None);
        std::fs::write(&input, b"second content").unwrap();
        handle.record(23, "fast", 77).unwrap();

        std::fs::write(&input, b"first content").unwrap();
        let mut fresh = BadEncodingCache::open(&cache_path, &input);
        assert_eq!(fresh.check(23, "fast").unwrap(), Some(77));
    }
}

//! Cache file naming and per-hash entry selection.
//!
//! A cached bundle lives in `<dir>/<hash>.json` (never expires) or
//! `<dir>/<hash>_<unix_expiry>.json`. Several files may exist for one hash;
//! [`select`] picks the one to use.

use order_core::{CacheError, OrderResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const CACHE_EXTENSION: &str = ".json";

/// One cache file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub hash: String,
    /// Unix timestamp after which the entry is invalid, `None` never expires.
    pub expiry: Option<i64>,
    pub path: PathBuf,
}

impl CacheEntry {
    /// File name for a hash and optional expiry.
    pub fn file_name(hash: &str, expiry: Option<i64>) -> String {
        match expiry {
            Some(expiry) => format!("{}_{}{}", hash, expiry, CACHE_EXTENSION),
            None => format!("{}{}", hash, CACHE_EXTENSION),
        }
    }

    /// Entry stored under `dir` for a hash and optional expiry.
    pub fn in_directory(dir: &Path, hash: &str, expiry: Option<i64>) -> Self {
        Self {
            hash: hash.to_string(),
            expiry,
            path: dir.join(Self::file_name(hash, expiry)),
        }
    }

    /// Parse a cache file path belonging to `hash`.
    pub fn parse(path: &Path, hash: &str) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let stem = file_name.strip_suffix(CACHE_EXTENSION)?;
        let rest = stem.strip_prefix(hash)?;

        let expiry = if rest.is_empty() {
            None
        } else {
            let digits = rest.strip_prefix('_')?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            Some(digits.parse::<i64>().ok()?)
        };

        Some(Self {
            hash: hash.to_string(),
            expiry,
            path: path.to_path_buf(),
        })
    }

    /// Whether the entry may still be used at `now`.
    pub fn is_valid(&self, now: i64) -> bool {
        self.expiry.map_or(true, |expiry| expiry >= now)
    }
}

/// Outcome of choosing among the files of one hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// The entry to read, if any is valid.
    pub winner: Option<CacheEntry>,
    /// Every other file of the same hash.
    pub stale: Vec<CacheEntry>,
}

/// List every cache file for `hash` in `dir`, ignoring anything that is not
/// a regular file. A missing directory is empty.
pub fn scan_directory(dir: &Path, hash: &str) -> OrderResult<Vec<CacheEntry>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(CacheError::Io {
                path: dir.display().to_string(),
                reason: e.to_string(),
            }
            .into())
        }
    };

    let mut entries = Vec::new();
    for item in read_dir {
        let item = item.map_err(|e| CacheError::Io {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if !item.file_type().map_or(false, |t| t.is_file()) {
            continue;
        }
        if let Some(entry) = CacheEntry::parse(&item.path(), hash) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Prefer a never-expiring entry, otherwise the valid entry with the latest
/// expiry. Everything else is stale.
pub fn select(entries: Vec<CacheEntry>, now: i64) -> Selection {
    let winner_index = entries
        .iter()
        .position(|e| e.expiry.is_none())
        .or_else(|| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.is_valid(now))
                .max_by_key(|(_, e)| e.expiry)
                .map(|(i, _)| i)
        });

    let mut selection = Selection::default();
    for (i, entry) in entries.into_iter().enumerate() {
        if Some(i) == winner_index {
            selection.winner = Some(entry);
        } else {
            selection.stale.push(entry);
        }
    }
    selection
}

//! Duplicate-safe output naming.
//!
//! A process-wide registry of claimed output paths. `claim` appends
//! ` (1)`, ` (2)`, ... before the extension until it finds a path that is
//! neither claimed by a concurrent job nor already present on disk. The
//! registry is the single exclusive-lock boundary of the design: it is
//! passed explicitly to every job instead of living in a global.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;

/// Extensions that must survive suffixing as a unit.
const COMPOUND_SUFFIXES: [&str; 2] = [".ome.tiff", ".ome.tif"];

#[derive(Debug, Default)]
pub struct OutputNamer {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl OutputNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a concrete output path for `requested`. Claims persist for
    /// the lifetime of the namer, so claiming the same path twice always
    /// yields two distinct results.
    pub fn claim(&self, requested: &Path) -> PathBuf {
        let mut claimed = match self.claimed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut candidate = requested.to_path_buf();
        let (stem, suffix) = split_suffix(requested);
        let mut n = 0u32;
        loop {
            if !claimed.contains(&candidate) && !candidate.exists() {
                claimed.insert(candidate.clone());
                if candidate != requested {
                    info!("output {:?} taken, claimed {:?}", requested, candidate);
                }
                return candidate;
            }
            n += 1;
            let name = format!("{} ({}){}", stem, n, suffix);
            candidate = match requested.parent() {
                Some(parent) => parent.join(name),
                None => PathBuf::from(name),
            };
        }
    }
}

/// Split a file name into (stem, suffix), keeping compound suffixes like
/// `.ome.tif` intact so `x.ome.tif` dedupes to `x (1).ome.tif`.
fn split_suffix(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lowered = name.to_lowercase();
    for compound in COMPOUND_SUFFIXES {
        if lowered.ends_with(compound) && name.len() > compound.len() {
            let split = name.len() - compound.len();
            return (name[..split].to_string(), name[split..].to_string());
        }
    }
    match name.rfind('.') {
        Some(pos) if pos > 0 => (name[..pos].to_string(), name[pos..].to_string()),
        _ => (name, String::new()),
    }
}

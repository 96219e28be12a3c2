//! # Pattern Storage
//!
//! Filesystem persistence for learned patterns:
//! `<root>/patterns/YYYY/MM/DD/<pattern_type>_<timestamp>.json` with an
//! `index.json` mapping pattern ids to relative paths. Files past the
//! compression threshold are gzipped in place; files past retention are
//! deleted. The save/load/query contract is independent of the layout.

use crate::patterns::learner::{Pattern, PatternKind};
use crate::utils::error::{SwarmError, SwarmResult};
use chrono::{DateTime, Datelike, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "index.json";

pub struct PatternStorage {
    root: PathBuf,
    compression_threshold_days: u32,
    retention_days: u32,
}

impl PatternStorage {
    pub fn new<P: AsRef<Path>>(
        root: P,
        compression_threshold_days: u32,
        retention_days: u32,
    ) -> SwarmResult<Self> {
        let root = root.as_ref().join("patterns");
        fs::create_dir_all(&root)?;
        let storage = Self {
            root,
            compression_threshold_days,
            retention_days,
        };
        if !storage.index_path().exists() {
            storage.write_index(&HashMap::new())?;
        }
        Ok(storage)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn read_index(&self) -> SwarmResult<HashMap<String, String>> {
        let contents = fs::read_to_string(self.index_path())?;
        serde_json::from_str(&contents).map_err(|e| SwarmError::Storage {
            reason: format!("corrupt pattern index: {e}"),
        })
    }

    fn write_index(&self, index: &HashMap<String, String>) -> SwarmResult<()> {
        let serialized = serde_json::to_string_pretty(index)?;
        fs::write(self.index_path(), serialized)?;
        Ok(())
    }

    /// Persist a pattern under today's date directory and index it.
    /// Saving an already-indexed id overwrites the previous file.
    pub fn save(&self, pattern: &Pattern) -> SwarmResult<PathBuf> {
        let now = Utc::now();
        let day_dir = self.root.join(format!(
            "{:04}/{:02}/{:02}",
            now.year(),
            now.month(),
            now.day()
        ));
        fs::create_dir_all(&day_dir)?;

        let filename = format!(
            "{}_{}.json",
            pattern.pattern_type.as_str(),
            now.timestamp_millis()
        );
        let path = day_dir.join(&filename);
        fs::write(&path, serde_json::to_string_pretty(pattern)?)?;

        let mut index = self.read_index()?;
        if let Some(previous) = index.insert(
            pattern.pattern_id.clone(),
            path.strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string(),
        ) {
            let stale = self.root.join(&previous);
            if stale != path && stale.exists() {
                let _ = fs::remove_file(stale);
            }
        }
        self.write_index(&index)?;
        Ok(path)
    }

    /// Load one pattern by id; transparently handles gzipped files.
    pub fn load(&self, pattern_id: &str) -> SwarmResult<Option<Pattern>> {
        let index = self.read_index()?;
        let Some(relative) = index.get(pattern_id) else {
            return Ok(None);
        };

        let path = self.root.join(relative);
        let gz_path = PathBuf::from(format!("{}.gz", path.display()));
        let contents = if path.exists() {
            fs::read_to_string(&path)?
        } else if gz_path.exists() {
            let mut decoder = GzDecoder::new(fs::File::open(&gz_path)?);
            let mut contents = String::new();
            decoder.read_to_string(&mut contents)?;
            contents
        } else {
            tracing::warn!("Indexed pattern file missing: {relative}");
            return Ok(None);
        };

        let pattern = serde_json::from_str(&contents).map_err(|e| SwarmError::Storage {
            reason: format!("corrupt pattern file {relative}: {e}"),
        })?;
        Ok(Some(pattern))
    }

    /// All stored patterns, optionally filtered by kind and minimum
    /// last-seen timestamp.
    pub fn query(
        &self,
        pattern_type: Option<PatternKind>,
        since: Option<DateTime<Utc>>,
    ) -> SwarmResult<Vec<Pattern>> {
        let index = self.read_index()?;
        let mut results = Vec::new();
        for pattern_id in index.keys() {
            if let Some(pattern) = self.load(pattern_id)? {
                if pattern_type.is_some_and(|kind| pattern.pattern_type != kind) {
                    continue;
                }
                if since.is_some_and(|cutoff| pattern.last_seen < cutoff) {
                    continue;
                }
                results.push(pattern);
            }
        }
        results.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(results)
    }

    pub fn delete(&self, pattern_id: &str) -> SwarmResult<bool> {
        let mut index = self.read_index()?;
        let Some(relative) = index.remove(pattern_id) else {
            return Ok(false);
        };
        self.write_index(&index)?;

        let path = self.root.join(&relative);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let gz_path = PathBuf::from(format!("{}.gz", path.display()));
        if gz_path.exists() {
            fs::remove_file(&gz_path)?;
        }
        Ok(true)
    }

    /// Gzip files older than the compression threshold and drop files
    /// past retention. Returns (compressed, deleted) counts.
    pub fn run_maintenance(&self) -> SwarmResult<(usize, usize)> {
        let now = Utc::now();
        let compress_cutoff = now - Duration::days(i64::from(self.compression_threshold_days));
        let retention_cutoff = now - Duration::days(i64::from(self.retention_days));

        let mut index = self.read_index()?;
        let mut compressed = 0;
        let mut deleted = 0;
        let mut removed_ids = Vec::new();

        for (pattern_id, relative) in &index {
            let path = self.root.join(relative);
            let gz_path = PathBuf::from(format!("{}.gz", path.display()));
            let modified: Option<DateTime<Utc>> = path
                .metadata()
                .or_else(|_| gz_path.metadata())
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::from);
            let Some(modified) = modified else { continue };

            if modified < retention_cutoff {
                let _ = fs::remove_file(&path);
                let _ = fs::remove_file(&gz_path);
                removed_ids.push(pattern_id.clone());
                deleted += 1;
            } else if modified < compress_cutoff && path.exists() {
                let contents = fs::read(&path)?;
                let mut encoder =
                    GzEncoder::new(fs::File::create(&gz_path)?, Compression::default());
                encoder.write_all(&contents)?;
                encoder.finish()?;
                fs::remove_file(&path)?;
                compressed += 1;
            }
        }

        for pattern_id in removed_ids {
            index.remove(&pattern_id);
        }
        self.write_index(&index)?;

        if compressed > 0 || deleted > 0 {
            tracing::info!("Pattern maintenance: {compressed} compressed, {deleted} deleted");
        }
        Ok((compressed, deleted))
    }

    pub fn pattern_count(&self) -> SwarmResult<usize> {
        Ok(self.read_index()?.len())
    }
}

use crate::snapshot::HostSnapshot;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use thiserror::Error;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Snapshot files on disk: `infos-<host>.json` rewritten on every collection
/// and a ring of `infos<N>-<host>.json` archive files.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    output_dir: PathBuf,
    archive_dir: PathBuf,
    max_index: u32,
}

impl SnapshotStore {
    pub fn new(output_dir: PathBuf, archive_dir: PathBuf, max_index: u32) -> Self {
        Self {
            output_dir,
            archive_dir,
            max_index: max_index.max(1),
        }
    }

    pub fn latest_path(&self, host_name: &str) -> PathBuf {
        self.output_dir
            .join(format!("infos-{}.json", file_safe(host_name)))
    }

    pub fn archive_path(&self, index: u32, host_name: &str) -> PathBuf {
        self.archive_dir
            .join(format!("infos{}-{}.json", index, file_safe(host_name)))
    }

    pub fn write_latest(&self, snapshot: &HostSnapshot) -> Result<PathBuf, StoreError> {
        let path = self.latest_path(&snapshot.host_name);
        write_json_atomic(&path, snapshot)?;
        Ok(path)
    }

    pub fn write_archive(&self, index: u32, snapshot: &HostSnapshot) -> Result<PathBuf, StoreError> {
        let path = self.archive_path(index, &snapshot.host_name);
        write_json_atomic(&path, snapshot)?;
        Ok(path)
    }

    #[cfg(test)]
    pub fn read(path: &Path) -> Result<HostSnapshot, StoreError> {
        let bytes = fs::read(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Index following `index` in the ring 1..=max_index.
    pub fn next_index(&self, index: u32) -> u32 {
        if index >= self.max_index {
            1
        } else {
            index + 1
        }
    }

    /// Index to write next for `host_name`: the one after the most recently
    /// modified archive file, or 1 when there is none.
    pub fn resume_index(&self, host_name: &str) -> u32 {
        let Ok(entries) = fs::read_dir(&self.archive_dir) else {
            return 1;
        };
        let suffix = format!("-{}.json", file_safe(host_name));

        let newest = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let index: u32 = name
                    .strip_prefix("infos")?
                    .strip_suffix(&suffix)?
                    .parse()
                    .ok()?;
                if index == 0 || index > self.max_index {
                    return None;
                }
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, index))
            })
            .max();

        match newest {
            Some((_, index)) => self.next_index(index),
            None => 1,
        }
    }
}

fn write_json_atomic(path: &Path, snapshot: &HostSnapshot) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(io_err)?;

    let body = serde_json::to_vec_pretty(snapshot)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dir.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, body).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        io_err(source)
    })
}

fn file_safe(host_name: &str) -> String {
    host_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

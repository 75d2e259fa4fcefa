//! Staging Cache
//!
//! File-backed write-ahead queue. Each record is one file named by 32
//! lowercase hex characters in a flat directory. Writes go to a `.tmp`
//! sibling opened with exclusive create, are synced, then renamed into
//! place, so a listed file is always complete.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use bp_common::{ClaimCheck, Headers, StagedRecord};

use crate::codec;
use crate::error::StagingError;

const TMP_EXTENSION: &str = "tmp";

/// Handle to one staged file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagedHandle {
    pub id: String,
    pub path: PathBuf,
}

pub struct StagingCache {
    dir: PathBuf,
}

impl StagingCache {
    /// Open (creating if needed) the staging directory and remove any
    /// half-written `.tmp` files left by a crash.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut orphans = 0usize;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TMP_EXTENSION) {
                match fs::remove_file(&path) {
                    Ok(()) => orphans += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphaned staging file"),
                }
            }
        }

        info!(dir = %dir.display(), orphans_removed = orphans, "Staging cache opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durably stage a record. Once this returns the record survives a crash.
    pub fn write(&self, headers: &Headers, claim_check: &ClaimCheck) -> Result<StagedHandle, StagingError> {
        let id = Uuid::new_v4().simple().to_string();
        let path = self.dir.join(&id);
        let tmp = path.with_extension(TMP_EXTENSION);

        let bytes = codec::encode(headers, claim_check);
        let result = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            sync_dir(&self.dir)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(id = %id, bytes = bytes.len(), "Record staged");
        Ok(StagedHandle { id, path })
    }

    /// Up to `max` staged handles. The iterator is lazy and finite; calling
    /// again restarts from the current directory contents.
    pub fn list_batch(&self, max: usize) -> Result<impl Iterator<Item = StagedHandle>, StagingError> {
        let entries = fs::read_dir(&self.dir)?;
        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                is_record_name(&name).then(|| StagedHandle {
                    path: entry.path(),
                    id: name,
                })
            })
            .take(max))
    }

    /// Read a staged record. A file that vanished, or one that cannot be
    /// decoded, reads as not found.
    pub fn try_read(&self, handle: &StagedHandle) -> Option<StagedRecord> {
        let bytes = match fs::read(&handle.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(id = %handle.id, "Staged record vanished before read");
                return None;
            }
            Err(e) => {
                warn!(id = %handle.id, error = %e, "Failed to read staged record");
                return None;
            }
        };

        match codec::decode(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(id = %handle.id, error = %e, "Staged record is unreadable, leaving it in place");
                None
            }
        }
    }

    /// Remove a staged file. Deleting an already removed file succeeds.
    pub fn delete(&self, handle: &StagedHandle) -> Result<(), StagingError> {
        match fs::remove_file(&handle.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of staged records currently on disk.
    pub fn count(&self) -> Result<usize, StagingError> {
        Ok(self.list_batch(usize::MAX)?.count())
    }
}

fn is_record_name(name: &str) -> bool {
    name.len() == 32 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn record(n: usize) -> (Headers, ClaimCheck) {
        let mut headers = Headers::new();
        headers.insert("NServiceBus.MessageId".to_string(), format!("msg-{}", n));
        let claim_check = ClaimCheck {
            stored: n % 2 == 0,
            message_id: format!("msg-{}", n),
            content_type: "application/json".to_string(),
            size: n as i32,
        };
        (headers, claim_check)
    }

    #[test]
    fn test_written_records_are_listed_once() {
        let dir = TempDir::new().unwrap();
        let cache = StagingCache::open(dir.path()).unwrap();

        for n in 0..10 {
            let (h, c) = record(n);
            cache.write(&h, &c).unwrap();
        }

        let ids: Vec<String> = cache.list_batch(100).unwrap().map(|h| h.id).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(ids.len(), 10);
        assert_eq!(unique.len(), 10);
        assert!(ids.iter().all(|id| is_record_name(id)));
    }

    #[test]
    fn test_list_batch_respects_max() {
        let dir = TempDir::new().unwrap();
        let cache = StagingCache::open(dir.path()).unwrap();
        for n in 0..5 {
            let (h, c) = record(n);
            cache.write(&h, &c).unwrap();
        }
        assert_eq!(cache.list_batch(3).unwrap().count(), 3);
    }

    #[test]
    fn test_read_then_delete() {
        let dir = TempDir::new().unwrap();
        let cache = StagingCache::open(dir.path()).unwrap();
        let (h, c) = record(7);
        let handle = cache.write(&h, &c).unwrap();

        let staged = cache.try_read(&handle).unwrap();
        assert_eq!(staged.headers, h);
        assert_eq!(staged.claim_check, c);

        cache.delete(&handle).unwrap();
        assert_eq!(cache.list_batch(10).unwrap().count(), 0);
        assert!(cache.try_read(&handle).is_none());
        // second delete is a no-op
        cache.delete(&handle).unwrap();
    }

    #[test]
    fn test_temp_and_foreign_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let cache = StagingCache::open(dir.path()).unwrap();
        let (h, c) = record(1);
        cache.write(&h, &c).unwrap();

        fs::write(dir.path().join("0123456789abcdef0123456789abcdef.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("README"), b"not a record").unwrap();

        assert_eq!(cache.count().unwrap(), 1);
    }

    #[test]
    fn test_open_removes_orphaned_temp_files() {
        let dir = TempDir::new().unwrap();
        let orphan = dir.path().join("0123456789abcdef0123456789abcdef.tmp");
        fs::write(&orphan, b"partial").unwrap();

        StagingCache::open(dir.path()).unwrap();
        assert!(!orphan.exists());
    }

    #[test]
    fn test_corrupt_file_reads_as_not_found() {
        let dir = TempDir::new().unwrap();
        let cache = StagingCache::open(dir.path()).unwrap();
        let id = "ffffffffffffffffffffffffffffffff".to_string();
        let path = dir.path().join(&id);
        fs::write(&path, [1, 0]).unwrap();

        let handle = StagedHandle { id, path };
        assert!(cache.try_read(&handle).is_none());
        assert!(handle.path.exists());

        fs::write(&handle.path, i32::MAX.to_le_bytes()).unwrap();
        assert!(cache.try_read(&handle).is_none());
        assert!(handle.path.exists());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = StagingCache::open(dir.path()).unwrap();
            let (h, c) = record(3);
            cache.write(&h, &c).unwrap();
        }
        let cache = StagingCache::open(dir.path()).unwrap();
        let handle = cache.list_batch(1).unwrap().next().unwrap();
        assert_eq!(cache.try_read(&handle).unwrap().claim_check.size, 3);
    }
}

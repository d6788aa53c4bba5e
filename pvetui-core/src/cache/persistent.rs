//! File-backed persistent cache with a background TTL compaction task.
//!
//! One file per key under `<root>/`; directory mode 0o700, file mode
//! 0o600. Each file stores `[expires_at_unix_ms: u64 LE][key_len: u32
//! LE][key bytes][value bytes]` so the background GC task can decide
//! whether to delete a file without needing a side index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::Cache;
use crate::error::PveError;

const COMPACTION_INTERVAL: Duration = Duration::from_secs(60);

pub struct PersistentCache {
    root: PathBuf,
    closed: AtomicBool,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    gc_handle: Mutex<Option<JoinHandle<()>>>,
}

fn io_err(context: &str, err: std::io::Error) -> PveError {
    PveError::Internal(format!("{context}: {err}"))
}

fn filename_for(key: &str) -> String {
    // Hash rather than the raw key so arbitrary key strings (slashes,
    // colons) are always filesystem-safe.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}.entry")
}

fn encode(key: &str, value: &[u8], expires_at_ms: u64) -> Vec<u8> {
    let key_bytes = key.as_bytes();
    let mut buf = Vec::with_capacity(8 + 4 + key_bytes.len() + value.len());
    buf.extend_from_slice(&expires_at_ms.to_le_bytes());
    buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(key_bytes);
    buf.extend_from_slice(value);
    buf
}

struct Decoded {
    expires_at_ms: u64,
    key: String,
    value: Vec<u8>,
}

fn decode(bytes: &[u8]) -> Option<Decoded> {
    if bytes.len() < 12 {
        return None;
    }
    let expires_at_ms = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
    let key_len = u32::from_le_bytes(bytes[8..12].try_into().ok()?) as usize;
    let key_start: usize = 12;
    let key_end = key_start.checked_add(key_len)?;
    let key = String::from_utf8(bytes.get(key_start..key_end)?.to_vec()).ok()?;
    let value = bytes.get(key_end..)?.to_vec();
    Some(Decoded { expires_at_ms, key, value })
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

impl PersistentCache {
    pub fn open(root: PathBuf, _max_entries: usize) -> Result<Self, PveError> {
        fs::create_dir_all(&root).map_err(|e| io_err("create cache dir", e))?;
        set_dir_mode(&root, 0o700)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let gc_handle = spawn_gc(root.clone(), shutdown_rx);

        Ok(Self {
            root,
            closed: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            gc_handle: Mutex::new(Some(gc_handle)),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(filename_for(key))
    }

    fn read_entry(&self, key: &str) -> Result<Option<Decoded>, PveError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(decode(&bytes).filter(|d| d.key == key)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err("read cache entry", e)),
        }
    }
}

impl Cache for PersistentCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PveError> {
        match self.read_entry(key)? {
            Some(entry) if entry.expires_at_ms > now_ms() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    fn get_stale(&self, key: &str) -> Result<Option<(Vec<u8>, bool)>, PveError> {
        match self.read_entry(key)? {
            Some(entry) => {
                let fresh = entry.expires_at_ms > now_ms();
                Ok(Some((entry.value, fresh)))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), PveError> {
        let expires_at_ms = now_ms() + ttl.as_millis() as u64;
        let bytes = encode(key, &value, expires_at_ms);
        let path = self.path_for(key);
        fs::write(&path, bytes).map_err(|e| io_err("write cache entry", e))?;
        set_file_mode(&path, 0o600)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PveError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("delete cache entry", e)),
        }
    }

    fn clear(&self) -> Result<(), PveError> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_err("list cache dir", e))?;
        for entry in entries.flatten() {
            let _ = fs::remove_file(entry.path());
        }
        Ok(())
    }

    fn close(&self) -> Result<(), PveError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.gc_handle.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for PersistentCache {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn spawn_gc(root: PathBuf, mut shutdown_rx: oneshot::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COMPACTION_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    compact(&root);
                }
                _ = &mut shutdown_rx => {
                    break;
                }
            }
        }
    })
}

fn compact(root: &Path) {
    let Ok(entries) = fs::read_dir(root) else { return };
    let now = now_ms();
    for entry in entries.flatten() {
        let path = entry.path();
        if let Ok(bytes) = fs::read(&path)
            && let Some(decoded) = decode(&bytes)
            && decoded.expires_at_ms <= now
        {
            let _ = fs::remove_file(&path);
        }
    }
}

#[cfg(unix)]
fn set_dir_mode(path: &Path, mode: u32) -> Result<(), PveError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| io_err("set cache dir permissions", e))
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path, _mode: u32) -> Result<(), PveError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> Result<(), PveError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| io_err("set cache file permissions", e))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> Result<(), PveError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path().join("ns"), 0).unwrap();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(b"v".to_vec()));
        cache.close().unwrap();
    }

    #[tokio::test]
    async fn ttl_expiry_hides_value_from_get_but_not_get_stale() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path().join("ns"), 0).unwrap();
        cache.set("k", b"v".to_vec(), Duration::from_millis(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").unwrap(), None);
        let (value, fresh) = cache.get_stale("k").unwrap().unwrap();
        assert_eq!(value, b"v".to_vec());
        assert!(!fresh);
        cache.close().unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path().join("ns"), 0).unwrap();
        cache.close().unwrap();
        cache.close().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn directory_and_file_permissions_are_restrictive() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let ns_root = dir.path().join("ns");
        let cache = PersistentCache::open(ns_root.clone(), 0).unwrap();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).unwrap();

        let dir_mode = fs::metadata(&ns_root).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);

        let file_path = ns_root.join(filename_for("k"));
        let file_mode = fs::metadata(&file_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        cache.close().unwrap();
    }
}

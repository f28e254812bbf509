//! # skillhub-blobstore
//!
//! A content-addressable blob store: `put_stream` consumes a reader
//! exactly once, hashing it on the fly, and atomically publishes the
//! bytes under a digest-derived key; `open` returns a random-access,
//! size-aware handle. There is no delete API — blobs are effectively
//! immutable once published.
//!
//! This mirrors the shape of a pluggable storage backend (trait first,
//! one concrete implementation second) rather than hard-wiring
//! filesystem paths through every caller — the same seam a cloud-object
//! backend would plug into later, even though only the file-backed
//! implementation is provided here.

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};
use skillhub_types::{Result, SkillHubError};

/// The content-derived key for a digest: `sha256/<first-2-hex>/<full-hex>`.
pub fn key_for_digest_hex(hex_digest: &str) -> String {
    let prefix = &hex_digest[..2.min(hex_digest.len())];
    format!("sha256/{prefix}/{hex_digest}")
}

/// `"sha256:" + hex`.
pub fn digest_string(hex_digest: &str) -> String {
    format!("sha256:{hex_digest}")
}

/// A random-access, size-aware read handle into a stored blob.
pub trait BlobReader: Read + Seek {
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The blob store's contract. Implementations must be safe to share
/// across threads: the sync worker and concurrently-served downloads both
/// call `open`/`put_stream` from worker-pool threads.
pub trait BlobStore: Send + Sync {
    /// Consumes `reader` exactly once, computing the sha256 digest while
    /// streaming to a temporary location, then atomically publishes under
    /// the content-derived key. If the target key already exists, the
    /// temp file is discarded and the existing object is kept (the write
    /// is idempotent). Returns `(digest "sha256:<hex>", size, key)`.
    fn put_stream(&self, reader: &mut dyn Read) -> Result<(String, u64, String)>;

    /// Opens a stored blob by key for sequential or random-access read.
    fn open(&self, key: &str) -> Result<(Box<dyn BlobReader>, u64)>;

    /// Whether a key is already present, without opening it.
    fn exists(&self, key: &str) -> Result<bool>;
}

struct FileBlobReader {
    file: File,
    size: u64,
}

impl Read for FileBlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileBlobReader {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl BlobReader for FileBlobReader {
    fn len(&self) -> u64 {
        self.size
    }
}

/// A filesystem-backed [`BlobStore`] rooted at `base_path`.
///
/// Writes use the same atomic temp-file + `fsync` + `rename` idiom as the
/// rest of this workspace's durable writers: never a direct in-place
/// write, so a reader can never observe a partially-written blob.
pub struct FileBlobStore {
    base_path: PathBuf,
}

impl FileBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

impl BlobStore for FileBlobStore {
    fn put_stream(&self, reader: &mut dyn Read) -> Result<(String, u64, String)> {
        let pid = std::process::id();
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let tmp_path = self.base_path.join(format!("tmp-{pid}-{nonce}"));

        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        {
            let mut tmp_file = File::create(&tmp_path)
                .map_err(|e| SkillHubError::storage(format!("create temp blob: {e}")))?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = reader
                    .read(&mut buf)
                    .map_err(|e| SkillHubError::storage(format!("read blob stream: {e}")))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                tmp_file
                    .write_all(&buf[..n])
                    .map_err(|e| SkillHubError::storage(format!("write temp blob: {e}")))?;
                size += n as u64;
            }
            tmp_file
                .sync_all()
                .map_err(|e| SkillHubError::storage(format!("fsync temp blob: {e}")))?;
        }

        let hex_digest = hex::encode(hasher.finalize());
        let key = key_for_digest_hex(&hex_digest);
        let final_path = self.path_for_key(&key);

        if final_path.exists() {
            // Idempotent write: the existing object is kept, the temp file
            // is discarded.
            let _ = fs::remove_file(&tmp_path);
        } else {
            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| SkillHubError::storage(format!("create blob dir: {e}")))?;
            }
            match fs::rename(&tmp_path, &final_path) {
                Ok(()) => {}
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path);
                    // Another writer may have published the same key
                    // between our existence check and our rename; that is
                    // the same idempotent case, not a failure.
                    if !final_path.exists() {
                        return Err(SkillHubError::storage(format!(
                            "publish blob {key}: {e}"
                        )));
                    }
                }
            }
        }

        Ok((digest_string(&hex_digest), size, key))
    }

    fn open(&self, key: &str) -> Result<(Box<dyn BlobReader>, u64)> {
        let path = self.path_for_key(key);
        let file = File::open(&path)
            .map_err(|e| SkillHubError::not_found(format!("blob {key} not found: {e}")))?;
        let size = file
            .metadata()
            .map_err(|e| SkillHubError::storage(format!("stat blob {key}: {e}")))?
            .len();
        Ok((Box::new(FileBlobReader { file, size }), size))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for_key(key).exists())
    }
}

//! Request-scoped storage for uploaded invoice files.
//!
//! Each upload is written to `<upload_dir>/<uuid>.<ext>` and removed when the
//! [`TempUpload`] is closed or dropped, so no exit path can leak it.

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 10;

/// An uploaded file materialised on local disk for one request.
#[derive(Debug)]
pub struct TempUpload {
    file: NamedTempFile,
    digest: String,
    size: usize,
}

impl TempUpload {
    /// Write `data` to a fresh, collision-resistant path inside `dir`.
    pub fn create(dir: &Path, original_name: &str, data: &[u8]) -> std::io::Result<Self> {
        let suffix = format!(".{}", sanitized_extension(original_name));
        let prefix = Uuid::new_v4().to_string();

        // The uuid is the whole name; creation is exclusive so a clash errors
        // instead of overwriting.
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .rand_bytes(0)
            .tempfile_in(dir)?;

        file.write_all(data)?;
        file.flush()?;

        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(data);
            format!("{:x}", hasher.finalize())
        };

        debug!("TempUpload: stored {:?} ({} bytes)", file.path(), data.len());
        Ok(Self {
            file,
            digest,
            size: data.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// SHA-256 of the uploaded bytes, hex encoded.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Delete the file now, logging instead of failing if removal errors.
    pub fn close(self) {
        let path: PathBuf = self.file.path().to_path_buf();
        match self.file.close() {
            Ok(()) => debug!("TempUpload: removed {:?}", path),
            Err(e) => warn!("TempUpload: failed to remove {:?}: {}", path, e),
        }
    }
}

/// Extension of the client-supplied filename, reduced to a safe token.
fn sanitized_extension(original_name: &str) -> String {
    let ext = match original_name.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => return FALLBACK_EXTENSION.to_string(),
    };

    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return FALLBACK_EXTENSION.to_string();
    }
    ext.to_ascii_lowercase()
}

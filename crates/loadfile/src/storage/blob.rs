use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::StorageError;
use crate::hasher::{copy_and_fingerprint, Fingerprint};
use crate::sanitize;

const STAGING_PREFIX: &str = ".staging-";

/// Kind of uploaded file, derived from the declared filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    /// A zip container of XML documents.
    Archive,
    /// A single XML document.
    Document,
}

impl BlobKind {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(BlobKind::Archive)
        } else if lower.ends_with(".xml") {
            Some(BlobKind::Document)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            BlobKind::Archive => ".zip",
            BlobKind::Document => ".xml",
        }
    }
}

/// Move a file from `src` to `dst`. Uses `rename` first (atomic on the same
/// filesystem) and falls back to copy + delete for cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Bytes written to a tenant-scoped temp file whose fingerprint is known.
///
/// Dropping a staged blob without committing it removes the temp file.
#[derive(Debug)]
pub struct StagedBlob {
    tenant_id: String,
    temp_path: PathBuf,
    fingerprint: Fingerprint,
    size: u64,
    committed: bool,
}

impl StagedBlob {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove staging file {}: {}",
                    sanitize::redact_path(&self.temp_path),
                    e
                );
            }
        }
    }
}

/// Content-addressed store for uploaded files.
///
/// Layout: `{root}/{tenant_id}/{digest}{extension}`. External tools rely on
/// this layout, see [`BlobStore::blob_path`].
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(
        &self,
        tenant_id: &str,
        digest: &Fingerprint,
        kind: BlobKind,
    ) -> Result<PathBuf, StorageError> {
        Ok(self
            .tenant_dir(tenant_id)?
            .join(format!("{}{}", digest, kind.extension())))
    }

    pub fn exists(&self, tenant_id: &str, digest: &Fingerprint, kind: BlobKind) -> bool {
        self.blob_path(tenant_id, digest, kind)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Streams `reader` into a temp file under the tenant directory,
    /// fingerprinting it in the same pass.
    pub fn stage<R: Read>(&self, tenant_id: &str, reader: &mut R) -> Result<StagedBlob, StorageError> {
        let dir = self.tenant_dir(tenant_id)?;
        self.ensure_directory(&dir)?;

        let temp_path = dir.join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| StorageError::WriteFile {
                path: temp_path.clone(),
                source: e,
            })?;

        // From here on the guard owns the temp file and cleans it up on error.
        let mut staged = StagedBlob {
            tenant_id: tenant_id.to_string(),
            temp_path,
            fingerprint: crate::hasher::fingerprint_bytes(&[]),
            size: 0,
            committed: false,
        };

        let mut writer = BufWriter::new(file);
        let (fingerprint, size) =
            copy_and_fingerprint(reader, &mut writer).map_err(|e| StorageError::WriteFile {
                path: staged.temp_path.clone(),
                source: e,
            })?;
        let file = writer.into_inner().map_err(|e| StorageError::WriteFile {
            path: staged.temp_path.clone(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|e| StorageError::WriteFile {
            path: staged.temp_path.clone(),
            source: e,
        })?;

        staged.fingerprint = fingerprint;
        staged.size = size;

        debug!(
            "Staged {} bytes for tenant {} ({})",
            size, tenant_id, staged.fingerprint
        );
        Ok(staged)
    }

    /// Moves a staged blob to its final content-addressed name.
    ///
    /// Committing the same content twice is safe: the second rename replaces
    /// an identical file.
    pub fn commit(&self, mut staged: StagedBlob, kind: BlobKind) -> Result<PathBuf, StorageError> {
        let final_path = self.blob_path(&staged.tenant_id, &staged.fingerprint, kind)?;

        match move_file(&staged.temp_path, &final_path) {
            Ok(()) => {
                staged.committed = true;
            }
            Err(e) if final_path.is_file() => {
                // Some platforms refuse to rename over an existing file. The
                // existing blob has the same content, keep it.
                debug!(
                    "Blob {} already present, discarding staged copy: {}",
                    sanitize::redact_path(&final_path),
                    e
                );
            }
            Err(e) => return Err(e),
        }

        Ok(final_path)
    }

    /// Writes `reader` under `{tenant_id}/{digest}{ext}` where the caller
    /// already knows the digest. The content is verified before the rename.
    pub fn persist<R: Read>(
        &self,
        tenant_id: &str,
        digest: &Fingerprint,
        filename: &str,
        reader: &mut R,
    ) -> Result<PathBuf, StorageError> {
        let kind = BlobKind::from_filename(filename)
            .ok_or_else(|| StorageError::UnsupportedExtension(filename.to_string()))?;

        let staged = self.stage(tenant_id, reader)?;
        if staged.fingerprint() != digest {
            return Err(StorageError::DigestMismatch {
                expected: digest.to_string(),
                actual: staged.fingerprint().to_string(),
            });
        }

        self.commit(staged, kind)
    }

    pub fn open(
        &self,
        tenant_id: &str,
        digest: &Fingerprint,
        kind: BlobKind,
    ) -> Result<File, StorageError> {
        let path = self.blob_path(tenant_id, digest, kind)?;
        File::open(&path).map_err(|e| StorageError::OpenBlob { path, source: e })
    }

    fn tenant_dir(&self, tenant_id: &str) -> Result<PathBuf, StorageError> {
        if !sanitize::is_safe_path_segment(tenant_id) {
            return Err(StorageError::InvalidTenant(tenant_id.to_string()));
        }
        Ok(self.root.join(tenant_id))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

use std::path::{Component, Path, PathBuf};

use log::{debug, warn};

use crate::core::config::UploadsConfig;
use crate::core::shared::error::PqrsError;

const UPLOADS_PREFIX: &str = "uploads/";

/// A stored ticket file, read into memory and ready to attach.
#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Turns whatever was stored on the ticket (relative path, absolute path,
/// Windows path or full URL) into a clean relative path. Returns `None` for
/// anything that could escape the uploads root.
pub fn normalize_stored_path(stored: &str) -> Option<PathBuf> {
    let mut value = stored.trim();
    if value.is_empty() || value.contains('\0') {
        return None;
    }

    for scheme in ["http://", "https://"] {
        if value
            .get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
        {
            let without_scheme = &value[scheme.len()..];
            value = without_scheme.split_once('/').map_or("", |(_, path)| path);
            break;
        }
    }

    let value = value.replace('\\', "/");
    let value = value.trim_start_matches('/');
    let value = value.split(['?', '#']).next().unwrap_or_default();

    let mut clean = PathBuf::new();
    for component in Path::new(value).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Places a stored file may live, in the order they are tried.
pub fn candidate_paths(uploads: &UploadsConfig, relative: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(3);

    let under_uploads = relative
        .to_str()
        .and_then(|s| s.strip_prefix(UPLOADS_PREFIX))
        .map(PathBuf::from)
        .unwrap_or_else(|| relative.to_path_buf());
    candidates.push(uploads.root.join(&under_uploads));

    candidates.push(uploads.public_root.join(relative));

    if let Some(name) = relative.file_name() {
        candidates.push(uploads.root.join(name));
    }

    candidates.dedup();
    candidates
}

/// Finds and loads a ticket attachment. Fails closed: a path that cannot be
/// normalized, a file that cannot be found or read, or a file above
/// `max_bytes` is an error.
pub fn resolve_attachment(
    uploads: &UploadsConfig,
    stored: &str,
    max_bytes: u64,
) -> Result<ResolvedAttachment, PqrsError> {
    let relative = normalize_stored_path(stored).ok_or_else(|| {
        PqrsError::Attachment(format!("Invalid attachment path: {stored}"))
    })?;

    let found = candidate_paths(uploads, &relative)
        .into_iter()
        .find(|candidate| candidate.is_file());

    let Some(path) = found else {
        warn!("Attachment not found for stored path {stored}");
        return Err(PqrsError::Attachment(format!(
            "Attached file not found: {}",
            relative.display()
        )));
    };

    let size = std::fs::metadata(&path)
        .map_err(|e| PqrsError::Attachment(format!("Cannot read {}: {e}", path.display())))?
        .len();
    if size > max_bytes {
        return Err(PqrsError::Attachment(format!(
            "Attached file is too large ({size} bytes, limit {max_bytes})"
        )));
    }

    let bytes = std::fs::read(&path)
        .map_err(|e| PqrsError::Attachment(format!("Cannot read {}: {e}", path.display())))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("adjunto")
        .to_string();
    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    debug!("Resolved attachment {} ({size} bytes)", path.display());

    Ok(ResolvedAttachment {
        path,
        file_name,
        content_type,
        bytes,
    })
}

const STAGED_SUFFIX: &str = ".deleting";

/// A stored file moved aside while the row that owns it is being deleted.
#[derive(Debug)]
pub struct StagedRemoval {
    original: PathBuf,
    staged: PathBuf,
}

impl StagedRemoval {
    /// Deletes the file for good once the owning row is gone.
    pub fn finish(self) -> Result<(), PqrsError> {
        match std::fs::remove_file(&self.staged) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Puts the file back when the deletion did not commit.
    pub fn restore(self) -> Result<(), PqrsError> {
        std::fs::rename(&self.staged, &self.original)?;
        Ok(())
    }
}

/// Moves a stored ticket file aside so it can be dropped after the database
/// commit or restored if the commit fails. A file that is already gone is
/// not an error.
pub fn stage_removal(
    uploads: &UploadsConfig,
    stored: &str,
) -> Result<Option<StagedRemoval>, PqrsError> {
    let Some(relative) = normalize_stored_path(stored) else {
        warn!("Refusing to delete suspicious attachment path {stored}");
        return Ok(None);
    };
    let Some(original) = candidate_paths(uploads, &relative)
        .into_iter()
        .find(|candidate| candidate.is_file())
    else {
        return Ok(None);
    };

    let mut staged = original.clone().into_os_string();
    staged.push(STAGED_SUFFIX);
    let staged = PathBuf::from(staged);
    match std::fs::rename(&original, &staged) {
        Ok(()) => Ok(Some(StagedRemoval { original, staged })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Settles a staged removal against the outcome of the transaction that
/// deleted its row. Returns whether a file was removed.
pub fn settle_removal<T>(
    staged: Option<StagedRemoval>,
    outcome: Result<T, PqrsError>,
) -> Result<(T, bool), PqrsError> {
    match (outcome, staged) {
        (Ok(value), Some(staged)) => {
            let path = staged.original.clone();
            if let Err(e) = staged.finish() {
                warn!("Row deleted but file {} was kept: {e}", path.display());
                return Ok((value, false));
            }
            Ok((value, true))
        }
        (Ok(value), None) => Ok((value, false)),
        (Err(e), Some(staged)) => {
            let path = staged.original.clone();
            if let Err(restore) = staged.restore() {
                warn!("Could not restore {}: {restore}", path.display());
            }
            Err(e)
        }
        (Err(e), None) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn uploads_in(dir: &Path) -> UploadsConfig {
        UploadsConfig {
            root: dir.join("uploads"),
            public_root: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_normalize_plain_relative() {
        assert_eq!(
            normalize_stored_path("abc.pdf"),
            Some(PathBuf::from("abc.pdf"))
        );
    }

    #[test]
    fn test_normalize_url_and_backslashes() {
        assert_eq!(
            normalize_stored_path("https://pqrs.example.com/uploads/abc.pdf"),
            Some(PathBuf::from("uploads/abc.pdf"))
        );
        assert_eq!(
            normalize_stored_path("\\uploads\\2025\\abc.pdf"),
            Some(PathBuf::from("uploads/2025/abc.pdf"))
        );
        assert_eq!(
            normalize_stored_path("/uploads/./abc.pdf"),
            Some(PathBuf::from("uploads/abc.pdf"))
        );
    }

    #[test]
    fn test_normalize_rejects_traversal_and_empty() {
        assert_eq!(normalize_stored_path("../etc/passwd"), None);
        assert_eq!(normalize_stored_path("uploads/../../secret"), None);
        assert_eq!(normalize_stored_path("   "), None);
        assert_eq!(normalize_stored_path("http://host"), None);
        assert_eq!(normalize_stored_path("a\0b"), None);
    }

    #[test]
    fn test_candidates_order() {
        let uploads = UploadsConfig {
            root: PathBuf::from("/srv/uploads"),
            public_root: PathBuf::from("/srv/www"),
        };
        let candidates = candidate_paths(&uploads, Path::new("uploads/2025/a.pdf"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/srv/uploads/2025/a.pdf"),
                PathBuf::from("/srv/www/uploads/2025/a.pdf"),
                PathBuf::from("/srv/uploads/a.pdf"),
            ]
        );
    }

    #[test]
    fn test_resolve_from_uploads_root() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = uploads_in(dir.path());
        fs::create_dir_all(&uploads.root).unwrap();
        fs::write(uploads.root.join("orden.pdf"), b"%PDF-1.4").unwrap();

        let att = resolve_attachment(&uploads, "uploads/orden.pdf", 1024).unwrap();
        assert_eq!(att.file_name, "orden.pdf");
        assert_eq!(att.content_type, "application/pdf");
        assert_eq!(att.bytes, b"%PDF-1.4");
    }

    #[test]
    fn test_resolve_falls_back_to_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = uploads_in(dir.path());
        fs::create_dir_all(&uploads.root).unwrap();
        fs::write(uploads.root.join("foto.png"), b"png").unwrap();

        let att = resolve_attachment(&uploads, "C:\\xampp\\htdocs\\old\\foto.png", 1024).unwrap();
        assert_eq!(att.file_name, "foto.png");

        let att = resolve_attachment(&uploads, "legacy/dir/foto.png", 1024).unwrap();
        assert_eq!(att.path, uploads.root.join("foto.png"));
    }

    #[test]
    fn test_missing_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = uploads_in(dir.path());
        let err = resolve_attachment(&uploads, "uploads/nope.pdf", 1024).unwrap_err();
        assert!(matches!(err, PqrsError::Attachment(_)));
    }

    #[test]
    fn test_oversized_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = uploads_in(dir.path());
        fs::create_dir_all(&uploads.root).unwrap();
        fs::write(uploads.root.join("big.pdf"), vec![0u8; 2048]).unwrap();

        let err = resolve_attachment(&uploads, "big.pdf", 1024).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_staged_removal_is_dropped_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = uploads_in(dir.path());
        fs::create_dir_all(&uploads.root).unwrap();
        let file = uploads.root.join("x.pdf");
        fs::write(&file, b"x").unwrap();

        let staged = stage_removal(&uploads, "x.pdf").unwrap();
        assert!(staged.is_some());
        assert!(!file.exists());

        let (_, removed) = settle_removal(staged, Ok(())).unwrap();
        assert!(removed);
        assert_eq!(fs::read_dir(&uploads.root).unwrap().count(), 0);

        assert!(stage_removal(&uploads, "x.pdf").unwrap().is_none());
        assert!(stage_removal(&uploads, "../x.pdf").unwrap().is_none());
    }

    #[test]
    fn test_staged_removal_is_restored_when_commit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = uploads_in(dir.path());
        fs::create_dir_all(&uploads.root).unwrap();
        let file = uploads.root.join("orden.pdf");
        fs::write(&file, b"%PDF").unwrap();

        let staged = stage_removal(&uploads, "uploads/orden.pdf").unwrap();
        assert!(!file.exists());

        let outcome: Result<(), PqrsError> = Err(PqrsError::Database("commit failed".into()));
        let err = settle_removal(staged, outcome).unwrap_err();
        assert!(matches!(err, PqrsError::Database(_)));
        assert_eq!(fs::read(&file).unwrap(), b"%PDF");
    }
}

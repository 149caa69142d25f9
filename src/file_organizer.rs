/// Single-file moves and destination folder creation.
///
/// A move is a plain `rename` when source and destination share a volume.
/// Across volumes the file is copied to a freshly created destination,
/// flushed and checked, and only then is the source removed.
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;
use tracing::{debug, warn};

/// How a file ended up at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Renamed,
    Copied,
}

/// Outcome of preparing a destination folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStatus {
    Existing,
    Created,
}

pub struct FileOrganizer;

impl FileOrganizer {
    /// Makes sure `folder` exists as a directory, creating it if absent.
    ///
    /// Fails with `AlreadyExists` when something that is not a directory
    /// occupies the name.
    pub fn ensure_folder(folder: &Path) -> io::Result<FolderStatus> {
        match folder.symlink_metadata() {
            Ok(meta) if meta.is_dir() => Ok(FolderStatus::Existing),
            Ok(_) => Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} exists and is not a directory", folder.display()),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir(folder)?;
                debug!(folder = %folder.display(), "Created destination folder");
                Ok(FolderStatus::Created)
            }
            Err(e) => Err(e),
        }
    }

    /// Moves `source` to `destination`, which must not exist yet.
    pub fn relocate(source: &Path, destination: &Path) -> io::Result<MoveMethod> {
        match fs::rename(source, destination) {
            Ok(()) => Ok(MoveMethod::Renamed),
            Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                warn!(
                    source = %source.display(),
                    destination = %destination.display(),
                    "Rename crosses volumes, falling back to copy and delete"
                );
                Self::copy_then_delete(source, destination)?;
                Ok(MoveMethod::Copied)
            }
            Err(e) => Err(e),
        }
    }

    /// Copies `source` into a new file at `destination`, verifies it, then
    /// removes `source`. On any failure exactly one of the two files is
    /// left: the source stays and the copy is removed.
    pub fn copy_then_delete(source: &Path, destination: &Path) -> io::Result<()> {
        Self::copy_then_remove_with(source, destination, |path| fs::remove_file(path))
    }

    fn copy_then_remove_with(
        source: &Path,
        destination: &Path,
        remove_source: impl FnOnce(&Path) -> io::Result<()>,
    ) -> io::Result<()> {
        let expected_len = fs::metadata(source)?.len();
        let mut reader = File::open(source)?;
        // create_new so a file that appeared since conflict resolution is never overwritten
        let mut writer = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)?;

        if let Err(e) = Self::copy_verified(&mut reader, &mut writer, destination, expected_len) {
            drop(writer);
            Self::discard_copy(destination);
            return Err(e);
        }
        drop(reader);
        drop(writer);

        if let Err(e) = remove_source(source) {
            warn!(
                source = %source.display(),
                error = %e,
                "Could not remove source after copying, discarding the copy"
            );
            Self::discard_copy(destination);
            return Err(e);
        }
        Ok(())
    }

    fn discard_copy(destination: &Path) {
        if let Err(cleanup) = fs::remove_file(destination)
            && cleanup.kind() != ErrorKind::NotFound
        {
            warn!(
                destination = %destination.display(),
                error = %cleanup,
                "Could not remove copy"
            );
        }
    }

    fn copy_verified(
        reader: &mut File,
        writer: &mut File,
        destination: &Path,
        expected_len: u64,
    ) -> io::Result<()> {
        let copied = io::copy(reader, writer)?;
        writer.sync_all()?;

        if let Ok(meta) = reader.metadata() {
            let _ = writer.set_permissions(meta.permissions());
            if let Ok(modified) = meta.modified() {
                let _ = writer.set_modified(modified);
            }
        }

        let written = fs::metadata(destination)?.len();
        if copied != expected_len || written != expected_len {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "copy at {} is incomplete ({written} of {expected_len} bytes)",
                    destination.display()
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_folder_creates_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let folder = temp_dir.path().join("Documents");

        assert_eq!(FileOrganizer::ensure_folder(&folder).unwrap(), FolderStatus::Created);
        assert!(folder.is_dir());
        assert_eq!(FileOrganizer::ensure_folder(&folder).unwrap(), FolderStatus::Existing);
    }

    #[test]
    fn test_ensure_folder_rejects_file_in_the_way() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let folder = temp_dir.path().join("Documents");
        fs::write(&folder, "not a folder").unwrap();

        let err = FileOrganizer::ensure_folder(&folder).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_relocate_renames_on_same_volume() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("test.txt");
        let destination = temp_dir.path().join("moved.txt");
        fs::write(&source, "test content").unwrap();

        assert_eq!(
            FileOrganizer::relocate(&source, &destination).unwrap(),
            MoveMethod::Renamed
        );
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&destination).unwrap(), "test content");
    }

    #[test]
    fn test_relocate_missing_source_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = FileOrganizer::relocate(
            &temp_dir.path().join("gone.txt"),
            &temp_dir.path().join("dest.txt"),
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_copy_then_delete_moves_content() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("big.bin");
        let destination = temp_dir.path().join("copy.bin");
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &payload).unwrap();

        FileOrganizer::copy_then_delete(&source, &destination).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&destination).unwrap(), payload);
    }

    #[test]
    fn test_copy_is_discarded_when_source_cannot_be_removed() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("a.txt");
        let destination = temp_dir.path().join("b.txt");
        fs::write(&source, "content").unwrap();

        let err = FileOrganizer::copy_then_remove_with(&source, &destination, |_| {
            Err(io::Error::new(ErrorKind::PermissionDenied, "read-only volume"))
        })
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(fs::read_to_string(&source).unwrap(), "content");
        assert!(!destination.exists());
    }

    #[test]
    fn test_copy_then_delete_never_overwrites() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("a.txt");
        let destination = temp_dir.path().join("b.txt");
        fs::write(&source, "new").unwrap();
        fs::write(&destination, "existing").unwrap();

        let err = FileOrganizer::copy_then_delete(&source, &destination).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        // The failed copy must not take the existing file or the source with it
        assert_eq!(fs::read_to_string(&destination).unwrap(), "existing");
        assert_eq!(fs::read_to_string(&source).unwrap(), "new");
    }
}

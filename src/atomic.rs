//! Crash-safe file primitives.
//!
//! Every note write goes through [`AtomicFileWriter`]: content lands in a
//! temporary sibling, is fsynced, renamed over the target and the directory
//! is fsynced so the rename itself survives a crash. Readers only ever see
//! the old file or the complete new one.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tracing::{debug, trace};

use crate::error::{IoOp, NxError, NxResult};

/// Writes a file through a temporary sibling and renames it into place.
///
/// Dropping the writer without calling [`commit`](Self::commit) removes the
/// temporary file and leaves the target untouched.
pub struct AtomicFileWriter {
    target: PathBuf,
    tmp: NamedTempFile,
}

impl AtomicFileWriter {
    /// Opens a temporary file next to `target`, creating the parent
    /// directory if needed.
    pub fn new(target: &Path) -> NxResult<Self> {
        let dir = parent_dir(target);
        ensure_dir(dir)?;

        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let tmp = Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| NxError::from_io(dir, IoOp::Write, e))?;

        trace!(target = %target.display(), tmp = %tmp.path().display(), "opened atomic writer");

        Ok(Self {
            target: target.to_path_buf(),
            tmp,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        self.tmp.path()
    }

    pub fn write(&mut self, data: &[u8]) -> NxResult<()> {
        self.tmp
            .write_all(data)
            .map_err(|e| NxError::from_io(&self.target, IoOp::Write, e))
    }

    /// Flushes, fsyncs and renames the temporary file onto the target.
    pub fn commit(mut self) -> NxResult<()> {
        self.tmp
            .flush()
            .map_err(|e| NxError::from_io(&self.target, IoOp::Write, e))?;
        self.tmp
            .as_file()
            .sync_all()
            .map_err(|e| NxError::from_io(&self.target, IoOp::Sync, e))?;

        let from = self.tmp.path().to_path_buf();
        let target = self.target;
        self.tmp.persist(&target).map_err(|e| NxError::Rename {
            from,
            to: target.clone(),
            source: e.error,
        })?;

        sync_dir(parent_dir(&target))?;
        debug!(path = %target.display(), "atomic write committed");
        Ok(())
    }

    /// Abandons the write. Equivalent to dropping the writer.
    pub fn cancel(self) {
        trace!(target = %self.target.display(), "atomic write cancelled");
    }
}

/// Anonymous scratch file for sensitive transient content.
///
/// On platforms that allow it the file is unlinked as soon as it is
/// created, so it never has a visible path and disappears when closed.
pub struct SecureTempFile {
    file: File,
}

impl SecureTempFile {
    pub fn new() -> NxResult<Self> {
        let file = tempfile::tempfile()?;
        Ok(Self { file })
    }

    /// Replaces the file's content with `data`.
    pub fn write(&mut self, data: &[u8]) -> NxResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn read(&mut self) -> NxResult<Vec<u8>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Zeroes the content before closing the file.
    pub fn cleanup(mut self) -> NxResult<()> {
        let len = self.file.metadata()?.len();
        if len > 0 {
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_all(&vec![0u8; len as usize])?;
            self.file.sync_all()?;
        }
        self.file.set_len(0)?;
        Ok(())
    }
}

/// One-shot atomic write of `data` to `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> NxResult<()> {
    let mut writer = AtomicFileWriter::new(path)?;
    writer.write(data)?;
    writer.commit()
}

pub fn read_file(path: &Path) -> NxResult<String> {
    fs::read_to_string(path).map_err(|e| NxError::from_io(path, IoOp::Read, e))
}

/// Renames `from` to `to`, creating the destination directory if needed.
///
/// Both directories are fsynced afterwards. A missing source is reported
/// as [`NxError::FileNotFound`].
pub fn move_file(from: &Path, to: &Path) -> NxResult<()> {
    let to_dir = parent_dir(to);
    ensure_dir(to_dir)?;

    fs::rename(from, to).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound if !from.exists() => NxError::FileNotFound(from.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => NxError::PermissionDenied(from.to_path_buf()),
        _ => NxError::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: e,
        },
    })?;

    sync_dir(to_dir)?;
    let from_dir = parent_dir(from);
    if from_dir != to_dir {
        sync_dir(from_dir)?;
    }
    debug!(from = %from.display(), to = %to.display(), "moved file");
    Ok(())
}

pub fn remove_file(path: &Path) -> NxResult<()> {
    fs::remove_file(path).map_err(|e| NxError::from_io(path, IoOp::Write, e))?;
    debug!(path = %path.display(), "removed file");
    Ok(())
}

/// Markdown files directly inside `dir`, sorted by path.
pub fn list_markdown(dir: &Path) -> NxResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => NxError::DirectoryNotFound(dir.to_path_buf()),
        _ => NxError::from_io(dir, IoOp::Read, e),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|res| {
            let entry = res.ok()?;
            let ft = entry.file_type().ok()?;
            let path = entry.path();
            if ft.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                Some(path)
            } else {
                None
            }
        })
        .collect();

    files.sort();
    Ok(files)
}

/// Fsyncs a directory so renames inside it are durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> NxResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| NxError::from_io(dir, IoOp::Sync, e))
}

/// Directories cannot be opened for syncing here; renames are already
/// durable once they return.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> NxResult<()> {
    Ok(())
}

pub fn ensure_dir(dir: &Path) -> NxResult<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| NxError::from_io(dir, IoOp::CreateDir, e))?;
    debug!(path = %dir.display(), "created directory");
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_creates_parent_and_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/note.md");

        write_atomic(&path, b"hello").unwrap();
        assert_eq!(read_file(&path).unwrap(), "hello");
    }

    #[test]
    fn cancelled_writer_leaves_target_intact() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.md");
        write_atomic(&path, b"original").unwrap();

        let mut writer = AtomicFileWriter::new(&path).unwrap();
        writer.write(b"half of the new conte").unwrap();
        let temp_path = writer.temp_path().to_path_buf();
        assert!(temp_path.exists());
        assert_eq!(read_file(&path).unwrap(), "original");

        writer.cancel();
        assert!(!temp_path.exists());
        assert_eq!(read_file(&path).unwrap(), "original");
        assert_eq!(list_markdown(tmp.path()).unwrap(), vec![path]);
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = read_file(&tmp.path().join("nope.md")).unwrap_err();
        assert!(matches!(err, NxError::FileNotFound(_)));
    }

    #[test]
    fn move_file_relocates() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("a/x.md");
        let to = tmp.path().join("b/x.md");
        write_atomic(&from, b"x").unwrap();

        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(read_file(&to).unwrap(), "x");

        let err = move_file(&from, &to).unwrap_err();
        assert!(matches!(err, NxError::FileNotFound(_)));
    }

    #[test]
    fn list_markdown_skips_other_files() {
        let tmp = TempDir::new().unwrap();
        write_atomic(&tmp.path().join("b.md"), b"").unwrap();
        write_atomic(&tmp.path().join("a.md"), b"").unwrap();
        write_atomic(&tmp.path().join("c.txt"), b"").unwrap();
        fs::create_dir(tmp.path().join("d.md")).unwrap();

        let names: Vec<_> = list_markdown(tmp.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.md", "b.md"]);

        let err = list_markdown(&tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, NxError::DirectoryNotFound(_)));
    }

    #[test]
    fn secure_temp_file_round_trip() {
        let mut scratch = SecureTempFile::new().unwrap();
        scratch.write(b"secret one").unwrap();
        scratch.write(b"two").unwrap();
        assert_eq!(scratch.read().unwrap(), b"two");
        scratch.cleanup().unwrap();
    }
}

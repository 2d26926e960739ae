//! File-backed blob I/O.
//!
//! File sources and targets operate on paths rooted under a configured
//! directory; paths are canonicalized and verified to stay inside the root
//! before any file is opened.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use weft_core::{
    error::{Error, Result},
    message::MessageId,
};

use crate::io::{BlobInfo, SourceBlobIo, TargetBlobIo};

/// Resolves `path` relative to `root` and verifies containment.
pub fn resolve_under_root(root: &Path, path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let canonical_root = root.canonicalize()?;
    // Canonicalize the deepest existing ancestor so creation targets can
    // be validated as well
    let canonical = match joined.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            let parent = joined
                .parent()
                .ok_or_else(|| Error::ResourceOutsideRoot(joined.clone()))?;
            let file_name = joined
                .file_name()
                .ok_or_else(|| Error::ResourceOutsideRoot(joined.clone()))?;
            parent.canonicalize()?.join(file_name)
        }
    };
    if !canonical.starts_with(&canonical_root) {
        return Err(Error::ResourceOutsideRoot(joined));
    }
    Ok(canonical)
}

/// Random-access source reading a window of a file.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    start: u64,
    size: u64,
}

impl FileSource {
    /// Opens `path` under `root` for reading.
    ///
    /// `offset` and `size` select a window of the file; omitted values
    /// default to the start and the remainder of the file.
    pub fn open(
        root: &Path,
        path: &Path,
        offset: Option<u64>,
        size: Option<u64>,
    ) -> Result<Self> {
        let resolved = resolve_under_root(root, path)?;
        let file = File::open(resolved)?;
        let file_size = file.metadata()?.len();
        let start = offset.unwrap_or(0).min(file_size);
        let size = size.unwrap_or(file_size - start).min(file_size - start);
        Ok(Self { file, start, size })
    }
}

impl SourceBlobIo for FileSource {
    fn total_size(&mut self) -> u64 {
        self.size
    }

    fn fetch_fragment(&mut self, offset: u64, dst: &mut [u8]) -> usize {
        if offset >= self.size {
            return 0;
        }
        let n = dst.len().min((self.size - offset) as usize);
        if self.file.seek(SeekFrom::Start(self.start + offset)).is_err() {
            return 0;
        }
        match self.file.read(&mut dst[..n]) {
            Ok(read) => read,
            Err(_) => 0,
        }
    }
}

/// Target storing fragments into a file.
#[derive(Debug)]
pub struct FileTarget {
    file: File,
    path: PathBuf,
}

impl FileTarget {
    /// Creates (or truncates) `path` under `root` for writing.
    pub fn create(root: &Path, path: &Path) -> Result<Self> {
        let resolved = resolve_under_root(root, path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&resolved)?;
        Ok(Self { file, path: resolved })
    }

    /// The resolved path this target writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TargetBlobIo for FileTarget {
    fn store_fragment(&mut self, offset: u64, data: &[u8], _info: &BlobInfo) -> bool {
        if self.file.seek(SeekFrom::Start(offset)).is_err() {
            return false;
        }
        self.file.write_all(data).is_ok()
    }

    fn check_stored(&mut self, offset: u64, data: &[u8]) -> bool {
        if self.file.seek(SeekFrom::Start(offset)).is_err() {
            return false;
        }
        let mut stored = vec![0u8; data.len()];
        match self.file.read_exact(&mut stored) {
            Ok(()) => stored == data,
            Err(_) => false,
        }
    }

    fn handle_finished(&mut self, _msg_id: MessageId, _info: &BlobInfo) {
        let _ = self.file.flush();
    }

    fn handle_cancelled(&mut self) {
        tracing::debug!(path = %self.path.display(), "blob transfer into file cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_under_root(dir.path(), Path::new("../outside.bin"));
        assert!(matches!(result, Err(Error::ResourceOutsideRoot(_))));
    }

    #[test]
    fn test_resolve_accepts_contained_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"abc").unwrap();
        let resolved = resolve_under_root(dir.path(), Path::new("data.bin")).unwrap();
        assert!(resolved.ends_with("data.bin"));
    }

    #[test]
    fn test_file_source_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();

        let mut source =
            FileSource::open(dir.path(), Path::new("data.bin"), Some(2), Some(5)).unwrap();
        assert_eq!(source.total_size(), 5);

        let mut dst = [0u8; 10];
        let n = source.fetch_fragment(0, &mut dst);
        assert_eq!(&dst[..n], b"23456");

        let n = source.fetch_fragment(3, &mut dst);
        assert_eq!(&dst[..n], b"56");
    }

    #[test]
    fn test_file_target_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let info = BlobInfo { total_size: 6, ..Default::default() };

        let mut target = FileTarget::create(dir.path(), Path::new("out.bin")).unwrap();
        assert!(target.store_fragment(3, b"def", &info));
        assert!(target.store_fragment(0, b"abc", &info));
        assert!(target.check_stored(0, b"abc"));
        assert!(!target.check_stored(0, b"xyz"));
        target.handle_finished(MessageId::default(), &info);

        let written = std::fs::read(target.path()).unwrap();
        assert_eq!(written, b"abcdef");
    }
}

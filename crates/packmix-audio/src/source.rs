//! Byte sources that packs are read from.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use packmix_core::{Error, Result};
use symphonia::core::io::MediaSource;

/// A seekable reader that can be moved to the decode worker.
pub trait ReadSeek: Read + Seek + Send + Sync {}

impl<T: Read + Seek + Send + Sync> ReadSeek for T {}

/// Read-only bundled assets addressed by name.
///
/// Stands in for the host platform's packaged asset store.
pub trait AssetSource: Send + Sync {
    /// Open the named asset. A missing asset is reported as `ErrorKind::NotFound`.
    fn open(&self, name: &str) -> io::Result<Box<dyn ReadSeek>>;
}

/// Assets stored as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetSource for DirectoryAssets {
    fn open(&self, name: &str) -> io::Result<Box<dyn ReadSeek>> {
        let relative = Path::new(name);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("asset name {name} escapes the asset root"),
            ));
        }
        Ok(Box::new(File::open(self.root.join(relative))?))
    }
}

/// Where a pack's bytes come from.
#[derive(Clone)]
pub enum PackSource {
    File(PathBuf),
    Memory(Bytes),
    Asset {
        assets: Arc<dyn AssetSource>,
        name: String,
    },
}

impl PackSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn asset(assets: Arc<dyn AssetSource>, name: impl Into<String>) -> Self {
        Self::Asset {
            assets,
            name: name.into(),
        }
    }

    /// Open a fresh reader positioned at the start of the pack.
    pub fn open(&self) -> Result<Box<dyn ReadSeek>> {
        match self {
            Self::File(path) => Ok(Box::new(File::open(path)?)),
            Self::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            Self::Asset { assets, name } => assets.open(name).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Error::AssetNotFound(name.clone())
                } else {
                    Error::Io(e)
                }
            }),
        }
    }
}

impl fmt::Debug for PackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "File({})", path.display()),
            Self::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            Self::Asset { name, .. } => write!(f, "Asset({name})"),
        }
    }
}

/// A window of `len` bytes starting at `start` within a larger reader.
pub struct EntryReader {
    inner: Box<dyn ReadSeek>,
    start: u64,
    len: u64,
    pos: u64,
}

impl EntryReader {
    pub fn new(mut inner: Box<dyn ReadSeek>, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            len,
            pos: 0,
        })
    }

    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let read = self.inner.read(&mut buf[..want])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for EntryReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of entry")
        })?;

        self.inner.seek(SeekFrom::Start(self.start + target))?;
        self.pos = target;
        Ok(target)
    }
}

impl MediaSource for EntryReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use std::io::Write;

    #[test]
    fn test_entry_reader_is_bounded() {
        let data = Bytes::from_static(b"0123456789");
        let mut reader = EntryReader::new(Box::new(Cursor::new(data)), 3, 4).unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"3456");

        reader.seek(SeekFrom::Start(1)).unwrap();
        let mut two = [0u8; 2];
        reader.read_exact(&mut two).unwrap();
        assert_eq!(&two, b"45");

        assert_eq!(reader.seek(SeekFrom::End(-1)).unwrap(), 3);
        assert!(reader.seek(SeekFrom::Current(-10)).is_err());
    }

    #[test]
    fn test_directory_assets() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("sfx.pmx")).unwrap();
        file.write_all(b"pack").unwrap();

        let assets: Arc<dyn AssetSource> = Arc::new(DirectoryAssets::new(dir.path()));
        let mut reader = PackSource::asset(Arc::clone(&assets), "sfx.pmx").open().unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "pack");

        let missing = PackSource::asset(Arc::clone(&assets), "nope.pmx").open();
        assert!(matches!(missing, Err(Error::AssetNotFound(name)) if name == "nope.pmx"));

        assert!(assets.open("../outside").is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let source = PackSource::file("/definitely/not/here.pmx");
        assert!(matches!(source.open(), Err(Error::Io(_))));
    }
}

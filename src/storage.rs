use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use crate::TransferResult;

/// Synchronous file shim. The engine owns the handle exclusively while
/// a transfer is active and closes it at completion or on fatal error.
pub trait StorageHandler {
    /// Open the file at `path` for reading and report its length.
    fn open_read(&mut self, path: &Path) -> TransferResult<u64>;
    /// Create or truncate the file at `path` for writing.
    fn open_write(&mut self, path: &Path) -> TransferResult<()>;
    fn seek(&mut self, pos: u64) -> TransferResult<()>;
    fn read(&mut self, buf: &mut [u8]) -> TransferResult<usize>;
    fn write(&mut self, data: &[u8]) -> TransferResult<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

pub struct DiskStorageHandler {
    file: Option<File>,
}

impl DiskStorageHandler {
    pub fn new() -> Self {
        Self { file: None }
    }

    fn file_mut(&mut self) -> TransferResult<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no file is open"))
    }
}

impl Default for DiskStorageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageHandler for DiskStorageHandler {
    fn open_read(&mut self, path: &Path) -> TransferResult<u64> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        self.file = Some(file);
        Ok(len)
    }

    fn open_write(&mut self, path: &Path) -> TransferResult<()> {
        self.file = Some(File::create(path)?);
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> TransferResult<()> {
        self.file_mut()?.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> TransferResult<usize> {
        Ok(self.file_mut()?.read(buf)?)
    }

    fn write(&mut self, data: &[u8]) -> TransferResult<()> {
        self.file_mut()?.write_all(data)?;
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// In-memory storage keyed by path, for tests and embedders without a
/// filesystem.
#[derive(Default)]
pub struct MemoryStorageHandler {
    pub files: HashMap<String, Vec<u8>>,
    current: Option<String>,
    pos: usize,
}

impl MemoryStorageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    fn current_mut(&mut self) -> TransferResult<(&mut Vec<u8>, &mut usize)> {
        let Some(name) = &self.current else {
            return Err(anyhow::anyhow!("no file is open"));
        };
        let data = self
            .files
            .get_mut(name)
            .ok_or_else(|| anyhow::anyhow!("no file is open"))?;
        Ok((data, &mut self.pos))
    }
}

impl StorageHandler for MemoryStorageHandler {
    fn open_read(&mut self, path: &Path) -> TransferResult<u64> {
        let key = Self::key(path);
        let Some(data) = self.files.get(&key) else {
            return Err(anyhow::anyhow!("no such file: {key}"));
        };
        let len = data.len() as u64;
        self.current = Some(key);
        self.pos = 0;
        Ok(len)
    }

    fn open_write(&mut self, path: &Path) -> TransferResult<()> {
        let key = Self::key(path);
        self.files.insert(key.clone(), Vec::new());
        self.current = Some(key);
        self.pos = 0;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> TransferResult<()> {
        let _ = self.current_mut()?;
        self.pos = pos as usize;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> TransferResult<usize> {
        let (data, pos) = self.current_mut()?;
        let start = (*pos).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        *pos += n;
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> TransferResult<()> {
        let (data, pos) = self.current_mut()?;
        if data.len() < *pos + bytes.len() {
            data.resize(*pos + bytes.len(), 0);
        }
        data[*pos..*pos + bytes.len()].copy_from_slice(bytes);
        *pos += bytes.len();
        Ok(())
    }

    fn close(&mut self) {
        self.current = None;
        self.pos = 0;
    }

    fn is_open(&self) -> bool {
        self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{DiskStorageHandler, MemoryStorageHandler, StorageHandler};
    use std::io::Write;
    use std::path::Path;

    #[test]
    fn test_memory_storage_write_read() {
        let mut storage = MemoryStorageHandler::new();
        storage.open_write(Path::new("out.bin")).unwrap();
        storage.write(b"hello ").unwrap();
        storage.write(b"world").unwrap();
        storage.close();
        assert!(!storage.is_open());
        assert_eq!(b"hello world".to_vec(), storage.files["out.bin"]);

        let len = storage.open_read(Path::new("out.bin")).unwrap();
        assert_eq!(11, len);
        let mut buf = [0u8; 5];
        storage.seek(6).unwrap();
        assert_eq!(5, storage.read(&mut buf).unwrap());
        assert_eq!(b"world", &buf);
        assert_eq!(0, storage.read(&mut buf).unwrap());
    }

    #[test]
    fn test_disk_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::File::create(&src).unwrap().write_all(b"0123456789").unwrap();

        let mut storage = DiskStorageHandler::new();
        assert_eq!(10, storage.open_read(&src).unwrap());
        storage.seek(4).unwrap();
        let mut buf = [0u8; 16];
        let n = storage.read(&mut buf).unwrap();
        assert_eq!(b"456789", &buf[..n]);
        storage.close();

        let dst = dir.path().join("dst.bin");
        storage.open_write(&dst).unwrap();
        storage.write(b"abc").unwrap();
        storage.close();
        assert_eq!(b"abc".to_vec(), std::fs::read(&dst).unwrap());
    }

    #[test]
    fn test_read_without_open_fails() {
        let mut storage = DiskStorageHandler::new();
        assert!(storage.read(&mut [0u8; 4]).is_err());
    }
}

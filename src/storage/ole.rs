//! Compound-file adapter.
//!
//! Bridges the [`Container`] boundary onto the `cfb` crate. The file is held
//! in memory for the lifetime of the handle; `commit` on the root serialises
//! the buffer back to the destination path. Substorages share the underlying
//! compound file and address children through a path prefix.

use std::cell::RefCell;
use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::{ChildKind, Container};

/// Shared growable buffer satisfying the compound file's I/O bounds while
/// letting the adapter read the serialised bytes back out on commit.
#[derive(Debug, Clone, Default)]
struct SharedBuf(Rc<RefCell<Cursor<Vec<u8>>>>);

impl SharedBuf {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        SharedBuf(Rc::new(RefCell::new(Cursor::new(bytes))))
    }

    fn bytes(&self) -> Vec<u8> {
        self.0.borrow().get_ref().clone()
    }
}

impl Read for SharedBuf {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().read(buf)
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.borrow_mut().flush()
    }
}

impl Seek for SharedBuf {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.0.borrow_mut().seek(pos)
    }
}

pub struct OleContainer {
    comp: Rc<RefCell<cfb::CompoundFile<SharedBuf>>>,
    buf: SharedBuf,
    prefix: PathBuf,
    dest: Option<PathBuf>,
}

impl OleContainer {
    /// Open an existing compound file read-only (mutations stay in memory).
    pub fn open(path: &Path) -> Result<OleContainer> {
        let bytes = fs::read(path).map_err(|source| Error::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let buf = SharedBuf::from_bytes(bytes);
        let comp = cfb::CompoundFile::open(buf.clone()).map_err(|source| Error::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(OleContainer {
            comp: Rc::new(RefCell::new(comp)),
            buf,
            prefix: PathBuf::from("/"),
            dest: None,
        })
    }

    /// Create a compound file that will be written to `path` on commit.
    /// Without `truncate`, an existing file's contents are loaded first.
    pub fn create(path: &Path, truncate: bool) -> Result<OleContainer> {
        let existing = if truncate { None } else { fs::read(path).ok() };
        let (buf, comp) = match existing {
            Some(bytes) => {
                let buf = SharedBuf::from_bytes(bytes);
                let comp =
                    cfb::CompoundFile::open(buf.clone()).map_err(|source| Error::OpenFailed {
                        path: path.to_path_buf(),
                        source,
                    })?;
                (buf, comp)
            }
            None => {
                let buf = SharedBuf::default();
                let comp =
                    cfb::CompoundFile::create(buf.clone()).map_err(|source| Error::OpenFailed {
                        path: path.to_path_buf(),
                        source,
                    })?;
                (buf, comp)
            }
        };
        Ok(OleContainer {
            comp: Rc::new(RefCell::new(comp)),
            buf,
            prefix: PathBuf::from("/"),
            dest: Some(path.to_path_buf()),
        })
    }

    fn child_path(&self, name: &str) -> PathBuf {
        self.prefix.join(name)
    }
}

impl Container for OleContainer {
    fn children(&self) -> Result<Vec<(String, ChildKind)>> {
        let comp = self.comp.borrow();
        let entries = comp.read_storage(&self.prefix)?;
        Ok(entries
            .map(|e| {
                let kind = if e.is_stream() {
                    ChildKind::Stream
                } else {
                    ChildKind::Storage
                };
                (e.name().to_owned(), kind)
            })
            .collect())
    }

    fn has_stream(&self, name: &str) -> bool {
        let comp = self.comp.borrow();
        comp.entry(self.child_path(name))
            .map(|e| e.is_stream())
            .unwrap_or(false)
    }

    fn read_stream(&mut self, name: &str) -> Result<Vec<u8>> {
        let path = self.child_path(name);
        let mut comp = self.comp.borrow_mut();
        let mut stream = comp
            .open_stream(&path)
            .map_err(|_| Error::NotFound(format!("stream {name:?}")))?;
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        Ok(data)
    }

    fn write_stream(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.child_path(name);
        let mut comp = self.comp.borrow_mut();
        let mut stream = comp.create_stream(&path)?;
        stream.write_all(data)?;
        Ok(())
    }

    fn open_storage(&mut self, name: &str) -> Result<Box<dyn Container>> {
        let path = self.child_path(name);
        let comp = self.comp.borrow();
        let entry = comp
            .entry(&path)
            .map_err(|_| Error::NotFound(format!("storage {name:?}")))?;
        if !entry.is_storage() {
            return Err(Error::NotFound(format!("storage {name:?}")));
        }
        drop(comp);
        Ok(Box::new(OleContainer {
            comp: self.comp.clone(),
            buf: self.buf.clone(),
            prefix: path,
            dest: None,
        }))
    }

    fn create_storage(&mut self, name: &str) -> Result<Box<dyn Container>> {
        let path = self.child_path(name);
        {
            let mut comp = self.comp.borrow_mut();
            if comp.entry(&path).is_err() {
                comp.create_storage(&path)?;
            }
        }
        Ok(Box::new(OleContainer {
            comp: self.comp.clone(),
            buf: self.buf.clone(),
            prefix: path,
            dest: None,
        }))
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let path = self.child_path(name);
        let mut comp = self.comp.borrow_mut();
        let entry = comp
            .entry(&path)
            .map_err(|_| Error::NotFound(format!("child {name:?}")))?;
        if entry.is_stream() {
            comp.remove_stream(&path)?;
        } else {
            comp.remove_storage(&path)?;
        }
        Ok(())
    }

    fn set_class(&mut self, clsid: [u8; 16]) -> Result<()> {
        let mut comp = self.comp.borrow_mut();
        comp.set_storage_clsid(&self.prefix, Uuid::from_bytes_le(clsid))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.comp.borrow_mut().flush()?;
        if let Some(dest) = &self.dest {
            fs::write(dest, SharedBuf::bytes(&self.buf))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::copy_tree;
    use crate::storage::memory::MemoryContainer;

    #[test]
    fn test_create_commit_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.msi");

        let mut c = OleContainer::create(&path, true).unwrap();
        c.write_stream("alpha", b"12345").unwrap();
        c.create_storage("sub").unwrap().write_stream("inner", b"x").unwrap();
        c.commit().unwrap();

        let mut back = OleContainer::open(&path).unwrap();
        assert_eq!(back.read_stream("alpha").unwrap(), b"12345");
        let mut sub = back.open_storage("sub").unwrap();
        assert_eq!(sub.read_stream("inner").unwrap(), b"x");
    }

    #[test]
    fn test_copy_tree_between_backends() {
        let mut src = MemoryContainer::new();
        src.write_stream("s", b"data").unwrap();
        src.create_storage("d").unwrap().write_stream("n", b"deep").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.msi");
        let mut dst = OleContainer::create(&path, true).unwrap();
        copy_tree(&mut src, &mut dst).unwrap();
        dst.commit().unwrap();

        let mut back = OleContainer::open(&path).unwrap();
        assert_eq!(back.read_stream("s").unwrap(), b"data");
        assert_eq!(
            back.open_storage("d").unwrap().read_stream("n").unwrap(),
            b"deep"
        );
    }

    #[test]
    fn test_uncommitted_changes_never_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.msi");
        let mut c = OleContainer::create(&path, true).unwrap();
        c.write_stream("s", b"x").unwrap();
        drop(c);
        assert!(!path.exists());
    }
}

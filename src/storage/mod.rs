//! Structured-storage boundary.
//!
//! The engine consumes an OLE2 container purely through the [`Container`]
//! trait: enumerate children, read/write streams by (encoded) name, create
//! and remove substorages. Names crossing this boundary are already in the
//! on-disk encoded form; the container treats them as opaque strings.
//!
//! Two implementations exist: [`memory::MemoryContainer`] for scratch state,
//! transforms and tests, and [`ole::OleContainer`] wrapping a real compound
//! file on disk.

pub mod memory;
pub mod name;
pub mod ole;

use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Stream,
    Storage,
}

pub trait Container {
    /// Encoded child names with their kinds, in storage order.
    fn children(&self) -> Result<Vec<(String, ChildKind)>>;

    fn has_stream(&self, name: &str) -> bool;

    fn read_stream(&mut self, name: &str) -> Result<Vec<u8>>;

    /// Create or replace a stream with the given contents.
    fn write_stream(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Open an existing substorage.
    fn open_storage(&mut self, name: &str) -> Result<Box<dyn Container>>;

    /// Create a substorage (or open it if it already exists).
    fn create_storage(&mut self, name: &str) -> Result<Box<dyn Container>>;

    /// Remove a stream or substorage.
    fn remove(&mut self, name: &str) -> Result<()>;

    /// Set the storage class id on this storage.
    fn set_class(&mut self, clsid: [u8; 16]) -> Result<()>;

    /// Flush everything to the backing medium.
    fn commit(&mut self) -> Result<()>;
}

/// Open an on-disk compound file for reading.
pub fn open_read(path: &Path) -> Result<Box<dyn Container>> {
    Ok(Box::new(ole::OleContainer::open(path)?))
}

/// Create (or truncate) an on-disk compound file; contents reach the disk on
/// `commit`.
pub fn open_write(path: &Path, truncate: bool) -> Result<Box<dyn Container>> {
    Ok(Box::new(ole::OleContainer::create(path, truncate)?))
}

/// Recursively copy every stream and substorage of `src` into `dst`.
pub fn copy_tree(src: &mut dyn Container, dst: &mut dyn Container) -> Result<()> {
    for (child, kind) in src.children()? {
        match kind {
            ChildKind::Stream => {
                let data = src.read_stream(&child)?;
                dst.write_stream(&child, &data)?;
            }
            ChildKind::Storage => {
                let mut sub_src = src.open_storage(&child)?;
                let mut sub_dst = dst.create_storage(&child)?;
                copy_tree(sub_src.as_mut(), sub_dst.as_mut())?;
            }
        }
    }
    Ok(())
}

//! In-memory container tree.
//!
//! Backs freshly created databases until their first commit, holds transform
//! fixtures in tests, and serves as the scratch target when serialising.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::storage::{ChildKind, Container};

#[derive(Debug, Default)]
struct Node {
    streams: BTreeMap<String, Vec<u8>>,
    storages: BTreeMap<String, Rc<RefCell<Node>>>,
    clsid: [u8; 16],
}

/// A storage tree living entirely on the heap. Cloning yields another handle
/// onto the same tree, like reopening a substorage.
#[derive(Debug, Clone, Default)]
pub struct MemoryContainer {
    node: Rc<RefCell<Node>>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Container for MemoryContainer {
    fn children(&self) -> Result<Vec<(String, ChildKind)>> {
        let node = self.node.borrow();
        let mut out: Vec<(String, ChildKind)> = node
            .streams
            .keys()
            .map(|n| (n.clone(), ChildKind::Stream))
            .collect();
        out.extend(
            node.storages
                .keys()
                .map(|n| (n.clone(), ChildKind::Storage)),
        );
        Ok(out)
    }

    fn has_stream(&self, name: &str) -> bool {
        self.node.borrow().streams.contains_key(name)
    }

    fn read_stream(&mut self, name: &str) -> Result<Vec<u8>> {
        self.node
            .borrow()
            .streams
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("stream {name:?}")))
    }

    fn write_stream(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.node
            .borrow_mut()
            .streams
            .insert(name.to_owned(), data.to_vec());
        Ok(())
    }

    fn open_storage(&mut self, name: &str) -> Result<Box<dyn Container>> {
        let node = self
            .node
            .borrow()
            .storages
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("storage {name:?}")))?;
        Ok(Box::new(MemoryContainer { node }))
    }

    fn create_storage(&mut self, name: &str) -> Result<Box<dyn Container>> {
        let node = self
            .node
            .borrow_mut()
            .storages
            .entry(name.to_owned())
            .or_default()
            .clone();
        Ok(Box::new(MemoryContainer { node }))
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let mut node = self.node.borrow_mut();
        if node.streams.remove(name).is_none() && node.storages.remove(name).is_none() {
            return Err(Error::NotFound(format!("child {name:?}")));
        }
        Ok(())
    }

    fn set_class(&mut self, clsid: [u8; 16]) -> Result<()> {
        self.node.borrow_mut().clsid = clsid;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_roundtrip() {
        let mut c = MemoryContainer::new();
        c.write_stream("abc", b"hello").unwrap();
        assert!(c.has_stream("abc"));
        assert_eq!(c.read_stream("abc").unwrap(), b"hello");
        assert!(c.read_stream("missing").is_err());
    }

    #[test]
    fn test_substorage_shares_tree() {
        let mut c = MemoryContainer::new();
        {
            let mut sub = c.create_storage("inner").unwrap();
            sub.write_stream("x", &[1, 2, 3]).unwrap();
        }
        let mut again = c.open_storage("inner").unwrap();
        assert_eq!(again.read_stream("x").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_children_lists_both_kinds() {
        let mut c = MemoryContainer::new();
        c.write_stream("s1", &[]).unwrap();
        c.create_storage("d1").unwrap();
        let kids = c.children().unwrap();
        assert!(kids.contains(&("s1".to_string(), ChildKind::Stream)));
        assert!(kids.contains(&("d1".to_string(), ChildKind::Storage)));
    }

    #[test]
    fn test_remove() {
        let mut c = MemoryContainer::new();
        c.write_stream("s", &[]).unwrap();
        c.remove("s").unwrap();
        assert!(!c.has_stream("s"));
        assert!(c.remove("s").is_err());
    }
}

//! Pooled string table.
//!
//! Every string cell in every table stores a small integer id into this pool.
//! The pool persists across close/reopen together with its refcounts and its
//! sort order, because the row encoding depends on the ids staying stable.
//! Two parallel streams hold it on disk: `_StringPool` (per-slot length and
//! refcount entries) and `_StringData` (the concatenated string bytes).

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::error::{Error, Result};

/// String ids narrower than this never occur; ids are 2 bytes on disk until
/// the pool outgrows 16 bits, 3 bytes after. In memory rows always use 3.
pub const LONG_STR_BYTES: usize = 3;

/// Which refcount a reference contributes to. Persistent references come from
/// rows that will be serialised; non-persistent ones from transient tables
/// and session data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Persistent,
    NonPersistent,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    text: String,
    persistent_refcount: u16,
    nonpersistent_refcount: u16,
}

impl Slot {
    fn occupied(&self) -> bool {
        self.persistent_refcount != 0 || self.nonpersistent_refcount != 0
    }
}

/// Refcounted pool mapping ids to strings and strings back to ids in
/// O(log n) through a sorted index.
#[derive(Debug, Clone)]
pub struct StringPool {
    /// Slot 0 is reserved for the empty string and never occupied.
    slots: Vec<Slot>,
    /// Ids of occupied slots in strict byte order of their strings.
    sorted: Vec<u32>,
    codepage: u32,
    /// Scan hint: the lowest slot index that may be free.
    freeslot: usize,
}

/// Codepages accepted on writes. An unknown codepage fails rather than
/// producing a database other tools cannot decode.
pub fn validate_codepage(codepage: u32) -> bool {
    matches!(
        codepage,
        0 | 37
            | 424
            | 437
            | 500
            | 737
            | 775
            | 850
            | 852
            | 855
            | 856
            | 857
            | 860
            | 861
            | 862
            | 863
            | 864
            | 865
            | 866
            | 869
            | 874
            | 875
            | 878
            | 932
            | 936
            | 949
            | 950
            | 1006
            | 1026
            | 1250
            | 1251
            | 1252
            | 1253
            | 1254
            | 1255
            | 1256
            | 1257
            | 1258
            | 1361
            | 10000
            | 10006
            | 10007
            | 10029
            | 10079
            | 10081
            | 20127
            | 20866
            | 20932
            | 21866
            | 28591
            | 28592
            | 28593
            | 28594
            | 28595
            | 28596
            | 28597
            | 28598
            | 28599
            | 28600
            | 28603
            | 28604
            | 28605
            | 28606
            | 65000
            | 65001
    )
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StringPool {
    pub fn new() -> Self {
        StringPool {
            slots: vec![Slot::default()],
            sorted: Vec::new(),
            codepage: 0,
            freeslot: 1,
        }
    }

    pub fn codepage(&self) -> u32 {
        self.codepage
    }

    /// Change the codepage label. Only whitelisted codepages are accepted.
    pub fn set_codepage(&mut self, codepage: u32) -> Result<()> {
        if !validate_codepage(codepage) {
            return Err(Error::failed(format!("unsupported codepage {codepage}")));
        }
        self.codepage = codepage;
        Ok(())
    }

    /// Find `s`, bumping the chosen refcount; or allocate a slot for it.
    /// Returns the id, 0 if `s` is empty.
    pub fn intern(&mut self, s: &str, refcount: u16, persistence: Persistence) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(id) = self.lookup_id(s) {
            let slot = &mut self.slots[id as usize];
            match persistence {
                Persistence::Persistent => {
                    slot.persistent_refcount = slot.persistent_refcount.saturating_add(refcount)
                }
                Persistence::NonPersistent => {
                    slot.nonpersistent_refcount =
                        slot.nonpersistent_refcount.saturating_add(refcount)
                }
            }
            return id;
        }

        let id = self.find_free_slot();
        self.set_slot(id, s.to_owned(), refcount, persistence);
        id as u32
    }

    /// Pure lookup through the sorted index. The empty string is id 0.
    pub fn lookup_id(&self, s: &str) -> Option<u32> {
        if s.is_empty() {
            return Some(0);
        }
        self.sorted
            .binary_search_by(|&id| self.slots[id as usize].text.as_str().cmp(s))
            .ok()
            .map(|pos| self.sorted[pos])
    }

    /// Resolve an id back to its string. Id 0 is the empty string; a free or
    /// out-of-range slot is `None`.
    pub fn lookup_str(&self, id: u32) -> Option<&str> {
        if id == 0 {
            return Some("");
        }
        let slot = self.slots.get(id as usize)?;
        slot.occupied().then_some(slot.text.as_str())
    }

    /// Drop one reference. When both refcounts reach zero the slot is freed
    /// and removed from the sorted index, ready for reuse.
    pub fn release(&mut self, id: u32, persistence: Persistence) {
        let Some(slot) = self.slots.get_mut(id as usize) else {
            return;
        };
        if id == 0 || !slot.occupied() {
            return;
        }
        match persistence {
            Persistence::Persistent => {
                slot.persistent_refcount = slot.persistent_refcount.saturating_sub(1)
            }
            Persistence::NonPersistent => {
                slot.nonpersistent_refcount = slot.nonpersistent_refcount.saturating_sub(1)
            }
        }
        if !self.slots[id as usize].occupied() {
            let text = self.slots[id as usize].text.clone();
            if let Ok(pos) = self
                .sorted
                .binary_search_by(|&other| self.slots[other as usize].text.as_str().cmp(&text))
            {
                self.sorted.remove(pos);
            }
            self.slots[id as usize].text = String::new();
            self.freeslot = self.freeslot.min(id as usize);
        }
    }

    /// Refcounts of a slot, `(persistent, nonpersistent)`. Test and
    /// diagnostics hook.
    pub fn refcounts(&self, id: u32) -> (u16, u16) {
        match self.slots.get(id as usize) {
            Some(s) => (s.persistent_refcount, s.nonpersistent_refcount),
            None => (0, 0),
        }
    }

    /// Number of slots including slot 0 and holes.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn find_free_slot(&mut self) -> usize {
        for i in self.freeslot.max(1)..self.slots.len() {
            if !self.slots[i].occupied() {
                return i;
            }
        }
        self.slots.push(Slot::default());
        self.slots.len() - 1
    }

    fn set_slot(&mut self, id: usize, text: String, refcount: u16, persistence: Persistence) {
        let (persistent, nonpersistent) = match persistence {
            Persistence::Persistent => (refcount, 0),
            Persistence::NonPersistent => (0, refcount),
        };
        self.slots[id] = Slot {
            text,
            persistent_refcount: persistent,
            nonpersistent_refcount: nonpersistent,
        };
        let text = &self.slots[id].text;
        if let Err(pos) = self
            .sorted
            .binary_search_by(|&other| self.slots[other as usize].text.as_str().cmp(text))
        {
            self.sorted.insert(pos, id as u32);
        }
        self.freeslot = id + 1;
    }

    /// True when any occupied slot needs more than 16 bits of id.
    fn needs_long_refs(&self) -> bool {
        self.slots
            .iter()
            .enumerate()
            .any(|(i, s)| s.occupied() && i >= 0x10000)
    }

    /// Emit the `_StringData` / `_StringPool` pair.
    ///
    /// Pool layout: a 4-byte codepage header (high bit of the fourth byte set
    /// iff 3-byte string refs are required), then one `{len:u16, refs:u16}`
    /// entry per slot. Free and transient-only slots emit zeros. A string of
    /// 64 KiB or more is preceded by a dummy `{0, len>>16}` entry and stores
    /// the low 16 length bits in its own entry.
    ///
    /// Returns `(data, pool, bytes_per_strref)`.
    pub fn serialize(&self) -> (Vec<u8>, Vec<u8>, usize) {
        let long = self.needs_long_refs();
        let bytes_per_strref = if long { LONG_STR_BYTES } else { 2 };

        // Trailing slots with nothing persistent are dropped, like holes
        // after the last saved string.
        let last = self
            .slots
            .iter()
            .rposition(|s| s.persistent_refcount != 0)
            .unwrap_or(0);

        let mut pool = Vec::with_capacity(4 + (last + 1) * 4);
        let mut header = self.codepage & 0x00ff_ffff;
        if long {
            header |= 0x8000_0000;
        }
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, header);
        pool.extend_from_slice(&buf);

        let mut data = Vec::new();
        for slot in self.slots.iter().take(last + 1).skip(1) {
            if slot.persistent_refcount == 0 {
                pool.extend_from_slice(&[0, 0, 0, 0]);
                continue;
            }
            let bytes = slot.text.as_bytes();
            if bytes.len() >= 0x10000 {
                let mut entry = [0u8; 4];
                LittleEndian::write_u16(&mut entry[2..], (bytes.len() >> 16) as u16);
                pool.extend_from_slice(&entry);
            }
            let mut entry = [0u8; 4];
            LittleEndian::write_u16(&mut entry[0..2], bytes.len() as u16);
            LittleEndian::write_u16(&mut entry[2..4], slot.persistent_refcount);
            pool.extend_from_slice(&entry);
            data.extend_from_slice(bytes);
        }

        (data, pool, bytes_per_strref)
    }

    /// Inverse of [`serialize`](Self::serialize). Returns the pool and the
    /// string-ref width the row streams were written with.
    pub fn deserialize(pool: &[u8], data: &[u8]) -> Result<(StringPool, usize)> {
        let mut st = StringPool::new();
        if pool.len() < 4 {
            return Ok((st, 2));
        }
        let header = LittleEndian::read_u32(&pool[..4]);
        let bytes_per_strref = if header & 0x8000_0000 != 0 {
            LONG_STR_BYTES
        } else {
            2
        };
        let codepage = header & 0x00ff_ffff;
        if !validate_codepage(codepage) {
            return Err(Error::InvalidData(format!(
                "string pool codepage {codepage} not recognised"
            )));
        }
        st.codepage = codepage;

        let entries: Vec<(u16, u16)> = pool[4..]
            .chunks_exact(4)
            .map(|c| (LittleEndian::read_u16(&c[0..2]), LittleEndian::read_u16(&c[2..4])))
            .collect();

        let mut offset = 0usize;
        let mut id = 1usize;
        let mut i = 0usize;
        while i < entries.len() {
            let (len16, refs) = entries[i];
            // Free slot: still consumes a string id.
            if len16 == 0 && refs == 0 {
                i += 1;
                st.reserve_through(id);
                id += 1;
                continue;
            }
            // Dummy entry: the refcount field carries the high 16 length
            // bits; the following entry has the low bits and the refcount.
            let (len, refs) = if len16 == 0 {
                let Some(&(lo, real_refs)) = entries.get(i + 1) else {
                    return Err(Error::InvalidData(
                        "string pool ends inside a long-string entry".into(),
                    ));
                };
                i += 2;
                (((refs as usize) << 16) | lo as usize, real_refs)
            } else {
                i += 1;
                (len16 as usize, refs)
            };

            let end = offset
                .checked_add(len)
                .filter(|&e| e <= data.len())
                .ok_or_else(|| Error::InvalidData("string data truncated".into()))?;
            let text = std::str::from_utf8(&data[offset..end])
                .map_err(|_| Error::InvalidData("string data is not valid UTF-8".into()))?;
            st.reserve_through(id);
            st.set_slot(id, text.to_owned(), refs, Persistence::Persistent);
            offset = end;
            id += 1;
        }

        if offset != data.len() {
            warn!(
                "string data has {} trailing bytes not covered by the pool",
                data.len() - offset
            );
        }
        Ok((st, bytes_per_strref))
    }

    fn reserve_through(&mut self, id: usize) {
        while self.slots.len() <= id {
            self.slots.push(Slot::default());
        }
    }

    #[cfg(test)]
    fn sorted_strings(&self) -> Vec<&str> {
        self.sorted
            .iter()
            .map(|&id| self.slots[id as usize].text.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_intern_assigns_stable_ids() {
        let mut st = StringPool::new();
        let a = st.intern("alpha", 1, Persistence::Persistent);
        let b = st.intern("beta", 1, Persistence::Persistent);
        assert_ne!(a, b);
        assert_eq!(st.intern("alpha", 1, Persistence::Persistent), a);
        assert_eq!(st.lookup_str(a), Some("alpha"));
        assert_eq!(st.lookup_id("beta"), Some(b));
        assert_eq!(st.refcounts(a), (2, 0));
    }

    #[test]
    fn test_empty_string_is_id_zero() {
        let mut st = StringPool::new();
        assert_eq!(st.intern("", 1, Persistence::Persistent), 0);
        assert_eq!(st.lookup_id(""), Some(0));
        assert_eq!(st.lookup_str(0), Some(""));
    }

    #[test]
    fn test_release_frees_slot_for_reuse() {
        let mut st = StringPool::new();
        let a = st.intern("foo", 1, Persistence::Persistent);
        st.release(a, Persistence::Persistent);
        assert_eq!(st.lookup_str(a), None);
        assert_eq!(st.lookup_id("foo"), None);

        // Re-interning lands in the freed slot.
        let b = st.intern("foo", 1, Persistence::Persistent);
        assert_eq!(a, b);
        assert_eq!(st.refcounts(b), (1, 0));
    }

    #[test]
    fn test_release_keeps_slot_while_other_count_held() {
        let mut st = StringPool::new();
        let a = st.intern("shared", 1, Persistence::Persistent);
        st.intern("shared", 1, Persistence::NonPersistent);
        st.release(a, Persistence::Persistent);
        assert_eq!(st.lookup_str(a), Some("shared"));
        st.release(a, Persistence::NonPersistent);
        assert_eq!(st.lookup_str(a), None);
    }

    #[test]
    fn test_sorted_index_strict_byte_order() {
        let mut st = StringPool::new();
        for s in ["pear", "Apple", "apple", "banana", "Zed"] {
            st.intern(s, 1, Persistence::Persistent);
        }
        let sorted = st.sorted_strings();
        let mut expected = sorted.clone();
        expected.sort_unstable();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_serialize_roundtrip_preserves_ids_and_refcounts() {
        let mut st = StringPool::new();
        st.set_codepage(1252).unwrap();
        let a = st.intern("Component", 2, Persistence::Persistent);
        let b = st.intern("Feature", 1, Persistence::Persistent);
        let hole = st.intern("transient", 1, Persistence::NonPersistent);
        let c = st.intern("Directory", 3, Persistence::Persistent);

        let (data, pool, width) = st.serialize();
        assert_eq!(width, 2);
        let (back, width2) = StringPool::deserialize(&pool, &data).unwrap();
        assert_eq!(width2, 2);
        assert_eq!(back.codepage(), 1252);
        assert_eq!(back.lookup_str(a), Some("Component"));
        assert_eq!(back.lookup_str(b), Some("Feature"));
        assert_eq!(back.lookup_str(c), Some("Directory"));
        assert_eq!(back.refcounts(a), (2, 0));
        assert_eq!(back.refcounts(c), (3, 0));
        // The transient slot came back as a hole with its id preserved.
        assert_eq!(back.lookup_str(hole), None);
    }

    #[test]
    fn test_serialize_long_string_dummy_entry() {
        let mut st = StringPool::new();
        let long = "x".repeat(0x1_0002);
        let a = st.intern("before", 1, Persistence::Persistent);
        let b = st.intern(&long, 1, Persistence::Persistent);

        let (data, pool, _) = st.serialize();
        // Header + 3 entries: "before", dummy, long.
        assert_eq!(pool.len(), 4 + 3 * 4);
        let dummy = &pool[4 + 4..4 + 8];
        assert_eq!(LittleEndian::read_u16(&dummy[0..2]), 0);
        assert_eq!(LittleEndian::read_u16(&dummy[2..4]), 1); // high 16 bits of 0x10002

        let (back, _) = StringPool::deserialize(&pool, &data).unwrap();
        assert_eq!(back.lookup_str(a), Some("before"));
        assert_eq!(back.lookup_str(b).map(str::len), Some(0x1_0002));
        assert_eq!(back.refcounts(b), (1, 0));
    }

    #[test]
    fn test_unknown_codepage_rejected() {
        let mut st = StringPool::new();
        assert!(st.set_codepage(1234).is_err());
        assert!(st.set_codepage(932).is_ok());
    }

    #[test]
    fn test_deserialize_rejects_truncated_data() {
        let mut st = StringPool::new();
        st.intern("hello", 1, Persistence::Persistent);
        let (data, pool, _) = st.serialize();
        assert!(StringPool::deserialize(&pool, &data[..3]).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_ascii_strings(strings in proptest::collection::vec("[a-zA-Z0-9_.]{1,12}", 1..20)) {
            let mut st = StringPool::new();
            let mut ids = Vec::new();
            for s in &strings {
                ids.push(st.intern(s, 1, Persistence::Persistent));
            }
            let (data, pool, _) = st.serialize();
            let (back, _) = StringPool::deserialize(&pool, &data).unwrap();
            for (s, id) in strings.iter().zip(&ids) {
                prop_assert_eq!(back.lookup_str(*id), Some(s.as_str()));
            }
        }
    }
}

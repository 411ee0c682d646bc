//! Tables: column descriptors, packed type words, and the in-memory row page.
//!
//! A table's rows live in a fixed-width byte matrix. String cells hold a
//! 3-byte pool id in memory (2 or 3 bytes on disk, depending on the pool
//! size); numeric cells hold bias-encoded integers so that an all-zero cell
//! reads as SQL NULL.

pub mod store;

use std::collections::HashMap;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::record::{NULL_INT, Record};
use crate::strings::{LONG_STR_BYTES, Persistence, StringPool};

bitflags! {
    /// Attribute bits of the packed column type word. The low byte carries
    /// the column width.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ColumnAttrs: u16 {
        const VALID       = 0x0100;
        const LOCALIZABLE = 0x0200;
        const STRING      = 0x0800;
        const NULLABLE    = 0x1000;
        const KEY         = 0x2000;
        const TEMPORARY   = 0x4000;
        const UNKNOWN     = 0x8000;
    }
}

/// Packed column type: attribute bits plus a width in the low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnType(pub u16);

/// The attribute pattern of a binary (stream-valued) column.
const BINARY_PATTERN: u16 = 0x8900; // UNKNOWN | STRING | VALID

impl ColumnType {
    pub fn string(width: u16) -> ColumnType {
        ColumnType(ColumnAttrs::VALID.bits() | ColumnAttrs::STRING.bits() | (width & 0xff))
    }

    pub fn int16() -> ColumnType {
        ColumnType(ColumnAttrs::VALID.bits() | 2)
    }

    pub fn int32() -> ColumnType {
        ColumnType(ColumnAttrs::VALID.bits() | 4)
    }

    pub fn binary() -> ColumnType {
        ColumnType(BINARY_PATTERN)
    }

    pub fn with(self, attrs: ColumnAttrs) -> ColumnType {
        ColumnType(self.0 | attrs.bits())
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn width(self) -> usize {
        (self.0 & 0xff) as usize
    }

    pub fn is_string(self) -> bool {
        self.0 & ColumnAttrs::STRING.bits() != 0 && !self.is_binary()
    }

    pub fn is_binary(self) -> bool {
        (self.0 & !ColumnAttrs::NULLABLE.bits()) == BINARY_PATTERN
    }

    pub fn is_key(self) -> bool {
        self.0 & ColumnAttrs::KEY.bits() != 0
    }

    pub fn is_nullable(self) -> bool {
        self.0 & ColumnAttrs::NULLABLE.bits() != 0
    }

    pub fn is_temporary(self) -> bool {
        self.0 & ColumnAttrs::TEMPORARY.bits() != 0
    }

    pub fn is_localizable(self) -> bool {
        self.0 & ColumnAttrs::LOCALIZABLE.bits() != 0
    }

    /// Cell width under a given string-ref width. Binary cells are always 2
    /// bytes, numeric cells keep their declared 2- or 4-byte width.
    pub fn bytes_per_cell(self, bytes_per_strref: usize) -> usize {
        if self.is_binary() {
            2
        } else if self.is_string() {
            bytes_per_strref
        } else if self.width() <= 2 {
            2
        } else {
            4
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub table: String,
    /// 1-based position, dense within the table.
    pub number: usize,
    pub name: String,
    pub ty: ColumnType,
    /// Byte offset inside the in-memory row.
    pub offset: usize,
    /// HOLD references keeping a temporary column alive.
    pub ref_count: i32,
    pub temporary: bool,
    /// Lazy per-column index from raw cell value to row numbers.
    hash: Option<HashMap<u32, Vec<usize>>>,
}

impl Column {
    pub fn new(table: impl Into<String>, number: usize, name: impl Into<String>, ty: ColumnType) -> Column {
        Column {
            table: table.into(),
            number,
            name: name.into(),
            ty,
            offset: 0,
            ref_count: 0,
            temporary: ty.is_temporary(),
            hash: None,
        }
    }
}

/// Whether a table (and its row stream) survives commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// `_Tables` / `_Columns`: persistent but self-describing.
    System,
    Persistent,
    Transient,
}

#[derive(Debug)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// Fixed-width rows in the in-memory layout.
    pub rows: Vec<Vec<u8>>,
    /// Per-row persistence; transient rows are not serialised.
    pub row_persistent: Vec<bool>,
    pub kind: TableKind,
    /// HOLD references on the table itself.
    pub ref_count: i32,
}

/// Assign dense byte offsets from the column widths under the in-memory
/// (3-byte string id) representation.
pub fn calc_column_offsets(columns: &mut [Column]) {
    let mut offset = 0;
    for col in columns.iter_mut() {
        col.offset = offset;
        offset += col.ty.bytes_per_cell(LONG_STR_BYTES);
    }
}

impl Table {
    pub fn new(name: impl Into<String>, mut columns: Vec<Column>, kind: TableKind) -> Table {
        calc_column_offsets(&mut columns);
        Table {
            name: name.into(),
            columns,
            rows: Vec::new(),
            row_persistent: Vec::new(),
            kind,
            ref_count: 1,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.columns.len()
    }

    /// In-memory row width.
    pub fn row_size(&self) -> usize {
        self.columns
            .last()
            .map(|c| c.offset + c.ty.bytes_per_cell(LONG_STR_BYTES))
            .unwrap_or(0)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Raw little-endian cell value including the null bias. `col` is 0-based.
    pub fn read_raw(&self, row: usize, col: usize) -> Result<u32> {
        let column = self
            .columns
            .get(col)
            .ok_or_else(|| Error::InvalidParameter(format!("column {col} out of range")))?;
        let bytes = self
            .rows
            .get(row)
            .ok_or(Error::NoMoreItems)?;
        let n = column.ty.bytes_per_cell(LONG_STR_BYTES);
        let mut val: u32 = 0;
        for i in 0..n {
            val |= (bytes[column.offset + i] as u32) << (i * 8);
        }
        Ok(val)
    }

    /// Write a raw cell value, invalidating the column's hash index.
    pub fn write_raw(&mut self, row: usize, col: usize, val: u32) -> Result<()> {
        let column = self
            .columns
            .get_mut(col)
            .ok_or_else(|| Error::InvalidParameter(format!("column {col} out of range")))?;
        column.hash = None;
        let n = column.ty.bytes_per_cell(LONG_STR_BYTES);
        let offset = column.offset;
        let bytes = self
            .rows
            .get_mut(row)
            .ok_or_else(|| Error::InvalidParameter(format!("row {row} out of range")))?;
        for i in 0..n {
            bytes[offset + i] = ((val >> (i * 8)) & 0xff) as u8;
        }
        Ok(())
    }

    /// Rows whose raw value in `col` equals `val`, via the lazy hash index.
    pub fn find_matching_rows(&mut self, col: usize, val: u32) -> Result<Vec<usize>> {
        if col >= self.columns.len() {
            return Err(Error::InvalidParameter(format!("column {col} out of range")));
        }
        if self.columns[col].hash.is_none() {
            let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
            for row in 0..self.rows.len() {
                let v = self.read_raw(row, col)?;
                index.entry(v).or_default().push(row);
            }
            self.columns[col].hash = Some(index);
        }
        Ok(self.columns[col]
            .hash
            .as_ref()
            .unwrap()
            .get(&val)
            .cloned()
            .unwrap_or_default())
    }

    /// Insert an all-null row at `pos`, shifting later rows down.
    pub fn create_row_at(&mut self, pos: usize, temporary: bool) {
        let pos = pos.min(self.rows.len());
        self.rows.insert(pos, vec![0; self.row_size()]);
        self.row_persistent.insert(pos, !temporary);
        for col in &mut self.columns {
            col.hash = None;
        }
    }

    /// Remove a row, releasing the string references its cells hold.
    pub fn delete_row(&mut self, row: usize, strings: &mut StringPool) -> Result<()> {
        if row >= self.rows.len() {
            return Err(Error::failed(format!(
                "row {row} out of range in {}",
                self.name
            )));
        }
        let persistence = self.string_persistence(row);
        for col in 0..self.columns.len() {
            if self.columns[col].ty.is_string() {
                let id = self.read_raw(row, col)?;
                if id != 0 {
                    strings.release(id, persistence);
                }
            }
        }
        self.rows.remove(row);
        self.row_persistent.remove(row);
        for col in &mut self.columns {
            col.hash = None;
        }
        Ok(())
    }

    /// Which refcount the string cells of `row` contribute to.
    pub fn string_persistence(&self, row: usize) -> Persistence {
        let persistent = self.kind != TableKind::Transient
            && self.row_persistent.get(row).copied().unwrap_or(true);
        if persistent {
            Persistence::Persistent
        } else {
            Persistence::NonPersistent
        }
    }

    /// Convert one record field into the raw cell value for `col`, without
    /// touching pool refcounts. String values must already be interned;
    /// missing strings fail `NotFound` (keys that cannot match any row).
    pub fn raw_from_record(
        &self,
        rec: &Record,
        field: usize,
        col: usize,
        strings: &StringPool,
    ) -> Result<u32> {
        let column = &self.columns[col];
        if rec.is_null(field) {
            return Err(Error::failed(format!("field {field} is null")));
        }
        if column.ty.is_binary() {
            // The cell of a binary column just marks presence; the payload
            // lives in its own stream named after the row's keys.
            return Ok(1);
        }
        if column.ty.is_string() {
            return match rec.get_string_raw(field) {
                Some(s) => strings
                    .lookup_id(s)
                    .ok_or_else(|| Error::NotFound(format!("string {s:?} not in pool"))),
                None => Ok(0),
            };
        }
        if column.ty.bytes_per_cell(LONG_STR_BYTES) == 2 {
            let val = 0x8000i64 + rec.get_int(field) as i64;
            if !(0..=0xffff).contains(&val) {
                return Err(Error::failed(format!(
                    "value {} out of range for a 2-byte column",
                    rec.get_int(field)
                )));
            }
            Ok(val as u32)
        } else {
            Ok((rec.get_int(field) as u32) ^ 0x8000_0000)
        }
    }

    /// Raw key tuple for matching a record against rows. NULL keys map to 0.
    fn record_key_values(&self, rec: &Record, strings: &StringPool) -> Result<Vec<u32>> {
        let mut out = vec![0u32; self.columns.len()];
        for (i, col) in self.columns.iter().enumerate() {
            if !col.ty.is_key() {
                continue;
            }
            if col.ty.is_string() && !col.ty.is_binary() {
                match rec.get_string_raw(i + 1) {
                    Some(s) => {
                        out[i] = strings
                            .lookup_id(s)
                            .ok_or_else(|| Error::NotFound(format!("string {s:?} not in pool")))?;
                    }
                    None => out[i] = 0,
                }
            } else {
                let v = rec.get_int(i + 1);
                out[i] = if v == NULL_INT {
                    0
                } else if col.ty.bytes_per_cell(LONG_STR_BYTES) == 2 {
                    (v as u32).wrapping_add(0x8000) & 0xffff
                } else {
                    (v as u32).wrapping_add(0x8000_0000)
                };
            }
        }
        Ok(out)
    }

    /// Find the row whose primary key matches the record's key fields.
    pub fn find_row(&self, rec: &Record, strings: &StringPool) -> Result<usize> {
        let keys = match self.record_key_values(rec, strings) {
            Ok(k) => k,
            // A key string absent from the pool cannot match any row.
            Err(Error::NotFound(_)) => return Err(Error::NotFound("no matching row".into())),
            Err(e) => return Err(e),
        };
        'rows: for row in 0..self.rows.len() {
            for (i, col) in self.columns.iter().enumerate() {
                if !col.ty.is_key() {
                    continue;
                }
                if self.read_raw(row, i)? != keys[i] {
                    continue 'rows;
                }
            }
            return Ok(row);
        }
        Err(Error::NotFound("no matching row".into()))
    }

    /// Compare the record's key tuple against `row`'s; used by the ordered
    /// insert position search.
    fn compare_record(&self, row: usize, rec: &Record, strings: &StringPool) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        for (i, col) in self.columns.iter().enumerate() {
            if !col.ty.is_key() {
                continue;
            }
            let Ok(rec_val) = self.raw_from_record(rec, i + 1, i, strings) else {
                return Ordering::Greater;
            };
            let Ok(row_val) = self.read_raw(row, i) else {
                return Ordering::Less;
            };
            match rec_val.cmp(&row_val) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Binary search for the ordered insert position of `rec`.
    pub fn find_insert_index(&self, rec: &Record, strings: &StringPool) -> usize {
        let mut low = 0isize;
        let mut high = self.rows.len() as isize - 1;
        while low <= high {
            let mid = (low + high) / 2;
            match self.compare_record(mid as usize, rec, strings) {
                std::cmp::Ordering::Greater => low = mid + 1,
                std::cmp::Ordering::Less => high = mid - 1,
                std::cmp::Ordering::Equal => return mid as usize,
            }
        }
        (high + 1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone_columns() -> Vec<Column> {
        vec![
            Column::new("phone", 1, "id", ColumnType::int16().with(ColumnAttrs::KEY)),
            Column::new("phone", 2, "name", ColumnType::string(32)),
            Column::new("phone", 3, "number", ColumnType::string(32)),
        ]
    }

    #[test]
    fn test_column_offsets_widest_representation() {
        let mut cols = phone_columns();
        calc_column_offsets(&mut cols);
        assert_eq!(cols[0].offset, 0);
        assert_eq!(cols[1].offset, 2); // int16 takes 2 bytes
        assert_eq!(cols[2].offset, 5); // string id takes 3 bytes in memory
    }

    #[test]
    fn test_type_word_classification() {
        assert!(ColumnType::string(64).is_string());
        assert!(!ColumnType::string(64).is_binary());
        assert!(ColumnType::binary().is_binary());
        assert!(!ColumnType::binary().is_string());
        assert!(ColumnType::binary().with(ColumnAttrs::NULLABLE).is_binary());
        assert_eq!(ColumnType::int16().bytes_per_cell(3), 2);
        assert_eq!(ColumnType::int32().bytes_per_cell(3), 4);
        assert_eq!(ColumnType::string(8).bytes_per_cell(2), 2);
        assert_eq!(ColumnType::string(8).bytes_per_cell(3), 3);
        assert_eq!(ColumnType::binary().bytes_per_cell(3), 2);
    }

    #[test]
    fn test_raw_cell_roundtrip() {
        let mut t = Table::new("phone", phone_columns(), TableKind::Persistent);
        t.create_row_at(0, false);
        t.write_raw(0, 0, 0x8007).unwrap();
        t.write_raw(0, 1, 0x1234).unwrap();
        assert_eq!(t.read_raw(0, 0).unwrap(), 0x8007);
        assert_eq!(t.read_raw(0, 1).unwrap(), 0x1234);
        // Unset cell reads as 0 (NULL).
        assert_eq!(t.read_raw(0, 2).unwrap(), 0);
    }

    #[test]
    fn test_hash_index_finds_rows_and_invalidates() {
        let mut t = Table::new("phone", phone_columns(), TableKind::Persistent);
        for i in 0..4u32 {
            t.create_row_at(i as usize, false);
            t.write_raw(i as usize, 0, 0x8000 + (i % 2)).unwrap();
        }
        assert_eq!(t.find_matching_rows(0, 0x8001).unwrap(), vec![1, 3]);

        t.write_raw(3, 0, 0x8000).unwrap();
        assert_eq!(t.find_matching_rows(0, 0x8001).unwrap(), vec![1]);
    }

    #[test]
    fn test_delete_row_releases_strings() {
        let mut strings = StringPool::new();
        let id = strings.intern("Abe", 1, Persistence::Persistent);
        let mut t = Table::new("phone", phone_columns(), TableKind::Persistent);
        t.create_row_at(0, false);
        t.write_raw(0, 1, id).unwrap();
        t.delete_row(0, &mut strings).unwrap();
        assert_eq!(strings.lookup_str(id), None);
        assert_eq!(t.row_count(), 0);
    }

    #[test]
    fn test_find_insert_index_orders_by_key() {
        let strings = StringPool::new();
        let mut t = Table::new("phone", phone_columns(), TableKind::Persistent);
        for (pos, key) in [(0usize, 10i32), (1, 30)] {
            t.create_row_at(pos, false);
            t.write_raw(pos, 0, (0x8000 + key) as u32).unwrap();
        }
        let mut rec = Record::new(3);
        rec.set_int(1, 20).unwrap();
        assert_eq!(t.find_insert_index(&rec, &strings), 1);
        rec.set_int(1, 40).unwrap();
        assert_eq!(t.find_insert_index(&rec, &strings), 2);
        rec.set_int(1, 5).unwrap();
        assert_eq!(t.find_insert_index(&rec, &strings), 0);
    }
}

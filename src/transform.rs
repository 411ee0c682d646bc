//! Transform engine.
//!
//! A transform is an external storage whose table streams hold row deltas
//! instead of full tables. Each delta row starts with a 16-bit mask: bit 0
//! set means a full insert (column count in the high byte); bit 0 clear
//! means keys plus the masked columns, with an all-zero mask marking a
//! delete. `_Tables` and `_Columns` apply first so the schema exists before
//! any data lands.

use std::rc::Rc;

use log::{debug, trace, warn};

use crate::database::DbCore;
use crate::error::{Error, Result};
use crate::record::{NULL_INT, Record, StreamHandle};
use crate::storage::memory::MemoryContainer;
use crate::storage::name::{decode, encode};
use crate::storage::{ChildKind, Container, copy_tree};
use crate::strings::StringPool;
use crate::table::store::{COLUMNS, TABLES, update_table_columns};
use crate::views::table::TableView;
use crate::views::{ColumnInfo, View};

const STRING_POOL_STREAM: &str = "_StringPool";
const STRING_DATA_STREAM: &str = "_StringData";

/// Apply every table transform in `container` to the host database, then
/// append the container's substorages.
pub(crate) fn apply(core: &Rc<DbCore>, mut container: Box<dyn Container>) -> Result<()> {
    let pool = container.read_stream(&encode(true, STRING_POOL_STREAM))?;
    let data = container.read_stream(&encode(true, STRING_DATA_STREAM))?;
    let (strings, bytes_per_strref) = StringPool::deserialize(&pool, &data)?;

    let mut table_names = Vec::new();
    for (child, kind) in container.children()? {
        if kind != ChildKind::Stream {
            continue;
        }
        let (is_table, name) = decode(&child);
        if !is_table || name == STRING_POOL_STREAM || name == STRING_DATA_STREAM {
            continue;
        }
        table_names.push(name);
    }

    // Schema transforms first, then everything else.
    for name in [TABLES, COLUMNS] {
        if let Some(pos) = table_names.iter().position(|n| n == name) {
            let name = table_names.remove(pos);
            apply_table(core, container.as_mut(), &strings, &name, bytes_per_strref)?;
        }
    }
    for name in &table_names {
        apply_table(core, container.as_mut(), &strings, name, bytes_per_strref)?;
    }

    // Byte-identical substorages of the transform survive into the host.
    for (child, kind) in container.children()? {
        if kind != ChildKind::Storage {
            continue;
        }
        let mut src = container.open_storage(&child)?;
        let mut copied = MemoryContainer::new();
        copy_tree(src.as_mut(), &mut copied)?;
        core.add_storage_copy(&child, copied);
    }
    Ok(())
}

/// Width of one delta row under `mask`, for bounds checking and decoding.
fn delta_row_size(columns: &[ColumnInfo], mask: u16, bytes_per_strref: usize) -> usize {
    let mut sz = 2;
    for (i, col) in columns.iter().enumerate() {
        let included = if mask & 1 != 0 {
            i < (mask >> 8) as usize
        } else {
            col.ty.is_key() || mask & (1 << i) != 0
        };
        if included {
            sz += cell_width(col, bytes_per_strref);
        }
    }
    sz
}

fn cell_width(col: &ColumnInfo, bytes_per_strref: usize) -> usize {
    if col.ty.is_string() && !col.ty.is_binary() {
        bytes_per_strref
    } else {
        col.ty.bytes_per_cell(bytes_per_strref)
    }
}

fn read_le(raw: &[u8], ofs: usize, bytes: usize) -> u32 {
    let mut val = 0u32;
    for i in 0..bytes {
        val |= (raw[ofs + i] as u32) << (i * 8);
    }
    val
}

/// Decode one delta row into a record sized for the whole table.
fn transform_record(
    view: &TableView,
    columns: &[ColumnInfo],
    strings: &StringPool,
    container: &mut dyn Container,
    raw: &[u8],
    bytes_per_strref: usize,
) -> Result<Record> {
    let mask = read_le(raw, 0, 2) as u16;
    let mut rec = Record::new(columns.len());
    let mut ofs = 2usize;

    for (i, col) in columns.iter().enumerate() {
        if mask & 1 != 0 && i >= (mask >> 8) as usize {
            break;
        }
        if mask & 1 == 0 && !col.ty.is_key() && mask & (1 << i) == 0 {
            continue;
        }

        if col.ty.is_binary() {
            ofs += cell_width(col, bytes_per_strref);
            let name = view.record_stream_name(&rec)?;
            match container.read_stream(&encode(false, &name)) {
                Ok(data) => rec.set_stream(i + 1, StreamHandle::with_name(name, data))?,
                Err(e) => warn!("transform stream {name:?} missing: {e}"),
            }
        } else if col.ty.is_string() {
            let val = read_le(raw, ofs, bytes_per_strref);
            ofs += bytes_per_strref;
            let s = strings.lookup_str(val).unwrap_or_default();
            rec.set_string(i + 1, s)?;
            trace!(" field {} [{s}]", i + 1);
        } else {
            let n = cell_width(col, bytes_per_strref);
            let val = read_le(raw, ofs, n);
            ofs += n;
            if val != 0 {
                let v = if n == 2 {
                    val as i32 - 0x8000
                } else {
                    (val ^ 0x8000_0000) as i32
                };
                rec.set_int(i + 1, v)?;
            }
        }
    }
    Ok(rec)
}

/// Walk one table's delta stream and apply each row.
fn apply_table(
    core: &Rc<DbCore>,
    container: &mut dyn Container,
    strings: &StringPool,
    name: &str,
    bytes_per_strref: usize,
) -> Result<()> {
    let raw = match container.read_stream(&encode(true, name)) {
        Ok(raw) => raw,
        Err(Error::NotFound(_)) => {
            trace!("transform table {name} is empty");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let mut view = TableView::new(core.clone(), name)?;
    view.execute(None)?;
    let (_, col_count) = view.dimensions()?;
    let columns: Vec<ColumnInfo> = (1..=col_count)
        .map(|n| view.column_info(n))
        .collect::<Result<_>>()?;

    debug!(
        "applying transform to {name}: {} columns, {} delta bytes",
        columns.len(),
        raw.len()
    );

    // Per-table counter for `_Columns` rows arriving with a null Number.
    let mut coltable = String::new();
    let mut colcol = 0i32;

    let mut n = 0usize;
    while n + 2 <= raw.len() {
        let mask = read_le(&raw, n, 2) as u16;
        let sz = delta_row_size(&columns, mask, bytes_per_strref);
        if n + sz > raw.len() {
            return Err(Error::InvalidData(format!(
                "transform row for {name} runs past the stream end"
            )));
        }

        let mut rec = transform_record(
            &view,
            &columns,
            strings,
            container,
            &raw[n..n + sz],
            bytes_per_strref,
        )?;

        if name == COLUMNS {
            let table = rec.get_string(1);
            if rec.get_int(2) == NULL_INT {
                // New tables ship their column rows with a null Number;
                // assign sequentially, restarting per table.
                if coltable != table {
                    colcol = 0;
                    coltable = table.clone();
                }
                colcol += 1;
                rec.set_int(2, colcol)?;
            }
        }

        let found = {
            let table = crate::table::store::get_table(core, name)?;
            let found = {
                let t = table.borrow();
                let pool = core.strings.borrow();
                t.find_row(&rec, &pool)
            };
            found
        };
        let result = match found {
            Ok(row) => {
                if mask == 0 {
                    trace!("deleting row {row} of {name}");
                    view.delete_row(row as u32)
                } else if mask & 1 != 0 {
                    trace!("replacing row {row} of {name}");
                    view.set_row(row as u32, &rec, ((1u64 << columns.len()) - 1) as u32)
                } else {
                    trace!("updating row {row} of {name} with mask {mask:#06x}");
                    view.set_row(row as u32, &rec, mask as u32)
                }
            }
            Err(Error::NotFound(_)) => view.insert_row(&rec, -1, false),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("transform row for {name} failed: {e}");
        }

        if name == COLUMNS {
            update_table_columns(core, &rec.get_string(1))?;
        }

        n += sz;
    }
    Ok(())
}

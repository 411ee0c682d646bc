//! IDT text archives.
//!
//! Tab-delimited, CRLF-terminated table exports: column names, then type
//! codes, then the table name with its primary-key columns, then data rows.
//! Binary cells reference files in a subdirectory named after the table.
//! `_ForceCodepage` and `_SummaryInformation` have special layouts.

use std::fs;
use std::io::Write;
use std::path::Path;

use log::debug;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::table::store;
use crate::table::{Column, ColumnAttrs, ColumnType, TableKind};
use crate::views::table::TableView;
use crate::views::{ColumnInfo, View};

/// Escape used for a NUL byte inside a cell.
const NUL_ESCAPE: &str = "\u{11}\u{19}";

fn escape_cell(s: &str) -> String {
    s.replace('\0', NUL_ESCAPE)
}

fn unescape_cell(s: &str) -> String {
    s.replace(NUL_ESCAPE, "\0")
}

/// IDT type code for a column, e.g. `s72`, `I2`, `v0`.
fn column_type_code(info: &ColumnInfo) -> String {
    let ty = info.ty;
    let letter = if ty.is_binary() {
        'v'
    } else if ty.is_string() {
        if ty.is_temporary() {
            'g'
        } else if ty.is_localizable() {
            'l'
        } else {
            's'
        }
    } else if ty.is_temporary() {
        'j'
    } else {
        'i'
    };
    let letter = if ty.is_nullable() {
        letter.to_ascii_uppercase()
    } else {
        letter
    };
    let width = if ty.is_binary() {
        0
    } else if ty.is_string() {
        ty.width()
    } else {
        ty.bytes_per_cell(crate::strings::LONG_STR_BYTES)
    };
    format!("{letter}{width}")
}

/// Parse an IDT type code back into a packed column type.
fn parse_type_code(code: &str) -> Result<ColumnType> {
    let mut chars = code.chars();
    let letter = chars
        .next()
        .ok_or_else(|| Error::InvalidData("empty column type code".into()))?;
    let width: u16 = chars
        .as_str()
        .parse()
        .map_err(|_| Error::InvalidData(format!("bad column width in {code:?}")))?;

    let mut ty = match letter.to_ascii_lowercase() {
        'v' => ColumnType::binary(),
        's' | 'l' | 'g' => ColumnType::string(width),
        'i' | 'j' => {
            if width <= 2 {
                ColumnType::int16()
            } else {
                ColumnType::int32()
            }
        }
        _ => return Err(Error::InvalidData(format!("unknown type code {code:?}"))),
    };
    if letter.is_ascii_uppercase() {
        ty = ty.with(ColumnAttrs::NULLABLE);
    }
    match letter.to_ascii_lowercase() {
        'l' => ty = ty.with(ColumnAttrs::LOCALIZABLE),
        'g' | 'j' => ty = ty.with(ColumnAttrs::TEMPORARY),
        _ => {}
    }
    Ok(ty)
}

/// Export one table as IDT. Binary cells are written as files under
/// `binary_dir/<table>/` when a directory is given.
pub fn export(
    db: &Database,
    table: &str,
    out: &mut dyn Write,
    binary_dir: Option<&Path>,
) -> Result<()> {
    if table == "_ForceCodepage" {
        write!(out, "\r\n\r\n{}\t_ForceCodepage\r\n", db.codepage())?;
        return Ok(());
    }
    if table == "_SummaryInformation" {
        return export_summary(db, out);
    }

    let mut query = db.query(&format!("SELECT * FROM `{table}`"))?;
    query.execute(None)?;

    let cols = query.column_count()?;
    let infos: Vec<ColumnInfo> = (1..=cols)
        .map(|n| query.column_info(n))
        .collect::<Result<_>>()?;

    let names: Vec<String> = infos.iter().map(|i| i.name.clone()).collect();
    write!(out, "{}\r\n", names.join("\t"))?;

    let codes: Vec<String> = infos.iter().map(column_type_code).collect();
    write!(out, "{}\r\n", codes.join("\t"))?;

    let mut header = vec![table.to_owned()];
    header.extend(
        infos
            .iter()
            .filter(|i| i.ty.is_key())
            .map(|i| i.name.clone()),
    );
    write!(out, "{}\r\n", header.join("\t"))?;

    while let Some(mut rec) = query.fetch()? {
        let mut cells = Vec::with_capacity(cols as usize);
        for (i, info) in infos.iter().enumerate() {
            let cell = if info.ty.is_binary() {
                export_binary_cell(table, &mut rec, i + 1, binary_dir)?
            } else if rec.is_null(i + 1) {
                String::new()
            } else if info.ty.is_string() {
                escape_cell(&rec.get_string(i + 1))
            } else {
                rec.get_int(i + 1).to_string()
            };
            cells.push(cell);
        }
        write!(out, "{}\r\n", cells.join("\t"))?;
    }
    query.close()?;
    Ok(())
}

/// Write a binary cell's stream under `dir/<table>/` and return the
/// relative filename stored in the IDT cell.
fn export_binary_cell(
    table: &str,
    rec: &mut Record,
    field: usize,
    binary_dir: Option<&Path>,
) -> Result<String> {
    let Some(stream) = rec.get_stream(field) else {
        return Ok(String::new());
    };
    // Stream names are `<table>.<key>...`; the filename drops the prefix.
    let full = stream.name().unwrap_or(table).to_owned();
    let filename = full
        .strip_prefix(&format!("{table}."))
        .unwrap_or(&full)
        .to_owned();
    if let Some(dir) = binary_dir {
        let subdir = dir.join(table);
        fs::create_dir_all(&subdir)?;
        fs::write(subdir.join(&filename), stream.bytes())?;
    }
    Ok(filename)
}

/// `_SummaryInformation` exports as (PropertyId, Value) pairs.
fn export_summary(db: &Database, out: &mut dyn Write) -> Result<()> {
    write!(out, "PropertyId\tValue\r\n")?;
    write!(out, "i2\tl255\r\n")?;
    write!(out, "_SummaryInformation\tPropertyId\r\n")?;
    let si = db.summary_info(0)?;
    for (id, value) in si.properties() {
        write!(out, "{}\t{}\r\n", id as u32, escape_cell(&value.to_display()))?;
    }
    Ok(())
}

/// Import an IDT file, creating the table if needed. Binary cell files are
/// read from `<file dir>/<table>/`.
pub fn import(db: &Database, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path).map_err(|source| Error::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lines = text.split("\r\n");
    let names_line = lines.next().unwrap_or_default();
    let codes_line = lines.next().unwrap_or_default();
    let header_line = lines
        .next()
        .ok_or_else(|| Error::InvalidData("IDT file has no header".into()))?;

    let header: Vec<&str> = header_line.split('\t').collect();
    let table = header
        .first()
        .copied()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::InvalidData("IDT header has no table name".into()))?;

    if table.parse::<u32>().is_ok() && header.get(1) == Some(&"_ForceCodepage") {
        return db.set_codepage(table.parse().unwrap());
    }

    let names: Vec<&str> = names_line.split('\t').collect();
    let codes: Vec<&str> = codes_line.split('\t').collect();
    if names.len() != codes.len() {
        return Err(Error::InvalidData(
            "IDT column and type rows differ in length".into(),
        ));
    }
    let keys: Vec<&str> = header[1..].to_vec();

    let mut columns = Vec::with_capacity(names.len());
    for (i, (name, code)) in names.iter().zip(&codes).enumerate() {
        let mut ty = parse_type_code(code)?;
        if keys.contains(name) {
            ty = ty.with(ColumnAttrs::KEY);
        }
        columns.push(Column::new(table, i + 1, *name, ty));
    }

    let core = db.core();
    if !store::table_exists(&core, table) {
        store::create_table(&core, table, columns.clone(), TableKind::Persistent)?;
    }
    debug!("importing {table} from {}", path.display());

    let binary_base = path.parent().map(|p| p.join(table));
    let mut view = TableView::new(core.clone(), table)?;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split('\t').collect();
        let mut rec = Record::new(columns.len());
        for (i, col) in columns.iter().enumerate() {
            let cell = cells.get(i).copied().unwrap_or_default();
            if col.ty.is_binary() {
                if !cell.is_empty()
                    && let Some(base) = &binary_base
                {
                    rec.load_stream(i + 1, Some(&base.join(cell)))?;
                }
            } else if cell.is_empty() {
                rec.set_null(i + 1)?;
            } else if col.ty.is_string() {
                rec.set_string(i + 1, &unescape_cell(cell))?;
            } else {
                let v: i32 = cell
                    .parse()
                    .map_err(|_| Error::InvalidData(format!("bad integer cell {cell:?}")))?;
                rec.set_int(i + 1, v)?;
            }
        }
        view.insert_row(&rec, -1, false)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(ty: ColumnType) -> ColumnInfo {
        ColumnInfo {
            name: "c".into(),
            ty,
            temporary: false,
            table: "t".into(),
        }
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(column_type_code(&info(ColumnType::string(72))), "s72");
        assert_eq!(
            column_type_code(&info(ColumnType::string(0).with(ColumnAttrs::NULLABLE))),
            "S0"
        );
        assert_eq!(
            column_type_code(&info(
                ColumnType::string(64)
                    .with(ColumnAttrs::LOCALIZABLE)
                    .with(ColumnAttrs::NULLABLE)
            )),
            "L64"
        );
        assert_eq!(column_type_code(&info(ColumnType::int16())), "i2");
        assert_eq!(
            column_type_code(&info(ColumnType::int32().with(ColumnAttrs::NULLABLE))),
            "I4"
        );
        assert_eq!(
            column_type_code(&info(ColumnType::binary().with(ColumnAttrs::NULLABLE))),
            "V0"
        );
    }

    #[test]
    fn test_type_code_roundtrip() {
        for code in ["s72", "S255", "l0", "L64", "i2", "I4", "v0", "g8", "j2"] {
            let ty = parse_type_code(code).unwrap();
            let back = column_type_code(&info(ty));
            assert_eq!(back, *code, "code {code} came back as {back}");
        }
    }

    #[test]
    fn test_cell_escaping() {
        let original = "a\0b";
        let escaped = escape_cell(original);
        assert!(!escaped.contains('\0'));
        assert_eq!(unescape_cell(&escaped), original);
    }

    #[test]
    fn test_bad_type_code_rejected() {
        assert!(parse_type_code("x9").is_err());
        assert!(parse_type_code("s").is_err());
        assert!(parse_type_code("").is_err());
    }
}

//! msiinfo CLI
//!
//! Entry point for the command-line tool: list tables or streams, dump the
//! summary information, or export a table as IDT.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use msidb::{Database, OpenMode};

#[derive(Parser, Debug)]
#[command(name = "msiinfo")]
#[command(about = "Inspect and export Windows Installer databases", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tables of a database
    Tables {
        /// Path to the .msi file
        file: PathBuf,
    },

    /// List the embedded streams of a database
    Streams {
        /// Path to the .msi file
        file: PathBuf,
    },

    /// Print the summary information properties
    Suminfo {
        /// Path to the .msi file
        file: PathBuf,
    },

    /// Export a table in IDT format to stdout
    Export {
        /// Path to the .msi file
        file: PathBuf,

        /// Table to export (also `_ForceCodepage`, `_SummaryInformation`)
        table: String,

        /// Directory to write binary cell contents into
        #[arg(short = 'd', long)]
        binary_dir: Option<PathBuf>,
    },
}

fn open_readonly(file: &PathBuf) -> Result<Database> {
    Database::open(file, OpenMode::ReadOnly)
        .with_context(|| format!("failed to open {}", file.display()))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Tables { file } => {
            let db = open_readonly(&file)?;
            for name in db.table_names()? {
                println!("{name}");
            }
        }
        Command::Streams { file } => {
            let db = open_readonly(&file)?;
            for name in db.stream_names()? {
                println!("{name}");
            }
        }
        Command::Suminfo { file } => {
            let db = open_readonly(&file)?;
            let si = db.summary_info(0)?;
            for (id, value) in si.properties() {
                println!("{id}: {}", value.to_display());
            }
        }
        Command::Export {
            file,
            table,
            binary_dir,
        } => {
            let db = open_readonly(&file)?;
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            msidb::idt::export(&db, &table, &mut handle, binary_dir.as_deref())
                .with_context(|| format!("failed to export {table}"))?;
            handle.flush()?;
        }
    }

    Ok(())
}

//! Sorted file inspector
//!
//! Prints a sorted file's trailer, file info, block index summary, midkey
//! and bloom filter meta, and optionally every cell.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use cellstore::bloom::BloomMeta;
use cellstore::sfile::{SortedFileReader, SortedFileScanner};
use cellstore::storefile::{
    BLOOM_FILTER_META, BULKLOAD_TIME_KEY, MAJOR_COMPACTION_KEY, MAX_SEQ_ID_KEY, MAX_WRITE_NUMBER_KEY,
    TIMERANGE_KEY,
};
use cellstore::{Cell, Result};

/// Sorted file inspector
#[derive(Parser, Debug)]
#[command(name = "sfinspect")]
#[command(about = "Inspect a cellstore sorted file")]
#[command(version)]
struct Args {
    /// Sorted file to inspect
    file: PathBuf,

    /// Print every cell
    #[arg(short, long)]
    cells: bool,

    /// Stop printing cells after this many
    #[arg(short = 'n', long)]
    limit: Option<usize>,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cellstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        tracing::error!("Failed to inspect {}: {}", args.file.display(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let reader = Arc::new(SortedFileReader::open(&args.file, None, false)?);

    // -------------------------------------------------------------------------
    // Trailer
    // -------------------------------------------------------------------------
    let trailer = reader.trailer();
    println!("== {} ({} bytes)", args.file.display(), reader.len());
    println!("version:              {}", trailer.version);
    println!("compression:          {}", reader.compression().name());
    println!("entries:              {}", trailer.entry_count);
    println!("uncompressed bytes:   {}", trailer.total_uncompressed_bytes);
    println!("file info offset:     {}", trailer.file_info_offset);
    println!("data index offset:    {} ({} blocks)", trailer.data_index_offset, trailer.data_index_count);
    println!("meta index offset:    {} ({} blocks)", trailer.meta_index_offset, trailer.meta_index_count);

    // -------------------------------------------------------------------------
    // File info
    // -------------------------------------------------------------------------
    println!();
    println!("== file info");
    for (key, value) in reader.file_info().iter() {
        println!("{:<22}{}", printable(key), describe_info(key, value));
    }

    // -------------------------------------------------------------------------
    // Index
    // -------------------------------------------------------------------------
    println!();
    println!("== block index");
    println!("data blocks:          {}", reader.data_block_count());
    println!("index heap size:      {}", reader.index_size());
    println!("avg key/value length: {}/{}", reader.avg_key_len(), reader.avg_value_len());
    println!("first key:            {}", reader.first_key().map_or("-".into(), describe_key));
    println!("last key:             {}", reader.last_key().map_or("-".into(), describe_key));
    println!("midkey:               {}", reader.midkey().map_or("-".into(), describe_key));
    for entry in reader.meta_index().entries() {
        println!("meta block:           {} ({} bytes)", printable(&entry.first_key), entry.decoded_size);
    }

    // -------------------------------------------------------------------------
    // Bloom
    // -------------------------------------------------------------------------
    println!();
    println!("== bloom filter");
    match reader.read_meta_block(BLOOM_FILTER_META, false)? {
        Some(meta) => match BloomMeta::decode(&meta) {
            Ok(meta) => println!(
                "bytes={} hashes={} keys={} hash_type={} version={}",
                meta.byte_size, meta.hash_count, meta.key_count, meta.hash_type, meta.version
            ),
            Err(e) => println!("unreadable: {}", e),
        },
        None => println!("none"),
    }

    // -------------------------------------------------------------------------
    // Cells
    // -------------------------------------------------------------------------
    if args.cells {
        println!();
        println!("== cells");
        let limit = args.limit.unwrap_or(usize::MAX);
        let mut scanner = SortedFileScanner::new(reader.clone(), false);
        let mut printed = 0;
        let mut more = scanner.seek_to_first()?;
        while more && printed < limit {
            if let (Some(key), Some(value)) = (scanner.key(), scanner.value()) {
                println!("{}  => {}", describe_key(key), printable(value));
                printed += 1;
            }
            more = scanner.next()?;
        }
        println!("({} cells)", printed);
    }

    Ok(())
}

fn describe_key(key: &Bytes) -> String {
    match Cell::from_parts(key.clone(), Bytes::new()) {
        Ok(cell) => format!(
            "{}/{}:{}/{}/{:?}",
            printable(cell.row()),
            printable(cell.family()),
            printable(cell.qualifier()),
            cell.timestamp(),
            cell.cell_type()
        ),
        Err(_) => printable(key),
    }
}

fn describe_info(key: &[u8], value: &[u8]) -> String {
    let as_i64 = |v: &[u8]| v.try_into().ok().map(i64::from_be_bytes);
    match key {
        k if k == MAX_SEQ_ID_KEY || k == BULKLOAD_TIME_KEY || k == MAX_WRITE_NUMBER_KEY => {
            as_i64(value).map_or_else(|| printable(value), |v| v.to_string())
        }
        k if k == MAJOR_COMPACTION_KEY => (value.first() == Some(&1)).to_string(),
        k if k == TIMERANGE_KEY && value.len() == 16 => {
            match (as_i64(&value[..8]), as_i64(&value[8..])) {
                (Some(min), Some(max)) => format!("[{}, {}]", min, max),
                _ => printable(value),
            }
        }
        _ => printable(value),
    }
}

/// Printable ASCII as is, everything else as `\xNN`
fn printable(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{:02X}", b));
        }
    }
    out
}

//! Unpacking the GTFS archive and reading the stops out of it
use std::{
    collections::HashMap,
    fs::File,
    io::{self, Cursor, Read},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use itertools::Itertools;
use tracing::{info, warn};

use crate::{
    dal::StorageError,
    model::stop::{GtfsStop, Stop},
};

pub const STOPS_FILE: &str = "stops.txt";

/// Subdirectory of the data directory the archive is extracted into.
/// Keeps archive entries away from the refresh metadata.
pub const FEED_DIR: &str = "feed";

/// Maximum allowed total decompressed size of the archive (2 GB)
pub const MAX_DECOMPRESSED_SIZE: u64 = 2 * 1024 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("invalid feed archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive entry {0:?} points outside of the data directory")]
    UnsafePath(String),

    #[error("archive decompresses to more than {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("archive is missing {0}")]
    MissingFile(&'static str),

    #[error("malformed stops.txt: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid {field} {value:?} on line {line} of stops.txt")]
    InvalidField {
        line: u64,
        field: &'static str,
        value: String,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum UnpackError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("unpacking was cancelled")]
    Cancelled,
}

impl From<io::Error> for UnpackError {
    fn from(e: io::Error) -> Self {
        UnpackError::Storage(e.into())
    }
}

/// Extracts the archive into `data_dir/feed` and parses its stops.
/// Blocking, call on spawn_blocking. Stops between entries once `cancelled` is set.
pub fn unpack_feed(
    archive: &[u8],
    data_dir: &Path,
    max_size: u64,
    cancelled: &AtomicBool,
) -> Result<Vec<Stop>, UnpackError> {
    let feed_dir = data_dir.join(FEED_DIR);
    let files = extract_archive(archive, &feed_dir, max_size, cancelled)?;
    info!("extracted {}", files.iter().join(", "));

    let stops_path = feed_dir.join(STOPS_FILE);
    if !files.iter().any(|f| f == STOPS_FILE) {
        return Err(ParseError::MissingFile(STOPS_FILE).into());
    }

    Ok(read_stops(File::open(stops_path)?)?)
}

/// Returns the names of the extracted files
fn extract_archive(
    archive: &[u8],
    feed_dir: &Path,
    max_size: u64,
    cancelled: &AtomicBool,
) -> Result<Vec<String>, UnpackError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive)).map_err(ParseError::from)?;

    std::fs::create_dir_all(feed_dir)?;

    let mut files = vec![];
    let mut total_size: u64 = 0;

    for i in 0..archive.len() {
        if cancelled.load(Ordering::Relaxed) {
            return Err(UnpackError::Cancelled);
        }

        let mut entry = archive.by_index(i).map_err(ParseError::from)?;

        let Some(relative_path) = entry.enclosed_name() else {
            return Err(ParseError::UnsafePath(entry.name().to_string()).into());
        };
        let out_path = feed_dir.join(&relative_path);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // The sizes in the archive header can't be trusted, so the limit is
        // enforced on the bytes actually written.
        let remaining = max_size.saturating_sub(total_size);
        let mut out = File::create(&out_path)?;
        let written = io::copy(&mut (&mut entry).take(remaining + 1), &mut out)?;

        total_size += written;
        if total_size > max_size {
            drop(out);
            if let Err(e) = std::fs::remove_file(&out_path) {
                warn!("couldn't remove oversized {}: {e}", out_path.display());
            }
            return Err(ParseError::TooLarge { limit: max_size }.into());
        }

        files.push(relative_path.to_string_lossy().into_owned());
    }

    Ok(files)
}

/// Parses stops.txt. A stop_id appearing more than once keeps its last row.
pub fn read_stops(reader: impl Read) -> Result<Vec<Stop>, ParseError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut stops: HashMap<String, Stop> = HashMap::new();
    let mut record = csv::StringRecord::new();

    while reader.read_record(&mut record)? {
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let row: GtfsStop = record.deserialize(Some(&headers))?;
        let stop = row.try_into_stop(line)?;

        stops.insert(stop.id.clone(), stop);
    }

    let stops = stops.into_values().sorted_by(|a, b| a.id.cmp(&b.id)).collect_vec();

    info!("parsed {} stops", stops.len());

    Ok(stops)
}

#[cfg(test)]
pub(crate) fn zip_archive(files: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

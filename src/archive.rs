//! Zip bundling for folder downloads

use std::io::{Cursor, Write};

use bytes::Bytes;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;
use crate::path::StorageEntry;

/// Bundle entries into an in-memory zip archive.
///
/// Entry keys become archive names as given; folder prefixes become
/// directory entries and carry no data.
pub fn build_zip<I>(entries: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (StorageEntry, Bytes)>,
{
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (entry, body) in entries {
        match entry {
            StorageEntry::FolderPrefix(name) => zip.add_directory(name, options)?,
            StorageEntry::File(name) => {
                zip.start_file(name, options)?;
                zip.write_all(&body)?;
            }
        }
    }

    Ok(zip.finish()?.into_inner())
}

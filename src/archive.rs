//! Packing a store folder into a zip archive and unpacking it again.

use std::{
    fs::File,
    io,
    path::Path,
};

use serde::Serialize;
use tracing::{debug, info};
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::{
    error::{Error, Result},
    walker::discover_files,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub files: usize,
    /// Uncompressed size of the packed files.
    pub bytes: u64,
}

/// Pack every regular file under `source_dir` into a deflated zip at
/// `archive_path`. Hidden files are skipped, as is the archive itself when
/// it lives inside `source_dir`.
///
/// An existing archive is a [`Error::Conflict`] unless `overwrite` is set.
pub fn create_archive(
    source_dir: &Path,
    archive_path: &Path,
    overwrite: bool,
) -> Result<ArchiveSummary> {
    if !overwrite && archive_path.try_exists()? {
        return Err(Error::Conflict(format!(
            "{} already exists",
            archive_path.display()
        )));
    }

    let parent = match archive_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let archive_canonical = parent
        .canonicalize()?
        .join(archive_path.file_name().unwrap_or_default());

    let staged = tempfile::Builder::new()
        .prefix(".export-")
        .tempfile_in(parent)?;
    let mut zip = ZipWriter::new(staged.reopen()?);
    let options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut summary = ArchiveSummary::default();
    for file in discover_files(source_dir)? {
        if file.absolute_path == archive_canonical {
            continue;
        }
        debug!(path = %file.relative_path, "adding to archive");
        zip.start_file(file.relative_path.as_str(), options)?;
        io::copy(&mut File::open(&file.absolute_path)?, &mut zip)?;
        summary.files += 1;
        summary.bytes += file.size;
    }
    zip.finish()?.sync_all()?;

    if overwrite {
        staged.persist(archive_path).map_err(|e| Error::Io(e.error))?;
    } else {
        staged.persist_noclobber(archive_path).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                Error::Conflict(format!("{} already exists", archive_path.display()))
            } else {
                Error::Io(e.error)
            }
        })?;
    }

    info!(
        archive = %archive_path.display(),
        files = summary.files,
        "created archive"
    );
    Ok(summary)
}

/// Extract a zip archive into `destination`, creating it if needed.
///
/// Entry names that would escape `destination` are rejected by the zip
/// reader.
pub fn extract_archive(archive_path: &Path, destination: &Path) -> Result<ArchiveSummary> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut summary = ArchiveSummary::default();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if !entry.is_dir() {
            summary.files += 1;
            summary.bytes += entry.size();
        }
    }

    std::fs::create_dir_all(destination)?;
    archive.extract(destination)?;

    info!(
        archive = %archive_path.display(),
        destination = %destination.display(),
        files = summary.files,
        "extracted archive"
    );
    Ok(summary)
}

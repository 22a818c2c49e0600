//! Collision-safe storage of attached content under the content root.
//!
//! Stored names are `{stem}_{YYYY-MM-DD}{.ext}`, falling back to
//! `{stem}_{YYYY-MM-DD}_{8 hex}{.ext}` when the dated name is taken on disk,
//! in the catalog, or by a reservation still in flight. Reservations live in a
//! process-wide set so two uploads in one batch, or two concurrent batches,
//! never pick the same name. Content is staged in a hidden temporary file and
//! moved into place with a no-clobber rename, so existing files are never
//! overwritten.

use std::{
    collections::{BTreeSet, HashSet},
    io::{self, Read},
    path::{Path, PathBuf},
    sync::{LazyLock, Mutex, MutexGuard},
};

use chrono::{Local, NaiveDate};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

use crate::{
    compress::{CompressError, Compressor},
    error::{Error, Result},
    model::DATE_FORMAT,
};

/// Attempts before a reservation gives up with a conflict.
const MAX_ATTEMPTS: usize = 32;

/// Prefix of staging files. The leading dot keeps them out of content scans.
const STAGING_PREFIX: &str = ".upload-";

const MAX_STEM_CHARS: usize = 100;

/// Upload size limit used unless the caller configures another one.
pub const DEFAULT_MAX_CONTENT_BYTES: u64 = 100 * 1024 * 1024;

static RESERVED: LazyLock<Mutex<HashSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

fn reserved() -> MutexGuard<'static, HashSet<PathBuf>> {
    // The set stays consistent even if a holder panicked.
    RESERVED.lock().unwrap_or_else(|e| e.into_inner())
}

/// Reduce an uploaded name to a safe single path component.
///
/// Directory parts are dropped, anything other than letters, digits, `.`,
/// `-` and `_` becomes `_`, and leading dots are removed so the result is
/// never hidden. Names with nothing left become `file`.
///
/// ```
/// use duckstore::file_store::sanitize_filename;
///
/// assert_eq!(sanitize_filename("../etc/my lease.pdf"), "my_lease.pdf");
/// assert_eq!(sanitize_filename("..."), "file");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let sanitized: String = base
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() => c,
            '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();

    let trimmed = sanitized.trim_start_matches(['.', '_']).trim_end_matches('.');
    if trimmed.is_empty() {
        return "file".to_string();
    }

    let (stem, ext) = split_name(trimmed);
    if stem.chars().count() > MAX_STEM_CHARS {
        let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
        format!("{stem}{ext}")
    } else {
        trimmed.to_string()
    }
}

/// Split `name` into stem and extension, the extension keeping its dot.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => name.split_at(pos),
        _ => (name, ""),
    }
}

fn random_suffix() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// A storage name held for the lifetime of this value.
#[derive(Debug)]
pub struct Reservation {
    relative: String,
    absolute: PathBuf,
}

impl Reservation {
    /// Path relative to the content root, as recorded in the catalog.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn path(&self) -> &Path {
        &self.absolute
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        reserved().remove(&self.absolute);
    }
}

/// How [`FileStore::write_content`] treats the incoming bytes.
#[derive(Clone, Copy)]
pub struct WriteOptions<'a> {
    /// Applied when it handles the reserved name.
    pub compressor: Option<&'a dyn Compressor>,
    /// Content larger than this is rejected.
    pub max_bytes: u64,
}

impl Default for WriteOptions<'_> {
    fn default() -> Self {
        Self {
            compressor: None,
            max_bytes: DEFAULT_MAX_CONTENT_BYTES,
        }
    }
}

/// Outcome of [`FileStore::write_content`].
#[derive(Debug)]
pub struct WrittenFile {
    /// Final path relative to the content root. Differs from the
    /// reservation when the reserved name was taken at write time.
    pub path: String,
    /// Whether the stored bytes are the compressor's output.
    pub compressed: bool,
    /// Why compression was skipped, if it was attempted and failed.
    pub warning: Option<CompressError>,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a stored file. No I/O.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Reserve a unique storage name derived from `desired` and today's
    /// local date. Names in `taken` (the catalog's recorded paths) are
    /// skipped even when nothing exists on disk under them.
    pub fn reserve_storage_path(
        &self,
        desired: &str,
        taken: &BTreeSet<String>,
    ) -> Result<Reservation> {
        self.reserve_on(desired, Local::now().date_naive(), taken)
    }

    /// Reserve a unique storage name dated `date`.
    pub fn reserve_on(
        &self,
        desired: &str,
        date: NaiveDate,
        taken: &BTreeSet<String>,
    ) -> Result<Reservation> {
        let sanitized = sanitize_filename(desired);
        let (stem, ext) = split_name(&sanitized);
        let date = date.format(DATE_FORMAT);

        let mut candidate = format!("{stem}_{date}{ext}");
        for _ in 0..MAX_ATTEMPTS {
            if let Some(reservation) = self.try_reserve(&candidate, taken)? {
                debug!(path = %reservation.relative, "reserved storage path");
                return Ok(reservation);
            }
            candidate = format!("{stem}_{date}_{}{ext}", random_suffix());
        }

        Err(Error::Conflict(format!(
            "no free storage name for {desired:?} after {MAX_ATTEMPTS} attempts"
        )))
    }

    fn try_reserve(
        &self,
        relative: &str,
        taken: &BTreeSet<String>,
    ) -> Result<Option<Reservation>> {
        if taken.contains(relative) {
            return Ok(None);
        }
        let absolute = self.resolve(relative);
        if absolute.try_exists()? {
            return Ok(None);
        }
        if !reserved().insert(absolute.clone()) {
            return Ok(None);
        }
        Ok(Some(Reservation {
            relative: relative.to_string(),
            absolute,
        }))
    }

    /// Store the bytes from `reader` under the reserved name.
    ///
    /// When the compressor applies to the name, its output is stored instead
    /// of the original bytes; a failing compressor leaves the original in
    /// place and is reported through [`WrittenFile::warning`]. Content over
    /// `options.max_bytes` is a validation error and nothing is stored.
    pub fn write_content(
        &self,
        reader: &mut dyn Read,
        reservation: &Reservation,
        options: &WriteOptions<'_>,
    ) -> Result<WrittenFile> {
        std::fs::create_dir_all(&self.root)?;

        let mut staged = self.staging_file()?;
        let limit = options.max_bytes.saturating_add(1);
        let copied = io::copy(&mut Read::take(reader, limit), &mut staged)?;
        if copied > options.max_bytes {
            return Err(Error::Validation(format!(
                "{} exceeds the upload limit of {} bytes",
                reservation.relative(),
                options.max_bytes
            )));
        }
        staged.as_file().sync_all()?;

        let mut warning = None;
        let mut compressed = false;
        let mut chosen = staged;

        if let Some(compressor) = options.compressor
            && compressor.applies_to(reservation.path())
        {
            let output = self.staging_file()?;
            match compressor.compress(chosen.path(), output.path()) {
                Ok(()) => {
                    chosen = output;
                    compressed = true;
                }
                Err(e) => {
                    warn!(
                        path = reservation.relative(),
                        error = %e,
                        "compression failed, storing original"
                    );
                    warning = Some(e);
                }
            }
        }

        let path = self.persist(chosen, reservation)?;
        Ok(WrittenFile {
            path,
            compressed,
            warning,
        })
    }

    fn staging_file(&self) -> Result<NamedTempFile> {
        Ok(Builder::new().prefix(STAGING_PREFIX).tempfile_in(&self.root)?)
    }

    /// Move the staged file into place without replacing anything. A name
    /// taken since reservation gets a fresh random suffix.
    fn persist(
        &self,
        mut staged: NamedTempFile,
        reservation: &Reservation,
    ) -> Result<String> {
        let (stem, ext) = split_name(reservation.relative());
        let mut fallback: Option<Reservation> = None;

        for _ in 0..MAX_ATTEMPTS {
            let target = fallback.as_ref().unwrap_or(reservation);
            match staged.persist_noclobber(target.path()) {
                Ok(_) => return Ok(target.relative().to_string()),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    warn!(
                        path = target.relative(),
                        "storage path appeared since reservation, renaming"
                    );
                    staged = e.file;
                }
                Err(e) => return Err(e.error.into()),
            }

            let candidate = format!("{stem}_{}{ext}", random_suffix());
            fallback = self.try_reserve(&candidate, &BTreeSet::new())?.or(fallback);
        }

        Err(Error::Conflict(format!(
            "could not store {} without overwriting existing content",
            reservation.relative()
        )))
    }

    /// Remove a stored file. A file that is already gone is reported as
    /// `false` with a warning.
    pub fn delete_file(&self, relative: &str) -> Result<bool> {
        match std::fs::remove_file(self.resolve(relative)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = relative, "stored file already missing");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, FileStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path().join("store"));
        std::fs::create_dir_all(store.root()).unwrap();
        (tmp, store)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn visible_files(store: &FileStore) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    struct FailingCompressor;

    impl Compressor for FailingCompressor {
        fn applies_to(&self, _name: &Path) -> bool {
            true
        }

        fn compress(&self, input: &Path, _output: &Path) -> std::result::Result<(), CompressError> {
            Err(CompressError::Unsupported(input.to_path_buf()))
        }
    }

    struct UppercaseCompressor;

    impl Compressor for UppercaseCompressor {
        fn applies_to(&self, name: &Path) -> bool {
            name.extension().is_some_and(|e| e == "txt")
        }

        fn compress(&self, input: &Path, output: &Path) -> std::result::Result<(), CompressError> {
            let text = std::fs::read_to_string(input)?;
            std::fs::write(output, text.to_uppercase())?;
            Ok(())
        }
    }

    fn with(compressor: &dyn Compressor) -> WriteOptions<'_> {
        WriteOptions {
            compressor: Some(compressor),
            ..Default::default()
        }
    }

    #[test]
    fn sanitize_strips_directories_and_unsafe_chars() {
        assert_eq!(sanitize_filename("/tmp/a b/c d.pdf"), "c_d.pdf");
        assert_eq!(sanitize_filename("C:\\Users\\me\\scan#1.pdf"), "scan_1.pdf");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("///"), "file");
        assert_eq!(sanitize_filename("reçu.pdf"), "reçu.pdf");
    }

    #[test]
    fn sanitize_truncates_long_stems_keeping_extension() {
        let long = format!("{}.pdf", "a".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized, format!("{}.pdf", "a".repeat(MAX_STEM_CHARS)));
    }

    #[test]
    fn reservation_appends_date() {
        let (_tmp, store) = test_store();
        let reservation = store.reserve_on("lease.pdf", day(), &BTreeSet::new()).unwrap();

        assert_eq!(reservation.relative(), "lease_2024-01-01.pdf");
        assert_eq!(reservation.path(), store.resolve("lease_2024-01-01.pdf"));
    }

    #[test]
    fn name_without_extension() {
        let (_tmp, store) = test_store();
        let reservation = store.reserve_on("README", day(), &BTreeSet::new()).unwrap();
        assert_eq!(reservation.relative(), "README_2024-01-01");
    }

    #[test]
    fn two_reservations_same_day_are_distinct() {
        let (_tmp, store) = test_store();
        let first = store.reserve_on("lease.pdf", day(), &BTreeSet::new()).unwrap();
        let second = store.reserve_on("lease.pdf", day(), &BTreeSet::new()).unwrap();

        assert_ne!(first.relative(), second.relative());
        assert!(second.relative().starts_with("lease_2024-01-01_"));
        assert!(second.relative().ends_with(".pdf"));
        // stem + "_" + 8 hex + ".pdf"
        assert_eq!(second.relative().len(), "lease_2024-01-01_".len() + 8 + 4);
    }

    #[test]
    fn dropping_reservation_releases_name() {
        let (_tmp, store) = test_store();
        let first = store.reserve_on("lease.pdf", day(), &BTreeSet::new()).unwrap();
        drop(first);

        let again = store.reserve_on("lease.pdf", day(), &BTreeSet::new()).unwrap();
        assert_eq!(again.relative(), "lease_2024-01-01.pdf");
    }

    #[test]
    fn existing_file_forces_suffix() {
        let (_tmp, store) = test_store();
        std::fs::write(store.resolve("lease_2024-01-01.pdf"), b"old").unwrap();

        let reservation = store.reserve_on("lease.pdf", day(), &BTreeSet::new()).unwrap();
        assert_ne!(reservation.relative(), "lease_2024-01-01.pdf");
    }

    #[test]
    fn catalog_paths_force_suffix() {
        let (_tmp, store) = test_store();
        let taken = BTreeSet::from(["lease_2024-01-01.pdf".to_string()]);

        let reservation = store.reserve_on("lease.pdf", day(), &taken).unwrap();
        assert!(reservation.relative().starts_with("lease_2024-01-01_"));
        assert!(!taken.contains(reservation.relative()));
    }

    #[test]
    fn oversized_content_is_rejected() {
        let (_tmp, store) = test_store();
        let reservation = store.reserve_on("big.txt", day(), &BTreeSet::new()).unwrap();
        let options = WriteOptions {
            max_bytes: 4,
            ..Default::default()
        };

        let result = store.write_content(&mut &b"12345"[..], &reservation, &options);
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(visible_files(&store).is_empty());

        let written = store
            .write_content(&mut &b"1234"[..], &reservation, &options)
            .unwrap();
        assert_eq!(std::fs::read(store.resolve(&written.path)).unwrap(), b"1234");
    }

    #[test]
    fn write_content_stores_bytes() {
        let (_tmp, store) = test_store();
        let reservation = store.reserve_on("note.txt", day(), &BTreeSet::new()).unwrap();

        let written = store
            .write_content(&mut &b"hello"[..], &reservation, &WriteOptions::default())
            .unwrap();

        assert_eq!(written.path, "note_2024-01-01.txt");
        assert!(!written.compressed);
        assert!(written.warning.is_none());
        assert_eq!(std::fs::read(store.resolve(&written.path)).unwrap(), b"hello");
        // No staging files left behind.
        assert_eq!(visible_files(&store), vec!["note_2024-01-01.txt"]);
    }

    #[test]
    fn write_collision_never_overwrites() {
        let (_tmp, store) = test_store();
        let reservation = store.reserve_on("note.txt", day(), &BTreeSet::new()).unwrap();

        // Someone else takes the name after it was reserved.
        std::fs::write(reservation.path(), b"existing").unwrap();

        let written = store
            .write_content(&mut &b"new"[..], &reservation, &WriteOptions::default())
            .unwrap();

        assert_ne!(written.path, reservation.relative());
        assert!(written.path.starts_with("note_2024-01-01_"));
        assert_eq!(std::fs::read(reservation.path()).unwrap(), b"existing");
        assert_eq!(std::fs::read(store.resolve(&written.path)).unwrap(), b"new");
    }

    #[test]
    fn compressor_output_is_stored() {
        let (_tmp, store) = test_store();
        let reservation = store.reserve_on("note.txt", day(), &BTreeSet::new()).unwrap();

        let written = store
            .write_content(
                &mut &b"quiet"[..],
                &reservation,
                &WriteOptions {
                    compressor: Some(&UppercaseCompressor),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(written.compressed);
        assert_eq!(std::fs::read(store.resolve(&written.path)).unwrap(), b"QUIET");
        assert_eq!(visible_files(&store), vec!["note_2024-01-01.txt"]);
    }

    #[test]
    fn compressor_is_skipped_when_not_applicable() {
        let (_tmp, store) = test_store();
        let reservation = store.reserve_on("scan.pdf", day(), &BTreeSet::new()).unwrap();

        let written = store
            .write_content(
                &mut &b"quiet"[..],
                &reservation,
                &WriteOptions {
                    compressor: Some(&UppercaseCompressor),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(!written.compressed);
        assert_eq!(std::fs::read(store.resolve(&written.path)).unwrap(), b"quiet");
    }

    #[test]
    fn compression_failure_keeps_original() {
        let (_tmp, store) = test_store();
        let reservation = store.reserve_on("scan.pdf", day(), &BTreeSet::new()).unwrap();

        let written = store
            .write_content(&mut &b"%PDF-1.4"[..], &reservation, &with(&FailingCompressor))
            .unwrap();

        assert!(!written.compressed);
        assert!(matches!(written.warning, Some(CompressError::Unsupported(_))));
        assert_eq!(
            std::fs::read(store.resolve(&written.path)).unwrap(),
            b"%PDF-1.4"
        );
        assert_eq!(visible_files(&store), vec!["scan_2024-01-01.pdf"]);
    }

    #[test]
    fn delete_missing_file_is_not_an_error() {
        let (_tmp, store) = test_store();
        std::fs::write(store.resolve("a.txt"), b"x").unwrap();

        assert!(store.delete_file("a.txt").unwrap());
        assert!(!store.delete_file("a.txt").unwrap());
    }
}

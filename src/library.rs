//! The document library: catalog and content root used together.
//!
//! Every mutation commits the catalog first and touches the disk second.
//! Settings, size limits and storage names are all settled before the
//! commit, so a failed call leaves nothing behind. After the commit no error
//! escapes: each upload or removal reports its own outcome, and an upload
//! whose content cannot be written loses its File row again.

use std::{
    fs::File,
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    archive,
    catalog::{Catalog, CatalogStats, WriteSession},
    compress::{Compressor, Ghostscript, Quality},
    doc_id::DocumentId,
    error::{Error, Result},
    file_store::{
        DEFAULT_MAX_CONTENT_BYTES,
        FileStore,
        Reservation,
        WriteOptions,
        WrittenFile,
    },
    maintenance::{self, GcReport, MergeReport, OrphanCleanup},
    model::{Document, DocumentMetadata, FileEntry, NewFile, Source, Tag},
    search::{self, SearchFilter},
    store_dir::StoreDir,
    walker::DiscoveredFile,
};

/// Ghostscript preset used when compressing PDFs.
pub const PDF_QUALITY_KEY: &str = "pdf_quality";
/// Whether uploads are compressed when the caller does not say.
pub const COMPRESS_PDFS_KEY: &str = "compress_pdfs";
/// Largest accepted upload, in MiB.
pub const MAX_UPLOAD_MB_KEY: &str = "max_upload_mb";

pub const SETTING_KEYS: [&str; 3] =
    [PDF_QUALITY_KEY, COMPRESS_PDFS_KEY, MAX_UPLOAD_MB_KEY];

const MIB: u64 = 1024 * 1024;

/// Check a setting and return its normalized value.
pub fn validate_setting(key: &str, value: &str) -> Result<String> {
    match key {
        PDF_QUALITY_KEY => Ok(value.parse::<Quality>()?.to_string()),
        COMPRESS_PDFS_KEY => parse_bool(value).map(|b| b.to_string()),
        MAX_UPLOAD_MB_KEY => parse_megabytes(value).map(|mb| mb.to_string()),
        _ => Err(unknown_setting(key)),
    }
}

fn unknown_setting(key: &str) -> Error {
    Error::Validation(format!(
        "unknown setting {key:?} (known: {})",
        SETTING_KEYS.join(", ")
    ))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::Validation(format!(
            "expected true or false, got {value:?}"
        ))),
    }
}

fn parse_megabytes(value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(mb) if mb > 0 => Ok(mb),
        _ => Err(Error::Validation(format!(
            "expected a positive number of MiB, got {value:?}"
        ))),
    }
}

/// Content to attach to a document.
pub struct Upload {
    /// Base name the content was supplied under.
    pub name: String,
    pub reader: Box<dyn Read + Send>,
    /// Length in bytes when known up front. Oversized uploads with a known
    /// size are refused before anything is committed.
    pub size: Option<u64>,
}

impl Upload {
    pub fn new(name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: base_name(&name.into()),
            reader: Box::new(reader),
            size: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            size: Some(size),
            ..Self::new(name, file)
        })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self {
            size: Some(size),
            ..Self::new(name, Cursor::new(bytes))
        }
    }
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

fn base_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

/// Everything about a document the caller edits directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentDraft {
    pub metadata: DocumentMetadata,
    pub tags: Vec<String>,
    pub sources: Vec<String>,
}

impl DocumentDraft {
    pub fn new(metadata: DocumentMetadata) -> Self {
        Self {
            metadata,
            ..Default::default()
        }
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sources<S: Into<String>>(
        mut self,
        sources: impl IntoIterator<Item = S>,
    ) -> Self {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// The current state of a stored document.
    pub fn from_document(document: &Document) -> Self {
        Self {
            metadata: document.metadata(),
            tags: document.tag_names().into_iter().map(String::from).collect(),
            sources: document.source_names().into_iter().map(String::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadStatus {
    Stored {
        file_id: u64,
        path: String,
        compressed: bool,
        /// Why compression was skipped.
        warning: Option<String>,
    },
    /// The content could not be written; the File row was removed again.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub original_name: String,
    #[serde(flatten)]
    pub status: UploadStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum RemovalOutcome {
    Removed,
    Missing,
    Failed(String),
}

/// A file removed from the catalog and what happened to its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedFile {
    pub file_id: u64,
    pub original_name: String,
    pub path: PathBuf,
    pub outcome: RemovalOutcome,
}

/// Result of creating or editing a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub document: Document,
    pub uploads: Vec<UploadOutcome>,
    pub detached: Vec<DeletedFile>,
}

impl SaveReport {
    pub fn failed_uploads(&self) -> usize {
        self.uploads
            .iter()
            .filter(|u| matches!(u.status, UploadStatus::Failed { .. }))
            .count()
    }
}

/// Where to read a stored file and what to call it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Download {
    pub path: PathBuf,
    pub download_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub folder: PathBuf,
    pub catalog: CatalogStats,
    pub content_files: usize,
    pub content_bytes: u64,
    pub ghostscript: bool,
}

pub struct Library {
    dir: StoreDir,
    catalog: Catalog,
    files: FileStore,
    compressor: Option<Box<dyn Compressor>>,
}

impl Library {
    /// Open the library in an existing store folder.
    pub fn open(dir: StoreDir) -> Result<Self> {
        if !dir.has_catalog() {
            return Err(Error::not_found(
                "catalog",
                dir.catalog_db().display(),
            ));
        }
        Self::create(dir)
    }

    /// Open the library, creating the catalog and content root if needed.
    pub fn create(dir: StoreDir) -> Result<Self> {
        let catalog = Catalog::open(&dir.catalog_db())?;
        let files = FileStore::new(dir.content_root()?);
        Ok(Self {
            dir,
            catalog,
            files,
            compressor: None,
        })
    }

    /// Restore a store folder from an archive made by
    /// [`archive::create_archive`].
    ///
    /// Refuses to touch a folder that already holds a catalog.
    pub fn import(dir: StoreDir, archive_path: &Path) -> Result<Self> {
        if dir.has_catalog() {
            return Err(Error::Conflict(format!(
                "{} already contains a catalog",
                dir.root().display()
            )));
        }
        archive::extract_archive(archive_path, dir.root())?;
        if !dir.has_catalog() {
            return Err(Error::Validation(format!(
                "{} does not contain a catalog",
                archive_path.display()
            )));
        }
        Self::open(dir)
    }

    /// Use `compressor` instead of Ghostscript for compressed uploads.
    pub fn with_compressor(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressor = Some(Box::new(compressor));
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn dir(&self) -> &StoreDir {
        &self.dir
    }

    // -- Documents --

    /// Create a document and store its uploads.
    ///
    /// `compress` overrides the `compress_pdfs` setting.
    pub fn create_document(
        &self,
        draft: &DocumentDraft,
        uploads: Vec<Upload>,
        compress: Option<bool>,
    ) -> Result<SaveReport> {
        draft.metadata.validate()?;
        let plan = self.write_plan(compress)?;
        let pending = self.reserve(uploads, plan.max_bytes)?;

        let session = self.catalog.begin_write()?;
        let id = session.create_document(
            &draft.metadata,
            &draft.tags,
            &draft.sources,
            &new_files(&pending),
        )?;
        let pending = with_file_ids(&session, pending)?;
        session.commit()?;
        info!(document = %id, title = %draft.metadata.title, "created document");

        let uploads = self.store_pending(id, pending, &plan);
        Ok(SaveReport {
            document: self.catalog.get_document(id)?,
            uploads,
            detached: Vec::new(),
        })
    }

    /// Replace a document's fields and labels, attach `uploads` and detach
    /// the files listed in `detach`.
    pub fn update_document(
        &self,
        id: DocumentId,
        draft: &DocumentDraft,
        uploads: Vec<Upload>,
        detach: &[u64],
        compress: Option<bool>,
    ) -> Result<SaveReport> {
        draft.metadata.validate()?;
        let plan = self.write_plan(compress)?;
        let pending = self.reserve(uploads, plan.max_bytes)?;

        let session = self.catalog.begin_write()?;
        let detached = session.update_document(
            id,
            &draft.metadata,
            &draft.tags,
            &draft.sources,
            &new_files(&pending),
            detach,
        )?;
        let pending = with_file_ids(&session, pending)?;
        session.commit()?;
        info!(document = %id, "updated document");

        let detached = self.remove_content(detached);
        let uploads = self.store_pending(id, pending, &plan);
        Ok(SaveReport {
            document: self.catalog.get_document(id)?,
            uploads,
            detached,
        })
    }

    /// Delete a document, then its content. Content removal never fails the
    /// call; see each file's [`RemovalOutcome`].
    pub fn delete_document(&self, id: DocumentId) -> Result<Vec<DeletedFile>> {
        let removed = self.catalog.delete_document(id)?;
        info!(document = %id, files = removed.len(), "deleted document");
        Ok(self.remove_content(removed))
    }

    pub fn get_document(&self, id: DocumentId) -> Result<Document> {
        self.catalog.get_document(id)
    }

    pub fn list_documents(&self) -> Result<Vec<Document>> {
        self.catalog.list_documents()
    }

    pub fn search(&self, filter: &SearchFilter) -> Result<Vec<Document>> {
        search::search(&self.catalog, filter)
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        self.catalog.list_tags()
    }

    pub fn list_sources(&self) -> Result<Vec<Source>> {
        self.catalog.list_sources()
    }

    // -- Files --

    /// Resolve a stored file for download. Pure read.
    pub fn download(&self, file_id: u64) -> Result<Download> {
        let entry = self.catalog.get_file(file_id)?;
        Ok(Download {
            path: self.files.resolve(&entry.path),
            download_name: entry.original_name,
        })
    }

    /// Copy a stored file into `output_dir` under its original name.
    pub fn save_copy(&self, file_id: u64, output_dir: &Path, overwrite: bool) -> Result<PathBuf> {
        let download = self.download(file_id)?;
        if !download.path.try_exists()? {
            return Err(Error::not_found("file content", download.path.display()));
        }

        let target = output_dir.join(&download.download_name);
        if !overwrite && target.try_exists()? {
            return Err(Error::Conflict(format!(
                "{} already exists",
                target.display()
            )));
        }
        std::fs::create_dir_all(output_dir)?;
        std::fs::copy(&download.path, &target)?;
        Ok(target)
    }

    // -- Maintenance --

    pub fn garbage_collect(&self) -> Result<GcReport> {
        maintenance::garbage_collect_unused(&self.catalog)
    }

    pub fn merge_tags<S: AsRef<str>>(&self, canonical: &str, aliases: &[S]) -> Result<MergeReport> {
        maintenance::merge_tags(&self.catalog, canonical, aliases)
    }

    pub fn orphaned_files(&self) -> Result<Vec<DiscoveredFile>> {
        maintenance::find_orphaned_files(&self.catalog, &self.files)
    }

    pub fn remove_orphaned_files(&self) -> Result<OrphanCleanup> {
        maintenance::remove_orphaned_files(&self.catalog, &self.files)
    }

    pub fn missing_files(&self) -> Result<Vec<FileEntry>> {
        maintenance::find_missing_files(&self.catalog, &self.files)
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let content = crate::walker::discover_files(self.files.root())?;
        Ok(StoreStatus {
            folder: self.dir.root().to_path_buf(),
            catalog: self.catalog.stats()?,
            content_files: content.len(),
            content_bytes: content.iter().map(|f| f.size).sum(),
            ghostscript: Ghostscript::is_available(),
        })
    }

    // -- Settings --

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        if !SETTING_KEYS.contains(&key) {
            return Err(unknown_setting(key));
        }
        self.catalog.get_setting(key)
    }

    pub fn settings(&self) -> Result<Vec<(String, Option<String>)>> {
        SETTING_KEYS
            .iter()
            .map(|key| Ok((key.to_string(), self.catalog.get_setting(key)?)))
            .collect()
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<String> {
        let value = validate_setting(key, value)?;
        self.catalog.set_setting(key, &value)?;
        Ok(value)
    }

    pub fn unset_setting(&self, key: &str) -> Result<bool> {
        if !SETTING_KEYS.contains(&key) {
            return Err(unknown_setting(key));
        }
        self.catalog.remove_setting(key)
    }

    fn compress_by_default(&self) -> Result<bool> {
        match self.catalog.get_setting(COMPRESS_PDFS_KEY)? {
            Some(value) => parse_bool(&value),
            None => Ok(false),
        }
    }

    fn pdf_quality(&self) -> Result<Quality> {
        match self.catalog.get_setting(PDF_QUALITY_KEY)? {
            Some(value) => value.parse(),
            None => Ok(Quality::default()),
        }
    }

    fn max_upload_bytes(&self) -> Result<u64> {
        match self.catalog.get_setting(MAX_UPLOAD_MB_KEY)? {
            Some(value) => Ok(parse_megabytes(&value)?.saturating_mul(MIB)),
            None => Ok(DEFAULT_MAX_CONTENT_BYTES),
        }
    }

    // -- Internals --

    /// Read every setting that shapes content writes. Runs before the
    /// commit so a bad setting fails the whole call.
    fn write_plan(&self, compress: Option<bool>) -> Result<WritePlan<'_>> {
        let wanted = match compress {
            Some(flag) => flag,
            None => self.compress_by_default()?,
        };
        let compression = if !wanted {
            Compression::Off
        } else if let Some(custom) = &self.compressor {
            Compression::Custom(&**custom)
        } else {
            Compression::Ghostscript(Ghostscript::new(self.pdf_quality()?))
        };
        Ok(WritePlan {
            compression,
            max_bytes: self.max_upload_bytes()?,
        })
    }

    /// Reserve a storage name per upload, skipping names the catalog
    /// already records even if their content is gone.
    fn reserve(
        &self,
        uploads: Vec<Upload>,
        max_bytes: u64,
    ) -> Result<Vec<(Upload, Reservation)>> {
        if uploads.is_empty() {
            return Ok(Vec::new());
        }
        for upload in &uploads {
            if let Some(size) = upload.size
                && size > max_bytes
            {
                return Err(Error::Validation(format!(
                    "{} is {size} bytes, over the upload limit of {max_bytes} bytes",
                    upload.name
                )));
            }
        }

        let taken = self.catalog.begin_read()?.file_paths()?;
        uploads
            .into_iter()
            .map(|upload| {
                let reservation =
                    self.files.reserve_storage_path(&upload.name, &taken)?;
                Ok((upload, reservation))
            })
            .collect()
    }

    /// Write the content of freshly committed File rows.
    fn store_pending(
        &self,
        id: DocumentId,
        pending: Vec<(Upload, Reservation, u64)>,
        plan: &WritePlan<'_>,
    ) -> Vec<UploadOutcome> {
        let options = plan.options();
        pending
            .into_iter()
            .map(|(mut upload, reservation, file_id)| {
                let status = match self.files.write_content(
                    &mut *upload.reader,
                    &reservation,
                    &options,
                ) {
                    Ok(written) => {
                        self.settle_upload(id, file_id, reservation.relative(), written)
                    }
                    Err(e) => {
                        error!(
                            document = %id,
                            file = %upload.name,
                            error = %e,
                            "could not store content"
                        );
                        self.drop_file_row(id, file_id);
                        UploadStatus::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                UploadOutcome {
                    original_name: upload.name,
                    status,
                }
            })
            .collect()
    }

    /// Point the File row at the written content. If the content landed
    /// under a new name the catalog refuses, the content and row are both
    /// dropped.
    fn settle_upload(
        &self,
        id: DocumentId,
        file_id: u64,
        reserved: &str,
        written: WrittenFile,
    ) -> UploadStatus {
        if written.path != reserved
            && let Err(e) = self.catalog.relocate_file(file_id, &written.path)
        {
            error!(
                document = %id,
                path = %written.path,
                error = %e,
                "could not record relocated content"
            );
            if let Err(cleanup) = self.files.delete_file(&written.path) {
                warn!(path = %written.path, error = %cleanup, "could not remove content");
            }
            self.drop_file_row(id, file_id);
            return UploadStatus::Failed {
                error: e.to_string(),
            };
        }

        UploadStatus::Stored {
            file_id,
            path: written.path,
            compressed: written.compressed,
            warning: written.warning.map(|w| w.to_string()),
        }
    }

    fn drop_file_row(&self, id: DocumentId, file_id: u64) {
        let result = self.catalog.begin_write().and_then(|session| {
            session.detach_files(id, &[file_id])?;
            session.commit()
        });
        if let Err(e) = result {
            error!(
                document = %id,
                file = file_id,
                error = %e,
                "could not drop file row; it will be listed as missing"
            );
        }
    }

    fn remove_content(&self, entries: Vec<FileEntry>) -> Vec<DeletedFile> {
        entries
            .into_iter()
            .map(|entry| {
                let outcome = match self.files.delete_file(&entry.path) {
                    Ok(true) => RemovalOutcome::Removed,
                    Ok(false) => RemovalOutcome::Missing,
                    Err(e) => {
                        warn!(path = %entry.path, error = %e, "could not remove content");
                        RemovalOutcome::Failed(e.to_string())
                    }
                };
                DeletedFile {
                    file_id: entry.id,
                    path: self.files.resolve(&entry.path),
                    original_name: entry.original_name,
                    outcome,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("dir", &self.dir)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

/// Settings for the content writes of one call.
struct WritePlan<'a> {
    compression: Compression<'a>,
    max_bytes: u64,
}

enum Compression<'a> {
    Off,
    Custom(&'a dyn Compressor),
    Ghostscript(Ghostscript),
}

impl WritePlan<'_> {
    fn options(&self) -> WriteOptions<'_> {
        let compressor: Option<&dyn Compressor> = match &self.compression {
            Compression::Off => None,
            Compression::Custom(custom) => Some(*custom),
            Compression::Ghostscript(gs) => Some(gs),
        };
        WriteOptions {
            compressor,
            max_bytes: self.max_bytes,
        }
    }
}

/// Pair each reservation with the File row the session created for it.
fn with_file_ids(
    session: &WriteSession,
    pending: Vec<(Upload, Reservation)>,
) -> Result<Vec<(Upload, Reservation, u64)>> {
    pending
        .into_iter()
        .map(|(upload, reservation)| {
            let file_id = session
                .file_id_at(reservation.relative())?
                .ok_or_else(|| Error::not_found("file", reservation.relative()))?;
            Ok((upload, reservation, file_id))
        })
        .collect()
}

fn new_files(pending: &[(Upload, Reservation)]) -> Vec<NewFile> {
    pending
        .iter()
        .map(|(upload, reservation)| NewFile {
            path: reservation.relative().to_string(),
            original_name: upload.name.clone(),
        })
        .collect()
}

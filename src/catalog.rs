//! The catalog store: documents, files, tags and sources in one redb file.
//!
//! Every entity lives in its own table keyed by a numeric id handed out by
//! the `sequences` table. Many-to-many associations are explicit join
//! mappings kept in both directions (`document_tags` and `tag_documents`,
//! for example) and always written together in one transaction. Names and
//! file paths have their own index tables that enforce uniqueness.
//!
//! Work happens inside explicit sessions. [`WriteSession`] wraps a redb write
//! transaction: it rolls back when dropped without [`WriteSession::commit`].
//! redb admits one writer at a time, so a session sees no interleaved writes.
//! [`ReadSession`] reads from a consistent snapshot.

use std::{collections::BTreeSet, path::Path};

use chrono::Utc;
use redb::{
    Database,
    MultimapTableDefinition,
    MultimapValue,
    ReadOnlyMultimapTable,
    ReadOnlyTable,
    ReadTransaction,
    ReadableDatabase,
    ReadableMultimapTable,
    ReadableTable,
    TableDefinition,
    WriteTransaction,
};
use serde::Serialize;
use tracing::debug;

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
    model::{
        Document,
        DocumentMetadata,
        DocumentRecord,
        FileEntry,
        FileRecord,
        NewFile,
        Source,
        Tag,
        normalize_names,
    },
};

pub(crate) const DOCUMENTS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("documents");
pub(crate) const FILES: TableDefinition<u64, &[u8]> =
    TableDefinition::new("files");
pub(crate) const FILE_PATHS: TableDefinition<&str, u64> =
    TableDefinition::new("file_paths");
pub(crate) const DOCUMENT_FILES: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("document_files");

const TAGS: TableDefinition<u64, &str> = TableDefinition::new("tags");
const TAG_NAMES: TableDefinition<&str, u64> = TableDefinition::new("tag_names");
const DOCUMENT_TAGS: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("document_tags");
const TAG_DOCUMENTS: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("tag_documents");

const SOURCES: TableDefinition<u64, &str> = TableDefinition::new("sources");
const SOURCE_NAMES: TableDefinition<&str, u64> =
    TableDefinition::new("source_names");
const DOCUMENT_SOURCES: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("document_sources");
const SOURCE_DOCUMENTS: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("source_documents");

const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

const DOCUMENT_SEQUENCE: &str = "document";
const FILE_SEQUENCE: &str = "file";

/// The tables behind one named entity kind (tags or sources) and its
/// association with documents.
#[derive(Clone, Copy)]
pub(crate) struct Relation {
    pub kind: &'static str,
    pub entities: TableDefinition<'static, u64, &'static str>,
    pub names: TableDefinition<'static, &'static str, u64>,
    pub by_document: MultimapTableDefinition<'static, u64, u64>,
    pub documents: MultimapTableDefinition<'static, u64, u64>,
}

impl std::fmt::Debug for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

pub(crate) const TAG_RELATION: Relation = Relation {
    kind: "tag",
    entities: TAGS,
    names: TAG_NAMES,
    by_document: DOCUMENT_TAGS,
    documents: TAG_DOCUMENTS,
};

pub(crate) const SOURCE_RELATION: Relation = Relation {
    kind: "source",
    entities: SOURCES,
    names: SOURCE_NAMES,
    by_document: DOCUMENT_SOURCES,
    documents: SOURCE_DOCUMENTS,
};

pub(crate) fn collect_ids(values: MultimapValue<'_, u64>) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for value in values {
        ids.push(value?.value());
    }
    Ok(ids)
}

/// Newest received first, ties broken by id so the order is total.
pub(crate) fn sort_newest_first(documents: &mut [Document]) {
    documents.sort_by(|a, b| {
        b.date_received
            .cmp(&a.date_received)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Row counts reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub documents: usize,
    pub files: usize,
    pub tags: usize,
    pub sources: usize,
}

pub struct Catalog {
    db: Database,
}

impl Catalog {
    /// Open or create a catalog at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use duckstore::Catalog;
    ///
    /// let catalog = Catalog::open(&tmp.path().join("duckstore.redb")).unwrap();
    /// assert!(catalog.list_tags().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(FILES)?;
        txn.open_table(FILE_PATHS)?;
        txn.open_multimap_table(DOCUMENT_FILES)?;
        for relation in [TAG_RELATION, SOURCE_RELATION] {
            txn.open_table(relation.entities)?;
            txn.open_table(relation.names)?;
            txn.open_multimap_table(relation.by_document)?;
            txn.open_multimap_table(relation.documents)?;
        }
        txn.open_table(SEQUENCES)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Start a write session. Blocks while another writer is active.
    pub fn begin_write(&self) -> Result<WriteSession> {
        Ok(WriteSession {
            txn: self.db.begin_write()?,
        })
    }

    /// Start a read session over a consistent snapshot.
    pub fn begin_read(&self) -> Result<ReadSession> {
        Ok(ReadSession {
            txn: self.db.begin_read()?,
        })
    }

    // -- Documents --

    pub fn create_document<T: AsRef<str>, S: AsRef<str>>(
        &self,
        metadata: &DocumentMetadata,
        tag_names: &[T],
        source_names: &[S],
    ) -> Result<Document> {
        let session = self.begin_write()?;
        let id =
            session.create_document(metadata, tag_names, source_names, &[])?;
        session.commit()?;
        self.get_document(id)
    }

    pub fn update_document<T: AsRef<str>, S: AsRef<str>>(
        &self,
        id: DocumentId,
        metadata: &DocumentMetadata,
        tag_names: &[T],
        source_names: &[S],
    ) -> Result<Document> {
        let session = self.begin_write()?;
        session.update_document(
            id,
            metadata,
            tag_names,
            source_names,
            &[],
            &[],
        )?;
        session.commit()?;
        self.get_document(id)
    }

    /// Delete a document and its File rows, returning the removed files so
    /// their content can be deleted once this call has committed.
    pub fn delete_document(&self, id: DocumentId) -> Result<Vec<FileEntry>> {
        let session = self.begin_write()?;
        let files = session.delete_document(id)?;
        session.commit()?;
        Ok(files)
    }

    pub fn relocate_file(&self, file_id: u64, new_path: &str) -> Result<()> {
        let session = self.begin_write()?;
        session.relocate_file(file_id, new_path)?;
        session.commit()
    }

    pub fn get_document(&self, id: DocumentId) -> Result<Document> {
        self.begin_read()?.get_document(id)
    }

    pub fn get_file(&self, file_id: u64) -> Result<FileEntry> {
        self.begin_read()?.get_file(file_id)
    }

    pub fn list_documents(&self) -> Result<Vec<Document>> {
        self.begin_read()?.list_documents()
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        self.begin_read()?.list_tags()
    }

    pub fn list_sources(&self) -> Result<Vec<Source>> {
        self.begin_read()?.list_sources()
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        self.begin_read()?.stats()
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let session = self.begin_write()?;
        session.set_setting(key, value)?;
        session.commit()
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let session = self.begin_write()?;
        let removed = session.remove_setting(key)?;
        session.commit()?;
        Ok(removed)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.begin_read()?.get_setting(key)
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

/// A write transaction over the catalog.
pub struct WriteSession {
    txn: WriteTransaction,
}

impl WriteSession {
    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.txn.abort()?;
        Ok(())
    }

    pub(crate) fn txn(&self) -> &WriteTransaction {
        &self.txn
    }

    /// Insert a document with its tags, sources and File rows.
    ///
    /// `date_added` is stamped here and never changed afterwards.
    pub fn create_document<T: AsRef<str>, S: AsRef<str>>(
        &self,
        metadata: &DocumentMetadata,
        tag_names: &[T],
        source_names: &[S],
        files: &[NewFile],
    ) -> Result<DocumentId> {
        let date_received = metadata.validate()?;
        let id = self.next_id(DOCUMENT_SEQUENCE)?;

        let record = DocumentRecord {
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            location: metadata.location.clone(),
            date_added: Utc::now(),
            date_received,
        };
        {
            let mut documents = self.txn.open_table(DOCUMENTS)?;
            if documents.insert(id, record.encode()?.as_slice())?.is_some() {
                return Err(Error::Conflict(format!(
                    "document id {id} is already in use"
                )));
            }
        }

        self.replace_labels(&TAG_RELATION, id, &normalize_names(tag_names))?;
        self.replace_labels(
            &SOURCE_RELATION,
            id,
            &normalize_names(source_names),
        )?;
        self.insert_files(id, files)?;

        debug!(document = id, files = files.len(), "created document");
        Ok(DocumentId::new(id))
    }

    /// Replace a document's scalar fields and its full tag and source sets,
    /// attach new files and detach the listed file ids.
    ///
    /// Returns the detached files; their content is still on disk.
    pub fn update_document<T: AsRef<str>, S: AsRef<str>>(
        &self,
        id: DocumentId,
        metadata: &DocumentMetadata,
        tag_names: &[T],
        source_names: &[S],
        attach: &[NewFile],
        detach: &[u64],
    ) -> Result<Vec<FileEntry>> {
        let date_received = metadata.validate()?;
        let doc = id.get();

        {
            let mut documents = self.txn.open_table(DOCUMENTS)?;
            let existing = documents
                .get(doc)?
                .map(|guard| DocumentRecord::decode(guard.value()))
                .transpose()?
                .ok_or_else(|| Error::not_found("document", id))?;

            let record = DocumentRecord {
                title: metadata.title.clone(),
                description: metadata.description.clone(),
                location: metadata.location.clone(),
                date_added: existing.date_added,
                date_received,
            };
            documents.insert(doc, record.encode()?.as_slice())?;
        }

        let detached = self.remove_files(doc, detach)?;
        self.replace_labels(&TAG_RELATION, doc, &normalize_names(tag_names))?;
        self.replace_labels(
            &SOURCE_RELATION,
            doc,
            &normalize_names(source_names),
        )?;
        self.insert_files(doc, attach)?;

        debug!(
            document = doc,
            attached = attach.len(),
            detached = detached.len(),
            "updated document"
        );
        Ok(detached)
    }

    /// Remove a document, its File rows and its associations. Tag and
    /// source rows stay behind for the garbage collector.
    pub fn delete_document(&self, id: DocumentId) -> Result<Vec<FileEntry>> {
        let doc = id.get();
        {
            let mut documents = self.txn.open_table(DOCUMENTS)?;
            if documents.remove(doc)?.is_none() {
                return Err(Error::not_found("document", id));
            }
        }

        let file_ids = {
            let document_files =
                self.txn.open_multimap_table(DOCUMENT_FILES)?;
            collect_ids(document_files.get(doc)?)?
        };
        let removed = self.remove_files(doc, &file_ids)?;

        self.replace_labels(&TAG_RELATION, doc, &[])?;
        self.replace_labels(&SOURCE_RELATION, doc, &[])?;

        debug!(document = doc, files = removed.len(), "deleted document");
        Ok(removed)
    }

    /// Remove File rows from a document without touching anything else.
    pub fn detach_files(
        &self,
        id: DocumentId,
        file_ids: &[u64],
    ) -> Result<Vec<FileEntry>> {
        self.remove_files(id.get(), file_ids)
    }

    /// Id of the File row recorded at `path`, if any.
    pub fn file_id_at(&self, path: &str) -> Result<Option<u64>> {
        let paths = self.txn.open_table(FILE_PATHS)?;
        Ok(paths.get(path)?.map(|g| g.value()))
    }

    /// Point a File row at a new storage path.
    pub fn relocate_file(&self, file_id: u64, new_path: &str) -> Result<()> {
        let mut files = self.txn.open_table(FILES)?;
        let mut paths = self.txn.open_table(FILE_PATHS)?;

        let mut record = files
            .get(file_id)?
            .map(|guard| FileRecord::decode(guard.value()))
            .transpose()?
            .ok_or_else(|| Error::not_found("file", file_id))?;
        if record.path == new_path {
            return Ok(());
        }
        if paths.get(new_path)?.is_some() {
            return Err(Error::Conflict(format!(
                "storage path {new_path} is already in use"
            )));
        }

        paths.remove(record.path.as_str())?;
        paths.insert(new_path, file_id)?;
        record.path = new_path.to_string();
        files.insert(file_id, record.encode()?.as_slice())?;
        Ok(())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut table = self.txn.open_table(SETTINGS)?;
        table.insert(key, value)?;
        Ok(())
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let mut table = self.txn.open_table(SETTINGS)?;
        let removed = table.remove(key)?.is_some();
        Ok(removed)
    }

    fn next_id(&self, sequence: &str) -> Result<u64> {
        let mut table = self.txn.open_table(SEQUENCES)?;
        let next = table.get(sequence)?.map(|g| g.value()).unwrap_or(0) + 1;
        table.insert(sequence, next)?;
        Ok(next)
    }

    /// Look up a tag or source by name, creating it if absent.
    pub(crate) fn ensure_label(
        &self,
        relation: &Relation,
        name: &str,
    ) -> Result<u64> {
        let mut entities = self.txn.open_table(relation.entities)?;
        let mut names = self.txn.open_table(relation.names)?;

        if let Some(id) = names.get(name)?.map(|g| g.value()) {
            return Ok(id);
        }

        let id = self.next_id(relation.kind)?;
        if entities.insert(id, name)?.is_some() {
            return Err(Error::Conflict(format!(
                "{} id {id} is already in use",
                relation.kind
            )));
        }
        names.insert(name, id)?;
        debug!(kind = relation.kind, id, name, "created label");
        Ok(id)
    }

    /// Add one association in both directions. Returns false if it existed.
    pub(crate) fn link(
        &self,
        relation: &Relation,
        document: u64,
        label: u64,
    ) -> Result<bool> {
        let mut by_document = self.txn.open_multimap_table(relation.by_document)?;
        let mut documents = self.txn.open_multimap_table(relation.documents)?;
        let existed = by_document.insert(document, label)?;
        documents.insert(label, document)?;
        Ok(!existed)
    }

    /// Remove one association in both directions.
    pub(crate) fn unlink(
        &self,
        relation: &Relation,
        document: u64,
        label: u64,
    ) -> Result<()> {
        let mut by_document = self.txn.open_multimap_table(relation.by_document)?;
        let mut documents = self.txn.open_multimap_table(relation.documents)?;
        by_document.remove(document, label)?;
        documents.remove(label, document)?;
        Ok(())
    }

    pub(crate) fn labels_of(
        &self,
        relation: &Relation,
        document: u64,
    ) -> Result<Vec<u64>> {
        let by_document = self.txn.open_multimap_table(relation.by_document)?;
        collect_ids(by_document.get(document)?)
    }

    pub(crate) fn documents_of(
        &self,
        relation: &Relation,
        label: u64,
    ) -> Result<Vec<u64>> {
        let documents = self.txn.open_multimap_table(relation.documents)?;
        collect_ids(documents.get(label)?)
    }

    pub(crate) fn label_id(
        &self,
        relation: &Relation,
        name: &str,
    ) -> Result<Option<u64>> {
        let names = self.txn.open_table(relation.names)?;
        Ok(names.get(name)?.map(|g| g.value()))
    }

    /// Replace the full association set of a document for one relation.
    fn replace_labels(
        &self,
        relation: &Relation,
        document: u64,
        names: &[String],
    ) -> Result<()> {
        for label in self.labels_of(relation, document)? {
            self.unlink(relation, document, label)?;
        }
        for name in names {
            let label = self.ensure_label(relation, name)?;
            self.link(relation, document, label)?;
        }
        Ok(())
    }

    fn insert_files(&self, document: u64, new_files: &[NewFile]) -> Result<()> {
        if new_files.is_empty() {
            return Ok(());
        }

        let mut files = self.txn.open_table(FILES)?;
        let mut paths = self.txn.open_table(FILE_PATHS)?;
        let mut document_files = self.txn.open_multimap_table(DOCUMENT_FILES)?;

        for new_file in new_files {
            if paths.get(new_file.path.as_str())?.is_some() {
                return Err(Error::Conflict(format!(
                    "storage path {} is already in use",
                    new_file.path
                )));
            }

            let id = self.next_id(FILE_SEQUENCE)?;
            let record = FileRecord {
                document_id: document,
                path: new_file.path.clone(),
                original_name: new_file.original_name.clone(),
            };
            files.insert(id, record.encode()?.as_slice())?;
            paths.insert(new_file.path.as_str(), id)?;
            document_files.insert(document, id)?;
        }
        Ok(())
    }

    fn remove_files(
        &self,
        document: u64,
        file_ids: &[u64],
    ) -> Result<Vec<FileEntry>> {
        if file_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut files = self.txn.open_table(FILES)?;
        let mut paths = self.txn.open_table(FILE_PATHS)?;
        let mut document_files = self.txn.open_multimap_table(DOCUMENT_FILES)?;

        let mut removed = Vec::with_capacity(file_ids.len());
        for &file_id in file_ids {
            let record = files
                .get(file_id)?
                .map(|guard| FileRecord::decode(guard.value()))
                .transpose()?
                .filter(|record| record.document_id == document)
                .ok_or_else(|| {
                    Error::not_found(
                        "file",
                        format!("{file_id} on document #{document}"),
                    )
                })?;

            files.remove(file_id)?;
            paths.remove(record.path.as_str())?;
            document_files.remove(document, file_id)?;
            removed.push(record.into_entry(file_id));
        }
        Ok(removed)
    }
}

/// A read transaction over the catalog.
pub struct ReadSession {
    txn: ReadTransaction,
}

impl ReadSession {
    pub(crate) fn view(&self) -> Result<DocumentView> {
        DocumentView::open(&self.txn)
    }

    pub fn get_document(&self, id: DocumentId) -> Result<Document> {
        self.view()?
            .load(id.get())?
            .ok_or_else(|| Error::not_found("document", id))
    }

    pub fn get_file(&self, file_id: u64) -> Result<FileEntry> {
        let files = self.txn.open_table(FILES)?;
        files
            .get(file_id)?
            .map(|guard| FileRecord::decode(guard.value()))
            .transpose()?
            .map(|record| record.into_entry(file_id))
            .ok_or_else(|| Error::not_found("file", file_id))
    }

    /// Every document, newest received first.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let view = self.view()?;
        let mut documents = Vec::new();
        for id in view.document_ids()? {
            if let Some(document) = view.load(id)? {
                documents.push(document);
            }
        }
        sort_newest_first(&mut documents);
        Ok(documents)
    }

    pub fn list_files(&self) -> Result<Vec<FileEntry>> {
        let files = self.txn.open_table(FILES)?;
        let mut result = Vec::new();
        for entry in files.iter()? {
            let (k, v) = entry?;
            result.push(FileRecord::decode(v.value())?.into_entry(k.value()));
        }
        Ok(result)
    }

    /// All stored relative paths.
    pub fn file_paths(&self) -> Result<BTreeSet<String>> {
        let paths = self.txn.open_table(FILE_PATHS)?;
        let mut result = BTreeSet::new();
        for entry in paths.iter()? {
            let (k, _v) = entry?;
            result.insert(k.value().to_string());
        }
        Ok(result)
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let labels = LabelView::open(&self.txn, &TAG_RELATION)?;
        Ok(labels
            .list()?
            .into_iter()
            .map(|(id, name)| Tag { id, name })
            .collect())
    }

    pub fn list_sources(&self) -> Result<Vec<Source>> {
        let labels = LabelView::open(&self.txn, &SOURCE_RELATION)?;
        Ok(labels
            .list()?
            .into_iter()
            .map(|(id, name)| Source { id, name })
            .collect())
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let documents = self.txn.open_table(DOCUMENTS)?;
        let files = self.txn.open_table(FILES)?;
        let tags = self.txn.open_table(TAGS)?;
        let sources = self.txn.open_table(SOURCES)?;
        Ok(CatalogStats {
            documents: documents.iter()?.count(),
            files: files.iter()?.count(),
            tags: tags.iter()?.count(),
            sources: sources.iter()?.count(),
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let table = self.txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let table = self.txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }
}

/// Read-only tables of one relation, opened once per read session.
pub(crate) struct LabelView {
    entities: ReadOnlyTable<u64, &'static str>,
    names: ReadOnlyTable<&'static str, u64>,
    by_document: ReadOnlyMultimapTable<u64, u64>,
    documents: ReadOnlyMultimapTable<u64, u64>,
}

impl LabelView {
    fn open(txn: &ReadTransaction, relation: &Relation) -> Result<Self> {
        Ok(Self {
            entities: txn.open_table(relation.entities)?,
            names: txn.open_table(relation.names)?,
            by_document: txn.open_multimap_table(relation.by_document)?,
            documents: txn.open_multimap_table(relation.documents)?,
        })
    }

    /// `(id, name)` pairs sorted by name.
    fn list(&self) -> Result<Vec<(u64, String)>> {
        let mut result = Vec::new();
        for entry in self.names.iter()? {
            let (k, v) = entry?;
            result.push((v.value(), k.value().to_string()));
        }
        Ok(result)
    }

    fn for_document(&self, document: u64) -> Result<Vec<(u64, String)>> {
        let mut result = Vec::new();
        for label in collect_ids(self.by_document.get(document)?)? {
            if let Some(name) = self.entities.get(label)? {
                result.push((label, name.value().to_string()));
            }
        }
        result.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(result)
    }

    /// Documents associated with the label of exactly this name. Unknown
    /// names yield an empty set.
    pub fn documents_named(&self, name: &str) -> Result<BTreeSet<u64>> {
        let Some(label) = self.names.get(name)?.map(|g| g.value()) else {
            return Ok(BTreeSet::new());
        };
        Ok(collect_ids(self.documents.get(label)?)?.into_iter().collect())
    }
}

/// Everything needed to assemble [`Document`] values inside one read
/// session.
pub(crate) struct DocumentView {
    documents: ReadOnlyTable<u64, &'static [u8]>,
    files: ReadOnlyTable<u64, &'static [u8]>,
    document_files: ReadOnlyMultimapTable<u64, u64>,
    pub tags: LabelView,
    pub sources: LabelView,
}

impl DocumentView {
    fn open(txn: &ReadTransaction) -> Result<Self> {
        Ok(Self {
            documents: txn.open_table(DOCUMENTS)?,
            files: txn.open_table(FILES)?,
            document_files: txn.open_multimap_table(DOCUMENT_FILES)?,
            tags: LabelView::open(txn, &TAG_RELATION)?,
            sources: LabelView::open(txn, &SOURCE_RELATION)?,
        })
    }

    pub fn document_ids(&self) -> Result<BTreeSet<u64>> {
        let mut result = BTreeSet::new();
        for entry in self.documents.iter()? {
            let (k, _v) = entry?;
            result.insert(k.value());
        }
        Ok(result)
    }

    pub fn load(&self, id: u64) -> Result<Option<Document>> {
        let Some(record) = self
            .documents
            .get(id)?
            .map(|guard| DocumentRecord::decode(guard.value()))
            .transpose()?
        else {
            return Ok(None);
        };

        let mut file_ids = collect_ids(self.document_files.get(id)?)?;
        file_ids.sort_unstable();
        let mut files = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            if let Some(guard) = self.files.get(file_id)? {
                files.push(FileRecord::decode(guard.value())?.into_entry(file_id));
            }
        }

        Ok(Some(Document {
            id: DocumentId::new(id),
            title: record.title,
            description: record.description,
            location: record.location,
            date_added: record.date_added,
            date_received: record.date_received,
            tags: self
                .tags
                .for_document(id)?
                .into_iter()
                .map(|(id, name)| Tag { id, name })
                .collect(),
            sources: self
                .sources
                .for_document(id)?
                .into_iter()
                .map(|(id, name)| Source { id, name })
                .collect(),
            files,
        }))
    }
}

//! Housekeeping passes over the catalog and the content root.

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    catalog::{Catalog, Relation, SOURCE_RELATION, TAG_RELATION, WriteSession},
    error::{Error, Result},
    file_store::FileStore,
    model::{FileEntry, normalize_names},
    walker::{DiscoveredFile, discover_files},
};

/// Names of the labels removed by [`garbage_collect_unused`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub tags: Vec<String>,
    pub sources: Vec<String>,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.sources.is_empty()
    }
}

/// Delete every tag and source no document refers to.
///
/// The scan and the deletes share one write transaction. redb admits a
/// single writer, so no document write can add a reference in between.
pub fn garbage_collect_unused(catalog: &Catalog) -> Result<GcReport> {
    let session = catalog.begin_write()?;
    let tags = remove_unused(&session, &TAG_RELATION)?;
    let sources = remove_unused(&session, &SOURCE_RELATION)?;
    session.commit()?;

    let report = GcReport { tags, sources };
    if !report.is_empty() {
        info!(
            tags = report.tags.len(),
            sources = report.sources.len(),
            "removed unused labels"
        );
    }
    Ok(report)
}

fn remove_unused(session: &WriteSession, relation: &Relation) -> Result<Vec<String>> {
    use redb::{ReadableMultimapTable, ReadableTable};

    let txn = session.txn();
    let unused: Vec<(u64, String)> = {
        let entities = txn.open_table(relation.entities)?;
        let documents = txn.open_multimap_table(relation.documents)?;
        let mut unused = Vec::new();
        for entry in entities.iter()? {
            let (id, name) = entry?;
            if documents.get(id.value())?.next().is_none() {
                unused.push((id.value(), name.value().to_string()));
            }
        }
        unused
    };

    let mut entities = txn.open_table(relation.entities)?;
    let mut names = txn.open_table(relation.names)?;
    for (id, name) in &unused {
        entities.remove(*id)?;
        names.remove(name.as_str())?;
    }

    let mut removed: Vec<String> = unused.into_iter().map(|(_, name)| name).collect();
    removed.sort();
    Ok(removed)
}

/// Outcome of [`merge_tags`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub canonical: String,
    /// Aliases whose documents moved to the canonical tag.
    pub merged: Vec<String>,
    /// Aliases with no tag of that name.
    pub unknown: Vec<String>,
    /// Documents that gained the canonical tag.
    pub retagged: usize,
}

/// Move every document tagged with one of `aliases` to `canonical`.
///
/// The canonical tag is created if needed. Alias tags lose all their
/// documents but keep their rows until the next garbage collection.
pub fn merge_tags<S: AsRef<str>>(
    catalog: &Catalog,
    canonical: &str,
    aliases: &[S],
) -> Result<MergeReport> {
    let canonical = canonical.trim();
    if canonical.is_empty() {
        return Err(Error::Validation("canonical tag name is required".into()));
    }

    let session = catalog.begin_write()?;
    let canonical_id = session.ensure_label(&TAG_RELATION, canonical)?;

    let mut report = MergeReport {
        canonical: canonical.to_string(),
        ..Default::default()
    };
    for alias in normalize_names(aliases) {
        if alias == canonical {
            continue;
        }
        let Some(alias_id) = session.label_id(&TAG_RELATION, &alias)? else {
            report.unknown.push(alias);
            continue;
        };

        for document in session.documents_of(&TAG_RELATION, alias_id)? {
            session.unlink(&TAG_RELATION, document, alias_id)?;
            if session.link(&TAG_RELATION, document, canonical_id)? {
                report.retagged += 1;
            }
        }
        report.merged.push(alias);
    }
    session.commit()?;

    info!(
        canonical,
        merged = report.merged.len(),
        retagged = report.retagged,
        "merged tags"
    );
    Ok(report)
}

/// Content files with no File row, for example left behind by a crash
/// between a commit and the matching content removal.
pub fn find_orphaned_files(
    catalog: &Catalog,
    files: &FileStore,
) -> Result<Vec<DiscoveredFile>> {
    // List the disk first so content written and recorded after the
    // listing cannot show up as orphaned.
    let on_disk = discover_files(files.root())?;
    let known = catalog.begin_read()?.file_paths()?;
    Ok(on_disk
        .into_iter()
        .filter(|f| !known.contains(&f.relative_path))
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanCleanup {
    pub removed: Vec<String>,
    /// `(path, error)` for every orphan that could not be removed.
    pub failed: Vec<(String, String)>,
}

/// Delete orphaned content files. Failures are logged and reported, not
/// returned.
pub fn remove_orphaned_files(
    catalog: &Catalog,
    files: &FileStore,
) -> Result<OrphanCleanup> {
    let mut cleanup = OrphanCleanup::default();
    for orphan in find_orphaned_files(catalog, files)? {
        match files.delete_file(&orphan.relative_path) {
            Ok(_) => cleanup.removed.push(orphan.relative_path),
            Err(e) => {
                warn!(path = %orphan.relative_path, error = %e, "could not remove orphan");
                cleanup.failed.push((orphan.relative_path, e.to_string()));
            }
        }
    }
    if !cleanup.removed.is_empty() {
        info!(removed = cleanup.removed.len(), "removed orphaned files");
    }
    Ok(cleanup)
}

/// File rows whose content is absent from the content root.
pub fn find_missing_files(catalog: &Catalog, files: &FileStore) -> Result<Vec<FileEntry>> {
    let mut missing = Vec::new();
    for entry in catalog.begin_read()?.list_files()? {
        if !files.resolve(&entry.path).try_exists()? {
            missing.push(entry);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentMetadata, NewFile, parse_date};

    const NONE: &[&str] = &[];

    fn test_catalog() -> (tempfile::TempDir, Catalog, FileStore) {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&tmp.path().join("duckstore.redb")).unwrap();
        let files = FileStore::new(tmp.path().join("store"));
        std::fs::create_dir_all(files.root()).unwrap();
        (tmp, catalog, files)
    }

    fn meta(title: &str) -> DocumentMetadata {
        DocumentMetadata::new(title, parse_date("2024-01-01").unwrap())
    }

    fn tag_names(catalog: &Catalog) -> Vec<String> {
        catalog.list_tags().unwrap().into_iter().map(|t| t.name).collect()
    }

    #[test]
    fn gc_removes_only_unreferenced_labels() {
        let (_tmp, catalog, _files) = test_catalog();

        let keep = catalog
            .create_document(&meta("Keep"), &["kept", "shared"], &["Bank"])
            .unwrap();
        let gone = catalog
            .create_document(&meta("Drop"), &["gone", "shared"], &["Old Bank"])
            .unwrap();
        catalog.delete_document(gone.id).unwrap();

        let report = garbage_collect_unused(&catalog).unwrap();
        assert_eq!(report.tags, vec!["gone"]);
        assert_eq!(report.sources, vec!["Old Bank"]);

        assert_eq!(tag_names(&catalog), vec!["kept", "shared"]);
        assert_eq!(catalog.get_document(keep.id).unwrap().tag_names(), vec![
            "kept", "shared"
        ]);

        // Idempotent.
        assert!(garbage_collect_unused(&catalog).unwrap().is_empty());
    }

    #[test]
    fn gc_frees_name_for_reuse() {
        let (_tmp, catalog, _files) = test_catalog();

        let doc = catalog.create_document(&meta("A"), &["temp"], NONE).unwrap();
        let old_id = doc.tags[0].id;
        catalog.delete_document(doc.id).unwrap();
        garbage_collect_unused(&catalog).unwrap();

        let again = catalog.create_document(&meta("B"), &["temp"], NONE).unwrap();
        assert_ne!(again.tags[0].id, old_id);
        assert_eq!(tag_names(&catalog), vec!["temp"]);
    }

    #[test]
    fn merge_moves_documents_without_duplicates() {
        let (_tmp, catalog, _files) = test_catalog();

        let a = catalog.create_document(&meta("A"), &["invoice"], NONE).unwrap();
        let b = catalog
            .create_document(&meta("B"), &["invoices", "Invoice"], NONE)
            .unwrap();
        let c = catalog.create_document(&meta("C"), &["invoices"], NONE).unwrap();

        let report = merge_tags(
            &catalog,
            "invoice",
            &["invoices", "Invoice", "invoice", "bills"],
        )
        .unwrap();

        assert_eq!(report.merged, vec!["invoices", "Invoice"]);
        assert_eq!(report.unknown, vec!["bills"]);
        assert_eq!(report.retagged, 2);

        for id in [a.id, b.id, c.id] {
            assert_eq!(catalog.get_document(id).unwrap().tag_names(), vec![
                "invoice"
            ]);
        }

        let gc = garbage_collect_unused(&catalog).unwrap();
        assert_eq!(gc.tags, vec!["Invoice", "invoices"]);
    }

    #[test]
    fn merge_creates_canonical_tag() {
        let (_tmp, catalog, _files) = test_catalog();
        let doc = catalog.create_document(&meta("A"), &["tax"], NONE).unwrap();

        merge_tags(&catalog, " taxes ", &["tax"]).unwrap();
        assert_eq!(catalog.get_document(doc.id).unwrap().tag_names(), vec![
            "taxes"
        ]);
    }

    #[test]
    fn merge_requires_canonical_name() {
        let (_tmp, catalog, _files) = test_catalog();
        assert!(matches!(
            merge_tags(&catalog, "  ", &["a"]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn orphans_are_found_and_removed() {
        let (_tmp, catalog, files) = test_catalog();

        let session = catalog.begin_write().unwrap();
        session
            .create_document(
                &meta("A"),
                NONE,
                NONE,
                &[NewFile {
                    path: "known.pdf".into(),
                    original_name: "known.pdf".into(),
                }],
            )
            .unwrap();
        session.commit().unwrap();

        std::fs::write(files.resolve("known.pdf"), b"ok").unwrap();
        std::fs::write(files.resolve("stray.pdf"), b"orphan").unwrap();
        std::fs::write(files.resolve(".upload-xyz"), b"staging").unwrap();

        let orphans = find_orphaned_files(&catalog, &files).unwrap();
        let names: Vec<_> = orphans.iter().map(|o| o.relative_path.as_str()).collect();
        assert_eq!(names, vec!["stray.pdf"]);

        let cleanup = remove_orphaned_files(&catalog, &files).unwrap();
        assert_eq!(cleanup.removed, vec!["stray.pdf"]);
        assert!(cleanup.failed.is_empty());
        assert!(!files.resolve("stray.pdf").exists());
        assert!(files.resolve("known.pdf").exists());
    }

    #[test]
    fn missing_files_are_reported() {
        let (_tmp, catalog, files) = test_catalog();

        let session = catalog.begin_write().unwrap();
        session
            .create_document(
                &meta("A"),
                NONE,
                NONE,
                &[
                    NewFile {
                        path: "here.pdf".into(),
                        original_name: "here.pdf".into(),
                    },
                    NewFile {
                        path: "gone.pdf".into(),
                        original_name: "gone.pdf".into(),
                    },
                ],
            )
            .unwrap();
        session.commit().unwrap();
        std::fs::write(files.resolve("here.pdf"), b"ok").unwrap();

        let missing = find_missing_files(&catalog, &files).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].path, "gone.pdf");
    }
}

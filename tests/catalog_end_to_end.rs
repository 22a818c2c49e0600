use std::{
    path::Path,
    sync::Arc,
    thread,
};

use duckstore::{
    Error,
    Library,
    StoreDir,
    compress::{CompressError, Compressor},
    library::{DocumentDraft, RemovalOutcome, Upload, UploadStatus},
    model::{DocumentMetadata, parse_date},
    search::SearchFilter,
};

fn open_library(root: &Path) -> Library {
    let dir = StoreDir::resolve(Some(root)).unwrap();
    Library::create(dir).unwrap()
}

fn draft(title: &str, received: &str) -> DocumentDraft {
    DocumentDraft::new(DocumentMetadata::new(title, parse_date(received).unwrap()))
}

fn titles(docs: &[duckstore::model::Document]) -> Vec<String> {
    docs.iter().map(|d| d.title.clone()).collect()
}

struct Broken;

impl Compressor for Broken {
    fn applies_to(&self, _name: &Path) -> bool {
        true
    }

    fn compress(&self, _input: &Path, _output: &Path) -> Result<(), CompressError> {
        Err(CompressError::ToolNotFound("broken"))
    }
}

#[test]
fn lease_scenario() {
    let tmp = tempfile::tempdir().unwrap();
    let library = open_library(tmp.path());

    let report = library
        .create_document(
            &draft("Lease", "2024-01-01")
                .with_tags(["legal", "housing"])
                .with_sources(["Landlord Co"]),
            vec![Upload::from_bytes("lease.pdf", "%PDF-1.4")],
            Some(false),
        )
        .unwrap();
    let lease = report.document;

    let by_source = library
        .search(&SearchFilter {
            source: Some("Landlord Co".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(titles(&by_source), vec!["Lease"]);
    assert_eq!(by_source[0].id, lease.id);

    let by_tags = library
        .search(&SearchFilter {
            tags: vec!["legal".into(), "missing".into()],
            ..Default::default()
        })
        .unwrap();
    assert!(by_tags.is_empty());

    let by_both_tags = library
        .search(&SearchFilter {
            tags: vec!["legal".into(), "housing".into()],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(titles(&by_both_tags), vec!["Lease"]);
}

#[test]
fn delete_then_gc() {
    let tmp = tempfile::tempdir().unwrap();
    let library = open_library(tmp.path());

    let kept = library
        .create_document(
            &draft("Water bill", "2024-02-01").with_tags(["bill"]),
            vec![],
            None,
        )
        .unwrap()
        .document;
    let doomed = library
        .create_document(
            &draft("Lease", "2024-01-01")
                .with_tags(["legal", "bill"])
                .with_sources(["Landlord Co"]),
            vec![Upload::from_bytes("lease.pdf", "%PDF")],
            None,
        )
        .unwrap()
        .document;
    let stored = library.files().resolve(&doomed.files[0].path);
    assert!(stored.exists());

    let deleted = library.delete_document(doomed.id).unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].outcome, RemovalOutcome::Removed);
    assert_eq!(deleted[0].original_name, "lease.pdf");
    assert_eq!(deleted[0].path, stored);
    assert!(!stored.exists());

    assert!(matches!(
        library.get_document(doomed.id),
        Err(Error::NotFound { .. })
    ));
    // Labels outlive the document until collected.
    assert_eq!(library.list_tags().unwrap().len(), 2);
    assert_eq!(library.list_sources().unwrap().len(), 1);

    let gc = library.garbage_collect().unwrap();
    assert_eq!(gc.tags, vec!["legal"]);
    assert_eq!(gc.sources, vec!["Landlord Co"]);

    let tags: Vec<_> = library
        .list_tags()
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(tags, vec!["bill"]);
    assert_eq!(library.get_document(kept.id).unwrap().tag_names(), vec!["bill"]);
}

#[test]
fn failed_compression_keeps_original_bytes() {
    let tmp = tempfile::tempdir().unwrap();
    let library = open_library(tmp.path()).with_compressor(Broken);

    let report = library
        .create_document(
            &draft("Scan", "2024-03-03"),
            vec![Upload::from_bytes("scan.pdf", "%PDF-original")],
            Some(true),
        )
        .unwrap();

    match &report.uploads[0].status {
        UploadStatus::Stored {
            compressed,
            warning,
            path,
            ..
        } => {
            assert!(!compressed);
            assert!(warning.as_deref().unwrap().contains("broken"));
            assert_eq!(
                std::fs::read(library.files().resolve(path)).unwrap(),
                b"%PDF-original"
            );
        }
        other => panic!("unexpected upload outcome: {other:?}"),
    }
}

#[test]
fn merge_tags_then_search() {
    let tmp = tempfile::tempdir().unwrap();
    let library = open_library(tmp.path());

    library
        .create_document(&draft("Jan", "2024-01-31").with_tags(["invoice"]), vec![], None)
        .unwrap();
    library
        .create_document(&draft("Feb", "2024-02-28").with_tags(["invoices"]), vec![], None)
        .unwrap();

    let report = library.merge_tags("invoice", &["invoices"]).unwrap();
    assert_eq!(report.retagged, 1);

    let found = library
        .search(&SearchFilter {
            tags: vec!["invoice".into()],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(titles(&found), vec!["Feb", "Jan"]);

    assert_eq!(library.garbage_collect().unwrap().tags, vec!["invoices"]);
}

#[test]
fn orphans_and_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let library = open_library(tmp.path());

    let doc = library
        .create_document(
            &draft("Receipt", "2024-04-04"),
            vec![Upload::from_bytes("receipt.jpg", "jpeg")],
            None,
        )
        .unwrap()
        .document;
    std::fs::write(library.files().resolve("leftover.pdf"), b"crash").unwrap();
    std::fs::remove_file(library.files().resolve(&doc.files[0].path)).unwrap();

    let orphans = library.orphaned_files().unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].relative_path, "leftover.pdf");

    let missing = library.missing_files().unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].id, doc.files[0].id);

    library.remove_orphaned_files().unwrap();
    assert!(library.orphaned_files().unwrap().is_empty());
}

#[test]
fn concurrent_uploads_get_distinct_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let library = Arc::new(open_library(tmp.path()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let library = Arc::clone(&library);
            thread::spawn(move || {
                library
                    .create_document(
                        &draft(&format!("Copy {i}"), "2024-06-01"),
                        vec![Upload::from_bytes("scan.pdf", format!("copy {i}"))],
                        Some(false),
                    )
                    .unwrap()
                    .document
            })
        })
        .collect();

    let mut paths = Vec::new();
    for handle in handles {
        let doc = handle.join().unwrap();
        let path = doc.files[0].path.clone();
        let index = doc.title.trim_start_matches("Copy ").to_string();
        assert_eq!(
            std::fs::read_to_string(library.files().resolve(&path)).unwrap(),
            format!("copy {index}")
        );
        paths.push(path);
    }

    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4);
    assert!(library.orphaned_files().unwrap().is_empty());
}

//! duckstore - a personal catalog for scanned paperwork.
//!
//! Documents carry a title, dates, free-form tags and sources (who sent
//! them), and any number of attached files. The catalog lives in a single
//! [redb](https://github.com/cberner/redb) file next to a content root of
//! stored files; all paths are relative, so a store folder can be moved or
//! archived as a unit.
//!
//! # Quick start
//!
//! ```no_run
//! use duckstore::{Library, StoreDir};
//! use duckstore::library::{DocumentDraft, Upload};
//! use duckstore::model::{DocumentMetadata, parse_date};
//! use duckstore::search::SearchFilter;
//!
//! let dir = StoreDir::resolve(None).unwrap();
//! let library = Library::create(dir).unwrap();
//!
//! let draft = DocumentDraft::new(DocumentMetadata::new(
//!     "Lease",
//!     parse_date("2024-01-01").unwrap(),
//! ))
//! .with_tags(["legal", "housing"])
//! .with_sources(["Landlord Co"]);
//!
//! let upload = Upload::open("lease.pdf".as_ref()).unwrap();
//! let report = library.create_document(&draft, vec![upload], None).unwrap();
//! println!("added {}", report.document.id);
//!
//! let filter = SearchFilter {
//!     tags: vec!["legal".to_string()],
//!     ..Default::default()
//! };
//! for doc in library.search(&filter).unwrap() {
//!     println!("{} {}", doc.id, doc.title);
//! }
//! ```

pub mod archive;
pub mod catalog;
pub mod cli;
pub mod compress;
pub mod doc_id;
pub mod error;
pub mod file_store;
pub mod library;
pub mod maintenance;
pub mod model;
pub mod search;
pub mod store_dir;
pub mod walker;

pub use catalog::Catalog;
pub use doc_id::DocumentId;
pub use error::{Error, Result};
pub use file_store::FileStore;
pub use library::Library;
pub use store_dir::StoreDir;

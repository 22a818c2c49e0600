use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::doc_id::DocumentId;

#[derive(Debug, Parser)]
#[command(
    name = "duckstore",
    version,
    about = "A personal catalog for scanned letters, bills and other paperwork"
)]
pub struct Cli {
    /// Store folder holding the catalog and content (overrides DUCKSTORE_DIR)
    #[arg(long, global = true)]
    pub folder: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the catalog and content root in the store folder
    Init,
    /// Add a document with its files
    Add(AddArgs),
    /// Edit a document's fields, labels and files
    Edit(EditArgs),
    /// Delete a document and its files
    #[command(alias = "delete")]
    Rm(RmArgs),
    /// Show one document
    Show(ShowArgs),
    /// Find documents by title, source and tags
    Search(SearchArgs),
    /// List all tags
    Tags(ListArgs),
    /// List all sources
    Sources(ListArgs),
    /// Copy a stored file out under its original name
    Download(DownloadArgs),
    /// Remove tags and sources no document uses
    Gc,
    /// Fold alias tags into one canonical tag
    MergeTags(MergeTagsArgs),
    /// List content files the catalog does not know about
    Orphans(OrphansArgs),
    /// List catalog files whose content is gone
    Missing,
    /// Pack the store folder into a zip archive
    Export(ExportArgs),
    /// Restore a store folder from a zip archive
    Import(ImportArgs),
    /// Show store statistics
    Status(StatusArgs),
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Documents --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Document title
    pub title: String,

    /// Date the document was received (YYYY-MM-DD)
    #[arg(short, long)]
    pub received: String,

    #[arg(short, long)]
    pub description: Option<String>,

    /// Where the paper copy is kept
    #[arg(short, long)]
    pub location: Option<String>,

    /// Tag to attach (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Source to attach (repeatable)
    #[arg(short, long = "source")]
    pub sources: Vec<String>,

    #[command(flatten)]
    pub compression: CompressionArgs,

    /// Files to attach
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct EditArgs {
    /// Document id (#12 or 12)
    pub id: DocumentId,

    #[arg(long)]
    pub title: Option<String>,

    /// Date the document was received (YYYY-MM-DD)
    #[arg(short, long)]
    pub received: Option<String>,

    /// New description (empty string clears it)
    #[arg(short, long)]
    pub description: Option<String>,

    /// New location (empty string clears it)
    #[arg(short, long)]
    pub location: Option<String>,

    /// Replacement tag list (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Replacement source list (repeatable)
    #[arg(short, long = "source")]
    pub sources: Vec<String>,

    /// Keep existing tags and sources, adding the given ones
    #[arg(long)]
    pub keep_labels: bool,

    /// File id to remove from the document (repeatable)
    #[arg(long = "detach", value_name = "FILE_ID")]
    pub detach: Vec<u64>,

    #[command(flatten)]
    pub compression: CompressionArgs,

    /// Files to attach
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::Args)]
pub struct CompressionArgs {
    /// Compress attached PDFs with Ghostscript
    #[arg(long, conflicts_with = "no_compress_pdf")]
    pub compress_pdf: bool,

    /// Store attached PDFs as-is
    #[arg(long)]
    pub no_compress_pdf: bool,
}

impl CompressionArgs {
    /// `None` defers to the `compress_pdfs` setting.
    pub fn choice(&self) -> Option<bool> {
        match (self.compress_pdf, self.no_compress_pdf) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Parser)]
pub struct RmArgs {
    /// Document id (#12 or 12)
    pub id: DocumentId,
}

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Document id (#12 or 12)
    pub id: DocumentId,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Case-insensitive title substring
    #[arg(long)]
    pub title: Option<String>,

    /// Exact source name
    #[arg(short, long)]
    pub source: Option<String>,

    /// Required tag (repeatable; all must match)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// List every document instead of filtering
    #[arg(long, conflicts_with_all = ["title", "source", "tags"])]
    pub all: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Files --

#[derive(Debug, Parser)]
pub struct DownloadArgs {
    /// File id as shown by `show`
    pub file_id: u64,

    /// Directory to copy into
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Overwrite an existing file of the same name
    #[arg(short, long)]
    pub force: bool,
}

// -- Maintenance --

#[derive(Debug, Parser)]
pub struct MergeTagsArgs {
    /// Tag that remains
    pub canonical: String,

    /// Tags folded into the canonical one
    #[arg(required = true)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct OrphansArgs {
    /// Delete the orphaned files
    #[arg(long)]
    pub remove: bool,
}

#[derive(Debug, Parser)]
pub struct ExportArgs {
    /// Archive to create
    pub archive: PathBuf,

    /// Replace an existing archive
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Debug, Parser)]
pub struct ImportArgs {
    /// Archive made by `export`
    pub archive: PathBuf,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print one setting
    Get { key: String },
    /// Persist a setting
    Set { key: String, value: String },
    /// Remove a setting, reverting to its default
    Unset { key: String },
    /// Print all settings
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "duckstore",
            &mut std::io::stdout(),
        );
    }
}

use std::path::{Path, PathBuf};

use clap::Parser;
use duckstore::{
    Library,
    StoreDir,
    archive,
    cli::{self, Cli, Command, ConfigAction},
    error::{self, Error},
    library::{DocumentDraft, RemovalOutcome, SaveReport, Upload, UploadStatus},
    model::{Document, DocumentMetadata, parse_date},
    search::{self, SearchFilter},
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DUCKSTORE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let dir = StoreDir::resolve(cli.folder.as_deref())?;

    match cli.command {
        Command::Init => cmd_init(dir)?,
        Command::Import(args) => {
            let library = Library::import(dir, &args.archive)?;
            let stats = library.catalog().stats()?;
            println!(
                "Imported {} document(s) into {}",
                stats.documents,
                library.dir().root().display()
            );
        }
        Command::Export(args) => {
            let summary =
                archive::create_archive(dir.root(), &args.archive, args.overwrite)?;
            println!(
                "Exported {} file(s) to {}",
                summary.files,
                args.archive.display()
            );
        }
        command => {
            let library = Library::open(dir)?;
            run(&library, command)?;
        }
    }

    Ok(())
}

fn run(library: &Library, command: Command) -> error::Result<()> {
    match command {
        Command::Add(args) => cmd_add(library, args),
        Command::Edit(args) => cmd_edit(library, args),
        Command::Rm(args) => cmd_rm(library, &args),
        Command::Show(args) => {
            let document = library.get_document(args.id)?;
            if args.json {
                print_json(&document)
            } else {
                print_document(library, &document);
                Ok(())
            }
        }
        Command::Search(args) => {
            let results = if args.all {
                library.list_documents()?
            } else {
                let filter = SearchFilter {
                    title: args.title,
                    source: args.source,
                    tags: args.tags,
                };
                if filter.is_empty() {
                    eprintln!("No filter given; use --all to list every document.");
                }
                library.search(&filter)?
            };

            if args.json {
                search::format_json(&results)
            } else {
                search::format_human(&results);
                Ok(())
            }
        }
        Command::Tags(args) => {
            let tags = library.list_tags()?;
            if args.json {
                return print_json(&tags);
            }
            if tags.is_empty() {
                println!("No tags.");
            }
            for tag in &tags {
                println!("{}", tag.name);
            }
            Ok(())
        }
        Command::Sources(args) => {
            let sources = library.list_sources()?;
            if args.json {
                return print_json(&sources);
            }
            if sources.is_empty() {
                println!("No sources.");
            }
            for source in &sources {
                println!("{}", source.name);
            }
            Ok(())
        }
        Command::Download(args) => {
            let target = library.save_copy(args.file_id, &args.output, args.force)?;
            println!("{}", target.display());
            Ok(())
        }
        Command::Gc => {
            let report = library.garbage_collect()?;
            if report.is_empty() {
                println!("Nothing to collect.");
            }
            for tag in &report.tags {
                println!("removed tag {tag}");
            }
            for source in &report.sources {
                println!("removed source {source}");
            }
            Ok(())
        }
        Command::MergeTags(args) => {
            let report = library.merge_tags(&args.canonical, &args.aliases)?;
            for alias in &report.unknown {
                eprintln!("warning: no tag named '{alias}'");
            }
            println!(
                "Merged {} tag(s) into '{}' ({} document(s) retagged)",
                report.merged.len(),
                report.canonical,
                report.retagged
            );
            Ok(())
        }
        Command::Orphans(args) => {
            if args.remove {
                let cleanup = library.remove_orphaned_files()?;
                for path in &cleanup.removed {
                    println!("removed {path}");
                }
                for (path, error) in &cleanup.failed {
                    eprintln!("failed {path}: {error}");
                }
            } else {
                let orphans = library.orphaned_files()?;
                if orphans.is_empty() {
                    println!("No orphaned files.");
                }
                for orphan in &orphans {
                    println!("{}\t{}", orphan.relative_path, orphan.size);
                }
            }
            Ok(())
        }
        Command::Missing => {
            let missing = library.missing_files()?;
            if missing.is_empty() {
                println!("No missing files.");
            }
            for file in &missing {
                println!(
                    "{}\t{}\t{}\t{}",
                    file.document_id, file.id, file.path, file.original_name
                );
            }
            Ok(())
        }
        Command::Status(args) => {
            let status = library.status()?;
            if args.json {
                return print_json(&status);
            }
            println!("Store folder: {}", status.folder.display());
            println!("Documents: {}", status.catalog.documents);
            println!("Files: {}", status.catalog.files);
            println!("Tags: {}", status.catalog.tags);
            println!("Sources: {}", status.catalog.sources);
            println!(
                "Content: {} file(s), {} bytes",
                status.content_files, status.content_bytes
            );
            println!(
                "Ghostscript: {}",
                if status.ghostscript { "available" } else { "not found" }
            );
            Ok(())
        }
        Command::Config { action } => cmd_config(library, action),
        Command::Init
        | Command::Import(_)
        | Command::Export(_)
        | Command::Completions(_) => Ok(()),
    }
}

fn cmd_init(dir: StoreDir) -> error::Result<()> {
    let existed = dir.has_catalog();
    let library = Library::create(dir)?;
    if existed {
        println!(
            "Catalog already present in {}",
            library.dir().root().display()
        );
    } else {
        println!("Initialized store in {}", library.dir().root().display());
    }
    Ok(())
}

fn open_uploads(paths: &[PathBuf]) -> error::Result<Vec<Upload>> {
    paths.iter().map(|p| Upload::open(p)).collect()
}

fn cmd_add(library: &Library, args: cli::AddArgs) -> error::Result<()> {
    let mut metadata = DocumentMetadata::new(
        args.title,
        parse_date(&args.received)?,
    );
    metadata.description = non_empty(args.description);
    metadata.location = non_empty(args.location);

    let draft = DocumentDraft::new(metadata)
        .with_tags(args.tags)
        .with_sources(args.sources);
    let uploads = open_uploads(&args.files)?;

    let report =
        library.create_document(&draft, uploads, args.compression.choice())?;
    println!("Added {} {}", report.document.id, report.document.title);
    print_report(&report);
    Ok(())
}

fn cmd_edit(library: &Library, args: cli::EditArgs) -> error::Result<()> {
    let current = library.get_document(args.id)?;
    let mut draft = DocumentDraft::from_document(&current);

    if let Some(title) = args.title {
        draft.metadata.title = title;
    }
    if let Some(received) = args.received {
        draft.metadata.date_received = Some(parse_date(&received)?);
    }
    if let Some(description) = args.description {
        draft.metadata.description = non_empty(Some(description));
    }
    if let Some(location) = args.location {
        draft.metadata.location = non_empty(Some(location));
    }
    if args.keep_labels {
        draft.tags.extend(args.tags);
        draft.sources.extend(args.sources);
    } else {
        if args.tags.is_empty()
            && args.sources.is_empty()
            && !(current.tags.is_empty() && current.sources.is_empty())
        {
            eprintln!(
                "No --tag or --source given; clearing tags and sources \
                 (use --keep-labels to keep them)."
            );
        }
        draft.tags = args.tags;
        draft.sources = args.sources;
    }

    let uploads = open_uploads(&args.files)?;
    let report = library.update_document(
        args.id,
        &draft,
        uploads,
        &args.detach,
        args.compression.choice(),
    )?;
    println!("Updated {} {}", report.document.id, report.document.title);
    print_report(&report);
    Ok(())
}

fn cmd_rm(library: &Library, args: &cli::RmArgs) -> error::Result<()> {
    let deleted = library.delete_document(args.id)?;
    println!("Deleted {}", args.id);
    for file in &deleted {
        match &file.outcome {
            RemovalOutcome::Removed => {
                println!("  removed {} ({})", file.original_name, file.path.display());
            }
            RemovalOutcome::Missing => {
                println!(
                    "  already missing {} ({})",
                    file.original_name,
                    file.path.display()
                );
            }
            RemovalOutcome::Failed(error) => {
                eprintln!(
                    "  could not remove {} ({}): {error}",
                    file.original_name,
                    file.path.display()
                );
            }
        }
    }
    Ok(())
}

fn cmd_config(library: &Library, action: ConfigAction) -> error::Result<()> {
    match action {
        ConfigAction::Get { key } => match library.setting(&key)? {
            Some(value) => println!("{value}"),
            None => {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
        },
        ConfigAction::Set { key, value } => {
            let value = library.set_setting(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if library.unset_setting(&key)? {
                println!("Unset {key}");
            } else {
                println!("{key} was not set");
            }
        }
        ConfigAction::List { json } => {
            let settings = library.settings()?;
            if json {
                let map: serde_json::Map<String, serde_json::Value> = settings
                    .into_iter()
                    .map(|(k, v)| (k, v.map_or(serde_json::Value::Null, Into::into)))
                    .collect();
                return print_json(&map);
            }
            for (key, value) in settings {
                println!("{key}\t{}", value.as_deref().unwrap_or("(default)"));
            }
        }
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn print_report(report: &SaveReport) {
    for detached in &report.detached {
        if let RemovalOutcome::Failed(error) = &detached.outcome {
            eprintln!(
                "  could not remove detached {}: {error}",
                detached.original_name
            );
        } else {
            println!("  detached {}", detached.original_name);
        }
    }
    for upload in &report.uploads {
        match &upload.status {
            UploadStatus::Stored {
                file_id,
                path,
                compressed,
                warning,
            } => {
                let note = if *compressed { " (compressed)" } else { "" };
                println!("  stored {} as {path} [file {file_id}]{note}", upload.original_name);
                if let Some(warning) = warning {
                    eprintln!("  warning: {} not compressed: {warning}", upload.original_name);
                }
            }
            UploadStatus::Failed { error } => {
                eprintln!("  failed to store {}: {error}", upload.original_name);
            }
        }
    }
}

fn print_document(library: &Library, doc: &Document) {
    println!("{} {}", doc.id, doc.title);
    println!("received: {}", doc.date_received);
    println!("added: {}", doc.date_added.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(description) = &doc.description {
        println!("description: {description}");
    }
    if let Some(location) = &doc.location {
        println!("location: {location}");
    }
    if !doc.tags.is_empty() {
        println!("tags: {}", doc.tag_names().join(", "));
    }
    if !doc.sources.is_empty() {
        println!("sources: {}", doc.source_names().join(", "));
    }
    for file in &doc.files {
        let path = library.files().resolve(&file.path);
        let marker = if path.exists() { "" } else { " (missing)" };
        println!(
            "file {}: {} -> {}{marker}",
            file.id,
            file.original_name,
            display_relative(library.dir().root(), &path)
        );
    }
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn print_json<T: serde::Serialize>(value: &T) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use std::collections::BTreeSet;

use tracing::debug;

use crate::{
    catalog::{Catalog, DocumentView, sort_newest_first},
    error::Result,
    model::{Document, normalize_names},
};

/// Optional search criteria. Every field that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
    /// Exact source name.
    pub source: Option<String>,
    /// Every one of these tags must be present.
    pub tags: Vec<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.plan().constraints.is_empty()
    }

    /// Compile the filter into a list of constraints. Blank fields are
    /// dropped and each distinct tag becomes its own constraint.
    pub fn plan(&self) -> QueryPlan {
        let mut constraints = Vec::new();

        if let Some(title) = self.title.as_deref().map(str::trim)
            && !title.is_empty()
        {
            constraints.push(Constraint::TitleContains(title.to_lowercase()));
        }
        if let Some(source) = self.source.as_deref().map(str::trim)
            && !source.is_empty()
        {
            constraints.push(Constraint::Source(source.to_string()));
        }
        for tag in normalize_names(&self.tags) {
            constraints.push(Constraint::Tag(tag));
        }

        QueryPlan { constraints }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Lowercased needle.
    TitleContains(String),
    Source(String),
    Tag(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    pub constraints: Vec<Constraint>,
}

impl QueryPlan {
    /// Run the plan against one read snapshot.
    ///
    /// Label constraints narrow the candidate set by intersecting their
    /// document sets; the title constraint is applied to the loaded
    /// documents.
    pub fn execute(&self, catalog: &Catalog) -> Result<Vec<Document>> {
        if self.constraints.is_empty() {
            return Ok(Vec::new());
        }

        let session = catalog.begin_read()?;
        let view = session.view()?;

        let mut candidates: Option<BTreeSet<u64>> = None;
        for constraint in &self.constraints {
            let matching = match constraint {
                Constraint::Source(name) => view.sources.documents_named(name)?,
                Constraint::Tag(name) => view.tags.documents_named(name)?,
                Constraint::TitleContains(_) => continue,
            };
            let narrowed = match candidates {
                Some(current) => &current & &matching,
                None => matching,
            };
            if narrowed.is_empty() {
                debug!(?constraint, "no documents left after constraint");
                return Ok(Vec::new());
            }
            candidates = Some(narrowed);
        }

        let ids = match candidates {
            Some(ids) => ids,
            None => view.document_ids()?,
        };
        let mut results = self.load_matching(&view, ids)?;
        sort_newest_first(&mut results);

        debug!(
            constraints = self.constraints.len(),
            results = results.len(),
            "search executed"
        );
        Ok(results)
    }

    fn load_matching(
        &self,
        view: &DocumentView,
        ids: BTreeSet<u64>,
    ) -> Result<Vec<Document>> {
        let needles: Vec<&str> = self
            .constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::TitleContains(needle) => Some(needle.as_str()),
                _ => None,
            })
            .collect();

        let mut results = Vec::new();
        for id in ids {
            let Some(document) = view.load(id)? else {
                continue;
            };
            let title = document.title.to_lowercase();
            if needles.iter().all(|needle| title.contains(needle)) {
                results.push(document);
            }
        }
        Ok(results)
    }
}

/// Documents matching every set field of the filter, newest received first.
/// An empty filter matches nothing; use [`Catalog::list_documents`] to list
/// everything.
pub fn search(catalog: &Catalog, filter: &SearchFilter) -> Result<Vec<Document>> {
    filter.plan().execute(catalog)
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[Document]) {
    if results.is_empty() {
        println!("No documents found.");
        return;
    }

    for doc in results {
        println!("{:>5}  {}  {}", doc.id, doc.date_received, doc.title);
        if !doc.tags.is_empty() {
            println!("       tags: {}", doc.tag_names().join(", "));
        }
        if !doc.sources.is_empty() {
            println!("       sources: {}", doc.source_names().join(", "));
        }
        if !doc.files.is_empty() {
            println!("       files: {}", doc.files.len());
        }
    }
    println!("\n{} document(s)", results.len());
}

/// Format results as JSON output.
pub fn format_json(results: &[Document]) -> Result<()> {
    let out = serde_json::json!({
        "result_count": results.len(),
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentMetadata, parse_date};

    const NONE: &[&str] = &[];

    fn test_catalog() -> (tempfile::TempDir, Catalog) {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&tmp.path().join("duckstore.redb")).unwrap();
        (tmp, catalog)
    }

    fn add(
        catalog: &Catalog,
        title: &str,
        received: &str,
        tags: &[&str],
        sources: &[&str],
    ) -> Document {
        let meta = DocumentMetadata::new(title, parse_date(received).unwrap());
        catalog.create_document(&meta, tags, sources).unwrap()
    }

    fn titles(results: &[Document]) -> Vec<&str> {
        results.iter().map(|d| d.title.as_str()).collect()
    }

    fn by_tags(tags: &[&str]) -> SearchFilter {
        SearchFilter {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn plan_has_one_constraint_per_distinct_tag() {
        let plan = SearchFilter {
            title: Some("  Lease ".into()),
            source: Some(" ".into()),
            tags: vec!["a".into(), "b".into(), " a".into(), "".into()],
        }
        .plan();

        assert_eq!(
            plan.constraints,
            vec![
                Constraint::TitleContains("lease".into()),
                Constraint::Tag("a".into()),
                Constraint::Tag("b".into()),
            ]
        );
    }

    #[test]
    fn empty_filter_returns_nothing() {
        let (_tmp, catalog) = test_catalog();
        add(&catalog, "Lease", "2024-01-01", &["legal"], NONE);

        assert!(SearchFilter::default().is_empty());
        assert!(search(&catalog, &SearchFilter::default()).unwrap().is_empty());

        let blank = SearchFilter {
            title: Some("   ".into()),
            ..Default::default()
        };
        assert!(blank.is_empty());
        assert!(search(&catalog, &blank).unwrap().is_empty());
    }

    #[test]
    fn tags_are_intersected() {
        let (_tmp, catalog) = test_catalog();
        add(&catalog, "Only A", "2024-01-01", &["A"], NONE);
        add(&catalog, "Only B", "2024-01-02", &["B"], NONE);
        add(&catalog, "Both", "2024-01-03", &["A", "B"], NONE);

        let results = search(&catalog, &by_tags(&["A", "B"])).unwrap();
        assert_eq!(titles(&results), vec!["Both"]);

        let results = search(&catalog, &by_tags(&["A"])).unwrap();
        assert_eq!(titles(&results), vec!["Both", "Only A"]);
    }

    #[test]
    fn unknown_tag_yields_nothing() {
        let (_tmp, catalog) = test_catalog();
        add(&catalog, "Lease", "2024-01-01", &["legal"], NONE);

        assert!(search(&catalog, &by_tags(&["legal", "nope"])).unwrap().is_empty());
    }

    #[test]
    fn title_is_case_insensitive_substring() {
        let (_tmp, catalog) = test_catalog();
        add(&catalog, "Invoice March", "2024-03-01", NONE, NONE);
        add(&catalog, "Receipt", "2024-03-02", NONE, NONE);

        let filter = SearchFilter {
            title: Some("invoice".into()),
            ..Default::default()
        };
        assert_eq!(titles(&search(&catalog, &filter).unwrap()), vec![
            "Invoice March"
        ]);

        let filter = SearchFilter {
            title: Some("ARCH".into()),
            ..Default::default()
        };
        assert_eq!(titles(&search(&catalog, &filter).unwrap()), vec![
            "Invoice March"
        ]);
    }

    #[test]
    fn source_is_exact_name() {
        let (_tmp, catalog) = test_catalog();
        add(&catalog, "Tax form", "2024-04-01", NONE, &["IRS"]);
        add(&catalog, "Letter", "2024-04-02", NONE, &["IRS Office"]);

        let filter = SearchFilter {
            source: Some(" IRS ".into()),
            ..Default::default()
        };
        assert_eq!(titles(&search(&catalog, &filter).unwrap()), vec![
            "Tax form"
        ]);

        let filter = SearchFilter {
            source: Some("irs".into()),
            ..Default::default()
        };
        assert!(search(&catalog, &filter).unwrap().is_empty());
    }

    #[test]
    fn combined_filters_and_ordering() {
        let (_tmp, catalog) = test_catalog();
        add(&catalog, "Bill Jan", "2024-01-10", &["bill"], &["Power Co"]);
        add(&catalog, "Bill Feb", "2024-02-10", &["bill"], &["Power Co"]);
        add(&catalog, "Bill Feb water", "2024-02-10", &["bill"], &["Water Co"]);
        add(&catalog, "Note Feb", "2024-02-11", &["note"], &["Power Co"]);

        let filter = SearchFilter {
            title: Some("bill".into()),
            source: Some("Power Co".into()),
            tags: vec!["bill".into()],
        };
        assert_eq!(titles(&search(&catalog, &filter).unwrap()), vec![
            "Bill Feb", "Bill Jan"
        ]);

        // Same received date: higher id first.
        let results = search(&catalog, &by_tags(&["bill"])).unwrap();
        assert_eq!(titles(&results), vec![
            "Bill Feb water",
            "Bill Feb",
            "Bill Jan"
        ]);
    }

    #[test]
    fn results_follow_list_ordering() {
        let (_tmp, catalog) = test_catalog();
        add(&catalog, "Old", "2020-01-01", &["x"], NONE);
        add(&catalog, "New", "2025-01-01", &["x"], NONE);

        let listed = catalog.list_documents().unwrap();
        let searched = search(&catalog, &by_tags(&["x"])).unwrap();
        assert_eq!(listed, searched);
    }
}

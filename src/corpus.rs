//! Knowledge-corpus loader.
//!
//! Walks the corpus root, applies include/exclude glob filters, and reads
//! matching files as UTF-8 documents with provenance metadata: the file
//! name becomes the citation source, the parent directory the category.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::{Document, DocumentMeta};

pub fn load_corpus(config: &CorpusConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        documents.push(file_to_document(root, path, &rel_str)?);
    }

    // Sort for deterministic ordering
    documents.sort_by(|a, b| a.meta.path.cmp(&b.meta.path));

    Ok(documents)
}

fn file_to_document(root: &Path, path: &Path, relative_path: &str) -> Result<Document> {
    let body = std::fs::read_to_string(path).unwrap_or_default();

    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    // Category is the parent directory name; files at the corpus root
    // inherit the root directory's own name.
    let category = path
        .parent()
        .unwrap_or(root)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Document {
        body,
        meta: DocumentMeta {
            source,
            category,
            path: relative_path.to_string(),
        },
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn corpus_config(root: &Path) -> CorpusConfig {
        CorpusConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.txt".to_string(), "**/*.md".to_string()],
            exclude_globs: vec![],
        }
    }

    #[test]
    fn test_category_from_parent_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("knowledge");
        fs::create_dir_all(root.join("compliance")).unwrap();
        fs::write(
            root.join("compliance/veeva_policy.txt"),
            "All trials must use Veeva Vault for document management.",
        )
        .unwrap();

        let docs = load_corpus(&corpus_config(&root)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].meta.source, "veeva_policy.txt");
        assert_eq!(docs[0].meta.category, "compliance");
        assert!(docs[0].body.contains("Veeva Vault"));
    }

    #[test]
    fn test_root_level_files_use_root_name_as_category() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("knowledge");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("overview.txt"), "Overview.").unwrap();

        let docs = load_corpus(&corpus_config(&root)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].meta.category, "knowledge");
    }

    #[test]
    fn test_deterministic_ordering_and_filtering() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("knowledge");
        fs::create_dir_all(root.join("wins")).unwrap();
        fs::write(root.join("wins/b.txt"), "b").unwrap();
        fs::write(root.join("wins/a.txt"), "a").unwrap();
        fs::write(root.join("wins/skip.pdf"), "binary").unwrap();

        let docs = load_corpus(&corpus_config(&root)).unwrap();
        let paths: Vec<&str> = docs.iter().map(|d| d.meta.path.as_str()).collect();
        assert_eq!(paths, vec!["wins/a.txt", "wins/b.txt"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_corpus(&corpus_config(&tmp.path().join("nope"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}

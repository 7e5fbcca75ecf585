use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::DocumentType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFormat {
    PlainText,
    Pdf,
}

impl SupportedFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "md" => Some(Self::PlainText),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::PlainText => DocumentType::Text,
            Self::Pdf => DocumentType::Pdf,
        }
    }
}

/// Every supported file under `dir`, sorted by path. Hidden directories are
/// skipped.
pub fn walk_directory(dir: &Path) -> Vec<(PathBuf, SupportedFormat)> {
    let mut files: Vec<_> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.into_path();
            let ext = path.extension()?.to_str()?;
            let format = SupportedFormat::from_extension(ext)?;
            Some((path, format))
        })
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

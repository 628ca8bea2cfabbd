//! Candidate profile (CV) loading.

use std::path::{Path, PathBuf};

use crate::error::ProfileError;

/// Extensions auto-detection looks for, in preference order.
const CV_EXTENSIONS: &[&str] = &["pdf", "txt", "md"];

/// The user's CV as free text. Read-only for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateProfile {
    text: String,
    source: Option<PathBuf>,
}

impl CandidateProfile {
    pub fn from_text(text: impl Into<String>) -> Result<Self, ProfileError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(ProfileError::Empty("<inline>".to_string()));
        }
        Ok(Self { text, source: None })
    }

    /// Load from a `.txt`, `.md` or `.pdf` file.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        if !path.exists() {
            return Err(ProfileError::NotFound(path.display().to_string()));
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let text = match extension.as_str() {
            "txt" | "md" => std::fs::read_to_string(path)?,
            "pdf" => pdf_extract::extract_text(path).map_err(|e| ProfileError::Pdf {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            _ => return Err(ProfileError::UnsupportedFormat { extension }),
        };

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ProfileError::Empty(path.display().to_string()));
        }

        tracing::info!(
            path = %path.display(),
            chars = text.chars().count(),
            paragraphs = split_paragraphs(&text).count(),
            "Loaded candidate profile"
        );

        Ok(Self {
            text,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Render with `[Paragraph N]` prefixes so match evidence can cite
    /// where in the CV it came from.
    pub fn with_paragraph_numbers(&self) -> String {
        split_paragraphs(&self.text)
            .enumerate()
            .map(|(i, para)| format!("[Paragraph {}] {}", i + 1, para))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Non-empty paragraphs, separated by one or more blank lines.
fn split_paragraphs(text: &str) -> impl Iterator<Item = String> + '_ {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs.into_iter().map(|p| p.trim().to_string())
}

/// Find a CV in `dir`: the first file named `cv.*` or `resume.*` with a
/// supported extension, else any supported file other than history data.
pub fn detect_cv_path(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .map(|e| CV_EXTENSIONS.contains(&e.to_string_lossy().to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();

    let stem_is = |p: &PathBuf, names: &[&str]| {
        p.file_stem()
            .map(|s| names.contains(&s.to_string_lossy().to_lowercase().as_str()))
            .unwrap_or(false)
    };

    for ext in CV_EXTENSIONS {
        if let Some(found) = candidates.iter().find(|p| {
            stem_is(p, &["cv", "resume"])
                && p.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext))
        }) {
            return Some(found.clone());
        }
    }
    candidates.into_iter().next()
}

//! Class discovery over an arbitrarily nested image tree.
//!
//! Any directory whose direct children include at least one recognized image
//! file is a class, named after its leaf directory name. The walk is
//! depth-first with entries sorted by file name, so "first occurrence" is
//! well defined when two directories share a leaf name.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use verdant_core::{Error, ProgressReporter, Result};
use walkdir::WalkDir;

/// One discovered class directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDirectory {
    /// Leaf directory name, used as the label
    pub name: String,
    pub path: PathBuf,
    /// Direct child images, sorted by file name
    pub images: Vec<PathBuf>,
}

/// Result of a discovery pass
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Accepted classes in walk order
    pub classes: Vec<ClassDirectory>,
    /// Directories skipped because their leaf name was already taken
    pub duplicates: Vec<PathBuf>,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn total_images(&self) -> usize {
        self.classes.iter().map(|c| c.images.len()).sum()
    }
}

/// Whether `path` ends in one of `extensions` (case-insensitive, leading dot optional)
pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    let ext = ext.to_string_lossy();
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

/// Image files directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path, extensions) {
            images.push(path);
        }
    }

    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

/// Walk `root` and collect every class directory below it.
///
/// Duplicate leaf names are reported through `reporter` and skipped. An empty
/// result is reported but returned as `Ok`; callers decide how to treat it.
pub fn discover_classes(
    root: &Path,
    extensions: &[String],
    reporter: &dyn ProgressReporter,
) -> Result<Discovery> {
    if !root.is_dir() {
        return Err(Error::Input(format!(
            "Source directory not found: {}",
            root.display()
        )));
    }

    let mut discovery = Discovery::default();
    let mut seen: HashSet<String> = HashSet::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let images = list_images(entry.path(), extensions)?;
        if images.is_empty() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if !seen.insert(name.clone()) {
            reporter.report(&format!(
                "Warning: Class name '{name}' is duplicated. Skipping to avoid data mixing."
            ));
            discovery.duplicates.push(entry.path().to_path_buf());
            continue;
        }

        debug!("Class {} at {:?} ({} images)", name, entry.path(), images.len());
        discovery.classes.push(ClassDirectory {
            name,
            path: entry.path().to_path_buf(),
            images,
        });
    }

    if discovery.is_empty() {
        reporter.report("No subdirectories with image files found.");
    }

    Ok(discovery)
}

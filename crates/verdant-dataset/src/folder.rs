//! `root/{class}/{image}` folders as burn datasets.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use tracing::{debug, warn};
use verdant_core::{Error, Result};

use crate::discovery::list_images;

/// An image path and its class index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// Lazily decoded split folder with a fixed class ordering
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<ImageSample>,
}

impl ImageFolder {
    /// Open `root` and index its classes in sorted order. Subdirectories without
    /// images are ignored.
    pub fn open(root: &Path, extensions: &[String]) -> Result<Self> {
        let mut classes = Vec::new();
        for (name, dir) in class_dirs(root)? {
            if list_images(&dir, extensions)?.is_empty() {
                debug!("Ignoring {:?}: no images", dir);
                continue;
            }
            classes.push(name);
        }

        if classes.is_empty() {
            return Err(Error::NoClasses(root.to_path_buf()));
        }
        Self::with_classes(root, extensions, &classes)
    }

    /// Open `root` using a class ordering fixed elsewhere (the train split).
    /// Directories naming unknown classes are skipped with a warning; known
    /// classes may be absent.
    pub fn with_classes(root: &Path, extensions: &[String], classes: &[String]) -> Result<Self> {
        let index: BTreeMap<&str, usize> = classes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut samples = Vec::new();
        for (name, dir) in class_dirs(root)? {
            let Some(&label) = index.get(name.as_str()) else {
                warn!("Skipping {:?}: class '{}' is not in the training set", dir, name);
                continue;
            };
            samples.extend(
                list_images(&dir, extensions)?
                    .into_iter()
                    .map(|path| ImageSample { path, label }),
            );
        }

        debug!("Indexed {} images in {:?}", samples.len(), root);
        Ok(Self {
            root: root.to_path_buf(),
            classes: classes.to_vec(),
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn class_to_index(&self) -> BTreeMap<String, usize> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect()
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    /// Image count per class index
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

impl Dataset<ImageSample> for ImageFolder {
    fn get(&self, index: usize) -> Option<ImageSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Immediate subdirectories of `root` as `(name, path)`, sorted by name.
fn class_dirs(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !root.is_dir() {
        return Err(Error::Input(format!(
            "Image folder not found: {}",
            root.display()
        )));
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

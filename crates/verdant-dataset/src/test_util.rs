//! Fixtures shared by the dataset tests.

use std::fs;
use std::path::Path;

use image::{ImageBuffer, Rgb};

pub fn extensions() -> Vec<String> {
    verdant_core::DEFAULT_IMAGE_EXTENSIONS
        .iter()
        .map(|e| e.to_string())
        .collect()
}

/// Save a small gradient image at `path`, creating parent directories.
pub fn create_test_image(path: &Path) {
    create_sized_image(path, 12, 8);
}

pub fn create_sized_image(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 20 % 256) as u8, (y * 30 % 256) as u8, 128u8])
    });
    img.save(path).unwrap();
}

/// Populate `dir` with `count` images named `img_000.jpg`, `img_001.jpg`, ...
pub fn create_class(dir: &Path, count: usize) {
    for i in 0..count {
        create_test_image(&dir.join(format!("img_{i:03}.jpg")));
    }
}

//! Train and eval image pipelines.
//!
//! A pipeline is an ordered list of [`Transform`]s followed by per-channel
//! normalization into CHW `f32` data. Pipelines hold no per-image state: every
//! random choice is drawn from the generator passed to [`AugmentationPipeline::apply`],
//! so a fixed seed reproduces crop boxes, flips, angles and jitter factors.
//!
//! # Pipelines
//!
//! - **Train**: random resized crop (or resize + center crop), then the enabled
//!   flip, rotation and color jitter steps
//! - **Eval**: resize the shorter side, center crop, nothing random

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use rand::seq::SliceRandom;
use rand::Rng;
use verdant_core::TrainingConfig;

/// Chance that [`Transform::HorizontalFlip`] mirrors the image
pub const FLIP_PROBABILITY: f64 = 0.5;

/// Crop attempts before [`Transform::RandomResizedCrop`] falls back to a center crop
const CROP_ATTEMPTS: usize = 10;

/// One step of an image pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Crop a random area fraction and aspect ratio, then resize to `size`²
    RandomResizedCrop {
        size: u32,
        scale: (f32, f32),
        ratio: (f32, f32),
    },
    /// Scale so the shorter side equals the given length
    Resize(u32),
    /// Take the central square, padding with black when the image is smaller
    CenterCrop(u32),
    HorizontalFlip,
    /// Rotate by an angle drawn from `[-degrees, degrees]`
    Rotation { degrees: f32 },
    ColorJitter {
        brightness: f32,
        contrast: f32,
        saturation: f32,
        hue: f32,
    },
}

impl Transform {
    pub fn apply<R: Rng + ?Sized>(&self, img: RgbImage, rng: &mut R) -> RgbImage {
        match *self {
            Transform::RandomResizedCrop { size, scale, ratio } => {
                random_resized_crop(&img, size, scale, ratio, rng)
            }
            Transform::Resize(size) => resize_shorter_side(&img, size),
            Transform::CenterCrop(size) => center_crop(&img, size),
            Transform::HorizontalFlip => {
                if rng.gen_bool(FLIP_PROBABILITY) {
                    image::imageops::flip_horizontal(&img)
                } else {
                    img
                }
            }
            Transform::Rotation { degrees } => {
                let angle = uniform(rng, -degrees, degrees);
                rotate(&img, angle)
            }
            Transform::ColorJitter {
                brightness,
                contrast,
                saturation,
                hue,
            } => color_jitter(img, brightness, contrast, saturation, hue, rng),
        }
    }
}

/// Per-channel normalization statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    pub fn from_config(config: &TrainingConfig) -> Self {
        let (mean, std) = config.augmentation.normalization();
        Self { mean, std }
    }
}

/// Ordered transforms plus normalization into model input data
#[derive(Debug, Clone)]
pub struct AugmentationPipeline {
    transforms: Vec<Transform>,
    normalization: Normalization,
    output_size: u32,
}

impl AugmentationPipeline {
    pub fn new(transforms: Vec<Transform>, normalization: Normalization, output_size: u32) -> Self {
        Self {
            transforms,
            normalization,
            output_size,
        }
    }

    /// Augmenting pipeline used for the train split
    pub fn train(config: &TrainingConfig) -> Self {
        let aug = &config.augmentation;
        let size = config.data.input_size;
        let mut transforms = Vec::new();

        if aug.random_resized_crop {
            transforms.push(Transform::RandomResizedCrop {
                size,
                scale: aug.crop_scale,
                ratio: aug.crop_ratio,
            });
        } else {
            transforms.push(Transform::Resize(config.data.effective_resize_size()));
            transforms.push(Transform::CenterCrop(size));
        }
        if aug.horizontal_flip {
            transforms.push(Transform::HorizontalFlip);
        }
        if aug.rotation && aug.rotation_degrees > 0.0 {
            transforms.push(Transform::Rotation {
                degrees: aug.rotation_degrees,
            });
        }
        if aug.color_jitter {
            transforms.push(Transform::ColorJitter {
                brightness: aug.brightness,
                contrast: aug.contrast,
                saturation: aug.saturation,
                hue: aug.hue,
            });
        }

        Self::new(transforms, Normalization::from_config(config), size)
    }

    /// Deterministic pipeline used for validation and test
    pub fn eval(config: &TrainingConfig) -> Self {
        let size = config.data.input_size;
        let transforms = vec![
            Transform::Resize(config.data.effective_resize_size()),
            Transform::CenterCrop(size),
        ];
        Self::new(transforms, Normalization::from_config(config), size)
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn output_size(&self) -> u32 {
        self.output_size
    }

    /// Run every transform in order. Input of any color type is converted to RGB.
    pub fn apply<R: Rng + ?Sized>(&self, img: &DynamicImage, rng: &mut R) -> RgbImage {
        self.transforms
            .iter()
            .fold(img.to_rgb8(), |acc, transform| transform.apply(acc, rng))
    }

    /// Normalized CHW data of length `3 * output_size * output_size`
    pub fn to_tensor_data(&self, img: &RgbImage) -> Vec<f32> {
        let size = self.output_size;
        let resized;
        let img = if img.dimensions() == (size, size) {
            img
        } else {
            resized = image::imageops::resize(img, size, size, FilterType::Triangle);
            &resized
        };

        let Normalization { mean, std } = self.normalization;
        let mut data = Vec::with_capacity(3 * size as usize * size as usize);
        for c in 0..3 {
            for y in 0..size {
                for x in 0..size {
                    let value = img.get_pixel(x, y)[c] as f32 / 255.0;
                    data.push((value - mean[c]) / std[c]);
                }
            }
        }
        data
    }

    /// Transform and normalize in one step
    pub fn process<R: Rng + ?Sized>(&self, img: &DynamicImage, rng: &mut R) -> Vec<f32> {
        let transformed = self.apply(img, rng);
        self.to_tensor_data(&transformed)
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f32, hi: f32) -> f32 {
    if hi > lo {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

fn random_resized_crop<R: Rng + ?Sized>(
    img: &RgbImage,
    size: u32,
    scale: (f32, f32),
    ratio: (f32, f32),
    rng: &mut R,
) -> RgbImage {
    let (width, height) = img.dimensions();
    let area = (width * height) as f32;
    let (log_lo, log_hi) = (ratio.0.ln(), ratio.1.ln());

    let mut window = None;
    for _ in 0..CROP_ATTEMPTS {
        let target_area = area * uniform(rng, scale.0, scale.1);
        let aspect = uniform(rng, log_lo, log_hi).exp();

        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;
        if w > 0 && h > 0 && w <= width && h <= height {
            let top = rng.gen_range(0..=height - h);
            let left = rng.gen_range(0..=width - w);
            window = Some((left, top, w, h));
            break;
        }
    }

    let (left, top, w, h) = window.unwrap_or_else(|| {
        let in_ratio = width as f32 / height as f32;
        let (w, h) = if in_ratio < ratio.0 {
            (width, ((width as f32 / ratio.0).round() as u32).min(height))
        } else if in_ratio > ratio.1 {
            (((height as f32 * ratio.1).round() as u32).min(width), height)
        } else {
            (width, height)
        };
        ((width - w) / 2, (height - h) / 2, w.max(1), h.max(1))
    });

    let cropped = image::imageops::crop_imm(img, left, top, w, h).to_image();
    image::imageops::resize(&cropped, size, size, FilterType::Triangle)
}

fn resize_shorter_side(img: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    let (new_w, new_h) = if width <= height {
        (size, (size as u64 * height as u64 / width.max(1) as u64) as u32)
    } else {
        ((size as u64 * width as u64 / height.max(1) as u64) as u32, size)
    };

    if (new_w, new_h) == (width, height) {
        return img.clone();
    }
    image::imageops::resize(img, new_w.max(1), new_h.max(1), FilterType::Triangle)
}

fn center_crop(img: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = img.dimensions();

    if width < size || height < size {
        let mut canvas: RgbImage = ImageBuffer::new(size, size);
        let x = (size as i64 - width as i64) / 2;
        let y = (size as i64 - height as i64) / 2;
        image::imageops::overlay(&mut canvas, img, x, y);
        return canvas;
    }

    let left = ((width - size) as f32 / 2.0).round() as u32;
    let top = ((height - size) as f32 / 2.0).round() as u32;
    image::imageops::crop_imm(img, left, top, size, size).to_image()
}

/// Rotate about the image center with bilinear sampling; uncovered corners are black.
fn rotate(img: &RgbImage, angle_degrees: f32) -> RgbImage {
    if angle_degrees.abs() < 1e-3 {
        return img.clone();
    }

    let (width, height) = img.dimensions();
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;

    ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let src_x = cx + dx * cos_a + dy * sin_a;
        let src_y = cy - dx * sin_a + dy * cos_a;
        bilinear_sample(img, src_x, src_y)
    })
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn color_jitter<R: Rng + ?Sized>(
    mut img: RgbImage,
    brightness: f32,
    contrast: f32,
    saturation: f32,
    hue: f32,
    rng: &mut R,
) -> RgbImage {
    let mut order = [0usize, 1, 2, 3];
    order.shuffle(rng);

    for step in order {
        img = match step {
            0 if brightness > 0.0 => {
                let factor = uniform(rng, (1.0 - brightness).max(0.0), 1.0 + brightness);
                adjust_brightness(&img, factor)
            }
            1 if contrast > 0.0 => {
                let factor = uniform(rng, (1.0 - contrast).max(0.0), 1.0 + contrast);
                adjust_contrast(&img, factor)
            }
            2 if saturation > 0.0 => {
                let factor = uniform(rng, (1.0 - saturation).max(0.0), 1.0 + saturation);
                adjust_saturation(&img, factor)
            }
            3 if hue > 0.0 => {
                let shift = uniform(rng, -hue, hue);
                adjust_hue(&img, shift)
            }
            _ => img,
        };
    }
    img
}

fn luminance(pixel: &Rgb<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

fn blend(value: u8, other: f32, factor: f32) -> u8 {
    (factor * value as f32 + (1.0 - factor) * other)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Scale every channel; 0 gives black, 1 the original.
fn adjust_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([blend(p[0], 0.0, factor), blend(p[1], 0.0, factor), blend(p[2], 0.0, factor)])
    })
}

/// Blend with the mean gray level of the whole image.
fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let count = (img.width() * img.height()).max(1) as f64;
    let mean = (img.pixels().map(|p| luminance(p) as f64).sum::<f64>() / count) as f32;

    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([blend(p[0], mean, factor), blend(p[1], mean, factor), blend(p[2], mean, factor)])
    })
}

/// Blend each pixel with its own grayscale value.
fn adjust_saturation(img: &RgbImage, factor: f32) -> RgbImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let gray = luminance(p);
        Rgb([blend(p[0], gray, factor), blend(p[1], gray, factor), blend(p[2], gray, factor)])
    })
}

/// Rotate hue by `shift` turns (in [-0.5, 0.5]) through HSV.
fn adjust_hue(img: &RgbImage, shift: f32) -> RgbImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let (h, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
        let (r, g, b) = hsv_to_rgb((h + shift).rem_euclid(1.0), s, v);
        Rgb([r, g, b])
    })
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    let (r, g, b) = match (sector as i32).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let to_u8 = |c: f32| (c * 255.0).round().clamp(0.0, 255.0) as u8;
    (to_u8(r), to_u8(g), to_u8(b))
}

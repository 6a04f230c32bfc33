//! Decoding samples into model input and stacking them into burn batches.
//!
//! Items are decoded and transformed before batching so decode failures
//! surface as `Result`s instead of panics inside `Batcher::batch`.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use verdant_core::{Error, Result};

use crate::augmentation::AugmentationPipeline;
use crate::folder::ImageSample;

/// A decoded, transformed and normalized image with its label
#[derive(Debug, Clone)]
pub struct ImageItem {
    /// CHW data, `3 * size * size`
    pub image: Vec<f32>,
    pub label: usize,
}

impl ImageItem {
    pub fn load<R: Rng + ?Sized>(
        sample: &ImageSample,
        pipeline: &AugmentationPipeline,
        rng: &mut R,
    ) -> Result<Self> {
        let img = image::open(&sample.path).map_err(|e| {
            Error::Image(format!("Failed to decode {}: {e}", sample.path.display()))
        })?;

        Ok(Self {
            image: pipeline.process(&img, rng),
            label: sample.label,
        })
    }
}

/// Batch of images and class targets
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, 3, size, size]`
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stacks already-normalized items
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

/// Turns sample slices into items through one pipeline, optionally in parallel.
///
/// One seed per sample is drawn from the caller's generator before any work
/// starts, so the output does not depend on the worker count.
#[derive(Debug)]
pub struct ItemLoader {
    pipeline: AugmentationPipeline,
    pool: Option<rayon::ThreadPool>,
}

impl ItemLoader {
    /// `num_workers` of 0 or 1 decodes on the calling thread.
    pub fn new(pipeline: AugmentationPipeline, num_workers: usize) -> Result<Self> {
        let pool = if num_workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .build()
                .map_err(|e| Error::Training(format!("Failed to start decode workers: {e}")))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self { pipeline, pool })
    }

    pub fn pipeline(&self) -> &AugmentationPipeline {
        &self.pipeline
    }

    pub fn load<R: Rng + ?Sized>(
        &self,
        samples: &[ImageSample],
        rng: &mut R,
    ) -> Result<Vec<ImageItem>> {
        let seeds: Vec<u64> = samples.iter().map(|_| rng.gen()).collect();
        let load_one = |(sample, seed): (&ImageSample, &u64)| {
            ImageItem::load(sample, &self.pipeline, &mut ChaCha8Rng::seed_from_u64(*seed))
        };

        match &self.pool {
            Some(pool) => pool.install(|| {
                samples
                    .par_iter()
                    .zip(seeds.par_iter())
                    .map(load_one)
                    .collect()
            }),
            None => samples.iter().zip(seeds.iter()).map(load_one).collect(),
        }
    }
}

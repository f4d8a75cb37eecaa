//! Frame sampling: which frames get the expensive detect/encode pass, and at
//! what resolution.

use image::imageops::{self, FilterType};
use image::RgbImage;

pub const DEFAULT_PROCESS_EVERY: u32 = 3;
pub const DEFAULT_DOWNSCALE: u32 = 4;

/// Decides per frame whether to recompute detections or redraw stale ones.
///
/// Faces may be labelled up to `interval - 1` frames late.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    interval: u32,
    downscale: u32,
    counter: u64,
}

impl FrameSampler {
    /// `interval` and `downscale` are clamped to at least 1.
    pub fn new(interval: u32, downscale: u32) -> Self {
        Self {
            interval: interval.max(1),
            downscale: downscale.max(1),
            counter: 0,
        }
    }

    /// Count the incoming frame and report whether it should be processed.
    ///
    /// Counting starts at 1, so with interval 3 frames 3, 6, 9, ... are processed.
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        self.counter % self.interval as u64 == 0
    }

    /// Frames seen so far.
    pub fn frames_seen(&self) -> u64 {
        self.counter
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Factor that maps detection coordinates back to full resolution.
    pub fn upscale_factor(&self) -> f32 {
        self.downscale as f32
    }

    /// Shrink a frame by `1 / downscale` for detection.
    pub fn shrink(&self, image: &RgbImage) -> RgbImage {
        if self.downscale == 1 {
            return image.clone();
        }
        let width = (image.width() / self.downscale).max(1);
        let height = (image.height() / self.downscale).max(1);
        imageops::resize(image, width, height, FilterType::Triangle)
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_EVERY, DEFAULT_DOWNSCALE)
    }
}

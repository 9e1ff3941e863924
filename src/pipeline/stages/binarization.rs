//! Binarization stage
//!
//! Two independent passes are fused:
//!
//! 1. A local pass stretches contrast around each pixel's window mean, applies
//!    a Sauvola threshold surface and dilates the resulting ink mask. It
//!    recovers faint strokes.
//! 2. A global pass thresholds the unstretched image with a fixed level or the
//!    Otsu level of its histogram. It suppresses local false positives in flat
//!    regions.
//!
//! A pixel is ink only when both passes agree. The output is dark ink on a
//! white background.

use crate::pipeline::frame::FrameData;
use crate::pipeline::stage::{
    as_f32_in, as_odd_u32_in, as_u32_in, to_parameters, PipelineStage, StageContext, StageError,
    StageResult,
};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use serde::Serialize;
use serde_json::{Map, Value};

/// Sauvola dynamic range of the standard deviation for 8-bit images
const DYNAMIC_RANGE: f64 = 128.0;

/// Binarization configuration
#[derive(Debug, Clone, Serialize)]
pub struct BinarizationConfig {
    /// Contrast stretch factor around the local mean
    pub contrast_factor: f32,
    /// Odd side length of the local window
    pub window_size: u32,
    /// Sauvola sensitivity
    pub k: f32,
    /// Odd side length of the square dilation element
    pub kernel_size: u32,
    /// Number of dilation passes over the local mask
    pub dilate_iterations: u32,
    /// Fixed global level; Otsu when unset
    pub global_threshold: Option<u8>,
}

impl Default for BinarizationConfig {
    fn default() -> Self {
        Self {
            contrast_factor: 1.7,
            window_size: 15,
            k: 0.2,
            kernel_size: 3,
            dilate_iterations: 3,
            global_threshold: None,
        }
    }
}

/// Summed-area tables over values and squared values
struct Integral {
    width: usize,
    height: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    fn new(values: &[f64], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sum = vec![0.0; stride * (height + 1)];
        let mut sum_sq = vec![0.0; stride * (height + 1)];

        for y in 0..height {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..width {
                let v = values[y * width + x];
                row += v;
                row_sq += v * v;
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[at - stride] + row;
                sum_sq[at] = sum_sq[at - stride] + row_sq;
            }
        }

        Self {
            width,
            height,
            sum,
            sum_sq,
        }
    }

    /// Mean and standard deviation of the window centred on (x, y),
    /// clipped to the image
    fn stats(&self, x: usize, y: usize, radius: usize) -> (f64, f64) {
        let stride = self.width + 1;
        let x0 = x.saturating_sub(radius);
        let y0 = y.saturating_sub(radius);
        let x1 = (x + radius + 1).min(self.width);
        let y1 = (y + radius + 1).min(self.height);
        let area = ((x1 - x0) * (y1 - y0)) as f64;

        let rect = |table: &[f64]| {
            table[y1 * stride + x1] - table[y0 * stride + x1] - table[y1 * stride + x0]
                + table[y0 * stride + x0]
        };

        let mean = rect(&self.sum) / area;
        let variance = (rect(&self.sum_sq) / area - mean * mean).max(0.0);
        (mean, variance.sqrt())
    }
}

/// Grayscale, local-adaptive plus global binarization
#[derive(Debug, Default)]
pub struct BinarizationStage {
    config: BinarizationConfig,
}

impl BinarizationStage {
    pub fn new(config: BinarizationConfig) -> Self {
        Self { config }
    }

    fn to_values(gray: &GrayImage) -> Vec<f64> {
        gray.pixels().map(|p| p.0[0] as f64).collect()
    }

    /// Stretch every pixel away from its local window mean
    fn stretch(&self, gray: &GrayImage, radius: usize) -> Vec<f64> {
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        let values = Self::to_values(gray);
        let integral = Integral::new(&values, width, height);
        let factor = self.config.contrast_factor as f64;

        let mut stretched = Vec::with_capacity(values.len());
        for y in 0..height {
            for x in 0..width {
                let (mean, _) = integral.stats(x, y, radius);
                let v = (1.0 - factor) * mean + factor * values[y * width + x];
                stretched.push(v.clamp(0.0, 255.0).round());
            }
        }
        stretched
    }

    /// Ink mask (255) from the Sauvola surface of the stretched image
    fn local_mask(&self, gray: &GrayImage) -> GrayImage {
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        let radius = (self.config.window_size / 2) as usize;
        let stretched = self.stretch(gray, radius);
        let integral = Integral::new(&stretched, width, height);
        let k = self.config.k as f64;

        let mut mask = GrayImage::new(gray.width(), gray.height());
        for y in 0..height {
            for x in 0..width {
                let (mean, std_dev) = integral.stats(x, y, radius);
                let threshold = mean * (1.0 + k * (std_dev / DYNAMIC_RANGE - 1.0));
                if stretched[y * width + x] <= threshold {
                    mask.put_pixel(x as u32, y as u32, Luma([255]));
                }
            }
        }

        let radius = (self.config.kernel_size / 2) as u8;
        for _ in 0..self.config.dilate_iterations {
            mask = dilate(&mask, Norm::LInf, radius);
        }
        mask
    }

    /// Ink mask (255) from a single global level on the unstretched image
    fn global_mask(&self, gray: &GrayImage) -> GrayImage {
        let mut mask = GrayImage::new(gray.width(), gray.height());

        let (min, max) = gray
            .pixels()
            .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
        if self.config.global_threshold.is_none() && min >= max {
            return mask;
        }

        let level = self
            .config
            .global_threshold
            .unwrap_or_else(|| otsu_level(gray));
        for (x, y, pixel) in gray.enumerate_pixels() {
            if pixel.0[0] <= level {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }

    /// Binarize a grayscale image into dark ink on white
    pub fn binarize(&self, gray: &GrayImage) -> GrayImage {
        let local = self.local_mask(gray);
        let global = self.global_mask(gray);

        let mut output = GrayImage::new(gray.width(), gray.height());
        for (x, y, pixel) in output.enumerate_pixels_mut() {
            let ink = local.get_pixel(x, y).0[0] > 0 && global.get_pixel(x, y).0[0] > 0;
            *pixel = Luma([if ink { 0 } else { 255 }]);
        }
        output
    }
}

impl PipelineStage for BinarizationStage {
    fn process(
        &mut self,
        frame: &DynamicImage,
        _data: &mut FrameData,
        _ctx: &StageContext,
    ) -> StageResult<Option<DynamicImage>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(StageError::Processing("empty frame".to_string()));
        }
        let gray = frame.to_luma8();
        Ok(Some(DynamicImage::ImageLuma8(self.binarize(&gray))))
    }

    fn parameters(&self) -> Map<String, Value> {
        to_parameters(&self.config)
    }

    fn apply(&mut self, key: &str, value: &Value) -> StageResult<()> {
        match key {
            "contrast_factor" => self.config.contrast_factor = as_f32_in(key, value, 0.1, 5.0)?,
            "window_size" => self.config.window_size = as_odd_u32_in(key, value, 3, 101)?,
            "k" => self.config.k = as_f32_in(key, value, 0.0, 1.0)?,
            "kernel_size" => self.config.kernel_size = as_odd_u32_in(key, value, 1, 15)?,
            "dilate_iterations" => self.config.dilate_iterations = as_u32_in(key, value, 0, 10)?,
            "global_threshold" => {
                self.config.global_threshold = if value.is_null() {
                    None
                } else {
                    Some(as_u32_in(key, value, 0, 255)? as u8)
                }
            }
            other => return Err(StageError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }
}

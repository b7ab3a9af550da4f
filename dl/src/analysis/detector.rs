//! Batch image-quality detection
//!
//! An [`ImageQualityDetector`] looks at a whole batch of image files at once
//! (duplicate detection needs the full set) and returns one [`ImageFlags`]
//! per input file, in input order.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::AnalyzerError;
use crate::domain::Severity;

/// Image issue categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageIssueKind {
    Light,
    Dark,
    Blurry,
    ExactDuplicate,
    NearDuplicate,
    OddAspectRatio,
    LowInformation,
    Grayscale,
}

impl ImageIssueKind {
    /// All categories in reporting order
    pub const ALL: [ImageIssueKind; 8] = [
        ImageIssueKind::Light,
        ImageIssueKind::Dark,
        ImageIssueKind::Blurry,
        ImageIssueKind::ExactDuplicate,
        ImageIssueKind::NearDuplicate,
        ImageIssueKind::OddAspectRatio,
        ImageIssueKind::LowInformation,
        ImageIssueKind::Grayscale,
    ];

    pub fn title(self) -> &'static str {
        match self {
            ImageIssueKind::Light => "Bright images",
            ImageIssueKind::Dark => "Dark images",
            ImageIssueKind::Blurry => "Blurry images",
            ImageIssueKind::ExactDuplicate => "Exact duplicates",
            ImageIssueKind::NearDuplicate => "Near duplicates",
            ImageIssueKind::OddAspectRatio => "Odd aspect ratio",
            ImageIssueKind::LowInformation => "Low information",
            ImageIssueKind::Grayscale => "Grayscale images",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ImageIssueKind::ExactDuplicate => Severity::High,
            _ => Severity::Medium,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ImageIssueKind::Light => "Some images in your dataset are unusually bright.",
            ImageIssueKind::Dark => "Some images in your dataset are unusually dark.",
            ImageIssueKind::Blurry => "Some images in your dataset are blurry.",
            ImageIssueKind::ExactDuplicate => "Some images in your dataset are exact duplicates.",
            ImageIssueKind::NearDuplicate => "Some images in your dataset are near duplicates.",
            ImageIssueKind::OddAspectRatio => "Some images in your dataset have an odd aspect ratio.",
            ImageIssueKind::LowInformation => "Some images in your dataset have low information content.",
            ImageIssueKind::Grayscale => "Some images in your dataset are grayscale.",
        }
    }
}

/// Issues found for a single image
pub type ImageFlags = BTreeSet<ImageIssueKind>;

/// Detects quality issues over a batch of image files
pub trait ImageQualityDetector: Send + Sync {
    /// Returns exactly one entry per input path, in input order
    fn detect(&self, images: &[PathBuf]) -> Result<Vec<ImageFlags>, AnalyzerError>;
}

/// Thresholds for [`HeuristicDetector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Mean luma (0..1) above which an image is bright
    #[serde(rename = "light-threshold")]
    pub light_threshold: f32,

    /// Mean luma (0..1) below which an image is dark
    #[serde(rename = "dark-threshold")]
    pub dark_threshold: f32,

    /// Laplacian variance below which an image is blurry
    #[serde(rename = "blurry-threshold")]
    pub blurry_threshold: f64,

    /// Short side over long side below which the aspect ratio is odd
    #[serde(rename = "aspect-ratio-threshold")]
    pub aspect_ratio_threshold: f32,

    /// Luma histogram entropy (bits) below which an image has low information
    #[serde(rename = "low-information-threshold")]
    pub low_information_threshold: f64,

    /// Max Hamming distance between average hashes of near duplicates
    #[serde(rename = "near-duplicate-distance")]
    pub near_duplicate_distance: u32,

    /// Longest side images are scaled down to before blur detection
    #[serde(rename = "analysis-size")]
    pub analysis_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            light_threshold: 0.9,
            dark_threshold: 0.15,
            blurry_threshold: 60.0,
            aspect_ratio_threshold: 0.5,
            low_information_threshold: 2.0,
            near_duplicate_distance: 4,
            analysis_size: 256,
        }
    }
}

/// Per-image measurements
#[derive(Debug, Clone)]
struct ImageStats {
    mean_luma: f32,
    blur_score: Option<f64>,
    grayscale: bool,
    aspect: f32,
    entropy: f64,
    pixel_hash: u64,
    average_hash: u64,
}

/// Detector built on simple image statistics
#[derive(Debug, Clone, Default)]
pub struct HeuristicDetector {
    config: DetectorConfig,
}

impl HeuristicDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn measure(&self, path: &Path) -> Option<ImageStats> {
        let img = match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
            Ok(reader) => match reader.decode() {
                Ok(img) => img,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "measure: decode failed");
                    return None;
                }
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "measure: open failed");
                return None;
            }
        };
        if img.width() == 0 || img.height() == 0 {
            return None;
        }
        Some(self.stats(&img))
    }

    fn stats(&self, img: &DynamicImage) -> ImageStats {
        let rgb = img.to_rgb8();
        let luma = img.to_luma8();

        let grayscale = rgb.pixels().all(|p| p[0] == p[1] && p[1] == p[2]);

        let mut histogram = [0u64; 256];
        let mut total = 0u64;
        for p in luma.pixels() {
            histogram[p[0] as usize] += 1;
            total += p[0] as u64;
        }
        let count = (luma.width() as u64 * luma.height() as u64) as f64;
        let mean_luma = (total as f64 / count / 255.0) as f32;
        let entropy = histogram
            .iter()
            .filter(|&&n| n > 0)
            .map(|&n| {
                let p = n as f64 / count;
                -p * p.log2()
            })
            .sum();

        let (w, h) = (img.width(), img.height());
        let aspect = w.min(h) as f32 / w.max(h) as f32;

        let size = self.config.analysis_size.max(8);
        let scaled = if w > size || h > size {
            img.thumbnail(size, size).to_luma8()
        } else {
            luma.clone()
        };
        let blur_score = laplacian_variance(&scaled);

        let mut hasher = DefaultHasher::new();
        (w, h).hash(&mut hasher);
        rgb.as_raw().hash(&mut hasher);

        ImageStats {
            mean_luma,
            blur_score,
            grayscale,
            aspect,
            entropy,
            pixel_hash: hasher.finish(),
            average_hash: average_hash(&luma),
        }
    }

    fn flags_for(&self, stats: &ImageStats) -> ImageFlags {
        let c = &self.config;
        let mut flags = ImageFlags::new();
        if stats.mean_luma > c.light_threshold {
            flags.insert(ImageIssueKind::Light);
        }
        if stats.mean_luma < c.dark_threshold {
            flags.insert(ImageIssueKind::Dark);
        }
        if stats.blur_score.is_some_and(|score| score < c.blurry_threshold) {
            flags.insert(ImageIssueKind::Blurry);
        }
        if stats.aspect < c.aspect_ratio_threshold {
            flags.insert(ImageIssueKind::OddAspectRatio);
        }
        if stats.entropy < c.low_information_threshold {
            flags.insert(ImageIssueKind::LowInformation);
        }
        if stats.grayscale {
            flags.insert(ImageIssueKind::Grayscale);
        }
        flags
    }
}

impl ImageQualityDetector for HeuristicDetector {
    fn detect(&self, images: &[PathBuf]) -> Result<Vec<ImageFlags>, AnalyzerError> {
        debug!(count = images.len(), "HeuristicDetector::detect: called");
        let stats: Vec<Option<ImageStats>> = images.iter().map(|p| self.measure(p)).collect();
        let mut flags: Vec<ImageFlags> = stats
            .iter()
            .map(|s| s.as_ref().map(|s| self.flags_for(s)).unwrap_or_default())
            .collect();

        // Exact duplicates: every member of a group sharing a pixel hash
        let mut groups: HashMap<u64, Vec<usize>> = HashMap::new();
        for (i, s) in stats.iter().enumerate() {
            if let Some(s) = s {
                groups.entry(s.pixel_hash).or_default().push(i);
            }
        }
        for members in groups.values().filter(|m| m.len() > 1) {
            for &i in members {
                flags[i].insert(ImageIssueKind::ExactDuplicate);
            }
        }

        // Near duplicates: close average hashes, exact copies of each other excluded
        for i in 0..stats.len() {
            let Some(a) = &stats[i] else { continue };
            for j in (i + 1)..stats.len() {
                let Some(b) = &stats[j] else { continue };
                if a.pixel_hash == b.pixel_hash {
                    continue;
                }
                if (a.average_hash ^ b.average_hash).count_ones() <= self.config.near_duplicate_distance {
                    flags[i].insert(ImageIssueKind::NearDuplicate);
                    flags[j].insert(ImageIssueKind::NearDuplicate);
                }
            }
        }

        Ok(flags)
    }
}

/// Variance of the 4-neighbour Laplacian; `None` for images too small to measure
fn laplacian_variance(img: &GrayImage) -> Option<f64> {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return None;
    }
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = img.get_pixel(x, y)[0] as f64;
            let l = 4.0 * c
                - img.get_pixel(x - 1, y)[0] as f64
                - img.get_pixel(x + 1, y)[0] as f64
                - img.get_pixel(x, y - 1)[0] as f64
                - img.get_pixel(x, y + 1)[0] as f64;
            sum += l;
            sum_sq += l * l;
            n += 1.0;
        }
    }
    let mean = sum / n;
    Some(sum_sq / n - mean * mean)
}

/// 64-bit average hash of an 8x8 downscale
fn average_hash(img: &GrayImage) -> u64 {
    let small = image::imageops::resize(img, 8, 8, FilterType::Triangle);
    let mean = small.pixels().map(|p| p[0] as u32).sum::<u32>() / 64;
    small
        .pixels()
        .enumerate()
        .fold(0u64, |acc, (i, p)| if p[0] as u32 > mean { acc | (1 << i) } else { acc })
}

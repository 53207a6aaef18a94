//! Compression ladder for OCR retries.
//!
//! The ladder is an immutable, ordered list of presets, mildest first. It is
//! shared freely between runs; nothing ever mutates it after construction.

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attachments::mime::is_ocr_image;
use crate::error::{ConfigError, OcrError};

/// One image-degradation preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionLevel {
    pub name: String,
    /// JPEG quality, 1-100.
    pub quality: u8,
    /// Longest edge after resizing; `None` keeps the original size.
    pub max_dimension: Option<u32>,
    pub strip_metadata: bool,
    pub grayscale: bool,
}

impl CompressionLevel {
    pub fn new(name: &str, quality: u8, max_dimension: Option<u32>, grayscale: bool) -> Self {
        Self {
            name: name.to_string(),
            quality: quality.clamp(1, 100),
            max_dimension,
            strip_metadata: true,
            grayscale,
        }
    }

    /// The untouched input.
    pub fn original() -> Self {
        Self {
            name: "original".to_string(),
            quality: 100,
            max_dimension: None,
            strip_metadata: false,
            grayscale: false,
        }
    }

    /// Whether this level leaves the input bytes as they are.
    pub fn is_passthrough(&self) -> bool {
        self.quality >= 100 && self.max_dimension.is_none() && !self.strip_metadata && !self.grayscale
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionLadder {
    levels: Arc<[CompressionLevel]>,
    aggressive_from: usize,
}

impl CompressionLadder {
    /// Build a ladder. `aggressive_from` is the first level considered
    /// aggressive and is clamped into range.
    pub fn new(levels: Vec<CompressionLevel>, aggressive_from: usize) -> Result<Self, ConfigError> {
        if levels.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "compression_ladder".to_string(),
                message: "at least one level is required".to_string(),
            });
        }
        let aggressive_from = aggressive_from.min(levels.len() - 1);
        Ok(Self {
            levels: levels.into(),
            aggressive_from,
        })
    }

    pub fn levels(&self) -> &[CompressionLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, index: usize) -> Option<&CompressionLevel> {
        self.levels.get(index)
    }

    /// Index of the most aggressive level.
    pub fn last_index(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn aggressive_from(&self) -> usize {
        self.aggressive_from
    }
}

impl Default for CompressionLadder {
    fn default() -> Self {
        Self {
            levels: vec![
                CompressionLevel::original(),
                CompressionLevel::new("light", 85, Some(3000), false),
                CompressionLevel::new("medium", 70, Some(2000), false),
                CompressionLevel::new("heavy", 55, Some(1600), true),
                CompressionLevel::new("maximum", 40, Some(1200), true),
            ]
            .into(),
            aggressive_from: 2,
        }
    }
}

/// Apply a level to the input.
///
/// Only decodable raster images are transformed. Other content (PDFs) is
/// handed to OCR unchanged at every level. Re-encoding to JPEG drops any
/// embedded metadata.
pub fn compress(bytes: &[u8], content_type: &str, level: &CompressionLevel) -> Result<Vec<u8>, OcrError> {
    if level.is_passthrough() || !is_ocr_image(content_type) {
        return Ok(bytes.to_vec());
    }

    let failed = |reason: String| OcrError::Compression {
        level: level.name.clone(),
        reason,
    };

    let mut img = image::load_from_memory(bytes).map_err(|e| failed(format!("decode: {e}")))?;

    if let Some(max) = level.max_dimension {
        if img.width() > max || img.height() > max {
            img = img.resize(max, max, FilterType::Triangle);
        }
    }
    if level.grayscale {
        img = img.grayscale();
    }

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, level.quality);
    let encoded = if level.grayscale {
        img.to_luma8().write_with_encoder(encoder)
    } else {
        img.to_rgb8().write_with_encoder(encoder)
    };
    encoded.map_err(|e| failed(format!("encode: {e}")))?;

    debug!(
        level = %level.name,
        from_bytes = bytes.len(),
        to_bytes = buffer.len(),
        width = img.width(),
        height = img.height(),
        "Compressed OCR input"
    );
    Ok(buffer)
}

//! Synthetic test card source.
//!
//! Renders colour bars with a sweeping cursor and a binary frame counter
//! along the bottom edge, then JPEG-encodes the result. Useful when no
//! capture device is available and for checking that clients are seeing
//! fresh frames: the cursor moves and the counter changes on every tick.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use super::FrameSource;
use crate::error::{CastError, Result, SourceError};

const BARS: [[u8; 3]; 8] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
    [16, 16, 16],
];

const COUNTER_BITS: u32 = 16;
const SWEEP_STEP: u32 = 8;
const MAX_DIMENSION: u32 = u16::MAX as u32;

/// Size and quality of the generated test card.
#[derive(Debug, Clone)]
pub struct PatternConfig {
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1–100.
    pub quality: u8,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            quality: 80,
        }
    }
}

pub struct PatternSource {
    config: PatternConfig,
    tick: u64,
    last_len: usize,
}

impl PatternSource {
    pub fn new(config: PatternConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(CastError::SourceInit("pattern size must be non-zero".into()));
        }
        if config.width > MAX_DIMENSION || config.height > MAX_DIMENSION {
            return Err(CastError::SourceInit(format!(
                "pattern size {}x{} exceeds JPEG limits",
                config.width, config.height
            )));
        }
        if !(1..=100).contains(&config.quality) {
            return Err(CastError::SourceInit(format!(
                "JPEG quality {} out of range 1-100",
                config.quality
            )));
        }

        Ok(Self {
            config,
            tick: 0,
            last_len: 0,
        })
    }

    fn render(&self) -> RgbImage {
        let PatternConfig { width, height, .. } = self.config;
        let bar_width = (width / BARS.len() as u32).max(1);
        let counter_top = height - (height / 8).max(1);
        let cell_width = (width / COUNTER_BITS).max(1);
        let sweep = (self.tick as u32).wrapping_mul(SWEEP_STEP) % width;

        RgbImage::from_fn(width, height, |x, y| {
            if y >= counter_top {
                let bit = (x / cell_width).min(COUNTER_BITS - 1);
                let on = (self.tick >> (COUNTER_BITS - 1 - bit)) & 1 == 1;
                return if on { Rgb([235, 235, 235]) } else { Rgb([16, 16, 16]) };
            }
            if x.abs_diff(sweep) < SWEEP_STEP / 2 {
                return Rgb([255, 255, 255]);
            }
            let bar = ((x / bar_width) as usize).min(BARS.len() - 1);
            Rgb(BARS[bar])
        })
    }
}

impl FrameSource for PatternSource {
    fn produce(&mut self) -> std::result::Result<Bytes, SourceError> {
        let image = self.render();
        self.tick = self.tick.wrapping_add(1);

        let mut encoded = Vec::with_capacity(self.last_len);
        JpegEncoder::new_with_quality(&mut encoded, self.config.quality)
            .encode_image(&image)
            .map_err(|e| SourceError::Unavailable(format!("JPEG encode failed: {e}")))?;
        self.last_len = encoded.len();

        Ok(Bytes::from(encoded))
    }

    fn describe(&self) -> String {
        format!(
            "test pattern {}x{} q{}",
            self.config.width, self.config.height, self.config.quality
        )
    }
}

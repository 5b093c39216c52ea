//! Frame sources.
//!
//! A source hands the producer one complete, already-encoded image per
//! call. Everything about acquisition (device access, compression, retry
//! inside the device) stays behind the [`FrameSource`] trait.
//!
//! ## Available sources
//!
//! | Selector | Source | Output |
//! |----------|--------|--------|
//! | `pattern`, `pattern:WxH` | [`PatternSource`] | Synthetic moving test card, JPEG |
//! | `<directory>` | [`DirectorySource`] | `.jpg`/`.jpeg` files, cycled in name order |
//!
//! Closures returning `Result<Bytes, SourceError>` are sources too, which
//! is how embedders plug in their own capture pipeline.

pub mod directory;
pub mod pattern;

use std::path::PathBuf;

use bytes::Bytes;

use crate::error::{CastError, Result, SourceError};

pub use directory::DirectorySource;
pub use pattern::{PatternConfig, PatternSource};

/// Producer of encoded image payloads.
///
/// `produce` is called by the producer thread at a fixed cadence. A
/// [`SourceError`] means "nothing this tick"; the previous frame keeps
/// being served.
pub trait FrameSource: Send {
    fn produce(&mut self) -> std::result::Result<Bytes, SourceError>;

    /// Short human-readable name for logs.
    fn describe(&self) -> String {
        "custom source".to_string()
    }
}

impl<F> FrameSource for F
where
    F: FnMut() -> std::result::Result<Bytes, SourceError> + Send,
{
    fn produce(&mut self) -> std::result::Result<Bytes, SourceError> {
        self()
    }
}

/// Parsed source selector, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Pattern { width: u32, height: u32 },
    Directory(PathBuf),
}

impl SourceSpec {
    /// Parse a selector string.
    ///
    /// `pattern` uses the default 640x480 test card; `pattern:WxH` picks
    /// the size. Anything else is treated as a directory path.
    pub fn parse(selector: &str) -> Result<Self> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Err(CastError::SourceInit("empty source selector".to_string()));
        }

        if selector == "pattern" {
            let defaults = PatternConfig::default();
            return Ok(SourceSpec::Pattern {
                width: defaults.width,
                height: defaults.height,
            });
        }

        if let Some(size) = selector.strip_prefix("pattern:") {
            let (width, height) = parse_size(size).ok_or_else(|| {
                CastError::SourceInit(format!("invalid pattern size '{size}', expected WxH"))
            })?;
            return Ok(SourceSpec::Pattern { width, height });
        }

        Ok(SourceSpec::Directory(PathBuf::from(selector)))
    }

    /// Open the selected source. Failure here is fatal for startup.
    pub fn open(&self) -> Result<Box<dyn FrameSource>> {
        let source: Box<dyn FrameSource> = match self {
            SourceSpec::Pattern { width, height } => Box::new(PatternSource::new(PatternConfig {
                width: *width,
                height: *height,
                ..PatternConfig::default()
            })?),
            SourceSpec::Directory(path) => Box::new(DirectorySource::open(path)?),
        };
        tracing::info!(source = %source.describe(), "frame source opened");
        Ok(source)
    }
}

fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.split_once(['x', 'X'])?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

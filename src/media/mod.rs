//! Media Processing
//!
//! Conversion planning, the external transcoder wrapper, technical metadata
//! probing and preview generation. Everything that touches pixels or samples
//! lives here; the service layer only sequences these steps.

pub mod audio_preview;
pub mod image_preview;
pub mod planner;
pub mod probe;
pub mod transcoder;

pub use planner::{plan_conversion, ConversionPlan};
pub use probe::extract_tech_metadata;
pub use transcoder::Transcoder;

/// Preview bounding box for image collections.
pub const IMAGE_PREVIEW_SIZE: u32 = 200;
/// Waveform preview dimensions for audio collections.
pub const AUDIO_PREVIEW_WIDTH: u32 = 200;
pub const AUDIO_PREVIEW_HEIGHT: u32 = 120;
/// JPEG quality used for previews written by the pure-Rust fallback path.
pub const PREVIEW_JPEG_QUALITY: u8 = 75;

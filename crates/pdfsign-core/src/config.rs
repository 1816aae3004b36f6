//! Tunable constants for placement, mapping and upload limits
//!
//! Defaults reproduce the visual tuning of the signing UI. `x_nudge` and the
//! 2:1 footprint aspect are empirical and are candidates for calibration.

use serde::{Deserialize, Serialize};

/// Upload size limit for documents (10MB)
pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Brightness above which a pixel is treated as background
pub const DEFAULT_THRESHOLD: u8 = 240;

/// Base signature footprint in preview pixels at scale 1.0
pub const BASE_FOOTPRINT_WIDTH: f64 = 200.0;

/// Footprint height as a fraction of its width (2:1)
pub const FOOTPRINT_ASPECT: f64 = 0.5;

/// Horizontal correction in document units applied after mapping
pub const X_NUDGE: f64 = -8.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignConfig {
    /// Documents larger than this are rejected before decoding
    pub max_file_bytes: usize,
    /// Matting threshold used when none is given
    pub default_threshold: u8,
    /// Pixels per point when rasterizing previews
    pub render_scale: f64,
    /// Base footprint width in preview pixels (height follows `FOOTPRINT_ASPECT`)
    pub base_footprint_width: f64,
    /// Offset subtracted from a click so the nominal footprint centers under the cursor
    pub click_anchor: (f64, f64),
    pub min_scale: f64,
    pub max_scale: f64,
    /// Scale change per pixel of horizontal resize drag
    pub resize_factor: f64,
    pub x_nudge: f64,
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: MAX_FILE_BYTES,
            default_threshold: DEFAULT_THRESHOLD,
            render_scale: 1.0,
            base_footprint_width: BASE_FOOTPRINT_WIDTH,
            click_anchor: (50.0, 25.0),
            min_scale: 0.5,
            max_scale: 2.0,
            resize_factor: 0.01,
            x_nudge: X_NUDGE,
        }
    }
}

impl SignConfig {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// Recognized variables:
    /// - PDFSIGN_MAX_FILE_BYTES: upload limit in bytes
    /// - PDFSIGN_THRESHOLD: default matting threshold (0-255)
    /// - PDFSIGN_RENDER_SCALE: preview render scale
    /// - PDFSIGN_X_NUDGE: horizontal correction in points
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("PDFSIGN_MAX_FILE_BYTES") {
            config.max_file_bytes = v;
        }
        if let Some(v) = env_parse::<u8>("PDFSIGN_THRESHOLD") {
            config.default_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("PDFSIGN_RENDER_SCALE").filter(|s| *s > 0.0) {
            config.render_scale = v;
        }
        if let Some(v) = env_parse::<f64>("PDFSIGN_X_NUDGE") {
            config.x_nudge = v;
        }

        config
    }

    /// Parse a JSON config; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_max_file_bytes(mut self, bytes: usize) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Footprint height in preview pixels at scale 1.0
    pub fn base_footprint_height(&self) -> f64 {
        self.base_footprint_width * FOOTPRINT_ASPECT
    }

    pub fn clamp_scale(&self, scale: f64) -> f64 {
        scale.clamp(self.min_scale, self.max_scale)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

//! Monitor configuration, resolved once at startup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::StreamConstraints;
use crate::detection::DetectOptions;
use crate::error::{Error, Result};
use crate::inference::TICK_INTERVAL;
use crate::models::ModelManifest;
use crate::overlay::RenderMode;
use crate::types::DisplaySize;

/// Everything a [`FaceMonitor`](crate::FaceMonitor) needs to know up front.
///
/// Every field has a default, so a JSON config file only needs the keys it
/// wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Logical render size; overlays are scaled to it.
    pub display: DisplaySize,
    pub tick_interval_ms: u64,
    /// Preferred camera frame width.
    pub width_hint: u32,
    pub render_mode: RenderMode,
    pub detect: DetectOptions,
    /// Happy glyph fade duration.
    pub fade_ms: u64,
    pub models: ModelManifest,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            display: DisplaySize::new(640, 480),
            tick_interval_ms: TICK_INTERVAL.as_millis() as u64,
            width_hint: 300,
            render_mode: RenderMode::Normal,
            detect: DetectOptions::default(),
            fade_ms: 300,
            models: ModelManifest::default(),
        }
    }
}

impl MonitorConfig {
    /// Read a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.display.is_empty() {
            return Err(Error::Config(format!(
                "display size must be non-zero, got {}",
                self.display
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Switch to debug mode if the query string carries a `debug` key.
    /// An absent key leaves the configured mode alone.
    pub fn apply_query(&mut self, query: &str) {
        if RenderMode::from_query(query).is_debug() {
            self.render_mode = RenderMode::Debug;
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }

    pub fn constraints(&self) -> StreamConstraints {
        StreamConstraints {
            video: true,
            audio: false,
            width_hint: Some(self.width_hint).filter(|w| *w > 0),
        }
    }
}

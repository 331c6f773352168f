//! YAML configuration file.
//!
//! ```yaml
//! canvas_size: 112
//! default_filter: Hop
//! output_dir: ./exports
//! export:
//!   quality: 10
//!   workers: 5
//! ```
//!
//! Every key is optional.

use crate::export::ExportSettings;
use crate::filters;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Side of the square preview and export canvas, in pixels
    pub canvas_size: u32,
    /// Filter selected at startup
    pub default_filter: String,
    /// Directory exported GIFs are written to
    pub output_dir: PathBuf,
    pub export: ExportSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            canvas_size: 112,
            default_filter: filters::default_filter().name.to_string(),
            output_dir: PathBuf::from("."),
            export: ExportSettings::default(),
        }
    }
}

impl Config {
    /// Reads `path`, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path).with_context(|| format!("failed to read config {:?}", path))?;
        let config = Self::parse(&content).with_context(|| format!("invalid config {:?}", path))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not a mapping.
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.canvas_size == 0 {
            bail!("canvas_size must be positive");
        }
        filters::lookup(&self.default_filter)?;
        if !(1..=30).contains(&self.export.quality) {
            bail!("export.quality must be between 1 and 30, got {}", self.export.quality);
        }
        if self.export.workers == 0 {
            bail!("export.workers must be positive");
        }
        Ok(())
    }
}

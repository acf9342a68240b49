use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::modifiers::{MAX_MODIFIERS, MIN_MODIFIER_WEIGHT};
use crate::widget::FeedbackKind;
use crate::{Result, SurfaceError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub pages: Vec<PageConfig>,
}

impl AppConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

impl EngineConfig {
    /// Rejects modifier vocabularies the code arithmetic cannot represent.
    pub fn validate(&self) -> Result<()> {
        if self.modifiers.len() > MAX_MODIFIERS {
            return Err(SurfaceError::msg(format!(
                "{} modifiers configured, at most {MAX_MODIFIERS} are supported",
                self.modifiers.len()
            )));
        }
        if let Some(modifier) = self
            .modifiers
            .iter()
            .find(|modifier| modifier.weight < MIN_MODIFIER_WEIGHT)
        {
            return Err(SurfaceError::msg(format!(
                "modifier {} has weight {}; weights below {MIN_MODIFIER_WEIGHT} clash with touch and toggle",
                modifier.name, modifier.weight
            )));
        }
        Ok(())
    }
}

/// Settings shared by every page and surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Folder holding `.stp` step-size files. Calibrated files are written here.
    pub step_size_folder: Option<PathBuf>,
    /// Named modifier vocabulary in declaration order.
    pub modifiers: Vec<ModifierWeight>,
    /// How long a `Hold` binding must be held before it fires.
    pub hold_delay_ms: u64,
    pub ticks: TickConfig,
    /// Nesting guard for included, associated and sub-zone expansion.
    pub max_zone_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_size_folder: None,
            modifiers: ModifierWeight::standard_set(),
            hold_delay_ms: 1000,
            ticks: TickConfig::default(),
            max_zone_depth: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierWeight {
    pub name: String,
    pub weight: u32,
}

impl ModifierWeight {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }

    /// Weights start at 4: codes 1 and 2 belong to touch and toggle.
    pub fn standard_set() -> Vec<Self> {
        [
            ("Shift", 4),
            ("Option", 8),
            ("Control", 16),
            ("Alt", 32),
            ("Flip", 64),
            ("Global", 128),
            ("Marker", 256),
            ("Nudge", 512),
            ("Zoom", 1024),
            ("Scrub", 2048),
        ]
        .into_iter()
        .map(|(name, weight)| Self::new(name, weight))
        .collect()
    }
}

/// Tick thresholds used when a stepped parameter has no explicit tick table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Base tick count keyed by the size of the stepped-value table.
    pub base_tick_counts: BTreeMap<usize, u32>,
    /// Used whenever no tick table could be derived at all.
    pub default_tick_count: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        let base_tick_counts = [
            (2, 250),
            (3, 150),
            (4, 125),
            (5, 100),
            (6, 90),
            (7, 80),
            (8, 70),
            (9, 60),
            (10, 50),
            (11, 45),
            (12, 40),
            (13, 35),
            (14, 30),
            (15, 25),
            (16, 20),
            (17, 15),
            (18, 10),
            (19, 5),
            (20, 1),
        ]
        .into_iter()
        .collect();

        Self {
            base_tick_counts,
            default_tick_count: 10,
        }
    }
}

impl TickConfig {
    /// Largest configured size not above `size`, else the smallest entry.
    pub fn base_tick_count(&self, size: usize) -> u32 {
        self.base_tick_counts
            .range(..=size)
            .next_back()
            .or_else(|| self.base_tick_counts.iter().next())
            .map(|(_, count)| *count)
            .unwrap_or(self.default_tick_count)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub name: String,
    pub surfaces: Vec<SurfaceConfig>,
}

/// One physical (or virtual) control surface on a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub name: String,
    /// Folder scanned recursively for `.zon` files.
    pub zone_folder: Option<PathBuf>,
    pub channel_count: u32,
    pub channel_offset: u32,
    /// When set the surface owns its own modifier state instead of the page's.
    pub local_modifiers: bool,
    pub widgets: Vec<WidgetConfig>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            zone_folder: None,
            channel_count: 1,
            channel_offset: 0,
            local_modifiers: false,
            widgets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    pub name: String,
    /// Channel number; derived from trailing digits of the name when absent.
    pub channel: Option<u32>,
    pub feedback: FeedbackKind,
    /// Default relative step for encoders bound to this widget.
    pub step_size: f64,
    /// Default accelerated delta table for encoders bound to this widget.
    pub acceleration: Vec<f64>,
}

impl WidgetConfig {
    pub fn new(name: impl Into<String>, feedback: FeedbackKind) -> Self {
        Self {
            name: name.into(),
            feedback,
            ..Self::default()
        }
    }
}

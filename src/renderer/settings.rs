//! Pipeline Settings
//!
//! Configuration consumed by [`Pipeline`] and its modules. Every field has a
//! default matching the stock deferred pipeline, so the usual entry point is
//! `PipelineSettings::default()` with a few overrides.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_deferred::renderer::settings::{PipelineSettings, VisibilityMasks};
//!
//! let settings = PipelineSettings {
//!     shadow_number: 4,
//!     shadow_resolution: 2048,
//!     masks: VisibilityMasks { forward: 0x0000_ff00, ..Default::default() },
//!     ..Default::default()
//! };
//! ```
//!
//! Settings are also the `settings` block of a declarative pipeline
//! description and deserialize from JSON; masks are hex strings there.
//!
//! [`Pipeline`]: crate::renderer::graph::pipeline::Pipeline

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// VisibilityMasks
// ---------------------------------------------------------------------------

/// Node-mask bits that route scene content to the different passes.
///
/// | Mask            | Default        | Consumed by                       |
/// |-----------------|----------------|-----------------------------------|
/// | `deferred`      | `0x00ff0000`   | GBuffer / input stages            |
/// | `forward`       | `0x0000ff00`   | The `DefaultForward` camera       |
/// | `shadow_caster` | `0x01000000`   | Shadow cascade cameras            |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityMasks {
    #[serde(deserialize_with = "deserialize_mask")]
    pub deferred: u32,
    #[serde(deserialize_with = "deserialize_mask")]
    pub forward: u32,
    #[serde(deserialize_with = "deserialize_mask")]
    pub shadow_caster: u32,
}

impl Default for VisibilityMasks {
    fn default() -> Self {
        Self {
            deferred: 0x00ff_0000,
            forward: 0x0000_ff00,
            shadow_caster: 0x0100_0000,
        }
    }
}

/// Parses a mask given either as a JSON number or a hex string (`"ff00"`,
/// `"0x00ff0000"`).
pub fn parse_mask(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).ok()
}

fn deserialize_mask<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaskRepr {
        Number(u32),
        Text(String),
    }

    match MaskRepr::deserialize(deserializer)? {
        MaskRepr::Number(n) => Ok(n),
        MaskRepr::Text(s) => parse_mask(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex mask '{s}'"))),
    }
}

// ---------------------------------------------------------------------------
// PipelineSettings
// ---------------------------------------------------------------------------

/// Global configuration of the stage orchestrator.
///
/// # Fields
///
/// | Field                     | Description                                         | Default       |
/// |---------------------------|-----------------------------------------------------|---------------|
/// | `width` / `height`        | Base resolution used when none is supplied          | 1920 × 1080   |
/// | `min_resolution`          | Floor for scaled (low-res) work/deferred stages     | 1920 × 1080   |
/// | `min_color_attachments`   | Color attachments a device must offer               | 4             |
/// | `masks`                   | Visibility masks                                    | see above     |
/// | `shadow_number`           | Cascade count (0 disables the shadow module)        | 0             |
/// | `shadow_resolution`       | Edge length of each cascade layer                   | 1024          |
/// | `shadow_min_extent`       | Minimum light-space box extent per axis             | 0.1           |
/// | `light_capacity`          | Rows in the light parameter texture                 | 1024          |
/// | `max_lights_in_pass`      | Lights shaded per lighting pass                     | 24            |
/// | `light_prune_interval`    | Frames between registry pruning                     | 10            |
/// | `light_prune_threshold`   | Frames a light may stay unseen                      | 5             |
/// | `clear_color`             | Runner clear color                                  | `[0,0,0,0]`   |
/// | `clear_depth`             | Runner clear depth                                  | 1.0           |
/// | `default_blit_size`       | Depth-blit destination when no viewport is known    | 1920 × 1080   |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    // === Resolution ===
    pub width: u32,
    pub height: u32,
    pub min_resolution: [u32; 2],

    // === Device requirements ===
    pub min_color_attachments: u32,

    // === Routing ===
    pub masks: VisibilityMasks,

    // === Shadows ===
    pub shadow_number: u32,
    pub shadow_resolution: u32,
    pub shadow_min_extent: f32,

    // === Lights ===
    pub light_capacity: usize,
    pub max_lights_in_pass: u32,
    pub light_prune_interval: u64,
    pub light_prune_threshold: u64,

    // === Runner defaults ===
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub default_blit_size: [u32; 2],
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            min_resolution: [1920, 1080],
            min_color_attachments: 4,
            masks: VisibilityMasks::default(),
            shadow_number: 0,
            shadow_resolution: 1024,
            shadow_min_extent: 0.1,
            light_capacity: 1024,
            max_lights_in_pass: 24,
            light_prune_interval: 10,
            light_prune_threshold: 5,
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            default_blit_size: [1920, 1080],
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceSettings
// ---------------------------------------------------------------------------

/// Options for requesting a headless device through
/// [`GraphicsContext`](crate::renderer::core::context::GraphicsContext).
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// Force a specific wgpu backend (or `None` for automatic selection).
    pub backends: Option<wgpu::Backends>,
    /// GPU adapter selection preference.
    pub power_preference: wgpu::PowerPreference,
    /// Required wgpu features.
    pub required_features: wgpu::Features,
    /// Required wgpu limits.
    pub required_limits: wgpu::Limits,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            backends: None,
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_accept_hex_strings_and_numbers() {
        let json = r#"{ "deferred": "ff0000", "forward": 65280, "shadow_caster": "0x01000000" }"#;
        let masks: VisibilityMasks = serde_json::from_str(json).unwrap();
        assert_eq!(masks.deferred, 0x00ff_0000);
        assert_eq!(masks.forward, 0x0000_ff00);
        assert_eq!(masks.shadow_caster, 0x0100_0000);
    }

    #[test]
    fn partial_settings_keep_defaults() {
        let settings: PipelineSettings =
            serde_json::from_str(r#"{ "width": 800, "shadow_number": 3 }"#).unwrap();
        assert_eq!(settings.width, 800);
        assert_eq!(settings.height, 1080);
        assert_eq!(settings.shadow_number, 3);
        assert_eq!(settings.light_capacity, 1024);
    }

    #[test]
    fn invalid_mask_is_rejected() {
        assert!(parse_mask("zz").is_none());
        assert!(serde_json::from_str::<VisibilityMasks>(r#"{ "deferred": "nothex" }"#).is_err());
    }
}

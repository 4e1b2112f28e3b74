use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use crate::error::ExtractError;
use crate::extract::transforms::OutputDtype;

/// Which tilt/psi pair drives the normal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationSource {
    Prior,
    Nominal,
}

impl FromStr for OrientationSource {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prior" => Ok(OrientationSource::Prior),
            "nominal" => Ok(OrientationSource::Nominal),
            other => Err(ExtractError::UnknownOrientation(other.to_string())),
        }
    }
}

/// The source representation crops are taken from. The scene modes pull a
/// named sub-object from the unit's segmentation container; in segment
/// mode all labels other than the item's own id are zeroed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Image,
    SceneBoundary,
    SceneSegment,
}

impl FromStr for SourceMode {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(SourceMode::Image),
            "scene_boundary" => Ok(SourceMode::SceneBoundary),
            "scene_segment" => Ok(SourceMode::SceneSegment),
            other => Err(ExtractError::UnknownSourceMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassCode {
    pub number: i32,
    pub name: String,
}

/// Label remapping knobs for region extraction, see
/// [`crate::normalize_bound_ids`].
#[derive(Debug, Clone, Deserialize)]
pub struct RemapConfig {
    pub min_id_old: i32,
    pub id_new: i32,
    #[serde(default)]
    pub id_conversion: Vec<(i32, i32)>,
}

/// Run configuration for the extraction tasks, usually deserialized from
/// a TOML file next to the annotation tables.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    /// Crop edge length in pixels of the original frame.
    pub box_size: i64,

    /// Signed distance from the nominal point to the crop center, along
    /// the normal. Zero or absent leaves the center on the point.
    #[serde(default)]
    pub particle_to_center: Option<f64>,

    #[serde(default = "default_orientation")]
    pub orientation: OrientationSource,
    #[serde(default)]
    pub reverse: bool,

    #[serde(default)]
    pub randomize_rot: bool,
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub std: Option<f64>,
    #[serde(default)]
    pub invert_contrast: bool,

    #[serde(default)]
    pub expand_particle: bool,
    #[serde(default = "default_true")]
    pub expand_region: bool,

    #[serde(default = "default_root_template")]
    pub root_template: String,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    #[serde(default)]
    pub name_suffix: String,
    #[serde(default = "default_regions_name")]
    pub regions_name: String,
    /// Filename prefix of region crops, distinct from the particle one.
    #[serde(default = "default_region_prefix")]
    pub region_name_prefix: String,

    /// Restrict the run to these units; empty means all.
    #[serde(default)]
    pub unit_ids: Vec<String>,

    /// Regex whose first capture group yields the unit id of a micrograph
    /// path in STAR sidecar tables; file stem when absent.
    #[serde(default)]
    pub tomo_id_pattern: Option<String>,

    /// Storage-root rewrite: path component shared by old and new layout,
    /// and the root it gets re-anchored under.
    #[serde(default)]
    pub path_common: Option<String>,
    #[serde(default)]
    pub path_new_root: Option<String>,

    #[serde(default)]
    pub class_code: Vec<ClassCode>,

    /// Binning of region images relative to the annotation frame.
    #[serde(default = "default_bin")]
    pub region_bin: f64,
    #[serde(default = "default_bin")]
    pub region_bin_factor: f64,

    #[serde(default)]
    pub remap: Option<RemapConfig>,
    #[serde(default)]
    pub dilate: Option<usize>,
    #[serde(default)]
    pub out_dtype: Option<OutputDtype>,

    /// Dry-run switch: everything is computed and recorded, crop files
    /// are not written.
    #[serde(default = "default_true")]
    pub write_crops: bool,
}

fn default_orientation() -> OrientationSource {
    OrientationSource::Prior
}

fn default_true() -> bool {
    true
}

fn default_bin() -> f64 {
    1.0
}

fn default_root_template() -> String {
    "particles_size-{size}".to_string()
}

fn default_name_prefix() -> String {
    "particle_".to_string()
}

fn default_regions_name() -> String {
    "regions".to_string()
}

fn default_region_prefix() -> String {
    "seg_".to_string()
}

impl ExtractConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        let config: ExtractConfig = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {:?}", path.as_ref()))?;
        Ok(config)
    }
}

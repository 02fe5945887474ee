//! Configuration loading and parsing.
//!
//! `spandrel.toml` carries two tables: `[layers]`, the semantic layer mapping
//! that tells the pipeline which CAD layers play which structural role, and
//! `[tolerances]`, the numeric knobs of the geometry passes. Every tolerance
//! has a built-in default matching common structural drawing practice, so an
//! empty or missing file yields a working configuration. Unknown fields are
//! ignored (TOML deserialization tolerance) to allow forward evolution, and a
//! parse error falls back to defaults rather than refusing to run.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// Structural role a layer can play. The recognised options are closed; a
/// layer with no role is ignored by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    Axis,
    Column,
    Wall,
    Beam,
    BeamLabel,
    BeamInSituLabel,
    ViewportTitle,
}

/// Layer-name lists per semantic role. Matching is exact on the layer name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SemanticLayerMap {
    #[serde(default)]
    pub axis: Vec<String>,
    #[serde(default)]
    pub column: Vec<String>,
    #[serde(default)]
    pub wall: Vec<String>,
    #[serde(default)]
    pub beam: Vec<String>,
    #[serde(default)]
    pub beam_label: Vec<String>,
    #[serde(default)]
    pub beam_in_situ_label: Vec<String>,
    /// Hinted layers for viewport title search; empty means "search every
    /// text layer" (heuristic fallback).
    #[serde(default)]
    pub viewport_title: Vec<String>,
}

impl SemanticLayerMap {
    pub fn has_role(&self, layer: &str, role: LayerRole) -> bool {
        let list = match role {
            LayerRole::Axis => &self.axis,
            LayerRole::Column => &self.column,
            LayerRole::Wall => &self.wall,
            LayerRole::Beam => &self.beam,
            LayerRole::BeamLabel => &self.beam_label,
            LayerRole::BeamInSituLabel => &self.beam_in_situ_label,
            LayerRole::ViewportTitle => &self.viewport_title,
        };
        list.iter().any(|name| name == layer)
    }
}

macro_rules! tolerance_defaults {
    ($($fn_name:ident -> $ty:ty = $value:expr;)*) => {
        $(const fn $fn_name() -> $ty { $value })*
    };
}

tolerance_defaults! {
    default_viewport_cluster -> f64 = 5000.0;
    default_title_ring_step -> f64 = 500.0;
    default_title_ring_max -> f64 = 25000.0;
    default_grid_axis_skew -> f64 = 10.0;
    default_merge_quantum -> f64 = 50.0;
    default_wall_gap_min -> f64 = 50.0;
    default_wall_gap_max -> f64 = 800.0;
    default_wall_gap_tol -> f64 = 10.0;
    default_beam_min_side_len -> f64 = 200.0;
    default_beam_gap_min -> f64 = 10.0;
    default_beam_gap_max -> f64 = 1200.0;
    default_beam_width_tol -> f64 = 2.5;
    default_beam_overlap_min -> f64 = 50.0;
    default_stitch_gap -> f64 = 2.0;
    default_collinear_merge_gap -> f64 = 600.0;
    default_extension_floor -> f64 = 600.0;
    default_obb_align -> f64 = 50.0;
    default_junction_grid -> f64 = 200.0;
    default_junction_arm_tol -> f64 = 150.0;
    default_label_hit_tol -> f64 = 20.0;
    default_run_offset_tol -> f64 = 200.0;
    default_run_sample_step -> f64 = 50.0;
    default_cut_edge_tol -> f64 = 10.0;
    default_min_fragment_len -> f64 = 50.0;
    default_anchor_probe -> f64 = 5.0;
}

fn default_wall_standard_thickness() -> Vec<f64> {
    vec![
        100.0, 120.0, 150.0, 180.0, 200.0, 240.0, 250.0, 300.0, 350.0, 370.0, 400.0, 500.0, 600.0,
    ]
}

fn default_wall_fallback_thickness() -> Vec<f64> {
    vec![100.0, 200.0, 240.0]
}

/// Numeric knobs of the geometry passes. All values in millimetres.
#[derive(Debug, Clone, Deserialize)]
pub struct Tolerances {
    /// Axis-box expansion used by viewport clustering.
    #[serde(default = "default_viewport_cluster")]
    pub viewport_cluster: f64,
    /// Ring step of the outward title search.
    #[serde(default = "default_title_ring_step")]
    pub title_ring_step: f64,
    /// Outer radius of the title search.
    #[serde(default = "default_title_ring_max")]
    pub title_ring_max: f64,
    /// Total rise below which a grid segment counts as horizontal (and the
    /// symmetric test for vertical).
    #[serde(default = "default_grid_axis_skew")]
    pub grid_axis_skew: f64,
    /// Quantisation grid of the merge-vector vote.
    #[serde(default = "default_merge_quantum")]
    pub merge_quantum: f64,
    #[serde(default = "default_wall_gap_min")]
    pub wall_gap_min: f64,
    #[serde(default = "default_wall_gap_max")]
    pub wall_gap_max: f64,
    /// Accepted deviation between a wall gap and a vocabulary thickness.
    #[serde(default = "default_wall_gap_tol")]
    pub wall_gap_tol: f64,
    #[serde(default = "default_wall_standard_thickness")]
    pub wall_standard_thickness: Vec<f64>,
    #[serde(default = "default_wall_fallback_thickness")]
    pub wall_fallback_thickness: Vec<f64>,
    /// Minimum length of a line taking part in the beam pair scan.
    #[serde(default = "default_beam_min_side_len")]
    pub beam_min_side_len: f64,
    #[serde(default = "default_beam_gap_min")]
    pub beam_gap_min: f64,
    #[serde(default = "default_beam_gap_max")]
    pub beam_gap_max: f64,
    /// Accepted deviation between a beam gap and a vocabulary width.
    #[serde(default = "default_beam_width_tol")]
    pub beam_width_tol: f64,
    /// Minimum longitudinal overlap of a side pair.
    #[serde(default = "default_beam_overlap_min")]
    pub beam_overlap_min: f64,
    /// Gap closed unconditionally by the post-cut collinear stitch.
    #[serde(default = "default_stitch_gap")]
    pub stitch_gap: f64,
    /// Largest gap bridged by the crossing-supported collinear merge.
    #[serde(default = "default_collinear_merge_gap")]
    pub collinear_merge_gap: f64,
    /// Lower bound of the end-extension search budget.
    #[serde(default = "default_extension_floor")]
    pub extension_floor: f64,
    /// Transverse slack of collinear and parallel merges.
    #[serde(default = "default_obb_align")]
    pub obb_align: f64,
    /// Cell size of junction clustering.
    #[serde(default = "default_junction_grid")]
    pub junction_grid: f64,
    /// Extra reach required before an arm counts at a junction.
    #[serde(default = "default_junction_arm_tol")]
    pub junction_arm_tol: f64,
    /// Local-coordinate slack of the label hit test.
    #[serde(default = "default_label_hit_tol")]
    pub label_hit_tol: f64,
    /// Perpendicular-offset window of attribute runs.
    #[serde(default = "default_run_offset_tol")]
    pub run_offset_tol: f64,
    /// Sampling step of run continuity checks.
    #[serde(default = "default_run_sample_step")]
    pub run_sample_step: f64,
    /// Edge tolerance of junction-box cutting.
    #[serde(default = "default_cut_edge_tol")]
    pub cut_edge_tol: f64,
    /// Fragments shorter than this are deleted at every stage boundary.
    #[serde(default = "default_min_fragment_len")]
    pub min_fragment_len: f64,
    /// Outward probe used by the anchored-beam test.
    #[serde(default = "default_anchor_probe")]
    pub anchor_probe: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            viewport_cluster: default_viewport_cluster(),
            title_ring_step: default_title_ring_step(),
            title_ring_max: default_title_ring_max(),
            grid_axis_skew: default_grid_axis_skew(),
            merge_quantum: default_merge_quantum(),
            wall_gap_min: default_wall_gap_min(),
            wall_gap_max: default_wall_gap_max(),
            wall_gap_tol: default_wall_gap_tol(),
            wall_standard_thickness: default_wall_standard_thickness(),
            wall_fallback_thickness: default_wall_fallback_thickness(),
            beam_min_side_len: default_beam_min_side_len(),
            beam_gap_min: default_beam_gap_min(),
            beam_gap_max: default_beam_gap_max(),
            beam_width_tol: default_beam_width_tol(),
            beam_overlap_min: default_beam_overlap_min(),
            stitch_gap: default_stitch_gap(),
            collinear_merge_gap: default_collinear_merge_gap(),
            extension_floor: default_extension_floor(),
            obb_align: default_obb_align(),
            junction_grid: default_junction_grid(),
            junction_arm_tol: default_junction_arm_tol(),
            label_hit_tol: default_label_hit_tol(),
            run_offset_tol: default_run_offset_tol(),
            run_sample_step: default_run_sample_step(),
            cut_edge_tol: default_cut_edge_tol(),
            min_fragment_len: default_min_fragment_len(),
            anchor_probe: default_anchor_probe(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub layers: SemanticLayerMap,
    #[serde(default)]
    pub tolerances: Option<Tolerances>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file string, kept for diagnostics.
    pub raw: Option<String>,
    pub layers: SemanticLayerMap,
    pub tolerances: Tolerances,
}

/// Best-effort config path following platform conventions: prefer a local
/// `spandrel.toml`, then the user config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("spandrel.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("spandrel").join("spandrel.toml");
    }
    PathBuf::from("spandrel.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(
                    target: "config",
                    path = %path.display(),
                    axis_layers = file.layers.axis.len(),
                    beam_layers = file.layers.beam.len(),
                    "config_loaded"
                );
                Ok(Config {
                    raw: Some(content),
                    layers: file.layers,
                    tolerances: file.tolerances.unwrap_or_default(),
                })
            }
            Err(e) => {
                // Parse error falls back to defaults rather than aborting.
                warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed");
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

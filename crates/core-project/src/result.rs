//! The final analysis artifact.
//!
//! Everything a consumer needs in one serializable record: the quantified
//! fragments plus the auxiliary tables (viewports, merge mappings, columns,
//! walls, junctions), the full error list, and per-stage timings. Stages
//! that have not run contribute empty tables.

use core_attrib::AttributedBeam;
use core_beams::IntersectionInfo;
use core_quantity::ViewportQuantities;
use core_report::AnalysisError;
use core_support::{Column, Wall};
use core_topology::Fragment;
use core_viewport::{MergeMapping, ViewportRegion};
use serde::Serialize;

use crate::{Project, Stage, StageResult};

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisResult {
    pub viewports: Vec<ViewportRegion>,
    pub mappings: Vec<MergeMapping>,
    pub columns: Vec<Column>,
    pub walls: Vec<Wall>,
    pub beams: Vec<AttributedBeam>,
    pub junctions: Vec<IntersectionInfo>,
    pub fragments: Vec<Fragment>,
    pub quantities: Vec<ViewportQuantities>,
    pub errors: Vec<AnalysisError>,
    pub timings: Vec<StageTiming>,
}

impl AnalysisResult {
    pub fn from_project(project: &Project) -> Self {
        let mut timings = Vec::new();
        let mut push_timing = |stage: Stage, elapsed: Option<f64>| {
            if let Some(elapsed_ms) = elapsed {
                timings.push(StageTiming {
                    stage: stage.name(),
                    elapsed_ms,
                });
            }
        };
        push_timing(Stage::SplitViews, elapsed(&project.viewports));
        push_timing(Stage::MergeViews, elapsed(&project.merge));
        push_timing(Stage::Supports, elapsed(&project.supports));
        push_timing(Stage::BeamRaw, elapsed(&project.beam_raw));
        push_timing(Stage::BeamGeometry, elapsed(&project.beam_geometry));
        push_timing(Stage::BeamAttributes, elapsed(&project.beam_attributes));
        push_timing(Stage::BeamTopology, elapsed(&project.beam_topology));
        push_timing(Stage::Quantities, elapsed(&project.quantities));

        Self {
            viewports: project
                .viewports
                .as_ref()
                .map(|s| s.value.clone())
                .unwrap_or_default(),
            mappings: project
                .merge
                .as_ref()
                .map(|s| s.value.mappings.clone())
                .unwrap_or_default(),
            columns: project
                .supports
                .as_ref()
                .map(|s| s.value.columns.clone())
                .unwrap_or_default(),
            walls: project
                .supports
                .as_ref()
                .map(|s| s.value.walls.clone())
                .unwrap_or_default(),
            beams: project
                .beam_attributes
                .as_ref()
                .map(|s| s.value.clone())
                .unwrap_or_default(),
            junctions: project
                .beam_geometry
                .as_ref()
                .map(|s| s.value.junctions.clone())
                .unwrap_or_default(),
            fragments: project
                .beam_topology
                .as_ref()
                .map(|s| s.value.clone())
                .unwrap_or_default(),
            quantities: project
                .quantities
                .as_ref()
                .map(|s| s.value.clone())
                .unwrap_or_default(),
            errors: project.all_errors(),
            timings,
        }
    }
}

fn elapsed<T>(slot: &Option<StageResult<T>>) -> Option<f64> {
    slot.as_ref().map(|s| s.elapsed_ms)
}

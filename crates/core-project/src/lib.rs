//! The analysis project: one drawing, one configuration, and the immutable
//! outputs of every pipeline stage.
//!
//! Stages run strictly in order; each `run_*` method consumes earlier stage
//! outputs by reference and stores its own result exactly once. Nothing is
//! mutated after being stored, so any stage can be re-run by rebuilding the
//! project from the same drawing, and downstream consumers can hold
//! references into prior outputs without invalidation.
//!
//! Missing preconditions fail soft: the stage stores an empty output with a
//! single `PreconditionMissing` record and the pipeline carries on. The same
//! holds for malformed geometry: a drawing with non-finite coordinates
//! yields empty stage outputs, each carrying one `InvalidInput` record.

use core_attrib::AttributedBeam;
use core_beams::{BeamGeometry, RawBeam};
use core_config::Config;
use core_entities::{Drawing, Entity, extract, filter_in_bounds};
use core_quantity::ViewportQuantities;
use core_report::{AnalysisError, ErrorKind};
use core_support::SupportOutput;
use core_topology::Fragment;
use core_viewport::{MergeOutput, ViewportRegion};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

pub mod result;

pub use result::AnalysisResult;

/// Output of one stage run: the value, the recoverable problems observed,
/// and how long the stage took.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult<T> {
    pub value: T,
    pub errors: Vec<AnalysisError>,
    pub elapsed_ms: f64,
}

impl<T> StageResult<T> {
    fn timed(started: Instant, value: T, errors: Vec<AnalysisError>) -> Self {
        Self {
            value,
            errors,
            elapsed_ms: started.elapsed().as_secs_f64() * 1e3,
        }
    }

    fn precondition(value: T, missing: &str) -> Self {
        Self {
            value,
            errors: vec![AnalysisError::unlocated(
                ErrorKind::PreconditionMissing,
                format!("run {missing} first"),
            )],
            elapsed_ms: 0.0,
        }
    }

    fn invalid(value: T) -> Self {
        Self {
            value,
            errors: vec![AnalysisError::unlocated(
                ErrorKind::InvalidInput,
                "drawing contains non-finite geometry",
            )],
            elapsed_ms: 0.0,
        }
    }
}

/// Names of the runnable stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Stage {
    SplitViews,
    MergeViews,
    Supports,
    BeamRaw,
    BeamGeometry,
    BeamAttributes,
    BeamTopology,
    Quantities,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::SplitViews,
        Stage::MergeViews,
        Stage::Supports,
        Stage::BeamRaw,
        Stage::BeamGeometry,
        Stage::BeamAttributes,
        Stage::BeamTopology,
        Stage::Quantities,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::SplitViews => "split-views",
            Stage::MergeViews => "merge-views",
            Stage::Supports => "supports",
            Stage::BeamRaw => "beam-raw",
            Stage::BeamGeometry => "beam-geometry",
            Stage::BeamAttributes => "beam-attributes",
            Stage::BeamTopology => "beam-topology",
            Stage::Quantities => "quantities",
        }
    }

    pub fn parse(name: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.name() == name)
    }
}

/// One drawing under analysis.
pub struct Project {
    config: Config,
    /// Flattened leaf entities (inserts exploded).
    entities: Vec<Entity>,
    input_valid: bool,
    pub viewports: Option<StageResult<Vec<ViewportRegion>>>,
    pub merge: Option<StageResult<MergeOutput>>,
    pub supports: Option<StageResult<SupportOutput>>,
    pub beam_raw: Option<StageResult<Vec<RawBeam>>>,
    pub beam_geometry: Option<StageResult<BeamGeometry>>,
    pub beam_attributes: Option<StageResult<Vec<AttributedBeam>>>,
    pub beam_topology: Option<StageResult<Vec<Fragment>>>,
    pub quantities: Option<StageResult<Vec<ViewportQuantities>>>,
}

impl Project {
    pub fn new(drawing: &Drawing, config: Config) -> Self {
        let entities = extract(drawing);
        let input_valid = entities.iter().all(|e| e.shape.is_finite());
        if !input_valid {
            warn!(target: "project", "non_finite_geometry_in_drawing");
        }
        Self {
            config,
            entities,
            input_valid,
            viewports: None,
            merge: None,
            supports: None,
            beam_raw: None,
            beam_geometry: None,
            beam_attributes: None,
            beam_topology: None,
            quantities: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Bounds of the merged base viewports; `None` until Merge Views has run.
    pub fn merge_base_bounds(&self) -> Option<Vec<core_geom::Bounds>> {
        self.merge.as_ref().map(|m| m.value.base_bounds())
    }

    pub fn run_split_views(&mut self) {
        if !self.input_valid {
            self.viewports = Some(StageResult::invalid(Vec::new()));
            return;
        }
        let started = Instant::now();
        let regions = core_viewport::split_views(
            &self.entities,
            &self.config.layers,
            &self.config.tolerances,
        );
        self.viewports = Some(StageResult::timed(started, regions, Vec::new()));
        self.log_stage(Stage::SplitViews);
    }

    pub fn run_merge_views(&mut self) {
        if !self.input_valid {
            self.merge = Some(StageResult::invalid(MergeOutput::default()));
            return;
        }
        let Some(viewports) = &self.viewports else {
            self.merge = Some(StageResult::precondition(
                MergeOutput::default(),
                Stage::SplitViews.name(),
            ));
            return;
        };
        let started = Instant::now();
        let output = core_viewport::merge_views(
            &self.entities,
            &viewports.value,
            &self.config.layers,
            &self.config.tolerances,
        );
        self.merge = Some(StageResult::timed(started, output, Vec::new()));
        self.log_stage(Stage::MergeViews);
    }

    pub fn run_supports(&mut self) {
        if !self.input_valid {
            self.supports = Some(StageResult::invalid(SupportOutput::default()));
            return;
        }
        let Some(bounds) = self.merge_base_bounds() else {
            self.supports = Some(StageResult::precondition(
                SupportOutput::default(),
                Stage::MergeViews.name(),
            ));
            return;
        };
        let started = Instant::now();
        let scoped = filter_in_bounds(&self.entities, &bounds);
        let columns = core_support::detect_columns(&scoped, &self.config.layers);
        let walls = core_support::detect_walls(
            &scoped,
            &columns,
            &self.config.layers,
            &self.config.tolerances,
        );
        self.supports = Some(StageResult::timed(
            started,
            SupportOutput { columns, walls },
            Vec::new(),
        ));
        self.log_stage(Stage::Supports);
    }

    /// Width vocabulary over every merged view's label texts.
    fn width_vocabulary(&self) -> Vec<f64> {
        let Some(merge) = &self.merge else {
            return Vec::new();
        };
        let texts: Vec<core_annot::LabelText> = merge
            .value
            .views
            .iter()
            .flat_map(|v| v.all_label_texts())
            .collect();
        core_annot::width_vocabulary(&texts)
    }

    pub fn run_beam_raw(&mut self) {
        if !self.input_valid {
            self.beam_raw = Some(StageResult::invalid(Vec::new()));
            return;
        }
        let (Some(bounds), Some(supports)) = (self.merge_base_bounds(), &self.supports) else {
            self.beam_raw = Some(StageResult::precondition(
                Vec::new(),
                Stage::Supports.name(),
            ));
            return;
        };
        let started = Instant::now();
        let scoped = filter_in_bounds(&self.entities, &bounds);
        let vocabulary = self.width_vocabulary();
        let obstacles = supports.value.obstacles();
        let beams = core_beams::build_raw_beams(
            &scoped,
            &self.config.layers,
            &vocabulary,
            &obstacles,
            &self.config.tolerances,
        );
        self.beam_raw = Some(StageResult::timed(started, beams, Vec::new()));
        self.log_stage(Stage::BeamRaw);
    }

    pub fn run_beam_geometry(&mut self) {
        if !self.input_valid {
            self.beam_geometry = Some(StageResult::invalid(BeamGeometry::default()));
            return;
        }
        let (Some(raw), Some(supports), Some(bounds)) =
            (&self.beam_raw, &self.supports, self.merge_base_bounds())
        else {
            self.beam_geometry = Some(StageResult::precondition(
                BeamGeometry::default(),
                Stage::BeamRaw.name(),
            ));
            return;
        };
        let started = Instant::now();
        let vocabulary = self.width_vocabulary();
        let obstacles = supports.value.obstacles();
        let geometry = core_beams::build_geometry(
            &raw.value,
            &obstacles,
            &bounds,
            &vocabulary,
            &self.config.tolerances,
        );
        self.beam_geometry = Some(StageResult::timed(started, geometry, Vec::new()));
        self.log_stage(Stage::BeamGeometry);
    }

    pub fn run_beam_attributes(&mut self) {
        if !self.input_valid {
            self.beam_attributes = Some(StageResult::invalid(Vec::new()));
            return;
        }
        let (Some(geometry), Some(merge), Some(supports)) =
            (&self.beam_geometry, &self.merge, &self.supports)
        else {
            self.beam_attributes = Some(StageResult::precondition(
                Vec::new(),
                Stage::BeamGeometry.name(),
            ));
            return;
        };
        let started = Instant::now();
        let labels: Vec<core_annot::BeamLabel> = merge
            .value
            .views
            .iter()
            .flat_map(|v| v.labels.iter().cloned())
            .collect();
        let obstacles = supports.value.obstacles();
        let (beams, errors) = core_attrib::attach_attributes(
            &geometry.value.beams,
            &labels,
            &obstacles,
            &self.config.tolerances,
        );
        self.beam_attributes = Some(StageResult::timed(started, beams, errors));
        self.log_stage(Stage::BeamAttributes);
    }

    pub fn run_beam_topology(&mut self) {
        if !self.input_valid {
            self.beam_topology = Some(StageResult::invalid(Vec::new()));
            return;
        }
        let (Some(attributed), Some(geometry)) = (&self.beam_attributes, &self.beam_geometry)
        else {
            self.beam_topology = Some(StageResult::precondition(
                Vec::new(),
                Stage::BeamAttributes.name(),
            ));
            return;
        };
        let started = Instant::now();
        let (fragments, errors) = core_topology::resolve_topology(
            &attributed.value,
            &geometry.value.junctions,
            &self.config.tolerances,
        );
        self.beam_topology = Some(StageResult::timed(started, fragments, errors));
        self.log_stage(Stage::BeamTopology);
    }

    pub fn run_quantities(&mut self) {
        if !self.input_valid {
            self.quantities = Some(StageResult::invalid(Vec::new()));
            return;
        }
        let (Some(fragments), Some(merge)) = (&self.beam_topology, &self.merge) else {
            self.quantities = Some(StageResult::precondition(
                Vec::new(),
                Stage::BeamTopology.name(),
            ));
            return;
        };
        let started = Instant::now();
        let groups = core_quantity::summarize(&fragments.value, &merge.value.views);
        self.quantities = Some(StageResult::timed(started, groups, Vec::new()));
        self.log_stage(Stage::Quantities);
    }

    fn has_run(&self, stage: Stage) -> bool {
        match stage {
            Stage::SplitViews => self.viewports.is_some(),
            Stage::MergeViews => self.merge.is_some(),
            Stage::Supports => self.supports.is_some(),
            Stage::BeamRaw => self.beam_raw.is_some(),
            Stage::BeamGeometry => self.beam_geometry.is_some(),
            Stage::BeamAttributes => self.beam_attributes.is_some(),
            Stage::BeamTopology => self.beam_topology.is_some(),
            Stage::Quantities => self.quantities.is_some(),
        }
    }

    /// Run the pipeline up to and including `last`. Stages that already hold
    /// an output are skipped, so runs resume after `invalidate_from`.
    pub fn run_until(&mut self, last: Stage) {
        for stage in Stage::ALL {
            if stage > last {
                break;
            }
            if self.has_run(stage) {
                continue;
            }
            match stage {
                Stage::SplitViews => self.run_split_views(),
                Stage::MergeViews => self.run_merge_views(),
                Stage::Supports => self.run_supports(),
                Stage::BeamRaw => self.run_beam_raw(),
                Stage::BeamGeometry => self.run_beam_geometry(),
                Stage::BeamAttributes => self.run_beam_attributes(),
                Stage::BeamTopology => self.run_beam_topology(),
                Stage::Quantities => self.run_quantities(),
            }
        }
    }

    pub fn run_all(&mut self) {
        self.run_until(Stage::Quantities);
    }

    /// Drop the outputs of `stage` and everything after it. Earlier results
    /// stay untouched, so a re-run resumes from the invalidated point.
    pub fn invalidate_from(&mut self, stage: Stage) {
        for s in Stage::ALL {
            if s < stage {
                continue;
            }
            match s {
                Stage::SplitViews => self.viewports = None,
                Stage::MergeViews => self.merge = None,
                Stage::Supports => self.supports = None,
                Stage::BeamRaw => self.beam_raw = None,
                Stage::BeamGeometry => self.beam_geometry = None,
                Stage::BeamAttributes => self.beam_attributes = None,
                Stage::BeamTopology => self.beam_topology = None,
                Stage::Quantities => self.quantities = None,
            }
        }
    }

    /// Every error record across the stages that have run, in stage order.
    pub fn all_errors(&self) -> Vec<AnalysisError> {
        let mut out = Vec::new();
        if let Some(s) = &self.viewports {
            out.extend(s.errors.iter().cloned());
        }
        if let Some(s) = &self.merge {
            out.extend(s.errors.iter().cloned());
        }
        if let Some(s) = &self.supports {
            out.extend(s.errors.iter().cloned());
        }
        if let Some(s) = &self.beam_raw {
            out.extend(s.errors.iter().cloned());
        }
        if let Some(s) = &self.beam_geometry {
            out.extend(s.errors.iter().cloned());
        }
        if let Some(s) = &self.beam_attributes {
            out.extend(s.errors.iter().cloned());
        }
        if let Some(s) = &self.beam_topology {
            out.extend(s.errors.iter().cloned());
        }
        if let Some(s) = &self.quantities {
            out.extend(s.errors.iter().cloned());
        }
        out
    }

    fn log_stage(&self, stage: Stage) {
        let (elapsed, errors) = match stage {
            Stage::SplitViews => stage_meta(&self.viewports),
            Stage::MergeViews => stage_meta(&self.merge),
            Stage::Supports => stage_meta(&self.supports),
            Stage::BeamRaw => stage_meta(&self.beam_raw),
            Stage::BeamGeometry => stage_meta(&self.beam_geometry),
            Stage::BeamAttributes => stage_meta(&self.beam_attributes),
            Stage::BeamTopology => stage_meta(&self.beam_topology),
            Stage::Quantities => stage_meta(&self.quantities),
        };
        info!(
            target: "project",
            stage = stage.name(),
            elapsed_ms = elapsed,
            errors,
            "stage_complete"
        );
    }
}

fn stage_meta<T>(slot: &Option<StageResult<T>>) -> (f64, usize) {
    slot.as_ref()
        .map(|s| (s.elapsed_ms, s.errors.len()))
        .unwrap_or((0.0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_entities::Shape;
    use core_geom::Point;

    #[test]
    fn merge_without_split_fails_soft() {
        let drawing = Drawing::default();
        let mut project = Project::new(&drawing, Config::default());
        project.run_merge_views();
        let merge = project.merge.as_ref().unwrap();
        assert!(merge.value.views.is_empty());
        assert_eq!(merge.errors.len(), 1);
        assert_eq!(merge.errors[0].kind, ErrorKind::PreconditionMissing);
    }

    #[test]
    fn non_finite_geometry_empties_stages_with_invalid_input() {
        let drawing = Drawing {
            entities: vec![Entity::new(
                "AXIS",
                Shape::Line {
                    start: Point::new(f64::NAN, 0.0),
                    end: Point::new(100.0, 0.0),
                },
            )],
            ..Drawing::default()
        };
        let mut project = Project::new(&drawing, Config::default());
        project.run_all();
        let viewports = project.viewports.as_ref().unwrap();
        assert!(viewports.value.is_empty());
        assert_eq!(viewports.errors[0].kind, ErrorKind::InvalidInput);
        assert!(
            project
                .all_errors()
                .iter()
                .all(|e| e.kind == ErrorKind::InvalidInput)
        );
    }

    #[test]
    fn invalidation_keeps_earlier_stages() {
        let drawing = Drawing::default();
        let mut project = Project::new(&drawing, Config::default());
        project.run_all();
        assert!(project.beam_topology.is_some());
        project.invalidate_from(Stage::BeamTopology);
        assert!(project.beam_attributes.is_some());
        assert!(project.beam_topology.is_none());
        assert!(project.quantities.is_none());
        project.run_until(Stage::Quantities);
        assert!(project.beam_topology.is_some());
        assert!(project.quantities.is_some());
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.name()), Some(stage));
        }
        assert_eq!(Stage::parse("nonsense"), None);
    }
}

//! Beam geometry reconstruction (pipeline stages "Beam Raw" and "Beam
//! Geometry", the first two beam steps).
//!
//! Step 1 turns face-line pairs into candidate rectangles and cuts them
//! against columns and walls. Step 2 merges what CAD drafting fragmented,
//! extends beam ends onto the perpendicular beams they frame into, and
//! detects the L/T/C junctions the topology stage will arbitrate.
//!
//! Beams are value types in an index-addressed arena: `Beam.index` is the
//! stable identity later stages use, and junction membership is a list of
//! indices into the junction table, never a pointer.

use core_geom::{Bounds, Obb, Point};
use serde::{Deserialize, Serialize};

pub mod junction;
pub mod step1;
pub mod step2;

pub use junction::{IntersectionInfo, JunctionKind, detect_junctions};
pub use step1::build_raw_beams;
pub use step2::{BeamGeometry, build_geometry};

/// A Step-1 candidate rectangle. Geometry only; indices and junction
/// membership arrive in Step 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBeam {
    pub obb: Obb,
    /// True when the rectangle came verbatim from a closed polyline rather
    /// than the pair scan.
    pub from_polyline: bool,
}

/// A Step-2 beam: merged, extended, and junction-aware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    pub index: usize,
    pub obb: Obb,
    /// Both longitudinal ends sit inside obstacle bounds; such beams are
    /// exempt from end extension.
    pub anchored: bool,
    /// Indices into the junction table this beam is a member of.
    pub junctions: Vec<usize>,
}

impl Beam {
    pub fn bounds(&self) -> Bounds {
        self.obb.bounds()
    }

    pub fn center(&self) -> Point {
        self.obb.normalized().center
    }
}

//! Viewport discovery (pipeline stage "Split Views").
//!
//! A structural sheet usually holds several drawing regions: the floor plans
//! themselves plus detail blow-ups and schedules. The axis grid only exists
//! inside the plan regions, so clustering axis-segment boxes with a generous
//! proximity tolerance recovers the plan rectangles. Each region is then
//! titled by the underlined text nearest below or beside it.
//!
//! Guarantees:
//! * Clustering reaches a fixed point; two regions closer than twice the
//!   cluster tolerance on both axes fuse.
//! * Title choice is deterministic: tallest candidate in the first non-empty
//!   search ring, ties by distance to the region centre, then ascending
//!   `(y, x)` of the insertion point.

use core_config::{LayerRole, SemanticLayerMap, Tolerances};
use core_entities::{Entity, Shape, approx_text_width};
use core_geom::{Bounds, DisjointSets, Point, Segment};
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod merge;
pub mod title;

pub use merge::{MergeMapping, MergeOutput, MergedView, merge_views};
pub use title::{ViewportInfo, parse_title};

/// One discovered drawing region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportRegion {
    pub bounds: Bounds,
    pub title: String,
    pub info: Option<ViewportInfo>,
}

/// Discover viewport regions from the flattened entity stream.
pub fn split_views(
    entities: &[Entity],
    layers: &SemanticLayerMap,
    tol: &Tolerances,
) -> Vec<ViewportRegion> {
    let axis_boxes: Vec<Bounds> = entities
        .iter()
        .filter(|e| layers.has_role(&e.layer, LayerRole::Axis))
        .flat_map(|e| e.shape.line_segments())
        .map(|s| s.bounds())
        .collect();
    let clusters = cluster_boxes(axis_boxes, tol.viewport_cluster);

    let underlines: Vec<Segment> = entities
        .iter()
        .flat_map(|e| e.shape.line_segments())
        .filter(|s| s.near_horizontal(tol.grid_axis_skew))
        .collect();

    let mut regions: Vec<ViewportRegion> = clusters
        .into_iter()
        .map(|bounds| {
            let titled = find_title(entities, &underlines, &bounds, layers, tol);
            let title = titled.unwrap_or_default();
            let info = parse_title(&title);
            ViewportRegion {
                bounds,
                title,
                info,
            }
        })
        .collect();
    // Stable report order: left to right, bottom to top.
    regions.sort_by(|a, b| {
        (a.bounds.min_x, a.bounds.min_y).partial_cmp(&(b.bounds.min_x, b.bounds.min_y))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    info!(
        target: "stage.viewport",
        regions = regions.len(),
        titled = regions.iter().filter(|r| !r.title.is_empty()).count(),
        "views_split"
    );
    regions
}

/// Iterative proximity merge: expand every box by the tolerance, fuse any two
/// that overlap, repeat on the fused boxes until the count is stable.
fn cluster_boxes(mut boxes: Vec<Bounds>, tolerance: f64) -> Vec<Bounds> {
    loop {
        if boxes.len() <= 1 {
            return boxes;
        }
        let mut sets = DisjointSets::new(boxes.len());
        for i in 0..boxes.len() {
            let bi = boxes[i].expanded(tolerance);
            for j in (i + 1)..boxes.len() {
                if bi.overlaps(&boxes[j].expanded(tolerance)) {
                    sets.union(i, j);
                }
            }
        }
        let groups = sets.groups();
        if groups.len() == boxes.len() {
            return boxes;
        }
        boxes = groups
            .into_iter()
            .map(|members| {
                members
                    .iter()
                    .skip(1)
                    .fold(boxes[members[0]], |acc, &m| acc.union(&boxes[m]))
            })
            .collect();
    }
}

struct TitleCandidate {
    content: String,
    insert: Point,
    height: f64,
    ring: u32,
    center_dist: f64,
}

/// Ring search for the region title. Rings step outward from the region
/// rectangle; the winner is the tallest underlined candidate in the first
/// ring that has any.
fn find_title(
    entities: &[Entity],
    underlines: &[Segment],
    region: &Bounds,
    layers: &SemanticLayerMap,
    tol: &Tolerances,
) -> Option<String> {
    let hinted = !layers.viewport_title.is_empty();
    let mut candidates: Vec<TitleCandidate> = Vec::new();
    for entity in entities {
        let Shape::Text {
            insert,
            content,
            height,
            ..
        } = &entity.shape
        else {
            continue;
        };
        if hinted {
            if !layers.has_role(&entity.layer, LayerRole::ViewportTitle) {
                continue;
            }
        } else if layers.has_role(&entity.layer, LayerRole::Axis) {
            continue;
        }
        if is_numeric_or_dimensional(content) {
            continue;
        }
        let dist = region.distance_to_point(*insert);
        if dist > tol.title_ring_max {
            continue;
        }
        if !has_underline(*insert, content, *height, underlines) {
            continue;
        }
        let ring = (dist / tol.title_ring_step).ceil().max(1.0) as u32;
        candidates.push(TitleCandidate {
            content: content.trim().to_string(),
            insert: *insert,
            height: *height,
            ring,
            center_dist: region.center().distance(*insert),
        });
    }
    let first_ring = candidates.iter().map(|c| c.ring).min()?;
    candidates.retain(|c| c.ring == first_ring);
    candidates.sort_by(|a, b| {
        b.height
            .partial_cmp(&a.height)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.center_dist
                    .partial_cmp(&b.center_dist)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(
                (a.insert.y, a.insert.x)
                    .partial_cmp(&(b.insert.y, b.insert.x))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    candidates.into_iter().next().map(|c| c.content)
}

/// Purely numeric or dimensional texts (grid bubbles, measurements) never
/// title a viewport.
fn is_numeric_or_dimensional(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return true;
    }
    trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || "+-.%×xX* ~±@".contains(c))
}

/// The underline rule: a near-horizontal segment slightly below the text
/// baseline whose x extent covers at least 30% of the text width.
fn has_underline(insert: Point, content: &str, height: f64, underlines: &[Segment]) -> bool {
    let width = approx_text_width(content, height);
    if width <= 0.0 {
        return false;
    }
    underlines.iter().any(|seg| {
        let y = (seg.start.y + seg.end.y) / 2.0;
        if y < insert.y - 0.6 * height || y > insert.y + 0.2 * height {
            return false;
        }
        let (x0, x1) = (seg.start.x.min(seg.end.x), seg.start.x.max(seg.end.x));
        let overlap = (x1.min(insert.x + width) - x0.max(insert.x)).max(0.0);
        overlap >= 0.3 * width
    })
}

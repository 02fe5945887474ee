//! Drawing entity model.
//!
//! The input record set is a flat list of CAD primitives tagged with a layer
//! name, plus a block table for `INSERT` references. Entities are a tagged
//! variant rather than one record with many optional fields; helpers that
//! need several shapes (bounds, centre, key points) are exhaustive matches.
//! Missing optional input fields deserialize to `None` or a documented
//! default, never to zero coordinates.
//!
//! Only the fields this pipeline consults are modelled: `{layer, type,
//! start, end, center, radius, vertices, closed, text, rotation, startAngle,
//! measureStart, measureEnd}` plus insert placement. z coordinates are not
//! represented; extraction drops them at the boundary.

use core_geom::{Bounds, Point, Segment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod extract;

pub use extract::{extract, filter_in_bounds};

fn default_scale() -> f64 {
    1.0
}

fn default_count() -> u32 {
    1
}

fn default_text_height() -> f64 {
    250.0
}

/// Geometric payload of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Shape {
    #[serde(rename = "LINE")]
    Line { start: Point, end: Point },
    #[serde(rename = "POLYLINE", alias = "LWPOLYLINE")]
    Polyline {
        vertices: Vec<Point>,
        #[serde(default)]
        closed: bool,
        /// Per-segment bulge factors where the source had arc segments.
        /// Flattened to short chords wherever the geometry is consumed.
        #[serde(default)]
        bulges: Option<Vec<f64>>,
    },
    #[serde(rename = "CIRCLE")]
    Circle { center: Point, radius: f64 },
    #[serde(rename = "ARC")]
    Arc {
        center: Point,
        radius: f64,
        #[serde(rename = "startAngle", default)]
        start_angle: f64,
        #[serde(rename = "endAngle", default)]
        end_angle: f64,
    },
    #[serde(rename = "TEXT", alias = "MTEXT")]
    Text {
        insert: Point,
        #[serde(rename = "text")]
        content: String,
        #[serde(default)]
        rotation: f64,
        #[serde(default = "default_text_height")]
        height: f64,
    },
    #[serde(rename = "INSERT")]
    Insert {
        block: String,
        position: Point,
        #[serde(rename = "scaleX", default = "default_scale")]
        scale_x: f64,
        #[serde(rename = "scaleY", default = "default_scale")]
        scale_y: f64,
        #[serde(default)]
        rotation: f64,
        #[serde(rename = "columnCount", default = "default_count")]
        column_count: u32,
        #[serde(rename = "rowCount", default = "default_count")]
        row_count: u32,
        #[serde(rename = "columnSpacing", default)]
        column_spacing: f64,
        #[serde(rename = "rowSpacing", default)]
        row_spacing: f64,
    },
    #[serde(rename = "DIMENSION")]
    Dimension {
        #[serde(rename = "measureStart", default)]
        measure_start: Option<Point>,
        #[serde(rename = "measureEnd", default)]
        measure_end: Option<Point>,
        #[serde(rename = "text", default)]
        content: Option<String>,
    },
    #[serde(rename = "ATTRIB")]
    Attrib {
        insert: Point,
        #[serde(rename = "text")]
        content: String,
        #[serde(default)]
        rotation: f64,
        #[serde(default = "default_text_height")]
        height: f64,
    },
}

/// One drawing primitive on a named layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub layer: String,
    #[serde(flatten)]
    pub shape: Shape,
}

impl Entity {
    pub fn new(layer: impl Into<String>, shape: Shape) -> Self {
        Self {
            layer: layer.into(),
            shape,
        }
    }
}

/// Block definition referenced by `INSERT` entities.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "basePoint", default)]
    pub base_point: Point,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// The parsed drawing handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Drawing {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub blocks: BTreeMap<String, Block>,
}

/// Polyline vertices with bulged edges flattened to chords. Without bulges
/// the vertex list passes through untouched.
fn flatten_polyline(vertices: &[Point], closed: bool, bulges: Option<&[f64]>) -> Vec<Point> {
    let Some(bulges) = bulges else {
        return vertices.to_vec();
    };
    let mut out = Vec::with_capacity(vertices.len());
    for (i, v) in vertices.iter().enumerate() {
        out.push(*v);
        let next = if i + 1 < vertices.len() {
            Some(vertices[i + 1])
        } else if closed {
            vertices.first().copied()
        } else {
            None
        };
        if let (Some(next), Some(b)) = (next, bulges.get(i).copied()) {
            out.extend(core_geom::bulge::flatten(*v, next, b));
        }
    }
    out
}

/// Rough rendered width of a text run. CAD text metrics are not available
/// here; the estimate only feeds proportional tests (underline overlap), so a
/// per-glyph aspect approximation is enough.
pub fn approx_text_width(content: &str, height: f64) -> f64 {
    content
        .chars()
        .map(|c| if c.is_ascii() { 0.6 * height } else { height })
        .sum()
}

impl Shape {
    /// Axis-aligned bounds, `None` for shapes with no computable extent.
    pub fn bounds(&self) -> Option<Bounds> {
        match self {
            Shape::Line { start, end } => Some(Bounds::new(*start, *end)),
            Shape::Polyline {
                vertices,
                closed,
                bulges,
            } => Bounds::from_points(flatten_polyline(vertices, *closed, bulges.as_deref())),
            Shape::Circle { center, radius } | Shape::Arc { center, radius, .. } => {
                Some(Bounds::from_point(*center).expanded(*radius))
            }
            Shape::Text {
                insert,
                content,
                height,
                ..
            }
            | Shape::Attrib {
                insert,
                content,
                height,
                ..
            } => {
                // Unrotated estimate; good enough for scoping tests.
                let w = approx_text_width(content, *height);
                Some(Bounds::new(
                    *insert,
                    Point::new(insert.x + w, insert.y + height),
                ))
            }
            Shape::Insert { position, .. } => Some(Bounds::from_point(*position)),
            Shape::Dimension {
                measure_start,
                measure_end,
                ..
            } => match (measure_start, measure_end) {
                (Some(a), Some(b)) => Some(Bounds::new(*a, *b)),
                (Some(p), None) | (None, Some(p)) => Some(Bounds::from_point(*p)),
                (None, None) => None,
            },
        }
    }

    pub fn center(&self) -> Option<Point> {
        self.bounds().map(|b| b.center())
    }

    /// The points the in-bounds filter probes: endpoints, measure points, and
    /// the bounds centre where one exists.
    pub fn key_points(&self) -> Vec<Point> {
        let mut pts = Vec::new();
        match self {
            Shape::Line { start, end } => {
                pts.push(*start);
                pts.push(*end);
            }
            Shape::Dimension {
                measure_start,
                measure_end,
                ..
            } => {
                if let Some(p) = measure_start {
                    pts.push(*p);
                }
                if let Some(p) = measure_end {
                    pts.push(*p);
                }
            }
            Shape::Text { insert, .. } | Shape::Attrib { insert, .. } => pts.push(*insert),
            Shape::Insert { position, .. } => pts.push(*position),
            _ => {}
        }
        if let Some(c) = self.center() {
            pts.push(c);
        }
        pts
    }

    /// Constituent line segments for pair scanning. Closed polylines yield
    /// their closing edge too, so a rectangle contributes all four sides;
    /// bulged edges contribute one chord per flattening step.
    pub fn line_segments(&self) -> Vec<Segment> {
        match self {
            Shape::Line { start, end } => vec![Segment::new(*start, *end)],
            Shape::Polyline {
                vertices,
                closed,
                bulges,
            } => {
                let pts = flatten_polyline(vertices, *closed, bulges.as_deref());
                let mut segs: Vec<Segment> =
                    pts.windows(2).map(|w| Segment::new(w[0], w[1])).collect();
                if *closed
                    && pts.len() > 2
                    && let (Some(first), Some(last)) = (pts.first(), pts.last())
                    && first != last
                {
                    segs.push(Segment::new(*last, *first));
                }
                segs
            }
            _ => Vec::new(),
        }
    }

    /// Closed outline for shapes that enclose a region. Circles are reduced
    /// to their bounding square, which is how column footprints are consumed.
    pub fn closed_polygon(&self) -> Option<Vec<Point>> {
        match self {
            Shape::Polyline {
                vertices,
                closed,
                bulges,
            } if *closed && vertices.len() >= 3 => {
                Some(flatten_polyline(vertices, true, bulges.as_deref()))
            }
            Shape::Circle { center, radius } => {
                let b = Bounds::from_point(*center).expanded(*radius);
                Some(vec![
                    Point::new(b.min_x, b.min_y),
                    Point::new(b.max_x, b.min_y),
                    Point::new(b.max_x, b.max_y),
                    Point::new(b.min_x, b.max_y),
                ])
            }
            _ => None,
        }
    }

    /// All coordinates finite? Non-finite geometry invalidates a stage input.
    pub fn is_finite(&self) -> bool {
        match self {
            Shape::Line { start, end } => start.is_finite() && end.is_finite(),
            Shape::Polyline { vertices, .. } => vertices.iter().all(Point::is_finite),
            Shape::Circle { center, radius } => center.is_finite() && radius.is_finite(),
            Shape::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                center.is_finite()
                    && radius.is_finite()
                    && start_angle.is_finite()
                    && end_angle.is_finite()
            }
            Shape::Text {
                insert,
                rotation,
                height,
                ..
            }
            | Shape::Attrib {
                insert,
                rotation,
                height,
                ..
            } => insert.is_finite() && rotation.is_finite() && height.is_finite(),
            Shape::Insert {
                position,
                scale_x,
                scale_y,
                rotation,
                ..
            } => {
                position.is_finite()
                    && scale_x.is_finite()
                    && scale_y.is_finite()
                    && rotation.is_finite()
            }
            Shape::Dimension {
                measure_start,
                measure_end,
                ..
            } => {
                measure_start.is_none_or(|p| p.is_finite())
                    && measure_end.is_none_or(|p| p.is_finite())
            }
        }
    }
}

//! Entity extraction: insert explosion and viewport scoping.
//!
//! `extract` flattens the drawing into leaf primitives. Inserts are replaced
//! recursively by transformed copies of their block definitions, honouring
//! per-reference scale, rotation, grid replication, and the block base point.
//! Children drawn on layer "0" (the CAD convention for "inherit from the
//! reference") take the insert's layer; all other children keep their own.
//! z coordinates were already dropped by the record model.

use core_geom::{Bounds, Point, Vec2};
use tracing::{debug, warn};

use crate::{Drawing, Entity, Shape};

/// Recursion guard for self-referencing block tables.
const MAX_INSERT_DEPTH: u32 = 8;

/// 2x2 linear map plus translation. Enough affine algebra for insert chains;
/// not exposed outside extraction.
#[derive(Debug, Clone, Copy)]
struct Affine {
    m: [f64; 4],
    t: Vec2,
}

impl Affine {
    const IDENTITY: Affine = Affine {
        m: [1.0, 0.0, 0.0, 1.0],
        t: Vec2::ZERO,
    };

    fn apply(&self, p: Point) -> Point {
        Point::new(
            self.m[0] * p.x + self.m[1] * p.y + self.t.x,
            self.m[2] * p.x + self.m[3] * p.y + self.t.y,
        )
    }

    /// `self` after `other`: `(self ∘ other)(p) = self(other(p))`.
    fn compose(&self, other: &Affine) -> Affine {
        Affine {
            m: [
                self.m[0] * other.m[0] + self.m[1] * other.m[2],
                self.m[0] * other.m[1] + self.m[1] * other.m[3],
                self.m[2] * other.m[0] + self.m[3] * other.m[2],
                self.m[2] * other.m[1] + self.m[3] * other.m[3],
            ],
            t: Vec2::new(
                self.m[0] * other.t.x + self.m[1] * other.t.y + self.t.x,
                self.m[2] * other.t.x + self.m[3] * other.t.y + self.t.y,
            ),
        }
    }

    /// Placement transform of one insert cell: translate out of the block
    /// frame, scale, rotate, then move to the reference position.
    fn placement(position: Point, base: Point, scale: (f64, f64), rotation_deg: f64) -> Affine {
        let (sin, cos) = rotation_deg.to_radians().sin_cos();
        let (sx, sy) = scale;
        Affine {
            m: [cos * sx, -sin * sy, sin * sx, cos * sy],
            t: Vec2::new(
                position.x - (cos * sx * base.x - sin * sy * base.y),
                position.y - (sin * sx * base.x + cos * sy * base.y),
            ),
        }
    }

    /// Mean absolute scale, used for radii and text heights under
    /// (possibly non-uniform) insert scaling.
    fn scalar_scale(&self) -> f64 {
        let sx = self.m[0].hypot(self.m[2]);
        let sy = self.m[1].hypot(self.m[3]);
        (sx + sy) / 2.0
    }

    fn rotation_deg(&self) -> f64 {
        self.m[2].atan2(self.m[0]).to_degrees()
    }
}

/// Flatten the drawing into leaf primitives.
pub fn extract(drawing: &Drawing) -> Vec<Entity> {
    let mut out = Vec::with_capacity(drawing.entities.len());
    for entity in &drawing.entities {
        explode_into(&mut out, entity, &Affine::IDENTITY, None, drawing, 0);
    }
    debug!(
        target: "stage.extract",
        input = drawing.entities.len(),
        output = out.len(),
        "entities_flattened"
    );
    out
}

fn explode_into(
    out: &mut Vec<Entity>,
    entity: &Entity,
    affine: &Affine,
    inherited_layer: Option<&str>,
    drawing: &Drawing,
    depth: u32,
) {
    let layer = effective_layer(&entity.layer, inherited_layer);
    match &entity.shape {
        Shape::Insert {
            block,
            position,
            scale_x,
            scale_y,
            rotation,
            column_count,
            row_count,
            column_spacing,
            row_spacing,
        } => {
            if depth >= MAX_INSERT_DEPTH {
                warn!(target: "stage.extract", block = block.as_str(), "insert_depth_exceeded");
                return;
            }
            let Some(def) = drawing.blocks.get(block) else {
                warn!(target: "stage.extract", block = block.as_str(), "missing_block_definition");
                return;
            };
            for row in 0..(*row_count).max(1) {
                for col in 0..(*column_count).max(1) {
                    // Grid replication offsets live in the block frame, so
                    // they pick up the cell's scale and rotation.
                    let base = Point::new(
                        def.base_point.x - f64::from(col) * column_spacing,
                        def.base_point.y - f64::from(row) * row_spacing,
                    );
                    let cell = Affine::placement(
                        *position,
                        base,
                        (*scale_x, *scale_y),
                        *rotation,
                    );
                    let chained = affine.compose(&cell);
                    for child in &def.entities {
                        explode_into(out, child, &chained, Some(layer.as_str()), drawing, depth + 1);
                    }
                }
            }
        }
        shape => {
            if let Some(transformed) = transform_shape(shape, affine) {
                out.push(Entity::new(layer, transformed));
            }
        }
    }
}

fn effective_layer(own: &str, inherited: Option<&str>) -> String {
    if (own == "0" || own.is_empty())
        && let Some(parent) = inherited
    {
        return parent.to_string();
    }
    own.to_string()
}

fn transform_shape(shape: &Shape, affine: &Affine) -> Option<Shape> {
    let out = match shape {
        Shape::Line { start, end } => Shape::Line {
            start: affine.apply(*start),
            end: affine.apply(*end),
        },
        Shape::Polyline {
            vertices,
            closed,
            bulges,
        } => Shape::Polyline {
            vertices: vertices.iter().map(|p| affine.apply(*p)).collect(),
            closed: *closed,
            bulges: bulges.clone(),
        },
        Shape::Circle { center, radius } => Shape::Circle {
            center: affine.apply(*center),
            radius: radius * affine.scalar_scale(),
        },
        Shape::Arc {
            center,
            radius,
            start_angle,
            end_angle,
        } => Shape::Arc {
            center: affine.apply(*center),
            radius: radius * affine.scalar_scale(),
            start_angle: start_angle + affine.rotation_deg(),
            end_angle: end_angle + affine.rotation_deg(),
        },
        Shape::Text {
            insert,
            content,
            rotation,
            height,
        } => Shape::Text {
            insert: affine.apply(*insert),
            content: content.clone(),
            rotation: rotation + affine.rotation_deg(),
            height: height * affine.scalar_scale(),
        },
        Shape::Attrib {
            insert,
            content,
            rotation,
            height,
        } => Shape::Attrib {
            insert: affine.apply(*insert),
            content: content.clone(),
            rotation: rotation + affine.rotation_deg(),
            height: height * affine.scalar_scale(),
        },
        Shape::Dimension {
            measure_start,
            measure_end,
            content,
        } => Shape::Dimension {
            measure_start: measure_start.map(|p| affine.apply(p)),
            measure_end: measure_end.map(|p| affine.apply(p)),
            content: content.clone(),
        },
        Shape::Insert { .. } => return None,
    };
    Some(out)
}

/// Scope a flattened stream to a set of bounds. An entity is kept when any of
/// its key points (start, end, measure points, bounds centre) lies inside any
/// of the bounds, or its own bounds overlap any of them.
pub fn filter_in_bounds(entities: &[Entity], bounds_list: &[Bounds]) -> Vec<Entity> {
    if bounds_list.is_empty() {
        return Vec::new();
    }
    entities
        .iter()
        .filter(|e| {
            let points_hit = e
                .shape
                .key_points()
                .iter()
                .any(|p| bounds_list.iter().any(|b| b.contains(*p)));
            if points_hit {
                return true;
            }
            match e.shape.bounds() {
                Some(eb) => bounds_list.iter().any(|b| b.overlaps(&eb)),
                None => false,
            }
        })
        .cloned()
        .collect()
}

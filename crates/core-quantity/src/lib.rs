//! Per-viewport beam quantities (pipeline stage "Quantities", beam step 5).
//!
//! Fragments group under the viewport containing their centre; fragments
//! outside every viewport collect in an unassigned group so nothing silently
//! disappears from the bill. Rows aggregate per code in natural order
//! (`KL2` before `KL10`) and volumes convert from cubic millimetres to cubic
//! metres.

use core_annot::natural_cmp;
use core_topology::Fragment;
use core_viewport::MergedView;
use serde::{Deserialize, Serialize};
use tracing::info;

const MM3_PER_M3: f64 = 1.0e9;

/// Aggregate of one beam code inside one viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityRow {
    pub code: String,
    pub count: usize,
    pub total_length: f64,
    pub total_volume_m3: f64,
}

/// The bill of one viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportQuantities {
    /// Base region index of the owning viewport, `None` for fragments
    /// outside every viewport.
    pub viewport: Option<usize>,
    pub title: String,
    /// Fragment indices in report order (code, then fragment index).
    pub fragment_indices: Vec<usize>,
    pub rows: Vec<QuantityRow>,
    pub total_volume_m3: f64,
}

/// Build the per-viewport bill from the resolved fragments.
pub fn summarize(fragments: &[Fragment], views: &[MergedView]) -> Vec<ViewportQuantities> {
    let mut assignment: Vec<Vec<&Fragment>> = vec![Vec::new(); views.len() + 1];
    for fragment in fragments {
        let center = fragment.obb.center;
        let slot = views
            .iter()
            .position(|v| v.bounds.contains(center))
            .unwrap_or(views.len());
        assignment[slot].push(fragment);
    }

    let mut out = Vec::new();
    for (slot, members) in assignment.into_iter().enumerate() {
        if members.is_empty() {
            continue;
        }
        let (viewport, title) = if slot < views.len() {
            (Some(views[slot].base_index), views[slot].title.clone())
        } else {
            (None, String::new())
        };
        out.push(build_group(viewport, title, members));
    }
    info!(
        target: "stage.beam5",
        groups = out.len(),
        fragments = fragments.len(),
        "quantities_built"
    );
    out
}

fn build_group(viewport: Option<usize>, title: String, mut members: Vec<&Fragment>) -> ViewportQuantities {
    members.sort_by(|a, b| natural_cmp(&a.code, &b.code).then(a.index.cmp(&b.index)));
    let mut rows: Vec<QuantityRow> = Vec::new();
    for fragment in &members {
        match rows.last_mut() {
            Some(row) if row.code == fragment.code => {
                row.count += 1;
                row.total_length += fragment.length;
                row.total_volume_m3 += fragment.volume / MM3_PER_M3;
            }
            _ => rows.push(QuantityRow {
                code: fragment.code.clone(),
                count: 1,
                total_length: fragment.length,
                total_volume_m3: fragment.volume / MM3_PER_M3,
            }),
        }
    }
    let total_volume_m3 = rows.iter().map(|r| r.total_volume_m3).sum();
    ViewportQuantities {
        viewport,
        title,
        fragment_indices: members.iter().map(|f| f.index).collect(),
        rows,
        total_volume_m3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_geom::{Bounds, Obb, Point};

    fn fragment(index: usize, code: &str, cx: f64, cy: f64, length: f64) -> Fragment {
        let obb = Obb::from_axis(
            Point::new(cx, cy),
            core_geom::Vec2::new(1.0, 0.0),
            150.0,
            -length / 2.0,
            length / 2.0,
        );
        Fragment {
            index,
            parent_index: index,
            tag: format!("{index}"),
            code: code.to_string(),
            span: None,
            width: 300.0,
            height: 600.0,
            priority: 2,
            obb,
            bounds: obb.bounds(),
            length,
            volume: length * 300.0 * 600.0,
        }
    }

    fn view(base_index: usize, x0: f64, x1: f64) -> MergedView {
        MergedView {
            base_index,
            title: format!("P({})", base_index + 1),
            bounds: Bounds::new(Point::new(x0, -10000.0), Point::new(x1, 10000.0)),
            labels_h: Vec::new(),
            labels_v: Vec::new(),
            leaders: Vec::new(),
            labels: Vec::new(),
        }
    }

    #[test]
    fn fragments_group_by_containing_viewport() {
        let views = vec![view(0, 0.0, 10000.0), view(1, 20000.0, 30000.0)];
        let fragments = vec![
            fragment(1, "KL1", 5000.0, 0.0, 4000.0),
            fragment(2, "KL1", 25000.0, 0.0, 6000.0),
            // Far outside both viewports.
            fragment(3, "L2", 90000.0, 0.0, 1000.0),
        ];
        let groups = summarize(&fragments, &views);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].viewport, Some(0));
        assert_eq!(groups[1].viewport, Some(1));
        assert_eq!(groups[2].viewport, None);
        assert_eq!(groups[0].fragment_indices, vec![1]);
        assert_eq!(groups[1].fragment_indices, vec![2]);
    }

    #[test]
    fn rows_aggregate_in_natural_code_order() {
        let views = vec![view(0, 0.0, 10000.0)];
        let fragments = vec![
            fragment(1, "KL10", 1000.0, 0.0, 1000.0),
            fragment(2, "KL2", 2000.0, 0.0, 2000.0),
            fragment(3, "KL2", 3000.0, 0.0, 3000.0),
        ];
        let groups = summarize(&fragments, &views);
        assert_eq!(groups.len(), 1);
        let rows = &groups[0].rows;
        assert_eq!(rows.len(), 2);
        // Natural order: KL2 before KL10.
        assert_eq!(rows[0].code, "KL2");
        assert_eq!(rows[0].count, 2);
        assert!((rows[0].total_length - 5000.0).abs() < 1e-9);
        assert_eq!(rows[1].code, "KL10");
    }

    #[test]
    fn volume_converts_to_cubic_metres() {
        let views = vec![view(0, 0.0, 10000.0)];
        // 4700 x 300 x 600 mm = 0.846 m3.
        let fragments = vec![fragment(1, "KL1", 5000.0, 0.0, 4700.0)];
        let groups = summarize(&fragments, &views);
        assert!((groups[0].total_volume_m3 - 0.846).abs() < 1e-9);
    }
}

//! Beam annotation texts and their parsed form.
//!
//! A beam label reads `CODE`, optionally followed by a parenthesised span
//! string and a `W x H` section: `KL1(2) 300x600`, `WKL4(1) 300×700`,
//! `L3 250X500`. The code token starts with a letter; the span keeps its raw
//! string (span arithmetic only ever needs the first integer); the separator
//! accepts `x`, `X`, and `×`. Labels missing the dimension section are
//! donor-filled from any same-code label that carries both numbers.

use core_geom::{Point, Segment};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A positioned annotation text, already translated into the merge base
/// frame. `layer` is the source layer, kept for traceability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelText {
    pub insert: Point,
    pub content: String,
    pub rotation: f64,
    pub height: f64,
    pub layer: String,
}

/// A parsed beam label. `leader` carries the anchor and arrow endpoints when
/// the annotation had a leader polyline; most labels only have their
/// insertion point. `width`/`height` are the beam's cross-section numbers,
/// `text_height` the annotation's own glyph height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamLabel {
    pub insert: Point,
    pub rotation: f64,
    pub text_height: f64,
    pub raw: String,
    pub code: String,
    pub span: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub leader: Option<(Point, Point)>,
}

impl BeamLabel {
    /// First integer of the span string; labels without a span section count
    /// as a single span.
    pub fn span_count(&self) -> u32 {
        self.literal_span().unwrap_or(1)
    }

    /// Explicit span from the parenthesised section, `None` when the label
    /// has no span section or the section holds no integer.
    pub fn literal_span(&self) -> Option<u32> {
        static FIRST_INT: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\d+").expect("static pattern"));
        let span = self.span.as_deref()?;
        FIRST_INT.find(span)?.as_str().parse().ok()
    }

    /// The points hit-tested against beams: leader endpoints when present,
    /// the insertion point otherwise.
    pub fn probe_points(&self) -> Vec<Point> {
        match self.leader {
            Some((anchor, arrow)) => vec![anchor, arrow],
            None => vec![self.insert],
        }
    }
}

static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^\s*
          ([A-Za-z][A-Za-z0-9-]*?)            # code token
          \s*(?:[(（]([^)）]*)[)）])?          # optional span section
          \s*(?:(\d{2,4})\s*[xX×]\s*(\d{2,4}))? # optional W x H
          \s*$",
    )
    .expect("static pattern")
});

static DIMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2,4})\s*[xX×]\s*(\d{2,4})").expect("static pattern"));

/// Parse one annotation text. `None` when the content is not a beam label.
pub fn parse_label(text: &LabelText) -> Option<BeamLabel> {
    let caps = LABEL.captures(text.content.trim())?;
    let code = caps.get(1)?.as_str().to_string();
    let span = caps.get(2).map(|m| m.as_str().to_string());
    let width = caps.get(3).and_then(|m| m.as_str().parse::<f64>().ok());
    let height = caps.get(4).and_then(|m| m.as_str().parse::<f64>().ok());
    Some(BeamLabel {
        insert: text.insert,
        rotation: text.rotation,
        text_height: text.height,
        raw: text.content.clone(),
        code,
        span,
        width,
        height,
        leader: None,
    })
}

/// Bind leader segments to labels: a label adopts the nearest unclaimed
/// leader whose closer endpoint lies within twice the annotation's glyph
/// height of the insertion point. The stored pair is (anchor near the text,
/// arrow at the far end); each leader serves at most one label.
pub fn attach_leaders(labels: &mut [BeamLabel], leaders: &[Segment]) {
    let mut used = vec![false; leaders.len()];
    for label in labels.iter_mut() {
        if label.leader.is_some() {
            continue;
        }
        let reach = (2.0 * label.text_height).max(100.0);
        let mut best: Option<(usize, f64, Point, Point)> = None;
        for (i, seg) in leaders.iter().enumerate() {
            if used[i] {
                continue;
            }
            let d_start = seg.start.distance(label.insert);
            let d_end = seg.end.distance(label.insert);
            let (near, far, d) = if d_start <= d_end {
                (seg.start, seg.end, d_start)
            } else {
                (seg.end, seg.start, d_end)
            };
            if d > reach {
                continue;
            }
            if best.as_ref().is_none_or(|(_, bd, _, _)| d < *bd) {
                best = Some((i, d, near, far));
            }
        }
        if let Some((i, _, near, far)) = best {
            used[i] = true;
            label.leader = Some((near, far));
        }
    }
}

/// Parse a label set and donor-fill missing dimensions: a label without
/// `W x H` copies both numbers from any same-code label that has them.
pub fn parse_labels(texts: &[LabelText]) -> Vec<BeamLabel> {
    let mut labels: Vec<BeamLabel> = texts.iter().filter_map(parse_label).collect();
    let mut donors: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    for label in &labels {
        if let (Some(w), Some(h)) = (label.width, label.height) {
            donors.entry(label.code.clone()).or_insert((w, h));
        }
    }
    for label in &mut labels {
        if (label.width.is_none() || label.height.is_none())
            && let Some((w, h)) = donors.get(&label.code)
        {
            label.width.get_or_insert(*w);
            label.height.get_or_insert(*h);
        }
    }
    labels
}

/// Every distinct `W` appearing before the dimension separator across the
/// label texts, restricted to plausible beam widths. Sorted ascending.
pub fn width_vocabulary(texts: &[LabelText]) -> Vec<f64> {
    let mut widths: Vec<f64> = Vec::new();
    for text in texts {
        for caps in DIMS.captures_iter(&text.content) {
            if let Ok(w) = caps[1].parse::<f64>()
                && (100.0..=2000.0).contains(&w)
                && !widths.iter().any(|x| (x - w).abs() < f64::EPSILON)
            {
                widths.push(w);
            }
        }
    }
    widths.sort_by(f64::total_cmp);
    widths
}

/// Junction ranking of a beam code: 2 for main beams, 1 for secondary, 0 for
/// anything else (including the UNKNOWN fallback).
pub fn code_priority(code: &str) -> u8 {
    static MAIN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(WKL|KL|LL|XL)").expect("static pattern"));
    static SECONDARY: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^L").expect("static pattern"));
    let upper = code.to_ascii_uppercase();
    if MAIN.is_match(&upper) {
        2
    } else if SECONDARY.is_match(&upper) {
        1
    } else {
        0
    }
}

/// Natural ordering: digit runs compare numerically, everything else by
/// character. `KL2` sorts before `KL10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ia = a.chars().peekable();
    let mut ib = b.chars().peekable();
    loop {
        match (ia.peek().copied(), ib.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let num_a = take_number(&mut ia);
                    let num_b = take_number(&mut ib);
                    match num_a.cmp(&num_b) {
                        Ordering::Equal => {}
                        other => return other,
                    }
                } else {
                    match ca.cmp(&cb) {
                        Ordering::Equal => {
                            ia.next();
                            ib.next();
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

fn take_number(iter: &mut std::iter::Peekable<std::str::Chars<'_>>) -> u64 {
    let mut value: u64 = 0;
    while let Some(c) = iter.peek()
        && let Some(d) = c.to_digit(10)
    {
        value = value.saturating_mul(10).saturating_add(u64::from(d));
        iter.next();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> LabelText {
        LabelText {
            insert: Point::new(0.0, 0.0),
            content: content.to_string(),
            rotation: 0.0,
            height: 300.0,
            layer: "BEAM_TEXT".to_string(),
        }
    }

    #[test]
    fn parses_full_label() {
        let label = parse_label(&text("KL1(2) 300x600")).unwrap();
        assert_eq!(label.code, "KL1");
        assert_eq!(label.span.as_deref(), Some("2"));
        assert_eq!(label.width, Some(300.0));
        assert_eq!(label.height, Some(600.0));
        assert_eq!(label.span_count(), 2);
        assert_eq!(label.literal_span(), Some(2));
    }

    #[test]
    fn parses_unicode_separator_and_fullwidth_parens() {
        let label = parse_label(&text("WKL4（1） 300×700")).unwrap();
        assert_eq!(label.code, "WKL4");
        assert_eq!(label.literal_span(), Some(1));
        assert_eq!(label.width, Some(300.0));
        assert_eq!(label.height, Some(700.0));
    }

    #[test]
    fn label_without_span_defaults_to_one_but_is_not_literal() {
        let label = parse_label(&text("L3 250X500")).unwrap();
        assert_eq!(label.span, None);
        assert_eq!(label.span_count(), 1);
        assert_eq!(label.literal_span(), None);
    }

    #[test]
    fn span_with_suffix_takes_first_integer() {
        let label = parse_label(&text("KL7(2A) 250x500")).unwrap();
        assert_eq!(label.span.as_deref(), Some("2A"));
        assert_eq!(label.span_count(), 2);
    }

    #[test]
    fn plain_dimension_text_is_not_a_label() {
        assert!(parse_label(&text("300x600")).is_none());
        assert!(parse_label(&text("12345")).is_none());
    }

    #[test]
    fn donor_fill_copies_dimensions_per_code() {
        let labels = parse_labels(&[text("KL1(2) 300x600"), text("KL1(2)"), text("KL2")]);
        assert_eq!(labels[1].width, Some(300.0));
        assert_eq!(labels[1].height, Some(600.0));
        // No donor for KL2.
        assert_eq!(labels[2].width, None);
    }

    #[test]
    fn vocabulary_collects_widths_in_range() {
        let vocab = width_vocabulary(&[
            text("KL1(2) 300x600"),
            text("L3 250X500"),
            text("250×500"),
            text("50x100"),    // below the plausible floor
            text("2500x600"),  // above the ceiling
        ]);
        assert_eq!(vocab, vec![250.0, 300.0]);
    }

    #[test]
    fn leader_binds_to_the_nearest_label() {
        let mut labels = parse_labels(&[text("KL1(2) 300x600")]);
        let leaders = vec![
            // Closer endpoint 50 mm from the insert, well inside 2x height.
            Segment::new(Point::new(50.0, 0.0), Point::new(50.0, -2000.0)),
            Segment::new(Point::new(5000.0, 0.0), Point::new(5000.0, -2000.0)),
        ];
        attach_leaders(&mut labels, &leaders);
        let (anchor, arrow) = labels[0].leader.expect("leader bound");
        assert_eq!(anchor, Point::new(50.0, 0.0));
        assert_eq!(arrow, Point::new(50.0, -2000.0));
        // Probe points now come from the leader, not the insert.
        assert_eq!(labels[0].probe_points(), vec![anchor, arrow]);
    }

    #[test]
    fn distant_leader_is_ignored() {
        let mut labels = parse_labels(&[text("KL1(2) 300x600")]);
        let leaders = vec![Segment::new(
            Point::new(2000.0, 0.0),
            Point::new(2000.0, -2000.0),
        )];
        attach_leaders(&mut labels, &leaders);
        assert!(labels[0].leader.is_none());
    }

    #[test]
    fn one_leader_serves_one_label() {
        let mut labels = parse_labels(&[text("KL1 300x600"), text("KL2 250x500")]);
        let leaders = vec![Segment::new(
            Point::new(10.0, 0.0),
            Point::new(10.0, -2000.0),
        )];
        attach_leaders(&mut labels, &leaders);
        assert!(labels[0].leader.is_some());
        assert!(labels[1].leader.is_none());
    }

    #[test]
    fn priority_table() {
        assert_eq!(code_priority("WKL4"), 2);
        assert_eq!(code_priority("KL2"), 2);
        assert_eq!(code_priority("LL1"), 2);
        assert_eq!(code_priority("XL9"), 2);
        assert_eq!(code_priority("L3"), 1);
        assert_eq!(code_priority("UNKNOWN"), 0);
        assert_eq!(code_priority("AL1"), 0);
    }

    #[test]
    fn natural_order_compares_digit_runs_numerically() {
        assert_eq!(natural_cmp("KL2", "KL10"), Ordering::Less);
        assert_eq!(natural_cmp("KL10", "KL10"), Ordering::Equal);
        assert_eq!(natural_cmp("L1", "KL1"), Ordering::Greater);
    }
}

//! Divider-based segmentation of the sorted series
//!
//! Splits the valid, date-sorted points into contiguous ranges between
//! adjacent divider positions. The sentinels are snapped onto the data's
//! actual date range first, so no point can be excluded by stale bounds
//! left over from a prior, larger dataset. Moving ranges are computed per
//! segment and never cross a divider.

use serde::Serialize;
use tracing::debug;

use crate::types::{DataPoint, DividerSet, LimitSet, round2};

/// One contiguous, non-empty range of the series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Left boundary, epoch milliseconds, inclusive.
    pub x_left: i64,
    /// Right boundary, epoch milliseconds, inclusive.
    pub x_right: i64,
    pub points: Vec<DataPoint>,
    /// `round2(|value[i] - value[i-1]|)` within this segment only.
    pub movements: Vec<f64>,
}

/// Vertical extents the caller's charts must cover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartBounds {
    pub xchart_min: f64,
    pub xchart_max: f64,
    pub mrchart_max: f64,
}

/// Partition sorted points into segments between adjacent dividers.
///
/// Both ends of each divider pair are closed, so a point dated exactly on
/// an interior divider belongs to the computations on both sides (an
/// accepted edge ambiguity). Ranges that capture no points are skipped.
///
/// # Panics
///
/// Fewer than 2 dividers is a programmer error; `DividerSet` cannot
/// structurally lose its sentinels, and this asserts that.
pub fn segment(points: &[DataPoint], dividers: &mut DividerSet) -> Vec<Segment> {
    assert!(dividers.all().len() >= 2, "divider set lost its sentinels");
    debug_assert!(
        points.windows(2).all(|w| w[0].x <= w[1].x),
        "segmentation input must be sorted by date"
    );

    let Some(first) = points.first() else {
        return Vec::new();
    };
    let last = points.last().expect("non-empty slice has a last point");
    dividers.snap_to_range(first.x_millis(), last.x_millis());

    let boundaries: Vec<i64> = dividers.all().iter().map(|d| d.x).collect();
    let mut segments = Vec::with_capacity(boundaries.len() - 1);
    for pair in boundaries.windows(2) {
        let (x_left, x_right) = (pair[0], pair[1]);
        let selected: Vec<DataPoint> = points
            .iter()
            .filter(|p| {
                let x = p.x_millis();
                x >= x_left && x <= x_right
            })
            .cloned()
            .collect();
        if selected.is_empty() {
            continue;
        }
        let movements = moving_ranges(&selected);
        segments.push(Segment {
            x_left,
            x_right,
            points: selected,
            movements,
        });
    }
    debug!(
        segments = segments.len(),
        dividers = dividers.all().len(),
        "segmented series"
    );
    segments
}

/// Moving-range series of a segment's points, rounded to 2 decimals.
pub fn moving_ranges(points: &[DataPoint]) -> Vec<f64> {
    points
        .windows(2)
        .map(|w| round2((w[1].value - w[0].value).abs()))
        .collect()
}

/// Fraction of the visible span added as padding on each side.
const PADDING_RATIO: f64 = 0.1;

/// Compute chart extents covering every plotted value.
///
/// Seeded from the per-segment limit lines, then widened over every point
/// and movement, plus any extra line values the caller is drawing (locked
/// limits, trend lines). A 10% padding of the resulting span is applied on
/// each side of the X chart and above the mR chart.
pub fn chart_bounds(
    segments: &[Segment],
    limits: &[LimitSet],
    extra_x_values: &[f64],
    extra_mr_values: &[f64],
) -> ChartBounds {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut mr_max = f64::NEG_INFINITY;

    for limit in limits {
        x_min = x_min.min(limit.lnpl);
        x_max = x_max.max(limit.unpl);
        mr_max = mr_max.max(limit.url);
    }
    for segment in segments {
        for point in &segment.points {
            x_min = x_min.min(point.value);
            x_max = x_max.max(point.value);
        }
        for &movement in &segment.movements {
            mr_max = mr_max.max(movement);
        }
    }
    for &value in extra_x_values {
        x_min = x_min.min(value);
        x_max = x_max.max(value);
    }
    for &value in extra_mr_values {
        mr_max = mr_max.max(value);
    }

    if !x_min.is_finite() || !x_max.is_finite() {
        return ChartBounds {
            xchart_min: 0.0,
            xchart_max: 0.0,
            mrchart_max: 0.0,
        };
    }

    let x_pad = (x_max - x_min) * PADDING_RATIO;
    let mr_max = if mr_max.is_finite() { mr_max } else { 0.0 };
    ChartBounds {
        xchart_min: x_min - x_pad,
        xchart_max: x_max + x_pad,
        mrchart_max: mr_max * (1.0 + PADDING_RATIO),
    }
}

//! Exception detection rules over one segment
//!
//! Three rules run in a fixed order (run-of-eight, four-near-limit,
//! outside-limit) after all statuses are reset to `Normal`, so a later
//! rule overwrites an earlier mark on the same point and nothing stacks
//! across recomputations.
//!
//! Every rule compares against a [`Threshold`], which is either a flat
//! limit value or a per-index line (required when trend or locked-limit
//! centre lines are in effect). The per-index form must cover every window
//! position, not just the window starts.

use serde::{Deserialize, Serialize};

use crate::types::{DataPoint, LimitSet, PointStatus};

/// A detection threshold: one value for the whole segment, or one per index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    Constant(f64),
    PerIndex(Vec<f64>),
}

impl Threshold {
    /// Threshold value at point index `i`.
    pub fn at(&self, i: usize) -> f64 {
        match self {
            Threshold::Constant(value) => *value,
            Threshold::PerIndex(values) => {
                debug_assert!(i < values.len(), "per-index threshold shorter than segment");
                values[i]
            }
        }
    }

    /// A threshold that never triggers as an upper bound.
    pub fn disabled_upper() -> Self {
        Threshold::Constant(f64::INFINITY)
    }

    /// A threshold that never triggers as a lower bound.
    pub fn disabled_lower() -> Self {
        Threshold::Constant(f64::NEG_INFINITY)
    }
}

/// The full threshold set one detection pass runs against.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionThresholds {
    /// Centre line for the run-of-eight rule.
    pub centre: Threshold,
    /// Lower quartile for four-near-limit (`-inf` disables the side).
    pub lower_quartile: Threshold,
    /// Upper quartile for four-near-limit (`+inf` disables the side).
    pub upper_quartile: Threshold,
    /// Lower bound for outside-limit.
    pub lnpl: Threshold,
    /// Upper bound for outside-limit.
    pub unpl: Threshold,
}

impl DetectionThresholds {
    /// Flat thresholds from a computed or locked `LimitSet`.
    ///
    /// `use_lower_quartile` / `use_upper_quartile` come from the locked
    /// quartile symmetry policy; a suppressed side never triggers.
    pub fn from_limits(limits: &LimitSet, use_lower_quartile: bool, use_upper_quartile: bool) -> Self {
        Self {
            centre: Threshold::Constant(limits.avg_x),
            lower_quartile: if use_lower_quartile {
                Threshold::Constant(limits.lower_quartile)
            } else {
                Threshold::disabled_lower()
            },
            upper_quartile: if use_upper_quartile {
                Threshold::Constant(limits.upper_quartile)
            } else {
                Threshold::disabled_upper()
            },
            lnpl: Threshold::Constant(limits.lnpl),
            unpl: Threshold::Constant(limits.unpl),
        }
    }
}

/// Reset every point to `Normal`, then run the three rules in order.
pub fn detect_exceptions(points: &mut [DataPoint], thresholds: &DetectionThresholds) {
    for point in points.iter_mut() {
        point.status = PointStatus::Normal;
    }
    mark_run_of_eight(points, &thresholds.centre);
    mark_four_near_limit(points, &thresholds.lower_quartile, &thresholds.upper_quartile);
    mark_outside_limit(points, &thresholds.lnpl, &thresholds.unpl);
}

/// Run-of-eight: 8 consecutive points on the same side of the centre line.
///
/// A trailing 8-bit mask records, per position, whether the value is
/// strictly above the centre; a point exactly on the centre counts as the
/// below side. Mask 0xFF (all above) or 0x00 (all below) marks the whole
/// window. No-op under 8 points.
pub fn mark_run_of_eight(points: &mut [DataPoint], centre: &Threshold) {
    if points.len() < 8 {
        return;
    }
    let mut mask: u8 = 0;
    for i in 0..points.len() {
        let above = points[i].value > centre.at(i);
        mask = (mask << 1) | u8::from(above);
        if i >= 7 && (mask == 0xFF || mask == 0x00) {
            for point in &mut points[i - 7..=i] {
                point.status = PointStatus::RunOfEight;
            }
        }
    }
}

/// Four-near-limit: 3 of 4 consecutive points beyond a quartile line.
///
/// Counts values strictly below the lower threshold and strictly above the
/// upper threshold separately; either side reaching 3 marks all 4 points.
/// No-op under 4 points.
pub fn mark_four_near_limit(points: &mut [DataPoint], lower: &Threshold, upper: &Threshold) {
    if points.len() < 4 {
        return;
    }
    for i in 3..points.len() {
        let window = i - 3..=i;
        let mut below = 0;
        let mut above = 0;
        for j in window.clone() {
            if points[j].value < lower.at(j) {
                below += 1;
            }
            if points[j].value > upper.at(j) {
                above += 1;
            }
        }
        if below >= 3 || above >= 3 {
            for point in &mut points[window] {
                point.status = PointStatus::FourNearLimit;
            }
        }
    }
}

/// Outside-limit: pointwise strict comparison against the process limits.
pub fn mark_outside_limit(points: &mut [DataPoint], lower: &Threshold, upper: &Threshold) {
    for (i, point) in points.iter_mut().enumerate() {
        if point.value < lower.at(i) || point.value > upper.at(i) {
            point.status = PointStatus::OutsideLimit;
        }
    }
}

/// Classify a segment's moving-range series.
///
/// The mR chart only uses the outside-limit rule, bounded below by zero
/// (never triggered by absolute ranges) and above by the Upper Range Limit.
pub fn detect_movement_exceptions(movements: &[f64], url: f64) -> Vec<PointStatus> {
    movements
        .iter()
        .map(|&m| {
            if m < 0.0 || m > url {
                PointStatus::OutsideLimit
            } else {
                PointStatus::Normal
            }
        })
        .collect()
}

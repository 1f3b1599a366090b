//! Linear trend substitution for the first segment
//!
//! Ordinary least squares over x-values normalized to "cycles since the
//! first point", so the slope reads as change per nominal sampling
//! interval even on an irregular calendar. The fitted line replaces the
//! flat centre line, with parametric NPLs and quartiles derived from the
//! average moving range of the chronological values.

use serde::{Deserialize, Serialize};

use crate::detection::{DetectionThresholds, Threshold};
use crate::limits::NPL_SCALE_MEAN;
use crate::types::DataPoint;

/// Fitted trend parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendModel {
    /// Slope per nominal sampling interval.
    pub m: f64,
    /// Intercept.
    pub c: f64,
    /// Average moving range of the chronological, unnormalized values.
    pub avg_mr: f64,
}

/// Which spread the parametric NPLs use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendVariant {
    /// NPLs at `centre ± 2.66 × avg_mr`.
    #[default]
    Standard,
    /// Substitutes `avg_mr - m`, compensating for the slope's own
    /// contribution to the apparent point-to-point variability.
    Reduced,
}

/// Per-index line values substituting the flat limit lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendLines {
    pub centre: Vec<f64>,
    pub unpl: Vec<f64>,
    pub lnpl: Vec<f64>,
    pub upper_quartile: Vec<f64>,
    pub lower_quartile: Vec<f64>,
}

impl TrendLines {
    /// Thresholds for exception detection against these lines.
    pub fn detection_thresholds(&self) -> DetectionThresholds {
        DetectionThresholds {
            centre: Threshold::PerIndex(self.centre.clone()),
            lower_quartile: Threshold::PerIndex(self.lower_quartile.clone()),
            upper_quartile: Threshold::PerIndex(self.upper_quartile.clone()),
            lnpl: Threshold::PerIndex(self.lnpl.clone()),
            unpl: Threshold::PerIndex(self.unpl.clone()),
        }
    }
}

/// Fit a trend over date-sorted points.
///
/// Returns `None` for fewer than 2 points, a zero first gap, or a zero OLS
/// denominator (all normalized x identical); callers handle the null case
/// by leaving trend mode off.
pub fn regress(points: &[DataPoint]) -> Option<TrendModel> {
    if points.len() < 2 {
        return None;
    }
    debug_assert!(
        points.windows(2).all(|w| w[0].x <= w[1].x),
        "regression input must be sorted by date"
    );

    let origin = points[0].x_millis();
    let unit = points[1].x_millis() - origin;
    if unit == 0 {
        return None;
    }

    let n = points.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    for point in points {
        let x = (point.x_millis() - origin) as f64 / unit as f64;
        sum_x += x;
        sum_y += point.value;
        sum_xy += x * point.value;
        sum_x2 += x * x;
    }

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return None;
    }
    let m = (n * sum_xy - sum_x * sum_y) / denominator;
    let c = (sum_y - m * sum_x) / n;

    let movements: Vec<f64> = points
        .windows(2)
        .map(|w| (w[1].value - w[0].value).abs())
        .collect();
    let avg_mr = movements.iter().sum::<f64>() / movements.len() as f64;

    Some(TrendModel { m, c, avg_mr })
}

/// Generate the per-index line values for `n` points.
pub fn trend_lines(model: &TrendModel, n: usize, variant: TrendVariant) -> TrendLines {
    let spread_mr = match variant {
        TrendVariant::Standard => model.avg_mr,
        TrendVariant::Reduced => model.avg_mr - model.m,
    };
    let spread = NPL_SCALE_MEAN * spread_mr;

    let mut lines = TrendLines {
        centre: Vec::with_capacity(n),
        unpl: Vec::with_capacity(n),
        lnpl: Vec::with_capacity(n),
        upper_quartile: Vec::with_capacity(n),
        lower_quartile: Vec::with_capacity(n),
    };
    for i in 0..n {
        let centre = i as f64 * model.m + model.c;
        let unpl = centre + spread;
        let lnpl = centre - spread;
        lines.centre.push(centre);
        lines.unpl.push(unpl);
        lines.lnpl.push(lnpl);
        lines.upper_quartile.push((centre + unpl) / 2.0);
        lines.lower_quartile.push((centre + lnpl) / 2.0);
    }
    lines
}

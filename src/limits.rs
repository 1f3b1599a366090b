//! Control limit computation for one segment
//!
//! Implements the fixed XmR formulas: the centre line and average moving
//! range of a segment, scaled into Natural Process Limits and the Upper
//! Range Limit. The scaling constants are the standard d2-derived factors
//! for n=2 subgroup moving ranges; a median-based mode swaps in the
//! median-moving-range constant set.
//!
//! All outputs are rounded to 2 decimal places at the end; intermediate
//! math runs at full precision.

use serde::{Deserialize, Serialize};

use crate::types::{DataPoint, LimitSet, round2};

/// NPL scaling for mean centering (3 / d2 for n=2).
pub(crate) const NPL_SCALE_MEAN: f64 = 2.66;

/// URL scaling for mean centering (D4 for n=2).
pub(crate) const URL_SCALE_MEAN: f64 = 3.268;

/// NPL scaling for median centering.
const NPL_SCALE_MEDIAN: f64 = 3.145;

/// URL scaling for median centering.
const URL_SCALE_MEDIAN: f64 = 3.865;

/// Which centre statistic anchors the limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Centering {
    /// Arithmetic mean of values and moving ranges (2.66 / 3.268).
    #[default]
    Mean,
    /// Median of values and moving ranges (3.145 / 3.865).
    Median,
}

/// Limit calculator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LimitConfig {
    pub centering: Centering,
}

/// Compute the full `LimitSet` for one segment.
///
/// `movements` is the segment's own moving-range series (it never crosses
/// a divider). A segment with fewer than 2 points has no moving ranges and
/// gets `avg_movement = 0`; the limits then collapse onto the centre line.
pub fn compute_limits(points: &[DataPoint], movements: &[f64], config: &LimitConfig) -> LimitSet {
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();

    let (avg_x, avg_movement, npl_scale, url_scale) = match config.centering {
        Centering::Mean => (
            mean(&values),
            // Denominator floored at 1 so a <2 point segment yields 0
            movements.iter().sum::<f64>() / (movements.len().max(1) as f64),
            NPL_SCALE_MEAN,
            URL_SCALE_MEAN,
        ),
        Centering::Median => (
            median(&values),
            median(movements),
            NPL_SCALE_MEDIAN,
            URL_SCALE_MEDIAN,
        ),
    };

    let unpl = avg_x + npl_scale * avg_movement;
    let lnpl = avg_x - npl_scale * avg_movement;
    let url = url_scale * avg_movement;

    LimitSet {
        avg_x: round2(avg_x),
        avg_movement: round2(avg_movement),
        unpl: round2(unpl),
        lnpl: round2(lnpl),
        url: round2(url),
        lower_quartile: round2((avg_x + lnpl) / 2.0),
        upper_quartile: round2((avg_x + unpl) / 2.0),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn points_from(values: &[f64]) -> Vec<DataPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let x = NaiveDate::from_ymd_opt(2024, 1, 1)
                    .expect("valid date")
                    + chrono::Days::new(i as u64);
                DataPoint::new(i, x, v)
            })
            .collect()
    }

    fn movements_of(values: &[f64]) -> Vec<f64> {
        values.windows(2).map(|w| (w[1] - w[0]).abs()).collect()
    }

    #[test]
    fn test_mean_limits_textbook() {
        // Two points: avg_x = 100, avg_movement = 10
        let points = points_from(&[95.0, 105.0]);
        let movements = movements_of(&[95.0, 105.0]);
        let limits = compute_limits(&points, &movements, &LimitConfig::default());

        assert_eq!(limits.avg_x, 100.0);
        assert_eq!(limits.avg_movement, 10.0);
        // UNPL = 100 + 2.66 * 10 = 126.6
        assert_eq!(limits.unpl, 126.6);
        assert_eq!(limits.lnpl, 73.4);
        // URL = 3.268 * 10 = 32.68
        assert_eq!(limits.url, 32.68);
        // Quartiles are midpoints
        assert_eq!(limits.upper_quartile, 113.3);
        assert_eq!(limits.lower_quartile, 86.7);
    }

    #[test]
    fn test_limit_monotonicity() {
        let values = [12.0, 15.0, 9.0, 14.0, 11.0, 13.0, 10.0, 16.0];
        let points = points_from(&values);
        let movements = movements_of(&values);
        for centering in [Centering::Mean, Centering::Median] {
            let limits = compute_limits(&points, &movements, &LimitConfig { centering });
            assert!(limits.lnpl <= limits.avg_x, "{centering:?}");
            assert!(limits.avg_x <= limits.unpl, "{centering:?}");
            assert!(limits.url >= 0.0, "{centering:?}");
        }
    }

    #[test]
    fn test_single_point_segment_collapses() {
        let points = points_from(&[42.0]);
        let limits = compute_limits(&points, &[], &LimitConfig::default());
        assert_eq!(limits.avg_x, 42.0);
        assert_eq!(limits.avg_movement, 0.0);
        assert_eq!(limits.unpl, 42.0);
        assert_eq!(limits.lnpl, 42.0);
        assert_eq!(limits.url, 0.0);
    }

    #[test]
    fn test_median_centering_constants() {
        // Values chosen so mean != median
        let values = [10.0, 10.0, 10.0, 22.0];
        let points = points_from(&values);
        let movements = movements_of(&values); // [0, 0, 12] -> median 0
        let limits = compute_limits(
            &points,
            &movements,
            &LimitConfig {
                centering: Centering::Median,
            },
        );
        assert_eq!(limits.avg_x, 10.0);
        assert_eq!(limits.avg_movement, 0.0);
        assert_eq!(limits.unpl, 10.0);

        // Movement median of [2, 2, 4] is 2 -> UNPL = centre + 3.145 * 2
        let values = [10.0, 12.0, 14.0, 18.0];
        let limits = compute_limits(
            &points_from(&values),
            &movements_of(&values),
            &LimitConfig {
                centering: Centering::Median,
            },
        );
        assert_eq!(limits.avg_x, 13.0);
        assert_eq!(limits.avg_movement, 2.0);
        assert_eq!(limits.unpl, round2(13.0 + 3.145 * 2.0));
        assert_eq!(limits.url, round2(3.865 * 2.0));
    }

    #[test]
    fn test_rounding_applied_at_end() {
        // avg_movement = (1/3 + 1/3) / 2 is irrational-ish; outputs must be
        // 2-decimal values
        let values = [1.0, 4.0 / 3.0, 5.0 / 3.0];
        let points = points_from(&values);
        let movements = movements_of(&values);
        let limits = compute_limits(&points, &movements, &LimitConfig::default());
        for v in [
            limits.avg_x,
            limits.avg_movement,
            limits.unpl,
            limits.lnpl,
            limits.url,
            limits.lower_quartile,
            limits.upper_quartile,
        ] {
            assert_eq!(v, round2(v));
        }
    }
}

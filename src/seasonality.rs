//! Seasonal factor decomposition and de-seasonalization
//!
//! The series is partitioned into consecutive cycles of a chosen period
//! (year, quarter, month, week), each cycle broken into sub-slots sized by
//! the sampling cadence, or by an optional coarser grouping, in which case
//! raw values are summed within each sub-group first. Sub-slots with no
//! data are explicit gaps: factor calculation averages only the slots that
//! exist across cycles, and a position that is present in one cycle but
//! missing in another is reported as a data-quality finding.
//!
//! Factors are multiplicative: a sub-period's aggregate divided by the
//! mean of all sub-period aggregates, so they calibrate to 1.0 on average.
//! Applying factors divides each value by its sub-period factor (removing
//! the expected seasonal multiple); reversal is re-multiplication, and
//! only the factor array and period are ever persisted.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::DataPoint;

/// Sampling cadence inferred from the modal gap between dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

/// Seasonal cycle length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Week,
    Month,
    Quarter,
    Year,
}

impl Period {
    /// Wire name used in the share link's `p0` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Week => "week",
            Period::Month => "month",
            Period::Quarter => "quarter",
            Period::Year => "year",
        }
    }

    pub fn parse(s: &str) -> Option<Period> {
        match s {
            "week" => Some(Period::Week),
            "month" => Some(Period::Month),
            "quarter" => Some(Period::Quarter),
            "year" => Some(Period::Year),
            _ => None,
        }
    }

    fn as_cadence(self) -> Cadence {
        match self {
            Period::Week => Cadence::Week,
            Period::Month => Cadence::Month,
            Period::Quarter => Cadence::Quarter,
            Period::Year => Cadence::Year,
        }
    }
}

/// Errors from periodization and factor application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeasonalityError {
    #[error("at least 2 dated points are required to infer the sampling cadence")]
    InsufficientData,
    #[error("grouping {grouping:?} must be at least as coarse as the {cadence:?} cadence and finer than the {period:?} period")]
    InvalidGrouping {
        grouping: Cadence,
        cadence: Cadence,
        period: Period,
    },
}

/// Derived multiplicative factors, one per sub-period position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalFactors {
    pub period: Period,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Cadence>,
    /// Indexed by sub-period position within the period.
    pub factors: Vec<f64>,
    /// True when some cycle lacked a sub-position that others have.
    pub has_missing: bool,
}

/// One cycle's sub-slot values; `None` marks a gap.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    pub slots: Vec<Option<f64>>,
}

/// A series partitioned into cycles of equal sub-slot layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Periodized {
    pub period: Period,
    pub grouping: Option<Cadence>,
    pub slots_per_cycle: usize,
    pub cycles: Vec<Cycle>,
    grouped: bool,
}

/// Infer the sampling cadence from the modal gap between consecutive
/// sorted dates.
pub fn infer_cadence(dates: &[NaiveDate]) -> Option<Cadence> {
    if dates.len() < 2 {
        return None;
    }
    let mut gap_counts: BTreeMap<i64, usize> = BTreeMap::new();
    for pair in dates.windows(2) {
        let gap = (pair[1] - pair[0]).num_days();
        if gap > 0 {
            *gap_counts.entry(gap).or_insert(0) += 1;
        }
    }
    let modal_gap = gap_counts
        .into_iter()
        .max_by_key(|&(gap, count)| (count, std::cmp::Reverse(gap)))?
        .0;
    Some(match modal_gap {
        1..=2 => Cadence::Day,
        3..=13 => Cadence::Week,
        14..=45 => Cadence::Month,
        46..=135 => Cadence::Quarter,
        _ => Cadence::Year,
    })
}

/// Partition sorted points into cycles of `period`.
///
/// The sub-slot unit is the inferred cadence, or `grouping` when given, in
/// which case raw values are summed within each sub-group before becoming
/// the unit of periodization. Multiple ungrouped points landing in one
/// slot (duplicate dates) are averaged.
pub fn periodize(
    points: &[DataPoint],
    period: Period,
    grouping: Option<Cadence>,
) -> Result<Periodized, SeasonalityError> {
    let dates: Vec<NaiveDate> = points.iter().map(|p| p.x).collect();
    let cadence = infer_cadence(&dates).ok_or(SeasonalityError::InsufficientData)?;
    let unit = grouping.unwrap_or(cadence);
    if unit < cadence || unit >= period.as_cadence() {
        return Err(SeasonalityError::InvalidGrouping {
            grouping: unit,
            cadence,
            period,
        });
    }
    let grouped = grouping.is_some_and(|g| g > cadence);
    let slots_per_cycle = slots_per_cycle(period, unit);

    // (sum, count) per occupied slot of each cycle, keyed chronologically
    let mut accum: BTreeMap<i64, Vec<Option<(f64, usize)>>> = BTreeMap::new();
    for point in points {
        let key = cycle_key(point.x, period);
        let slot = slot_index(point.x, period, unit);
        let slots = accum
            .entry(key)
            .or_insert_with(|| vec![None; slots_per_cycle]);
        let entry = slots[slot].get_or_insert((0.0, 0));
        entry.0 += point.value;
        entry.1 += 1;
    }

    let cycles = accum
        .into_values()
        .map(|slots| Cycle {
            slots: slots
                .into_iter()
                .map(|slot| {
                    slot.map(|(sum, count)| if grouped { sum } else { sum / count as f64 })
                })
                .collect(),
        })
        .collect();

    Ok(Periodized {
        period,
        grouping,
        slots_per_cycle,
        cycles,
        grouped,
    })
}

/// Derive multiplicative factors from a periodized series.
///
/// Per position: aggregate across the cycles that have data there (sum
/// when grouped, mean otherwise), divided by the mean of all per-position
/// aggregates. All-missing positions default to factor 1.
pub fn calculate_factors(
    points: &[DataPoint],
    period: Period,
    grouping: Option<Cadence>,
) -> Result<SeasonalFactors, SeasonalityError> {
    let periodized = periodize(points, period, grouping)?;

    let mut aggregates = vec![f64::NAN; periodized.slots_per_cycle];
    let mut has_missing = false;
    for position in 0..periodized.slots_per_cycle {
        let values: Vec<f64> = periodized
            .cycles
            .iter()
            .filter_map(|cycle| cycle.slots[position])
            .collect();
        if values.is_empty() {
            continue;
        }
        if values.len() < periodized.cycles.len() {
            has_missing = true;
        }
        aggregates[position] = if periodized.grouped {
            values.iter().sum()
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
    }

    let present: Vec<f64> = aggregates.iter().copied().filter(|a| a.is_finite()).collect();
    let overall = present.iter().sum::<f64>() / present.len().max(1) as f64;

    let factors = aggregates
        .into_iter()
        .map(|aggregate| {
            let factor = aggregate / overall;
            if factor.is_finite() { factor } else { 1.0 }
        })
        .collect();

    if has_missing {
        warn!(
            period = period.as_str(),
            "seasonal factor input has cycles with missing sub-periods"
        );
    }

    Ok(SeasonalFactors {
        period,
        grouping,
        factors,
        has_missing,
    })
}

/// Divide each point's value by its sub-period factor.
///
/// Factors represent the expected seasonal multiple, so dividing removes
/// it. Each returned point carries its 1-based sub-period index. Positions
/// beyond the factor array, and zero factors, pass through unchanged.
pub fn apply_factors(
    points: &[DataPoint],
    factors: &SeasonalFactors,
) -> Result<Vec<DataPoint>, SeasonalityError> {
    let dates: Vec<NaiveDate> = points.iter().map(|p| p.x).collect();
    let cadence = infer_cadence(&dates).ok_or(SeasonalityError::InsufficientData)?;
    let unit = factors.grouping.unwrap_or(cadence);

    Ok(points
        .iter()
        .map(|point| {
            let slot = slot_index(point.x, factors.period, unit);
            let factor = factors.factors.get(slot).copied().unwrap_or(1.0);
            let mut adjusted = point.clone();
            if factor != 0.0 {
                adjusted.value = point.value / factor;
            }
            adjusted.seasonal_factor_index = Some(slot + 1);
            adjusted
        })
        .collect())
}

fn slots_per_cycle(period: Period, unit: Cadence) -> usize {
    match (period, unit) {
        (Period::Week, Cadence::Day) => 7,
        (Period::Month, Cadence::Day) => 31,
        (Period::Month, Cadence::Week) => 5,
        (Period::Quarter, Cadence::Day) => 92,
        (Period::Quarter, Cadence::Week) => 14,
        (Period::Quarter, Cadence::Month) => 3,
        (Period::Year, Cadence::Day) => 366,
        (Period::Year, Cadence::Week) => 53,
        (Period::Year, Cadence::Month) => 12,
        (Period::Year, Cadence::Quarter) => 4,
        // Rejected by the grouping validation in periodize
        _ => 1,
    }
}

/// Chronologically ordered key of the cycle containing `date`.
fn cycle_key(date: NaiveDate, period: Period) -> i64 {
    match period {
        // Proleptic Gregorian day 1 is a Monday, so this buckets by
        // calendar week
        Period::Week => i64::from(date.num_days_from_ce() - 1).div_euclid(7),
        Period::Month => i64::from(date.year()) * 12 + i64::from(date.month0()),
        Period::Quarter => i64::from(date.year()) * 4 + i64::from(date.month0() / 3),
        Period::Year => i64::from(date.year()),
    }
}

/// Zero-based sub-slot position of `date` within its cycle.
fn slot_index(date: NaiveDate, period: Period, unit: Cadence) -> usize {
    match (period, unit) {
        (Period::Week, _) => date.weekday().num_days_from_monday() as usize,
        (Period::Month, Cadence::Day) => date.day0() as usize,
        (Period::Month, _) => date.day0() as usize / 7,
        (Period::Quarter, Cadence::Day) => days_into_quarter(date),
        (Period::Quarter, Cadence::Week) => days_into_quarter(date) / 7,
        (Period::Quarter, _) => date.month0() as usize % 3,
        (Period::Year, Cadence::Day) => date.ordinal0() as usize,
        (Period::Year, Cadence::Week) => (date.ordinal0() as usize / 7).min(52),
        (Period::Year, Cadence::Month) => date.month0() as usize,
        (Period::Year, _) => date.month0() as usize / 3,
    }
}

fn days_into_quarter(date: NaiveDate) -> usize {
    let start_month = (date.month0() / 3) * 3 + 1;
    let start = NaiveDate::from_ymd_opt(date.year(), start_month, 1)
        .expect("first day of a quarter always exists");
    (date - start).num_days() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    fn monthly_points(start_year: i32, values: &[f64]) -> Vec<DataPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let year = start_year + (i / 12) as i32;
                let month = (i % 12) as u32 + 1;
                DataPoint::new(i, date(year, month, 1), v)
            })
            .collect()
    }

    #[test]
    fn test_infer_cadence() {
        let daily: Vec<NaiveDate> = (0..5).map(|i| date(2024, 1, 1 + i)).collect();
        assert_eq!(infer_cadence(&daily), Some(Cadence::Day));

        let weekly: Vec<NaiveDate> = (0..5).map(|i| date(2024, 1, 1) + chrono::Days::new(i * 7)).collect();
        assert_eq!(infer_cadence(&weekly), Some(Cadence::Week));

        let monthly: Vec<NaiveDate> = (1..=6).map(|m| date(2024, m, 1)).collect();
        assert_eq!(infer_cadence(&monthly), Some(Cadence::Month));

        let yearly: Vec<NaiveDate> = (0..4).map(|i| date(2020 + i, 1, 1)).collect();
        assert_eq!(infer_cadence(&yearly), Some(Cadence::Year));

        assert_eq!(infer_cadence(&[date(2024, 1, 1)]), None);
    }

    #[test]
    fn test_infer_cadence_modal_gap_wins() {
        // Mostly daily with one large hole
        let mut dates: Vec<NaiveDate> = (0..10).map(|i| date(2024, 1, 1 + i)).collect();
        dates.push(date(2024, 3, 1));
        dates.sort();
        assert_eq!(infer_cadence(&dates), Some(Cadence::Day));
    }

    #[test]
    fn test_periodize_monthly_in_year() {
        // Two complete years of monthly data
        let values: Vec<f64> = (0..24).map(|i| (i % 12) as f64 + 1.0).collect();
        let points = monthly_points(2022, &values);
        let periodized = periodize(&points, Period::Year, None).expect("periodizes");
        assert_eq!(periodized.slots_per_cycle, 12);
        assert_eq!(periodized.cycles.len(), 2);
        assert!(periodized.cycles.iter().all(|c| c.slots.iter().all(Option::is_some)));
    }

    #[test]
    fn test_periodize_gap_is_explicit() {
        // Second year lacks March
        let mut points = monthly_points(2022, &(0..12).map(|i| i as f64 + 1.0).collect::<Vec<_>>());
        for (i, month) in (1..=12).filter(|&m| m != 3).enumerate() {
            points.push(DataPoint::new(12 + i, date(2023, month, 1), month as f64));
        }
        points.sort_by_key(|p| p.x);
        let periodized = periodize(&points, Period::Year, None).expect("periodizes");
        assert_eq!(periodized.cycles.len(), 2);
        assert!(periodized.cycles[0].slots[2].is_some());
        assert!(periodized.cycles[1].slots[2].is_none());
    }

    #[test]
    fn test_periodize_rejects_grouping_coarser_than_period() {
        let points = monthly_points(2022, &[1.0; 24]);
        let err = periodize(&points, Period::Quarter, Some(Cadence::Year)).expect_err("invalid");
        assert!(matches!(err, SeasonalityError::InvalidGrouping { .. }));
    }

    #[test]
    fn test_periodize_rejects_grouping_finer_than_cadence() {
        let points = monthly_points(2022, &[1.0; 24]);
        let err = periodize(&points, Period::Year, Some(Cadence::Day)).expect_err("invalid");
        assert!(matches!(err, SeasonalityError::InvalidGrouping { .. }));
    }

    #[test]
    fn test_factors_complete_data_average_to_one() {
        // Seasonal pattern repeating identically over two years
        let pattern: Vec<f64> = (1..=12).map(|m| 100.0 + 10.0 * (m % 4) as f64).collect();
        let mut values = pattern.clone();
        values.extend_from_slice(&pattern);
        let points = monthly_points(2022, &values);

        let factors = calculate_factors(&points, Period::Year, None).expect("factors");
        assert_eq!(factors.factors.len(), 12);
        assert!(!factors.has_missing);
        let mean_factor: f64 = factors.factors.iter().sum::<f64>() / 12.0;
        assert!((mean_factor - 1.0).abs() < 1e-9);

        // Highest-valued month gets the largest factor
        let grand_mean: f64 = values.iter().sum::<f64>() / values.len() as f64;
        for (m, factor) in factors.factors.iter().enumerate() {
            assert!((factor - pattern[m] / grand_mean).abs() < 1e-9);
        }
    }

    #[test]
    fn test_factors_missing_position_flagged_and_skipped() {
        // 2022 complete; 2023 missing March
        let values: Vec<f64> = (1..=12).map(|m| m as f64 * 10.0).collect();
        let mut points = monthly_points(2022, &values);
        for month in (1..=12).filter(|&m| m != 3) {
            points.push(DataPoint::new(
                100 + month as usize,
                date(2023, month, 1),
                month as f64 * 10.0,
            ));
        }
        points.sort_by_key(|p| p.x);

        let factors = calculate_factors(&points, Period::Year, None).expect("factors");
        assert!(factors.has_missing);
        // March aggregates over the single cycle that has it
        let march = factors.factors[2];
        assert!(march.is_finite() && march > 0.0);
    }

    #[test]
    fn test_factors_all_missing_position_defaults_to_one() {
        // Quarterly period over monthly data with month 3 of the quarter
        // never observed
        let mut points = Vec::new();
        let mut order = 0;
        for year in [2022, 2023] {
            for month in [1, 2, 4, 5, 7, 8, 10, 11] {
                points.push(DataPoint::new(order, date(year, month, 1), 50.0));
                order += 1;
            }
        }
        let factors = calculate_factors(&points, Period::Quarter, None).expect("factors");
        assert_eq!(factors.factors.len(), 3);
        assert_eq!(factors.factors[2], 1.0);
    }

    #[test]
    fn test_grouped_weekly_sums_within_year() {
        // Daily data grouped into weekly sub-periods of a yearly cycle
        let points: Vec<DataPoint> = (0..28)
            .map(|i| DataPoint::new(i, date(2024, 1, 1) + chrono::Days::new(i as u64), 1.0))
            .collect();
        let periodized =
            periodize(&points, Period::Year, Some(Cadence::Week)).expect("periodizes");
        assert_eq!(periodized.slots_per_cycle, 53);
        // Four full weeks of 1.0/day sum to 7.0 each
        let occupied: Vec<f64> = periodized.cycles[0]
            .slots
            .iter()
            .filter_map(|s| *s)
            .collect();
        assert_eq!(occupied, vec![7.0, 7.0, 7.0, 7.0]);
    }

    #[test]
    fn test_apply_factors_divides_and_tags() {
        let pattern: Vec<f64> = (1..=12).map(|m| 100.0 + 10.0 * (m % 4) as f64).collect();
        let mut values = pattern.clone();
        values.extend_from_slice(&pattern);
        let points = monthly_points(2022, &values);

        let factors = calculate_factors(&points, Period::Year, None).expect("factors");
        let adjusted = apply_factors(&points, &factors).expect("applies");

        assert_eq!(adjusted.len(), points.len());
        assert_eq!(adjusted[0].seasonal_factor_index, Some(1));
        assert_eq!(adjusted[11].seasonal_factor_index, Some(12));
        // De-seasonalized values all land on the grand mean
        let grand_mean: f64 = values.iter().sum::<f64>() / values.len() as f64;
        for point in &adjusted {
            assert!((point.value - grand_mean).abs() < 1e-9);
        }
    }

    #[test]
    fn test_apply_factors_reversible() {
        let values: Vec<f64> = (0..24).map(|i| 50.0 + (i % 12) as f64 * 3.0).collect();
        let points = monthly_points(2022, &values);
        let factors = calculate_factors(&points, Period::Year, None).expect("factors");
        let adjusted = apply_factors(&points, &factors).expect("applies");
        for (original, applied) in points.iter().zip(&adjusted) {
            let slot = applied.seasonal_factor_index.expect("tagged") - 1;
            let restored = applied.value * factors.factors[slot];
            assert!((restored - original.value).abs() < 1e-9);
        }
    }

    #[test]
    fn test_period_wire_names() {
        for period in [Period::Week, Period::Month, Period::Quarter, Period::Year] {
            assert_eq!(Period::parse(period.as_str()), Some(period));
        }
        assert_eq!(Period::parse("fortnight"), None);
    }
}

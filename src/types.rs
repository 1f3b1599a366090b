//! Core data model for XmR analysis
//!
//! Defines the point/limit/divider types shared by every engine stage, plus
//! the raw-row parsing rules: a row survives only if its date parses and its
//! value is a finite number. Everything downstream operates on the filtered
//! points.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Maximum number of user-placed interior dividers (4 segments total).
pub const MAX_INTERIOR_DIVIDERS: usize = 3;

/// Identifier of the leading sentinel divider.
pub const DIVIDER_START: &str = "divider-start";

/// Identifier of the trailing sentinel divider.
pub const DIVIDER_END: &str = "divider-end";

/// Classification of a point after exception detection.
///
/// Rules run in a fixed order (run-of-eight, four-near-limit,
/// outside-limit), so a later rule overwrites an earlier mark on the same
/// point and `OutsideLimit` ends up with the highest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointStatus {
    #[default]
    Normal,
    RunOfEight,
    FourNearLimit,
    OutsideLimit,
}

/// A single observation in the series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Insertion order from the raw table, stable across date sorting.
    pub order: usize,
    /// Calendar day of the observation (no time component).
    pub x: NaiveDate,
    pub value: f64,
    #[serde(default)]
    pub status: PointStatus,
    /// 1-based sub-period position, set when seasonal factors are applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seasonal_factor_index: Option<usize>,
}

impl DataPoint {
    pub fn new(order: usize, x: NaiveDate, value: f64) -> Self {
        Self {
            order,
            x,
            value,
            status: PointStatus::Normal,
            seasonal_factor_index: None,
        }
    }

    /// Epoch milliseconds of this point's date at midnight UTC.
    pub fn x_millis(&self) -> i64 {
        date_to_millis(self.x)
    }

    /// Parse raw `(date, value)` rows into valid points.
    ///
    /// Rows with an empty/unparseable date or a non-numeric value are
    /// dropped, never reported as errors; `order` records the raw-row
    /// index so the caller can map points back to its table. Zero is a
    /// valid value.
    pub fn parse_rows(rows: &[(String, String)]) -> Vec<DataPoint> {
        rows.iter()
            .enumerate()
            .filter_map(|(order, (date, value))| {
                let x = parse_date(date)?;
                let value: f64 = value.trim().parse().ok()?;
                if !value.is_finite() {
                    return None;
                }
                Some(DataPoint::new(order, x, value))
            })
            .collect()
    }
}

/// Parse a calendar date in `YYYY-MM-DD` or `YYYY/MM/DD` form.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .ok()
}

/// Epoch milliseconds for a calendar day at midnight UTC.
pub fn date_to_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Calendar day for an epoch-milliseconds timestamp.
pub fn millis_to_date(millis: i64) -> Option<NaiveDate> {
    chrono::DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

/// Dates that appear on more than one point, in chronological order.
///
/// Duplicate dates are legal input; the caller surfaces them as a
/// data-quality warning.
pub fn duplicate_dates(points: &[DataPoint]) -> Vec<NaiveDate> {
    let mut sorted: Vec<NaiveDate> = points.iter().map(|p| p.x).collect();
    sorted.sort_unstable();
    let mut duplicates = Vec::new();
    for pair in sorted.windows(2) {
        if pair[0] == pair[1] && duplicates.last() != Some(&pair[0]) {
            duplicates.push(pair[0]);
        }
    }
    duplicates
}

/// Round half away from zero at 2 decimal places.
///
/// Applied to displayed/serialized statistics only; intermediate sums and
/// regression accumulation stay at full precision.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Control limits derived from one segment's points.
///
/// Invariant from the default calculator: `lnpl <= avg_x <= unpl`, and the
/// quartiles are the midpoints between the centre line and each limit.
/// User-locked overrides may move individual fields, which is why the
/// quartiles are recomputed from the overridden values (see `locked`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitSet {
    /// Centre line of the individuals chart.
    pub avg_x: f64,
    /// Average moving range (centre line of the mR chart).
    pub avg_movement: f64,
    /// Upper Natural Process Limit.
    pub unpl: f64,
    /// Lower Natural Process Limit.
    pub lnpl: f64,
    /// Upper Range Limit of the mR chart.
    pub url: f64,
    pub lower_quartile: f64,
    pub upper_quartile: f64,
}

impl LimitSet {
    /// Recompute both quartiles as midpoints of the current centre/limits.
    pub fn with_quartiles_recomputed(mut self) -> Self {
        self.lower_quartile = round2((self.avg_x + self.lnpl) / 2.0);
        self.upper_quartile = round2((self.avg_x + self.unpl) / 2.0);
        self
    }
}

/// A vertical split position partitioning the series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divider {
    pub id: String,
    /// Position in epoch milliseconds.
    pub x: i64,
}

impl Divider {
    pub fn is_sentinel(&self) -> bool {
        self.id == DIVIDER_START || self.id == DIVIDER_END
    }
}

/// Error raised by divider mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DividerError {
    #[error("at most {MAX_INTERIOR_DIVIDERS} interior dividers are allowed")]
    TooManyDividers,
    #[error("no divider with id '{0}'")]
    UnknownDivider(String),
}

/// Ordered divider positions bounding and partitioning the series.
///
/// The two sentinel dividers always exist and track the data's date range;
/// they are excluded from persistence and the share link. The set is kept
/// sorted by `x` after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DividerSet {
    dividers: Vec<Divider>,
    next_id: usize,
}

impl DividerSet {
    /// Create a set holding only the two sentinels at the given range.
    pub fn new(x_min: i64, x_max: i64) -> Self {
        Self {
            dividers: vec![
                Divider {
                    id: DIVIDER_START.to_string(),
                    x: x_min,
                },
                Divider {
                    id: DIVIDER_END.to_string(),
                    x: x_max,
                },
            ],
            next_id: 1,
        }
    }

    /// All dividers, sorted by position, sentinels included.
    pub fn all(&self) -> &[Divider] {
        &self.dividers
    }

    /// User-placed dividers only, sorted by position.
    pub fn interior(&self) -> impl Iterator<Item = &Divider> {
        self.dividers.iter().filter(|d| !d.is_sentinel())
    }

    pub fn interior_count(&self) -> usize {
        self.dividers.len() - 2
    }

    /// Force the sentinels to exactly the given data range.
    ///
    /// Run before every segmentation so stale sentinel positions from a
    /// prior, larger dataset can never exclude points. Interior dividers
    /// are left where the user put them.
    pub fn snap_to_range(&mut self, x_min: i64, x_max: i64) {
        for divider in &mut self.dividers {
            if divider.id == DIVIDER_START {
                divider.x = x_min;
            } else if divider.id == DIVIDER_END {
                divider.x = x_max;
            }
        }
        self.sort();
    }

    /// Add an interior divider at the given position.
    pub fn add_interior(&mut self, x: i64) -> Result<String, DividerError> {
        if self.interior_count() >= MAX_INTERIOR_DIVIDERS {
            return Err(DividerError::TooManyDividers);
        }
        let id = format!("divider-{}", self.next_id);
        self.next_id += 1;
        self.dividers.push(Divider { id: id.clone(), x });
        self.sort();
        Ok(id)
    }

    /// Move an existing divider (interior or sentinel) to a new position.
    pub fn move_divider(&mut self, id: &str, x: i64) -> Result<(), DividerError> {
        let divider = self
            .dividers
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| DividerError::UnknownDivider(id.to_string()))?;
        divider.x = x;
        self.sort();
        Ok(())
    }

    /// Remove an interior divider. Sentinels cannot be removed.
    pub fn remove_interior(&mut self, id: &str) -> Result<(), DividerError> {
        let index = self
            .dividers
            .iter()
            .position(|d| d.id == id && !d.is_sentinel())
            .ok_or_else(|| DividerError::UnknownDivider(id.to_string()))?;
        self.dividers.remove(index);
        Ok(())
    }

    fn sort(&mut self) {
        self.dividers.sort_by_key(|d| d.x);
    }
}

/// Which `LimitSet` fields the user manually overrode when locking.
///
/// The legacy wire format packs these into a bitmask
/// (`UNLOCKED=0, LOCKED=1, UNPL_MODIFIED=2, LNPL_MODIFIED=4,
/// AVGX_MODIFIED=8`); in memory they are independent booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockedLimitStatus {
    pub locked: bool,
    pub avg_x_modified: bool,
    pub unpl_modified: bool,
    pub lnpl_modified: bool,
}

impl LockedLimitStatus {
    const LOCKED: u8 = 1;
    const UNPL_MODIFIED: u8 = 2;
    const LNPL_MODIFIED: u8 = 4;
    const AVGX_MODIFIED: u8 = 8;

    /// Pack into the legacy share-link bitmask.
    pub fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.locked {
            bits |= Self::LOCKED;
        }
        if self.unpl_modified {
            bits |= Self::UNPL_MODIFIED;
        }
        if self.lnpl_modified {
            bits |= Self::LNPL_MODIFIED;
        }
        if self.avg_x_modified {
            bits |= Self::AVGX_MODIFIED;
        }
        bits
    }

    /// Unpack from the legacy share-link bitmask. Unknown bits are ignored.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            locked: bits & Self::LOCKED != 0,
            unpl_modified: bits & Self::UNPL_MODIFIED != 0,
            lnpl_modified: bits & Self::LNPL_MODIFIED != 0,
            avg_x_modified: bits & Self::AVGX_MODIFIED != 0,
        }
    }

    /// True when any field besides the lock itself was overridden.
    pub fn any_modified(self) -> bool {
        self.avg_x_modified || self.unpl_modified || self.lnpl_modified
    }
}

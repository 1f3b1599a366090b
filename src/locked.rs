//! Locked limits for the first segment
//!
//! A user can pin an alternate `LimitSet` (computed from a separately
//! maintained base dataset, with any subset of fields typed over) instead
//! of the first segment's own computed limits. Validation rejects
//! non-monotonic overrides outright, and the quartile symmetry policy
//! decides which quartile lines remain meaningful as near-limit thresholds
//! after an asymmetric override.

use serde::{Deserialize, Serialize};

use crate::limits::{LimitConfig, compute_limits};
use crate::segmentation::moving_ranges;
use crate::types::{DataPoint, LimitSet, LockedLimitStatus, round2};

/// Tolerance for "still symmetric about the mean" after overrides.
const SYMMETRY_EPSILON: f64 = 0.001;

/// User-typed override values; `None` accepts the computed default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LockedLimitOverrides {
    pub avg_x: Option<f64>,
    pub lnpl: Option<f64>,
    pub unpl: Option<f64>,
    pub avg_movement: Option<f64>,
    pub url: Option<f64>,
}

/// A pinned limit set plus the record of which fields were overridden.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LockedLimits {
    pub limits: LimitSet,
    pub status: LockedLimitStatus,
}

/// User-input errors from locking.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LockedLimitError {
    #[error(
        "limits must satisfy LNPL <= average <= UNPL (got LNPL={lnpl}, average={avg_x}, UNPL={unpl})"
    )]
    NonMonotonicLimits { lnpl: f64, avg_x: f64, unpl: f64 },
    #[error("average moving range {avg_movement} exceeds the Upper Range Limit {url}")]
    MovementAboveUrl { avg_movement: f64, url: f64 },
}

/// Which quartile lines participate in four-near-limit detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuartileUse {
    pub use_lower_quartile: bool,
    pub use_upper_quartile: bool,
}

/// Compute and validate a locked limit set.
///
/// Defaults come from `base_points`, the user-editable base table, not the
/// currently segmented data. Each override replaces its computed default;
/// the quartiles are then recomputed from the (possibly overridden)
/// centre and limits. On validation failure nothing is stored and the
/// error carries the offending values.
pub fn lock_limits(
    base_points: &[DataPoint],
    overrides: &LockedLimitOverrides,
    config: &LimitConfig,
) -> Result<LockedLimits, LockedLimitError> {
    let mut sorted = base_points.to_vec();
    sorted.sort_by(|a, b| a.x.cmp(&b.x).then(a.order.cmp(&b.order)));
    let defaults = compute_limits(&sorted, &moving_ranges(&sorted), config);

    let avg_x = overrides.avg_x.map(round2).unwrap_or(defaults.avg_x);
    let lnpl = overrides.lnpl.map(round2).unwrap_or(defaults.lnpl);
    let unpl = overrides.unpl.map(round2).unwrap_or(defaults.unpl);
    let avg_movement = overrides
        .avg_movement
        .map(round2)
        .unwrap_or(defaults.avg_movement);
    let url = overrides.url.map(round2).unwrap_or(defaults.url);

    if !(lnpl <= avg_x && avg_x <= unpl) {
        return Err(LockedLimitError::NonMonotonicLimits { lnpl, avg_x, unpl });
    }
    if avg_movement > url {
        return Err(LockedLimitError::MovementAboveUrl { avg_movement, url });
    }

    let limits = LimitSet {
        avg_x,
        avg_movement,
        unpl,
        lnpl,
        url,
        lower_quartile: 0.0,
        upper_quartile: 0.0,
    }
    .with_quartiles_recomputed();

    let status = LockedLimitStatus {
        locked: true,
        avg_x_modified: avg_x != defaults.avg_x,
        unpl_modified: unpl != defaults.unpl,
        lnpl_modified: lnpl != defaults.lnpl,
    };

    Ok(LockedLimits { limits, status })
}

/// Symmetry heuristic for the quartile lines.
///
/// An asymmetric manual override makes a quartile line meaningless as a
/// near-limit threshold, so:
/// - nothing modified: both quartiles are used;
/// - centre modified, or both limits modified: both used only while
///   `|UNPL + LNPL - 2*avg_x| < 0.001`, else both suppressed;
/// - only UNPL modified: upper suppressed, lower kept;
/// - only LNPL modified: lower suppressed, upper kept.
pub fn should_use_quartile(locked: &LockedLimits) -> QuartileUse {
    let status = locked.status;
    if !status.any_modified() {
        return QuartileUse {
            use_lower_quartile: true,
            use_upper_quartile: true,
        };
    }
    if status.avg_x_modified || (status.lnpl_modified && status.unpl_modified) {
        let limits = locked.limits;
        let symmetric = (limits.unpl + limits.lnpl - 2.0 * limits.avg_x).abs() < SYMMETRY_EPSILON;
        return QuartileUse {
            use_lower_quartile: symmetric,
            use_upper_quartile: symmetric,
        };
    }
    if status.unpl_modified {
        QuartileUse {
            use_lower_quartile: true,
            use_upper_quartile: false,
        }
    } else {
        QuartileUse {
            use_lower_quartile: false,
            use_upper_quartile: true,
        }
    }
}

//! # xmrkit
//!
//! XmR (Individuals and Moving Range) process-control analysis for a
//! univariate time series: divider-based segmentation, per-segment control
//! limits, exception detection, locked-limit overrides, seasonal
//! adjustment, linear-trend substitution, and a compact share-link
//! encoding of the whole analysis state.
//!
//! ## Quick Start
//!
//! ```rust
//! use xmrkit::{AnalysisState, PointStatus};
//!
//! let rows: Vec<(String, String)> = vec![
//!     ("2024-01-01".into(), "5045".into()),
//!     ("2024-01-08".into(), "4350".into()),
//!     ("2024-01-15".into(), "4350".into()),
//!     ("2024-01-22".into(), "3312".into()),
//!     ("2024-01-29".into(), "4630".into()),
//! ];
//!
//! let state = AnalysisState::from_rows("Date", "Widgets", &rows);
//! let output = state.analyze();
//!
//! for analysis in &output.segments {
//!     println!(
//!         "average={} UNPL={} LNPL={}",
//!         analysis.limits.avg_x, analysis.limits.unpl, analysis.limits.lnpl
//!     );
//!     let exceptions = analysis
//!         .segment
//!         .points
//!         .iter()
//!         .filter(|p| p.status != PointStatus::Normal)
//!         .count();
//!     println!("{exceptions} exception(s)");
//! }
//!
//! // The entire analysis state rides in one URL fragment
//! let link = state.to_share_link().unwrap();
//! assert!(link.starts_with("v=0&d="));
//! ```
//!
//! ## Pipeline
//!
//! Raw rows are filtered into valid points, optionally de-seasonalized,
//! segmented between divider positions, and each segment gets its control
//! limits and exception classification:
//!
//! 1. **Segmentation**: sentinel dividers snap to the data range; up to 3
//!    interior dividers split the series into independently analyzed
//!    segments. Moving ranges never cross a divider.
//! 2. **Limits**: `avg_x ± 2.66 × avg_movement` (or the median-based
//!    constant set behind a config flag).
//! 3. **Detection**: run-of-eight, four-near-limit, outside-limit, in
//!    that order, against computed, locked, or trend-line thresholds.
//!
//! Every operation is a pure function over the immutable
//! [`AnalysisState`]; the caller owns the one mutable reference and
//! replaces the state wholesale on each edit.

pub mod codec;
pub mod detection;
pub mod limits;
pub mod locked;
pub mod seasonality;
pub mod segmentation;
pub mod sharelink;
pub mod state;
pub mod trend;
pub mod types;

// Re-export the types most callers touch
pub use detection::{DetectionThresholds, Threshold};
pub use limits::{Centering, LimitConfig};
pub use locked::{
    LockedLimitError, LockedLimitOverrides, LockedLimits, QuartileUse, lock_limits,
    should_use_quartile,
};
pub use seasonality::{Cadence, Period, SeasonalFactors};
pub use segmentation::{ChartBounds, Segment};
pub use sharelink::{MAX_LINK_LENGTH, ShareLinkError};
pub use state::{AnalysisOutput, AnalysisState, SegmentAnalysis, ShareLinkImport};
pub use trend::{TrendModel, TrendVariant};
pub use types::{
    DataPoint, Divider, DividerSet, LimitSet, LockedLimitStatus, PointStatus,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

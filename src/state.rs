//! The analysis pipeline
//!
//! `AnalysisState` is the immutable input record: the UI layer owns the
//! single mutable reference and calls [`AnalysisState::analyze`], which
//! computes a fresh [`AnalysisOutput`] from scratch: segmentation, per
//! segment limits, exception classification, movement classification, and
//! chart bounds. There is no incremental update; recompute is cheap for
//! the row counts the share-link cap admits.
//!
//! Seasonal factors are applied before segmentation when active. Locked
//! limits and trend mode both substitute the first segment's thresholds
//! and are mutually exclusive at the UI level; if a state nevertheless
//! carries both, locked limits win.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::{DetectionThresholds, detect_exceptions, detect_movement_exceptions};
use crate::limits::{LimitConfig, compute_limits};
use crate::locked::{LockedLimits, should_use_quartile};
use crate::seasonality::{SeasonalFactors, apply_factors};
use crate::segmentation::{ChartBounds, Segment, chart_bounds, segment};
use crate::sharelink::{
    DataPayload, DecodedShareLink, RemotePayload, ShareLinkError, ShareLinkParams,
    decode_share_link, encode_share_link,
};
use crate::trend::{TrendLines, TrendModel, TrendVariant, trend_lines};
use crate::types::{DataPoint, DividerSet, LimitSet, PointStatus};

/// The full, immutable analysis input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisState {
    pub x_label: String,
    pub y_label: String,
    /// Valid points in raw-table order; `analyze` sorts by date.
    pub points: Vec<DataPoint>,
    pub dividers: DividerSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_limits: Option<LockedLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seasonal_factors: Option<SeasonalFactors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendModel>,
    #[serde(default)]
    pub trend_variant: TrendVariant,
    #[serde(default)]
    pub limit_config: LimitConfig,
}

/// One analyzed segment, render-ready.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentAnalysis {
    /// Points carry their post-detection statuses.
    pub segment: Segment,
    /// The limits detection ran against: the segment's computed limits,
    /// or the locked set for the first segment when locking is active.
    pub limits: LimitSet,
    /// Status per moving-range value (offset by one point).
    pub movement_statuses: Vec<PointStatus>,
    /// Present on the first segment in trend mode.
    pub trend_lines: Option<TrendLines>,
}

/// Everything the caller needs to render both charts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutput {
    pub segments: Vec<SegmentAnalysis>,
    /// Dividers with sentinels snapped to the analyzed data range.
    pub dividers: DividerSet,
    pub bounds: ChartBounds,
}

/// A decoded link that may still need its data fetched.
#[derive(Debug, Clone)]
pub enum ShareLinkImport {
    Ready(AnalysisState),
    /// v1: the caller fetches `url` and completes the import with
    /// [`AnalysisState::from_remote`].
    NeedsRemoteData {
        url: String,
        decoded: DecodedShareLink,
    },
}

impl AnalysisState {
    /// Build a state from raw table rows, dropping invalid ones.
    pub fn from_rows(x_label: &str, y_label: &str, rows: &[(String, String)]) -> Self {
        let points = DataPoint::parse_rows(rows);
        Self::from_points(x_label, y_label, points)
    }

    fn from_points(x_label: &str, y_label: &str, points: Vec<DataPoint>) -> Self {
        let range = date_range(&points);
        Self {
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            points,
            dividers: DividerSet::new(range.0, range.1),
            locked_limits: None,
            seasonal_factors: None,
            trend: None,
            trend_variant: TrendVariant::default(),
            limit_config: LimitConfig::default(),
        }
    }

    /// Decode a share link into a state, or into a pending remote import.
    pub fn from_share_link(fragment: &str) -> Result<ShareLinkImport, ShareLinkError> {
        let decoded = decode_share_link(fragment)?;
        match &decoded.data {
            DataPayload::Inline {
                x_label,
                y_label,
                points,
            } => {
                let points: Vec<DataPoint> = points
                    .iter()
                    .enumerate()
                    .map(|(order, &(x, value))| DataPoint::new(order, x, value))
                    .collect();
                let state = Self::assemble(x_label.clone(), y_label.clone(), points, &decoded)?;
                Ok(ShareLinkImport::Ready(state))
            }
            DataPayload::Remote { url } => Ok(ShareLinkImport::NeedsRemoteData {
                url: url.clone(),
                decoded,
            }),
        }
    }

    /// Complete a v1 import from the fetched JSON payload.
    pub fn from_remote(
        decoded: &DecodedShareLink,
        payload: &RemotePayload,
    ) -> Result<Self, ShareLinkError> {
        let rows: Vec<(String, String)> = payload
            .xdata
            .iter()
            .map(|p| (p.x.clone(), p.value.to_string()))
            .collect();
        let points = DataPoint::parse_rows(&rows);
        Self::assemble(
            payload.x_label.clone(),
            payload.y_label.clone(),
            points,
            decoded,
        )
    }

    fn assemble(
        x_label: String,
        y_label: String,
        points: Vec<DataPoint>,
        decoded: &DecodedShareLink,
    ) -> Result<Self, ShareLinkError> {
        let mut state = Self::from_points(&x_label, &y_label, points);
        for &millis in &decoded.divider_millis {
            state.dividers.add_interior(millis)?;
        }
        state.locked_limits = decoded.locked_limits;
        state.seasonal_factors = decoded.seasonal_factors.clone();
        state.trend = decoded.trend;
        Ok(state)
    }

    /// Encode this state into a v0 share link.
    pub fn to_share_link(&self) -> Result<String, ShareLinkError> {
        let sorted = self.sorted_points();
        encode_share_link(&ShareLinkParams {
            x_label: &self.x_label,
            y_label: &self.y_label,
            points: &sorted,
            dividers: &self.dividers,
            locked_limits: self.locked_limits.as_ref(),
            seasonal_factors: self.seasonal_factors.as_ref(),
            trend: self.trend.as_ref(),
        })
    }

    /// Run the full pipeline: segmentation, limits, exception detection,
    /// movement classification, chart bounds.
    pub fn analyze(&self) -> AnalysisOutput {
        let effective = match &self.seasonal_factors {
            // A seasonal model that cannot be applied (under 2 points)
            // leaves the raw series in place
            Some(factors) => apply_factors(&self.sorted_points(), factors)
                .unwrap_or_else(|_| self.sorted_points()),
            None => self.sorted_points(),
        };

        let mut dividers = self.dividers.clone();
        let mut segments = segment(&effective, &mut dividers);
        let all_limits: Vec<LimitSet> = segments
            .iter()
            .map(|s| compute_limits(&s.points, &s.movements, &self.limit_config))
            .collect();

        let mut analyses = Vec::with_capacity(segments.len());
        let mut extra_x_values: Vec<f64> = Vec::new();
        let mut extra_mr_values: Vec<f64> = Vec::new();

        for (index, mut seg) in segments.drain(..).enumerate() {
            let computed = all_limits[index];
            let mut effective_limits = computed;
            let mut seg_trend_lines = None;

            let thresholds = match (index, &self.locked_limits, &self.trend) {
                (0, Some(locked), _) => {
                    let quartiles = should_use_quartile(locked);
                    effective_limits = locked.limits;
                    extra_x_values.extend([
                        locked.limits.unpl,
                        locked.limits.lnpl,
                        locked.limits.avg_x,
                    ]);
                    extra_mr_values.push(locked.limits.url);
                    DetectionThresholds::from_limits(
                        &locked.limits,
                        quartiles.use_lower_quartile,
                        quartiles.use_upper_quartile,
                    )
                }
                (0, None, Some(model)) => {
                    let lines = trend_lines(model, seg.points.len(), self.trend_variant);
                    extra_x_values.extend(lines.unpl.iter().copied());
                    extra_x_values.extend(lines.lnpl.iter().copied());
                    let thresholds = lines.detection_thresholds();
                    seg_trend_lines = Some(lines);
                    thresholds
                }
                _ => DetectionThresholds::from_limits(&computed, true, true),
            };

            detect_exceptions(&mut seg.points, &thresholds);
            let movement_statuses =
                detect_movement_exceptions(&seg.movements, effective_limits.url);

            analyses.push(SegmentAnalysis {
                segment: seg,
                limits: effective_limits,
                movement_statuses,
                trend_lines: seg_trend_lines,
            });
        }

        let plain_segments: Vec<Segment> =
            analyses.iter().map(|a| a.segment.clone()).collect();
        let bounds = chart_bounds(
            &plain_segments,
            &all_limits,
            &extra_x_values,
            &extra_mr_values,
        );
        debug!(
            segments = analyses.len(),
            points = effective.len(),
            "analysis recomputed"
        );

        AnalysisOutput {
            segments: analyses,
            dividers,
            bounds,
        }
    }

    /// Points sorted by date, insertion order breaking ties.
    pub fn sorted_points(&self) -> Vec<DataPoint> {
        let mut sorted = self.points.clone();
        sorted.sort_by(|a, b| a.x.cmp(&b.x).then(a.order.cmp(&b.order)));
        sorted
    }
}

fn date_range(points: &[DataPoint]) -> (i64, i64) {
    let min = points.iter().map(DataPoint::x_millis).min().unwrap_or(0);
    let max = points.iter().map(DataPoint::x_millis).max().unwrap_or(0);
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locked::{LockedLimitOverrides, lock_limits};
    use crate::seasonality::{Period, calculate_factors};
    use crate::trend::regress;
    use crate::types::date_to_millis;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    fn state_of(values: &[f64]) -> AnalysisState {
        let rows: Vec<(String, String)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let d = date(2024, 1, 1) + chrono::Days::new(i as u64);
                (d.format("%Y-%m-%d").to_string(), v.to_string())
            })
            .collect();
        AnalysisState::from_rows("Date", "Widgets", &rows)
    }

    #[test]
    fn test_analyze_single_segment() {
        let state = state_of(&[10.0, 12.0, 11.0, 13.0, 10.0, 14.0]);
        let output = state.analyze();
        assert_eq!(output.segments.len(), 1);
        let analysis = &output.segments[0];
        assert_eq!(analysis.segment.points.len(), 6);
        assert_eq!(analysis.movement_statuses.len(), 5);
        assert_eq!(analysis.limits.avg_x, 11.67);
        assert!(output.bounds.xchart_max > analysis.limits.unpl);
    }

    #[test]
    fn test_analyze_divider_completeness() {
        let mut state = state_of(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        state
            .dividers
            .add_interior(date_to_millis(date(2024, 1, 3)) + 1)
            .expect("add");
        let output = state.analyze();
        assert_eq!(output.segments.len(), 2);
        let total: usize = output.segments.iter().map(|s| s.segment.points.len()).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_analyze_outlier_flagged() {
        let state = state_of(&[10.0, 10.5, 9.5, 10.2, 9.8, 10.1, 9.9, 10.3, 50.0]);
        let output = state.analyze();
        let statuses: Vec<PointStatus> = output.segments[0]
            .segment
            .points
            .iter()
            .map(|p| p.status)
            .collect();
        assert_eq!(*statuses.last().expect("non-empty"), PointStatus::OutsideLimit);
    }

    #[test]
    fn test_analyze_locked_limits_substitute_first_segment() {
        let mut state = state_of(&[10.0, 11.0, 10.0, 11.0, 10.0, 11.0]);
        let locked = lock_limits(
            &state.points,
            &LockedLimitOverrides {
                unpl: Some(10.5),
                ..Default::default()
            },
            &state.limit_config,
        )
        .expect("locks");
        state.locked_limits = Some(locked);

        let output = state.analyze();
        let analysis = &output.segments[0];
        assert_eq!(analysis.limits.unpl, 10.5);
        // Points above the pinned UNPL are now exceptions
        assert!(
            analysis
                .segment
                .points
                .iter()
                .any(|p| p.status == PointStatus::OutsideLimit)
        );
    }

    #[test]
    fn test_analyze_trend_mode_first_segment() {
        // Strong upward trend with small alternating noise: flat limits
        // would flag the ends, the trend lines should not
        let values: Vec<f64> = (0..10)
            .map(|i| 10.0 + 3.0 * i as f64 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let mut state = state_of(&values);
        state.trend = regress(&state.sorted_points());
        assert!(state.trend.is_some());

        let output = state.analyze();
        let analysis = &output.segments[0];
        assert!(analysis.trend_lines.is_some());
        assert!(
            analysis
                .segment
                .points
                .iter()
                .all(|p| p.status == PointStatus::Normal)
        );
    }

    #[test]
    fn test_analyze_seasonal_preapplication() {
        // Two years of monthly data with a strong month effect
        let rows: Vec<(String, String)> = (0..24)
            .map(|i| {
                let d = date(2022 + (i / 12) as i32, (i % 12) as u32 + 1, 1);
                let value = 100.0 * (1.0 + (i % 12) as f64 / 10.0);
                (d.format("%Y-%m-%d").to_string(), value.to_string())
            })
            .collect();
        let mut state = AnalysisState::from_rows("Date", "Sales", &rows);
        state.seasonal_factors =
            Some(calculate_factors(&state.sorted_points(), Period::Year, None).expect("factors"));

        let output = state.analyze();
        let points = &output.segments[0].segment.points;
        assert!(points.iter().all(|p| p.seasonal_factor_index.is_some()));
        // De-seasonalized series is flat at the grand mean
        let first = points[0].value;
        assert!(points.iter().all(|p| (p.value - first).abs() < 1e-6));
    }

    #[test]
    fn test_share_link_state_round_trip() {
        let mut state = state_of(&[5045.0, 4350.0, 4350.0, 3312.0, 4630.0]);
        state
            .dividers
            .add_interior(date_to_millis(date(2024, 1, 3)))
            .expect("add");
        let link = state.to_share_link().expect("encodes");

        match AnalysisState::from_share_link(&link).expect("decodes") {
            ShareLinkImport::Ready(restored) => {
                assert_eq!(restored.x_label, "Date");
                assert_eq!(restored.points.len(), 5);
                assert_eq!(restored.dividers.interior_count(), 1);
                for (a, b) in restored.points.iter().zip(&state.points) {
                    assert_eq!(a.x, b.x);
                    assert!((a.value - b.value).abs() < 0.01);
                }
            }
            ShareLinkImport::NeedsRemoteData { .. } => panic!("expected inline import"),
        }
    }

    #[test]
    fn test_remote_import_flow() {
        let decoded = decode_share_link("v=1&d=https://example.com/d.json").expect("decodes");
        let import = AnalysisState::from_share_link("v=1&d=https://example.com/d.json")
            .expect("decodes");
        let url = match import {
            ShareLinkImport::NeedsRemoteData { url, .. } => url,
            ShareLinkImport::Ready(_) => panic!("expected remote import"),
        };
        assert_eq!(url, "https://example.com/d.json");

        let payload = crate::sharelink::parse_remote_payload(
            r#"{"xLabel":"Date","yLabel":"Widgets",
                "xdata":[{"x":"2024-01-01","value":10.0},{"x":"2024-01-02","value":12.0}]}"#,
        )
        .expect("parses");
        let state = AnalysisState::from_remote(&decoded, &payload).expect("assembles");
        assert_eq!(state.points.len(), 2);
        assert_eq!(state.y_label, "Widgets");
    }

    #[test]
    fn test_analyze_is_pure() {
        let state = state_of(&[10.0, 12.0, 11.0, 13.0]);
        let before = state.clone();
        let _ = state.analyze();
        let _ = state.analyze();
        assert_eq!(state, before);
    }

    #[test]
    fn test_empty_state_analyzes_to_nothing() {
        let state = AnalysisState::from_rows("Date", "Widgets", &[]);
        let output = state.analyze();
        assert!(output.segments.is_empty());
        assert_eq!(output.bounds.xchart_min, 0.0);
    }
}

//! Share-link composition and decomposition
//!
//! The whole analysis state rides in one URL fragment of `key=value`
//! pairs:
//!
//! | Field | Contents |
//! |-------|----------|
//! | `v`  | Format version: `0` inline data, `1` remote reference |
//! | `d`  | v0: `base64url(compress(labels+dates))` + `.` + `base64url(f32 values)`; v1: an opaque URL |
//! | `s`  | Interior divider positions (epoch millis) as f32 LE, sentinels excluded |
//! | `l`  | `[avg_x, avg_movement, lnpl, unpl, url, status_bits]`, present only when locked |
//! | `p` / `p0` | Seasonal factor array / period name, present only when active |
//! | `t`  | `[m, c, avg_mr]`, present only when trend mode is active |
//!
//! The labels-and-dates text is `xLabel,yLabel,date1,date2,...` with
//! literal commas swapped to `;` before encoding and restored after. This
//! is lossy if the original text contains `;`, a known limitation. Encoded
//! links are capped at 2000 characters; callers reject above the cap
//! rather than truncate. Decoding a malformed payload is an error with no
//! partial recovery.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{CodecError, compress, decode_number_array, decompress, encode_number_array};
use crate::locked::LockedLimits;
use crate::seasonality::{Period, SeasonalFactors};
use crate::trend::TrendModel;
use crate::types::{DataPoint, DividerError, DividerSet, LimitSet, LockedLimitStatus, round2};

/// Hard cap on the encoded link length.
pub const MAX_LINK_LENGTH: usize = 2000;

/// Length at which encoding starts warning that the cap is near.
const LINK_LENGTH_WARNING: usize = 1800;

/// Errors from share-link encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum ShareLinkError {
    #[error("encoded link is {length} characters, above the {MAX_LINK_LENGTH} limit")]
    LinkTooLong { length: usize },
    #[error("share link is missing the '{0}' field")]
    MissingField(&'static str),
    #[error("unsupported share-link version '{0}'")]
    UnsupportedVersion(String),
    #[error("malformed data payload: {0}")]
    MalformedData(&'static str),
    #[error("labels and dates are not valid UTF-8")]
    InvalidText,
    #[error("unknown seasonal period '{0}'")]
    UnknownPeriod(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Divider(#[from] DividerError),
    #[error("invalid remote payload: {0}")]
    RemotePayload(#[from] serde_json::Error),
}

/// Everything that goes into one link.
#[derive(Debug, Clone, Copy)]
pub struct ShareLinkParams<'a> {
    pub x_label: &'a str,
    pub y_label: &'a str,
    /// Date-sorted valid points.
    pub points: &'a [DataPoint],
    pub dividers: &'a DividerSet,
    pub locked_limits: Option<&'a LockedLimits>,
    pub seasonal_factors: Option<&'a SeasonalFactors>,
    pub trend: Option<&'a TrendModel>,
}

/// The data carried by the `d` field.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload {
    Inline {
        x_label: String,
        y_label: String,
        points: Vec<(NaiveDate, f64)>,
    },
    /// v1: the engine never fetches; the collaborator resolves the URL and
    /// hands the JSON body to [`parse_remote_payload`].
    Remote { url: String },
}

/// A decoded link, field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedShareLink {
    pub data: DataPayload,
    /// Interior divider positions in epoch milliseconds.
    pub divider_millis: Vec<i64>,
    pub locked_limits: Option<LockedLimits>,
    pub seasonal_factors: Option<SeasonalFactors>,
    pub trend: Option<TrendModel>,
}

/// JSON body a v1 remote URL resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePayload {
    pub x_label: String,
    pub y_label: String,
    pub xdata: Vec<RemotePoint>,
}

/// One row of a remote payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePoint {
    /// Calendar date string, `YYYY-MM-DD`.
    pub x: String,
    pub value: f64,
}

/// Encode the full analysis state into a v0 link fragment.
pub fn encode_share_link(params: &ShareLinkParams<'_>) -> Result<String, ShareLinkError> {
    let mut fields: Vec<String> = vec!["v=0".to_string()];

    let mut text_fields: Vec<String> = Vec::with_capacity(params.points.len() + 2);
    text_fields.push(escape_commas(params.x_label));
    text_fields.push(escape_commas(params.y_label));
    for point in params.points {
        text_fields.push(escape_commas(&point.x.format("%Y-%m-%d").to_string()));
    }
    let compressed = compress(text_fields.join(",").as_bytes());
    let values: Vec<f64> = params.points.iter().map(|p| round2(p.value)).collect();
    fields.push(format!(
        "d={}.{}",
        base64_encode(&compressed),
        encode_number_array(&values)
    ));

    let divider_millis: Vec<f64> = params.dividers.interior().map(|d| d.x as f64).collect();
    if !divider_millis.is_empty() {
        fields.push(format!("s={}", encode_number_array(&divider_millis)));
    }

    if let Some(locked) = params.locked_limits {
        let limits = locked.limits;
        fields.push(format!(
            "l={}",
            encode_number_array(&[
                limits.avg_x,
                limits.avg_movement,
                limits.lnpl,
                limits.unpl,
                limits.url,
                f64::from(locked.status.to_bits()),
            ])
        ));
    }

    if let Some(seasonal) = params.seasonal_factors {
        fields.push(format!("p={}", encode_number_array(&seasonal.factors)));
        fields.push(format!("p0={}", seasonal.period.as_str()));
    }

    if let Some(trend) = params.trend {
        fields.push(format!(
            "t={}",
            encode_number_array(&[round2(trend.m), round2(trend.c), round2(trend.avg_mr)])
        ));
    }

    let link = fields.join("&");
    if link.len() > MAX_LINK_LENGTH {
        return Err(ShareLinkError::LinkTooLong { length: link.len() });
    }
    if link.len() > LINK_LENGTH_WARNING {
        warn!(length = link.len(), "share link is approaching the {MAX_LINK_LENGTH}-character cap");
    }
    debug!(length = link.len(), points = params.points.len(), "encoded share link");
    Ok(link)
}

/// Decompose a link fragment into its typed fields.
pub fn decode_share_link(fragment: &str) -> Result<DecodedShareLink, ShareLinkError> {
    let fragment = fragment.trim_start_matches(['#', '?']);
    let field = |key: &str| {
        fragment
            .split('&')
            .find_map(|pair| pair.split_once('=').filter(|(k, _)| *k == key))
            .map(|(_, v)| v.to_string())
    };

    let version = field("v").unwrap_or_else(|| "0".to_string());
    let d = field("d").ok_or(ShareLinkError::MissingField("d"))?;

    let data = match version.as_str() {
        "0" => decode_inline_data(&d)?,
        "1" => DataPayload::Remote { url: d },
        other => return Err(ShareLinkError::UnsupportedVersion(other.to_string())),
    };

    let divider_millis = match field("s") {
        Some(encoded) => decode_number_array(&encoded)?
            .into_iter()
            .map(|ms| ms.round() as i64)
            .collect(),
        None => Vec::new(),
    };

    let locked_limits = match field("l") {
        Some(encoded) => Some(decode_locked_limits(&encoded)?),
        None => None,
    };

    let seasonal_factors = match field("p") {
        Some(encoded) => {
            let period_name = field("p0").ok_or(ShareLinkError::MissingField("p0"))?;
            let period = Period::parse(&period_name)
                .ok_or_else(|| ShareLinkError::UnknownPeriod(period_name))?;
            Some(SeasonalFactors {
                period,
                grouping: None,
                factors: decode_number_array(&encoded)?,
                has_missing: false,
            })
        }
        None => None,
    };

    let trend = match field("t") {
        Some(encoded) => {
            let values = decode_number_array(&encoded)?;
            if values.len() != 3 {
                return Err(ShareLinkError::MalformedData("trend field needs 3 values"));
            }
            Some(TrendModel {
                m: values[0],
                c: values[1],
                avg_mr: values[2],
            })
        }
        None => None,
    };

    Ok(DecodedShareLink {
        data,
        divider_millis,
        locked_limits,
        seasonal_factors,
        trend,
    })
}

/// Parse the JSON body fetched from a v1 remote URL.
pub fn parse_remote_payload(json: &str) -> Result<RemotePayload, ShareLinkError> {
    Ok(serde_json::from_str(json)?)
}

fn decode_inline_data(d: &str) -> Result<DataPayload, ShareLinkError> {
    let (labels_part, values_part) = d
        .split_once('.')
        .ok_or(ShareLinkError::MalformedData("inline data needs two parts"))?;

    let text_bytes = decompress(&base64_decode(labels_part)?)?;
    let text = String::from_utf8(text_bytes).map_err(|_| ShareLinkError::InvalidText)?;
    let mut fields = text.split(',').map(restore_commas);
    let x_label = fields
        .next()
        .ok_or(ShareLinkError::MalformedData("missing x label"))?;
    let y_label = fields
        .next()
        .ok_or(ShareLinkError::MalformedData("missing y label"))?;
    let dates = fields
        .map(|s| {
            crate::types::parse_date(&s).ok_or(ShareLinkError::MalformedData("unparseable date"))
        })
        .collect::<Result<Vec<NaiveDate>, _>>()?;

    let values = decode_number_array(values_part)?;
    if dates.len() != values.len() {
        return Err(ShareLinkError::MalformedData(
            "date and value counts disagree",
        ));
    }

    Ok(DataPayload::Inline {
        x_label,
        y_label,
        points: dates.into_iter().zip(values).collect(),
    })
}

fn decode_locked_limits(encoded: &str) -> Result<LockedLimits, ShareLinkError> {
    let values = decode_number_array(encoded)?;
    if values.len() != 6 {
        return Err(ShareLinkError::MalformedData("locked field needs 6 values"));
    }
    let limits = LimitSet {
        avg_x: values[0],
        avg_movement: values[1],
        lnpl: values[2],
        unpl: values[3],
        url: values[4],
        lower_quartile: 0.0,
        upper_quartile: 0.0,
    }
    .with_quartiles_recomputed();
    let status = LockedLimitStatus::from_bits(values[5].round() as u8);
    Ok(LockedLimits { limits, status })
}

fn escape_commas(s: &str) -> String {
    s.replace(',', ";")
}

fn restore_commas(s: &str) -> String {
    s.replace(';', ",")
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, CodecError> {
    use base64::Engine as _;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s)?)
}

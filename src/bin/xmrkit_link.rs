//! Share-link diagnostic tool
//!
//! Decodes a share link into the full analysis (JSON report or a
//! per-segment limit table) and encodes a JSON-serialized analysis state
//! back into a link. Exercises the whole pipeline end to end without any
//! chart surface.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use comfy_table::Table;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use xmrkit::{AnalysisOutput, AnalysisState, PointStatus, ShareLinkImport};

#[derive(Parser)]
#[command(
    name = "xmrkit-link",
    version,
    about = "Encode and decode XmR analysis share links"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a share link and print the analysis
    Decode {
        /// Link fragment, with or without a leading '#'
        link: String,
        /// Print a per-segment limit table instead of JSON
        #[arg(long)]
        table: bool,
    },
    /// Encode a JSON analysis state file into a share link
    Encode {
        /// Path to a JSON-serialized `AnalysisState`
        input: PathBuf,
    },
}

#[derive(Serialize)]
struct DecodeReport {
    x_label: String,
    y_label: String,
    point_count: usize,
    interior_dividers: usize,
    #[serde(flatten)]
    analysis: AnalysisOutput,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Decode { link, table } => decode(&link, table),
        Command::Encode { input } => encode(&input),
    }
}

fn decode(link: &str, table: bool) -> Result<(), String> {
    let state = match AnalysisState::from_share_link(link).map_err(|e| e.to_string())? {
        ShareLinkImport::Ready(state) => state,
        ShareLinkImport::NeedsRemoteData { url, .. } => {
            return Err(format!(
                "link references remote data at {url}; fetch it and rebuild the state from the JSON body"
            ));
        }
    };

    let analysis = state.analyze();
    if table {
        println!("{}", limit_table(&analysis));
        return Ok(());
    }

    let report = DecodeReport {
        x_label: state.x_label.clone(),
        y_label: state.y_label.clone(),
        point_count: state.points.len(),
        interior_dividers: state.dividers.interior_count(),
        analysis,
    };
    let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn encode(input: &PathBuf) -> Result<(), String> {
    let json = std::fs::read_to_string(input)
        .map_err(|e| format!("cannot read {}: {e}", input.display()))?;
    let state: AnalysisState = serde_json::from_str(&json).map_err(|e| e.to_string())?;
    let link = state.to_share_link().map_err(|e| e.to_string())?;
    println!("{link}");
    Ok(())
}

fn limit_table(analysis: &AnalysisOutput) -> Table {
    let mut table = Table::new();
    table.set_header([
        "segment",
        "points",
        "avg X",
        "avg mR",
        "UNPL",
        "LNPL",
        "URL",
        "exceptions",
    ]);
    for (index, segment) in analysis.segments.iter().enumerate() {
        let exceptions = segment
            .segment
            .points
            .iter()
            .filter(|p| p.status != PointStatus::Normal)
            .count();
        table.add_row([
            index.to_string(),
            segment.segment.points.len().to_string(),
            segment.limits.avg_x.to_string(),
            segment.limits.avg_movement.to_string(),
            segment.limits.unpl.to_string(),
            segment.limits.lnpl.to_string(),
            segment.limits.url.to_string(),
            exceptions.to_string(),
        ]);
    }
    table
}

//! Spandrel entrypoint: read a parsed drawing, run the analysis pipeline,
//! write the result artifact.

use anyhow::{Context, Result};
use clap::Parser;
use core_entities::Drawing;
use core_project::{AnalysisResult, Project, Stage};
use core_report::ErrorKind;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "spandrel", version, about = "Structural floor-plan reconstruction")]
struct Args {
    /// Drawing record set (JSON) produced by the DXF front end.
    pub drawing: PathBuf,
    /// Optional configuration file path (overrides discovery of
    /// `spandrel.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Write the full JSON artifact here; only the summary is printed when
    /// omitted.
    #[arg(long = "out")]
    pub out: Option<PathBuf>,
    /// Stop after the named stage (`split-views`, `merge-views`, `supports`,
    /// `beam-raw`, `beam-geometry`, `beam-attributes`, `beam-topology`,
    /// `quantities`).
    #[arg(long = "stage")]
    pub stage: Option<String>,
}

fn configure_logging() -> Result<WorkerGuard> {
    let log_dir = Path::new(".");
    let log_path = log_dir.join("spandrel.log");
    if log_path.exists() {
        let _ = fs::remove_file(&log_path);
    }
    let file_appender = tracing_appender::rolling::never(log_dir, "spandrel.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(nb_writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn main() -> Result<()> {
    let _log_guard = configure_logging()?;
    let args = Args::parse();

    let last_stage = match &args.stage {
        Some(name) => Stage::parse(name)
            .with_context(|| format!("unknown stage '{name}'"))?,
        None => Stage::Quantities,
    };

    let raw = fs::read_to_string(&args.drawing)
        .with_context(|| format!("reading drawing {}", args.drawing.display()))?;
    let drawing: Drawing = serde_json::from_str(&raw)
        .with_context(|| format!("parsing drawing {}", args.drawing.display()))?;
    let config = core_config::load_from(args.config.clone())?;

    info!(
        target: "runtime",
        drawing = %args.drawing.display(),
        entities = drawing.entities.len(),
        blocks = drawing.blocks.len(),
        last_stage = last_stage.name(),
        "startup"
    );

    let mut project = Project::new(&drawing, config);
    project.run_until(last_stage);

    let result = AnalysisResult::from_project(&project);
    print_summary(&result);

    if let Some(out) = &args.out {
        let json = serde_json::to_string_pretty(&result)?;
        fs::write(out, json).with_context(|| format!("writing {}", out.display()))?;
        info!(target: "runtime", out = %out.display(), "artifact_written");
    }
    Ok(())
}

fn print_summary(result: &AnalysisResult) {
    println!(
        "viewports: {}   merged mappings: {}   columns: {}   walls: {}",
        result.viewports.len(),
        result.mappings.len(),
        result.columns.len(),
        result.walls.len()
    );
    println!(
        "beams: {}   junctions: {}   fragments: {}",
        result.beams.len(),
        result.junctions.len(),
        result.fragments.len()
    );
    for group in &result.quantities {
        let name = if group.title.is_empty() {
            match group.viewport {
                Some(idx) => format!("viewport {idx}"),
                None => "outside viewports".to_string(),
            }
        } else {
            group.title.clone()
        };
        println!("  {name}: {:.3} m3 over {} fragments", group.total_volume_m3, group.fragment_indices.len());
        for row in &group.rows {
            println!(
                "    {:<10} x{:<3} len {:>10.0} mm  {:>8.3} m3",
                row.code, row.count, row.total_length, row.total_volume_m3
            );
        }
    }
    if !result.errors.is_empty() {
        let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
        for e in &result.errors {
            *by_kind.entry(e.kind.tag()).or_insert(0) += 1;
        }
        let summary: Vec<String> = by_kind
            .iter()
            .map(|(tag, count)| format!("{tag}={count}"))
            .collect();
        println!("errors: {}", summary.join(" "));
        for e in &result.errors {
            if e.kind == ErrorKind::UnresolvedJunction {
                println!(
                    "  CHK at ({:.0}, {:.0}): {}",
                    e.locus.x, e.locus.y, e.detail
                );
            }
        }
    }
}

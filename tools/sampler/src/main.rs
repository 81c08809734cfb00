//! Stratified sampling campaigns from JSON rasters.
//!
//! Reads one strata grid plus optional metric, access and existing-plot
//! inputs, then runs every campaign file against them in parallel. Each
//! campaign writes `samples.json`, `report.json` and `representation.json`
//! under `{output}/{campaign}/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_core::{
    distance_to_corridor, representation, sample_strat, DistanceLayer, ExistingSample, GridGeometry, MetricGrid,
    RepresentationRow, SampleTable, SamplingConfig, SamplingInputs, StrataGrid,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sampler", about = "Stratified plot sampling over a strata raster")]
struct Args {
    /// Strata grid JSON (`geometry`, `data`, optional `categories`).
    #[arg(short, long)]
    strata: PathBuf,

    /// Metric grid JSON, needed by optim allocation.
    #[arg(short, long)]
    metric: Option<PathBuf>,

    /// Precomputed distance-to-access layer JSON.
    #[arg(short, long, conflicts_with = "corridor")]
    access: Option<PathBuf>,

    /// Access corridor mask JSON; distances are derived from it.
    #[arg(long)]
    corridor: Option<PathBuf>,

    /// Existing plots JSON (array of `{x, y, stratum?}`).
    #[arg(short, long)]
    existing: Option<PathBuf>,

    /// Campaign config files; one run per file.
    #[arg(short, long = "config", required = true, num_args = 1..)]
    configs: Vec<PathBuf>,

    /// Output root directory (created if absent).
    #[arg(short, long, default_value = "data/samples")]
    output: PathBuf,
}

// ── Input / output schema ─────────────────────────────────────────────────────

/// Boolean corridor raster: `true` where a road or trail passes.
#[derive(Deserialize)]
struct CorridorFile {
    geometry: GridGeometry,
    cells: Vec<bool>,
}

struct Campaign {
    name: String,
    config: SamplingConfig,
}

#[derive(Serialize)]
struct Summary<'a> {
    campaign: &'a str,
    samples: usize,
    new: usize,
    existing: usize,
    warnings: usize,
}

struct Outcome {
    name: String,
    table: SampleTable,
    representation: Vec<RepresentationRow>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn campaign_name(path: &Path) -> Result<String> {
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => bail!("cannot derive a campaign name from {}", path.display()),
    }
}

fn load_campaigns(paths: &[PathBuf]) -> Result<Vec<Campaign>> {
    let mut campaigns: Vec<Campaign> = Vec::with_capacity(paths.len());
    for path in paths {
        let name = campaign_name(path)?;
        if campaigns.iter().any(|c| c.name == name) {
            bail!("duplicate campaign name `{name}` ({})", path.display());
        }
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config = SamplingConfig::from_json(&text).with_context(|| format!("parsing {}", path.display()))?;
        campaigns.push(Campaign { name, config });
    }
    Ok(campaigns)
}

fn load_access(args: &Args) -> Result<Option<DistanceLayer>> {
    if let Some(path) = &args.access {
        return load_json(path).map(Some);
    }
    if let Some(path) = &args.corridor {
        let corridor: CorridorFile = load_json(path)?;
        let layer = distance_to_corridor(&corridor.geometry, &corridor.cells)
            .with_context(|| format!("corridor distance for {}", path.display()))?;
        return Ok(Some(layer));
    }
    Ok(None)
}

// ── Running ───────────────────────────────────────────────────────────────────

fn run_campaign(inputs: &SamplingInputs<'_>, campaign: &Campaign) -> Result<Outcome> {
    let table =
        sample_strat(&campaign.config, inputs).with_context(|| format!("campaign `{}`", campaign.name))?;
    let representation = representation(inputs.strata, &table);
    Ok(Outcome { name: campaign.name.clone(), table, representation })
}

fn write_outcome(root: &Path, outcome: &Outcome) -> Result<PathBuf> {
    let dir = root.join(&outcome.name);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let files: [(&str, String); 3] = [
        ("samples.json", serde_json::to_string_pretty(&outcome.table.samples)?),
        ("report.json", serde_json::to_string_pretty(&outcome.table.report)?),
        ("representation.json", serde_json::to_string_pretty(&outcome.representation)?),
    ];
    for (file, body) in files {
        let path = dir.join(file);
        fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(dir)
}

fn summary(outcome: &Outcome) -> Summary<'_> {
    let table = &outcome.table;
    let new = table.new_samples().count();
    Summary {
        campaign: &outcome.name,
        samples: table.len(),
        new,
        existing: table.len() - new,
        warnings: table.report.warnings.len(),
    }
}

// ── main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let strata: StrataGrid = load_json(&args.strata)?;
    let metric: Option<MetricGrid> = args.metric.as_deref().map(load_json).transpose()?;
    let access = load_access(&args)?;
    let existing: Option<Vec<ExistingSample>> = args.existing.as_deref().map(load_json).transpose()?;
    let campaigns = load_campaigns(&args.configs)?;

    let mut inputs = SamplingInputs::new(&strata);
    inputs.metric = metric.as_ref();
    inputs.access = access.as_ref();
    inputs.existing = existing.as_deref();

    info!(
        rows = strata.rows(),
        cols = strata.cols(),
        strata = strata.strata().len(),
        campaigns = campaigns.len(),
        "inputs loaded"
    );

    let results: Vec<Result<Outcome>> = campaigns.par_iter().map(|c| run_campaign(&inputs, c)).collect();

    fs::create_dir_all(&args.output).with_context(|| format!("creating {}", args.output.display()))?;
    let mut failed = 0usize;
    let mut summaries = Vec::new();
    for res in &results {
        match res {
            Ok(outcome) => {
                let dir = write_outcome(&args.output, outcome)?;
                info!(campaign = %outcome.name, dir = %dir.display(), "written");
                summaries.push(summary(outcome));
            }
            Err(e) => {
                error!("{e:#}");
                failed += 1;
            }
        }
    }
    let manifest = args.output.join("manifest.json");
    fs::write(&manifest, serde_json::to_string_pretty(&summaries)?)
        .with_context(|| format!("writing {}", manifest.display()))?;

    if failed > 0 {
        bail!("{failed} of {} campaigns failed", results.len());
    }
    info!(campaigns = summaries.len(), "done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> StrataGrid {
        let geom = GridGeometry::new(4, 8, 10.0, 10.0, 0.0, 40.0);
        let row: Vec<u32> = (0..8).map(|c| c / 4 + 1).collect();
        let rows: Vec<&[u32]> = (0..4).map(|_| row.as_slice()).collect();
        StrataGrid::from_rows(geom, &rows).unwrap()
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("strata-sampler-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn campaign_name_from_stem() {
        assert_eq!(campaign_name(Path::new("configs/prop_100.json")).unwrap(), "prop_100");
        assert!(campaign_name(Path::new("")).is_err());
    }

    #[test]
    fn duplicate_campaign_names_rejected() {
        let dir = scratch("dup");
        let a = dir.join("a.json");
        fs::write(&a, r#"{"nSamp": 4}"#).unwrap();
        let err = load_campaigns(&[a.clone(), a]).err().unwrap();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn bad_campaign_reports_file() {
        let dir = scratch("bad");
        let a = dir.join("broken.json");
        fs::write(&a, r#"{"nSamp": "lots"}"#).unwrap();
        let err = load_campaigns(&[a]).err().unwrap();
        assert!(format!("{err:#}").contains("broken.json"));
    }

    #[test]
    fn campaigns_run_independently() {
        let g = grid();
        let inputs = SamplingInputs::new(&g);
        let ok = Campaign { name: "ok".into(), config: SamplingConfig::new(4) };
        let mut bad = SamplingConfig::new(4);
        bad.allocation = "optim".into();
        let bad = Campaign { name: "bad".into(), config: bad };

        let results: Vec<Result<Outcome>> = vec![ok, bad].par_iter().map(|c| run_campaign(&inputs, c)).collect();
        let outcome = results[0].as_ref().unwrap();
        assert_eq!(outcome.table.len(), 4);
        assert_eq!(outcome.representation.len(), 2);
        assert!(format!("{:#}", results[1].as_ref().err().unwrap()).contains("campaign `bad`"));
    }

    #[test]
    fn outcome_written_as_json() {
        let g = grid();
        let outcome = run_campaign(
            &SamplingInputs::new(&g),
            &Campaign { name: "prop".into(), config: SamplingConfig::new(2) },
        )
        .unwrap();
        let root = scratch("write");
        let dir = write_outcome(&root, &outcome).unwrap();
        let samples: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("samples.json")).unwrap()).unwrap();
        assert_eq!(samples.as_array().unwrap().len(), 2);
        assert_eq!(samples[0]["type"], "new");
        assert!(dir.join("report.json").exists());
        assert!(dir.join("representation.json").exists());
        assert_eq!(summary(&outcome).new, 2);
    }

    #[test]
    fn corridor_file_becomes_distance_layer() {
        let dir = scratch("corridor");
        let path = dir.join("roads.json");
        fs::write(
            &path,
            r#"{"geometry": {"rows": 1, "cols": 3, "cell_x": 10.0, "cell_y": 10.0, "x_min": 0.0, "y_max": 10.0},
                "cells": [true, false, false]}"#,
        )
        .unwrap();
        let args = Args::parse_from(["sampler", "--strata", "s.json", "--corridor", path.to_str().unwrap(), "-c", "a.json"]);
        let layer = load_access(&args).unwrap().unwrap();
        assert_eq!(layer.data(), &[0.0, 10.0, 20.0]);
    }
}

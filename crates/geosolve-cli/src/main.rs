use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use geosolve_core::{GeosolveError, MatchFileMatcher, TerrainPoint};
use geosolve_optim::TinySolverBackend;
use geosolve_pipeline::{presets, Project, SolveOptions};
use log::info;

const PROJECT_FILE: &str = "project.json";
const LOADTEST_FILE: &str = "loadtest-output.json";
const TERRAIN_SEED_FILE: &str = "terrain_seed.txt";

/// Photogrammetric bundle adjustment over a resumable model chain.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Photogrammetric bundle adjustment over a resumable model chain"
)]
struct Args {
    /// Directory holding the survey images and the `matches/` directory.
    data_dir: PathBuf,

    /// Directory holding `project.json`.
    project_dir: PathBuf,

    /// Stage to run (base_model0, base_model0_200, base_model0_half,
    /// base_model0_quarter, loadtest, features, solve, add_terrain).
    command: String,

    /// Optional path to JSON SolveOptions. Defaults are used if omitted.
    #[arg(long)]
    solve_config: Option<PathBuf>,

    /// Whitespace separated `X Y Z` rows seeding the terrain stage.
    #[arg(long)]
    terrain_seed: Option<PathBuf>,
}

impl Args {
    fn project_path(&self) -> PathBuf {
        self.project_dir.join(PROJECT_FILE)
    }
}

type Command = fn(&Args) -> Result<()>;

const COMMANDS: &[(&str, Command)] = &[
    ("base_model0", base_model0),
    ("base_model0_200", base_model0_200),
    ("base_model0_half", base_model0_half),
    ("base_model0_quarter", base_model0_quarter),
    ("loadtest", loadtest),
    ("features", features),
    ("solve", solve),
    ("add_terrain", add_terrain),
];

fn lookup_command(name: &str) -> Result<Command, GeosolveError> {
    COMMANDS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, command)| *command)
        .ok_or_else(|| {
            let known: Vec<_> = COMMANDS.iter().map(|(n, _)| *n).collect();
            GeosolveError::Configuration(format!(
                "unknown command {name:?}, expected one of: {}",
                known.join(", ")
            ))
        })
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(value)
}

fn save_preset(args: &Args, project: Project) -> Result<()> {
    fs::create_dir_all(&args.project_dir)
        .with_context(|| format!("creating {}", args.project_dir.display()))?;
    project.to_file(args.project_path())?;
    Ok(())
}

fn base_model0(args: &Args) -> Result<()> {
    save_preset(args, presets::base_model0_project()?)
}

fn base_model0_200(args: &Args) -> Result<()> {
    save_preset(args, presets::base_model0_200_project()?)
}

fn base_model0_half(args: &Args) -> Result<()> {
    save_preset(args, presets::base_model0_half_project()?)
}

fn base_model0_quarter(args: &Args) -> Result<()> {
    save_preset(args, presets::base_model0_quarter_project()?)
}

fn loadtest(args: &Args) -> Result<()> {
    let project = Project::from_file(args.project_path())?;
    project.to_file(args.project_dir.join(LOADTEST_FILE))?;
    Ok(())
}

fn features(args: &Args) -> Result<()> {
    let mut project = Project::from_file(args.project_path())?;
    project.data_set().verify_images(&args.data_dir)?;
    let matcher = MatchFileMatcher::new(args.data_dir.join("matches"));
    project.compute_features(&args.data_dir, &matcher)?;
    info!(
        "computed {} correspondences over {} edges",
        project.features.track_count(),
        project.features.edges().len()
    );
    project.to_file(args.project_path())?;
    Ok(())
}

fn solve(args: &Args) -> Result<()> {
    let mut project = Project::from_file(args.project_path())?;
    let options = match &args.solve_config {
        Some(path) => load_json_file::<SolveOptions>(path)?,
        None => SolveOptions::default(),
    };
    let report = project.solve_latest(&TinySolverBackend, &options)?;
    println!("{}", report.summary());
    project.to_file(args.project_path())?;
    Ok(())
}

/// Parse whitespace separated `X Y Z` rows; blank lines and `#` comments are skipped.
fn parse_terrain_seed(text: &str) -> Result<Vec<TerrainPoint>> {
    let mut points = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("line {}: bad number", lineno + 1))?;
        let point: TerrainPoint = values
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("line {}: expected 3 values, got {}", lineno + 1, values.len()))?;
        points.push(point);
    }
    if points.is_empty() {
        bail!("terrain seed has no points");
    }
    Ok(points)
}

fn add_terrain(args: &Args) -> Result<()> {
    let mut project = Project::from_file(args.project_path())?;
    let seed_path = args
        .terrain_seed
        .clone()
        .unwrap_or_else(|| args.project_dir.join(TERRAIN_SEED_FILE));
    let text = fs::read_to_string(&seed_path)
        .with_context(|| format!("reading {}", seed_path.display()))?;
    let idx = project.add_terrain_stage(parse_terrain_seed(&text)?)?;
    info!("added terrain model {idx}");
    project.to_file(args.project_path())?;
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    run(&args)
}

fn run(args: &Args) -> Result<()> {
    let command = lookup_command(&args.command)?;
    info!("running {} on {}", args.command, args.project_dir.display());
    command(args)
}

//! Courtside: NBA player-prop projections, boards and graded performance
//!
//! Usage:
//!   courtside train-models --game-logs data/logs.json     - Fit the projector
//!   courtside run --game-logs data/logs.json --live       - Build today's boards
//!   courtside run --game-logs data/logs.json --schedule data/slate.json --injuries data/inj.json \
//!       --props prizepicks=data/pp.json                   - Offline run
//!   courtside grade --date 2025-03-01 --outcomes data/box.json
//!   courtside calibrate                                   - Retrain calibration from the ledger
//!   courtside report                                      - Performance by bucket
//!   courtside serve --port 3001                           - Read-only HTTP API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use engine::store;
use engine::trees::{BaggingParams, TreeParams};
use engine::{
    CalibrationExample, CalibrationModel, CalibrationRegistry, EspnClient, GameLogSource,
    InjurySource, JsonFileSource, JsonGameLogSource, JsonInjurySource, JsonScheduleSource,
    OutcomeSource, Pipeline, PipelineConfig, PerformanceReport, PerformanceTracker,
    PrizePicksClient, PropSource, RunProgress, RunSnapshot, RunSources, RunStatus, ScheduleSource,
    SleeperClient, SourceStatus, StatProjector, UnderdogClient,
};
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "courtside")]
#[command(about = "NBA player-prop projections and edge boards", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the stat projector from game logs
    TrainModels {
        /// JSON array of player game logs
        #[arg(long)]
        game_logs: PathBuf,
        /// Trees per bagged ensemble
        #[arg(long, default_value_t = 40)]
        trees: usize,
        /// Maximum tree depth
        #[arg(long, default_value_t = 6)]
        max_depth: usize,
        /// Bootstrap seed
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
    /// Project, match and rank one slate
    Run {
        /// JSON array of player game logs
        #[arg(long)]
        game_logs: PathBuf,
        /// Slate date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Offline prop files as name=path (repeatable)
        #[arg(long = "props", value_parser = parse_named_path)]
        props: Vec<(String, PathBuf)>,
        /// JSON array of slates; players whose team is not on the date's slate are skipped
        #[arg(long)]
        schedule: Option<PathBuf>,
        /// JSON injury reports (repeatable)
        #[arg(long = "injuries")]
        injuries: Vec<PathBuf>,
        /// Also scrape PrizePicks, Underdog and Sleeper, plus the ESPN
        /// scoreboard and injury report
        #[arg(long)]
        live: bool,
        /// Rows of the unified board to print
        #[arg(long, default_value_t = 25)]
        top_n: usize,
    },
    /// Grade the stored board of a date against realized box scores
    Grade {
        /// Slate date to grade
        #[arg(long)]
        date: NaiveDate,
        /// JSON array of game logs containing the realized results
        #[arg(long)]
        outcomes: PathBuf,
    },
    /// Train a calibration version from the graded ledger and activate it
    Calibrate,
    /// Print performance aggregates replayed from the graded ledger
    Report,
    /// Launch the read-only HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<persistence::Database>,
    config: Arc<PipelineConfig>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,courtside=debug")
    } else {
        EnvFilter::new("info,engine=info,courtside=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn parse_named_path(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_lowercase(), PathBuf::from(path)))
        }
        _ => Err(format!("expected name=path, got '{}'", s)),
    }
}

fn db_path() -> String {
    std::env::var("COURTSIDE_DB_PATH").unwrap_or_else(|_| "data/courtside.db".to_string())
}

fn model_path() -> String {
    std::env::var("COURTSIDE_MODEL_PATH").unwrap_or_else(|_| "models/projector.json".to_string())
}

fn load_config() -> anyhow::Result<PipelineConfig> {
    match std::env::var("COURTSIDE_CONFIG") {
        Ok(path) => {
            info!("Loading config from {}", path);
            PipelineConfig::load(&path)
        }
        Err(_) => Ok(PipelineConfig::default()),
    }
}

async fn open_db() -> anyhow::Result<persistence::Database> {
    let path = db_path();
    let db = persistence::Database::new(&path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", path);
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::TrainModels {
            game_logs,
            trees,
            max_depth,
            seed,
        } => {
            cmd_train_models(game_logs, trees, max_depth, seed).await?;
        }
        Commands::Run {
            game_logs,
            date,
            props,
            schedule,
            injuries,
            live,
            top_n,
        } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let inputs = RunArgs {
                props,
                schedule,
                injuries,
                live,
            };
            cmd_run(game_logs, date, inputs, top_n).await?;
        }
        Commands::Grade { date, outcomes } => {
            cmd_grade(date, outcomes).await?;
        }
        Commands::Calibrate => {
            cmd_calibrate().await?;
        }
        Commands::Report => {
            cmd_report().await?;
        }
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Train command
// ============================================================================

async fn cmd_train_models(
    game_logs: PathBuf,
    trees: usize,
    max_depth: usize,
    seed: u64,
) -> anyhow::Result<()> {
    let config = load_config()?;
    let histories = JsonGameLogSource::new(&game_logs).histories().await?;
    info!("Loaded {} player histories from {}", histories.len(), game_logs.display());

    let params = BaggingParams {
        n_trees: trees,
        tree: TreeParams {
            max_depth,
            ..TreeParams::default()
        },
        seed,
    };
    let projector = tokio::task::spawn_blocking(move || {
        StatProjector::train(&histories, &config.features, &config.league_priors, params)
    })
    .await??;

    let path = model_path();
    projector.save(&path)?;
    println!(
        "Saved projector {} ({} training rows) → {}",
        projector.model_version(),
        projector.artifact().training_rows,
        path
    );
    Ok(())
}

// ============================================================================
// Run command
// ============================================================================

struct RunArgs {
    props: Vec<(String, PathBuf)>,
    schedule: Option<PathBuf>,
    injuries: Vec<PathBuf>,
    live: bool,
}

async fn cmd_run(game_logs: PathBuf, date: NaiveDate, args: RunArgs, top_n: usize) -> anyhow::Result<()> {
    println!("\n=== Courtside v{} ===", APP_VERSION);

    let config = load_config()?;
    let db = open_db().await?;
    let projector = StatProjector::load(model_path())?;
    info!("Projector {} loaded", projector.model_version());

    let registry = Arc::new(CalibrationRegistry::new());
    match store::active_calibration(db.pool()).await? {
        Some(model) => registry.publish(model),
        None => warn!("No active calibration version; every edge will be uncalibrated"),
    }

    let timeout = Duration::from_secs(config.sources.timeout_secs);
    let mut sources: Vec<Arc<dyn PropSource>> = args
        .props
        .into_iter()
        .map(|(name, path)| Arc::new(JsonFileSource::new(name, path)) as Arc<dyn PropSource>)
        .collect();
    let mut injury_sources: Vec<Arc<dyn InjurySource>> = args
        .injuries
        .into_iter()
        .map(|path| Arc::new(JsonInjurySource::new(path)) as Arc<dyn InjurySource>)
        .collect();
    let mut schedule: Option<Box<dyn ScheduleSource>> = args
        .schedule
        .map(|path| Box::new(JsonScheduleSource::new(path)) as Box<dyn ScheduleSource>);
    if args.live {
        sources.push(Arc::new(PrizePicksClient::new(timeout)?));
        sources.push(Arc::new(UnderdogClient::new(timeout)?));
        sources.push(Arc::new(SleeperClient::new(
            timeout,
            config.sources.max_retries,
            config.sources.retry_backoff_ms,
        )?));
        let espn = EspnClient::new(timeout)?;
        injury_sources.push(Arc::new(espn.clone()));
        if schedule.is_none() {
            schedule = Some(Box::new(espn));
        }
    }
    if sources.is_empty() {
        anyhow::bail!("no prop sources: pass --props name=path or --live");
    }
    if schedule.is_none() {
        warn!("No schedule given; every player with history will be projected");
    }

    println!(
        "Slate: {} | Sources: {} | Injury feeds: {}",
        date,
        sources.len(),
        injury_sources.len()
    );
    let pipeline = Arc::new(Pipeline::new(config, projector, registry)?);
    let game_logs = JsonGameLogSource::new(game_logs);
    let progress = Arc::new(RunProgress::new());

    let run_handle = {
        let pipeline = pipeline.clone();
        let progress = progress.clone();
        tokio::spawn(async move {
            let inputs = RunSources {
                game_logs: &game_logs,
                props: &sources,
                schedule: schedule.as_deref(),
                injuries: &injury_sources,
            };
            pipeline.execute(inputs, date, &progress).await
        })
    };

    // Progress display loop
    let mut last_status = RunStatus::Idle;
    while !run_handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = *progress.status.read();
        if status == RunStatus::Projecting {
            let done = progress.projected_players.load(Ordering::Relaxed);
            let total = progress.total_players.load(Ordering::Relaxed);
            print!("\r  Projecting players {}/{}", done, total);
            std::io::stdout().flush().ok();
        } else if status != last_status {
            println!("\n  {:?}", status);
        }
        last_status = status;
    }
    println!();

    let snapshot = run_handle.await??;
    store::save_snapshot(db.pool(), &snapshot).await?;
    print_run(&snapshot, top_n);
    Ok(())
}

fn print_run(snapshot: &RunSnapshot, top_n: usize) {
    for report in &snapshot.source_reports {
        match &report.status {
            SourceStatus::Fetched(n) => {
                println!("  {:<12} {:>5} records  {:>6}ms", report.source, n, report.elapsed_ms)
            }
            SourceStatus::Failed(msg) => println!("  {:<12} FAILED  {}", report.source, msg),
            SourceStatus::TimedOut => println!("  {:<12} TIMED OUT", report.source),
        }
    }

    let s = &snapshot.summary;
    println!(
        "\nRun {} | players {} | lines {}/{} | edges {} | stale {} | unresolved {}",
        snapshot.run_id,
        s.players,
        s.resolved_lines,
        s.raw_records,
        s.edges,
        s.stale_lines,
        s.unresolved_mappings
    );
    if s.off_slate_players > 0 || s.ruled_out_players > 0 || s.injury_boosted_players > 0 {
        println!(
            "Off slate {} | ruled out {} | injury boosted {}",
            s.off_slate_players, s.ruled_out_players, s.injury_boosted_players
        );
    }
    println!(
        "Model {} | Calibration {}",
        snapshot.model_version,
        snapshot.calibration_version.as_deref().unwrap_or("none")
    );

    let rows = snapshot.boards.unified_rows();
    println!("\nUnified board (top {}):", rows.len().min(top_n));
    println!(
        "  {:>3}  {:<24} {:<5} {:>6} {:>6} {:>7} {:>7} {:<5} {:<11} {:>5}",
        "#", "Player", "Stat", "Proj", "Line", "Edge", "True", "Dir", "Source", "Min"
    );
    println!("  {}", "-".repeat(92));
    for (i, r) in rows.iter().take(top_n).enumerate() {
        println!(
            "  {:>3}  {:<24} {:<5} {:>6.1} {:>6.1} {:>+7.2} {:>+7.2} {:<5} {:<11} {:>5.1}",
            i + 1,
            r.player,
            r.stat_or_combo,
            r.raw_projection,
            r.line,
            r.raw_edge,
            r.true_edge,
            r.direction.label(),
            r.source,
            r.minutes_estimate,
        );
    }
}

// ============================================================================
// Grade / calibrate / report commands
// ============================================================================

async fn cmd_grade(date: NaiveDate, outcomes: PathBuf) -> anyhow::Result<()> {
    let config = load_config()?;
    let db = open_db().await?;

    let tracker = PerformanceTracker::new(config.tracker.clone(), config.combos.clone());
    for outcome in store::load_ledger(db.pool()).await? {
        if let Err(e) = tracker.record(outcome) {
            warn!("Skipping ledger row: {}", e);
        }
    }
    let edges = store::gradable_edges(db.pool(), date).await?;
    if edges.is_empty() {
        anyhow::bail!("no stored board for {}", date);
    }
    let pending = tracker.register(&edges);
    info!("{} of {} records pending for {}", pending, edges.len(), date);

    let actuals = JsonGameLogSource::new(&outcomes).actuals(date).await?;
    let graded_at = Utc::now();
    let mut graded = Vec::new();
    for actual in &actuals {
        graded.extend(tracker.grade(actual, graded_at));
    }
    let inserted = store::append_outcomes(db.pool(), &graded).await?;
    println!(
        "Graded {} records for {} ({} new to the ledger, {} still pending)",
        graded.len(),
        date,
        inserted,
        tracker.pending().len()
    );

    let day_ledger = store::graded_for_date(db.pool(), date).await?;
    let day = PerformanceTracker::replay(&day_ledger, &config.tracker);
    println!(
        "{} on the ledger for {} | Profit {:+} units | ROI {:+}",
        day.graded,
        date,
        day.profit.round_dp(2),
        day.overall_roi()
    );
    Ok(())
}

async fn cmd_calibrate() -> anyhow::Result<()> {
    let config = load_config()?;
    let db = open_db().await?;

    let ledger = store::load_ledger(db.pool()).await?;
    let examples: Vec<CalibrationExample> = ledger.iter().map(CalibrationExample::from).collect();
    info!("Training calibration on {} graded outcomes", examples.len());

    let cfg = config.calibration.clone();
    let model = tokio::task::spawn_blocking(move || CalibrationModel::train(&examples, &cfg)).await??;
    store::publish_calibration(db.pool(), &model).await?;

    println!("Activated calibration {} ({} rows)", model.version, model.training_rows);
    for (pair, samples) in &model.coverage {
        let status = if *samples >= model.min_samples { "calibrated" } else { "uncovered" };
        println!("  {:<24} {:>5} samples  {}", pair, samples, status);
    }
    Ok(())
}

async fn cmd_report() -> anyhow::Result<()> {
    let config = load_config()?;
    let db = open_db().await?;
    let ledger = store::load_ledger(db.pool()).await?;
    let report = PerformanceTracker::replay(&ledger, &config.tracker);
    print_report(&report);
    Ok(())
}

fn print_report(report: &PerformanceReport) {
    println!(
        "\n  {:<9} {:<6} {:<8} {:>6} {:>7} {:>7} {:>7} {:>9}",
        "Type", "Dir", "Bucket", "Count", "Win%", "Push%", "AvgEdge", "ROI"
    );
    println!("  {}", "-".repeat(68));
    for r in &report.rows {
        println!(
            "  {:<9} {:<6} {:<8} {:>6} {:>6.1}% {:>6.1}% {:>7.2} {:>+9.4}",
            r.prop_type.label(),
            r.direction.label(),
            r.edge_bucket,
            r.count,
            r.win_rate * 100.0,
            r.push_rate * 100.0,
            r.average_edge,
            r.roi,
        );
    }
    println!(
        "\n  Graded {} | Profit {:+} units | ROI {:+}",
        report.graded,
        report.profit.round_dp(2),
        report.overall_roi()
    );
}

// ============================================================================
// Serve command - Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Courtside v{} starting...", APP_VERSION);

    let config = load_config()?;
    let db = open_db().await?;
    let state = AppState {
        db: Arc::new(db),
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/boards/latest", get(api_latest_board))
        .route("/performance", get(api_performance))
        .route("/calibration", get(api_calibration_versions))
        .route("/calibration/:version", get(api_calibration))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Courtside v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health                - Health check and ledger size");
    println!("  GET  /api/boards/latest         - Latest unified board (?board=<source> for one source)");
    println!("  GET  /api/performance           - Performance by prop type, direction and edge bucket");
    println!("  GET  /api/calibration           - Stored calibration versions");
    println!("  GET  /api/calibration/:version  - One calibration version");
    println!("\n  Database: {}", db_path());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let graded = match store::ledger_count(state.db.pool()).await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("Ledger count failed: {}", e);
            None
        }
    };
    Json(serde_json::json!({
        "status": "ok",
        "service": "courtside",
        "version": APP_VERSION,
        "graded_outcomes": graded,
    }))
}

#[derive(Debug, Deserialize)]
struct BoardQuery {
    board: Option<String>,
}

/// GET /api/boards/latest - one board of the most recent run, unified by default
async fn api_latest_board(
    State(state): State<AppState>,
    Query(query): Query<BoardQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let board = query.board.map(|b| b.to_lowercase());
    match store::latest_board(state.db.pool(), board.as_deref()).await {
        Ok(Some(latest)) => Ok(Json(serde_json::json!({
            "success": true,
            "run_id": latest.run.run_id,
            "game_date": latest.run.game_date,
            "model_version": latest.run.model_version,
            "calibration_version": latest.run.calibration_version,
            "created_at": latest.run.created_at,
            "board": latest.board,
            "boards": latest.available,
            "data": latest.rows,
        }))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to load latest board: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/performance - aggregates replayed from the full ledger
async fn api_performance(State(state): State<AppState>) -> Json<serde_json::Value> {
    match store::load_ledger(state.db.pool()).await {
        Ok(ledger) => {
            let report = PerformanceTracker::replay(&ledger, &state.config.tracker);
            Json(serde_json::json!({
                "success": true,
                "overall_roi": report.overall_roi(),
                "report": report,
            }))
        }
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to load ledger: {}", e),
        })),
    }
}

/// GET /api/calibration - stored versions, newest first
async fn api_calibration_versions(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let versions = store::calibration_versions(state.db.pool()).await.map_err(|e| {
        error!("Failed to list calibration versions: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let active = store::active_calibration(state.db.pool())
        .await
        .map_err(|e| {
            error!("Failed to load active calibration: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(|m| m.version);
    Ok(Json(serde_json::json!({
        "success": true,
        "active": active,
        "versions": versions,
    })))
}

/// GET /api/calibration/:version
async fn api_calibration(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match store::calibration(state.db.pool(), &version).await {
        Ok(Some(model)) => Ok(Json(serde_json::json!({
            "success": true,
            "version": model.version,
            "created_at": model.created_at,
            "training_rows": model.training_rows,
            "min_samples": model.min_samples,
            "coverage": model.coverage,
        }))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to load calibration {}: {}", version, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

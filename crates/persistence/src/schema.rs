//! Database schema definitions

/// SQL to create all tables
/// NOTE: ledger money is stored as TEXT to preserve rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- One row per completed pipeline run
CREATE TABLE IF NOT EXISTS board_runs (
    run_id TEXT PRIMARY KEY,
    game_date TEXT NOT NULL,
    model_version TEXT NOT NULL,
    calibration_version TEXT,
    summary_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

-- Ranked rows of every board of a run ('unified' plus one per source)
CREATE TABLE IF NOT EXISTS board_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES board_runs(run_id) ON DELETE CASCADE,
    board TEXT NOT NULL,
    rank INTEGER NOT NULL,
    player_id INTEGER NOT NULL,
    player_name TEXT NOT NULL,
    market TEXT NOT NULL,
    game_date TEXT NOT NULL,
    source TEXT NOT NULL,
    raw_projection REAL NOT NULL,
    variance REAL NOT NULL DEFAULT 0,
    true_projection REAL NOT NULL,
    line_value REAL NOT NULL,
    over_price INTEGER,
    under_price INTEGER,
    raw_edge REAL NOT NULL,
    true_edge REAL NOT NULL,
    direction TEXT NOT NULL,
    minutes_estimate REAL NOT NULL,
    calibration_status TEXT NOT NULL,
    calibration_version TEXT,
    model_version TEXT NOT NULL,
    scrape_timestamp TEXT NOT NULL,
    UNIQUE(run_id, board, rank)
);

-- Graded ledger: at most one outcome per (player, market, date, source)
CREATE TABLE IF NOT EXISTS graded_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id INTEGER NOT NULL,
    market TEXT NOT NULL,
    game_date TEXT NOT NULL,
    source TEXT NOT NULL,
    player_name TEXT NOT NULL,
    direction TEXT NOT NULL,
    line_value REAL NOT NULL,
    raw_projection REAL NOT NULL,
    true_projection REAL NOT NULL,
    raw_edge REAL NOT NULL,
    true_edge REAL NOT NULL,
    price INTEGER NOT NULL,
    actual_value REAL NOT NULL,
    grade TEXT NOT NULL,
    profit TEXT NOT NULL DEFAULT '0',
    graded_at TEXT NOT NULL,
    UNIQUE(player_id, market, game_date, source)
);

-- Calibration versions are immutable once written
CREATE TABLE IF NOT EXISTS calibration_models (
    version TEXT PRIMARY KEY,
    model_json TEXT NOT NULL,
    training_rows INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Single-slot pointer to the active calibration version
CREATE TABLE IF NOT EXISTS calibration_active (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    version TEXT NOT NULL REFERENCES calibration_models(version),
    activated_at TEXT NOT NULL
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_board_runs_created ON board_runs(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_board_runs_date ON board_runs(game_date);
CREATE INDEX IF NOT EXISTS idx_board_records_run ON board_records(run_id, board, rank);
CREATE INDEX IF NOT EXISTS idx_graded_date ON graded_outcomes(game_date);
CREATE INDEX IF NOT EXISTS idx_graded_source ON graded_outcomes(source, market)
"#;

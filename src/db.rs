// ==========================================
// 生产执行核心 - SQLite 连接初始化与表结构
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键/busy_timeout）
// - 集中维护持久化契约（worker_assignment 等表的 CHECK 约束与索引）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开只读查询用连接（WAL 模式下读不阻塞写事务）
pub fn open_read_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = open_sqlite_connection(db_path)?;
    enable_wal(&conn)?;
    Ok(conn)
}

/// 切换到 WAL 日志模式（内存库会返回 "memory",忽略即可）
pub fn enable_wal(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    tracing::debug!(journal_mode = %mode, "SQLite 日志模式");
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化表结构（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    match read_schema_version(conn)? {
        Some(v) if v != CURRENT_SCHEMA_VERSION => {
            tracing::warn!(
                found = v,
                expected = CURRENT_SCHEMA_VERSION,
                "数据库 schema_version 与代码不一致"
            );
        }
        _ => {}
    }
    Ok(())
}

/// 持久化契约
///
/// - 时间戳统一为 epoch 毫秒 (INTEGER)
/// - nominal_time / effective_time 为分钟 (REAL)
/// - total_paused_time 为毫秒 (INTEGER)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ===== 配置 =====
CREATE TABLE IF NOT EXISTS config_scope (
    scope_id TEXT PRIMARY KEY,
    scope_type TEXT NOT NULL,
    scope_key TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(scope_type, scope_key)
);

INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
VALUES ('global', 'GLOBAL', 'global');

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

-- ===== 主数据（只读） =====
CREATE TABLE IF NOT EXISTS worker (
    worker_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive')),
    on_leave INTEGER NOT NULL DEFAULT 0,
    efficiency REAL NOT NULL DEFAULT 1.0
);

CREATE TABLE IF NOT EXISTS worker_skill (
    worker_id TEXT NOT NULL REFERENCES worker(worker_id) ON DELETE CASCADE,
    skill_code TEXT NOT NULL,
    PRIMARY KEY (worker_id, skill_code)
);

CREATE TABLE IF NOT EXISTS operation_def (
    operation_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    nominal_time REAL NOT NULL CHECK (nominal_time >= 0)
);

CREATE TABLE IF NOT EXISTS operation_skill (
    operation_id TEXT NOT NULL REFERENCES operation_def(operation_id) ON DELETE CASCADE,
    skill_code TEXT NOT NULL,
    PRIMARY KEY (operation_id, skill_code)
);

CREATE TABLE IF NOT EXISTS station (
    station_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive'))
);

CREATE TABLE IF NOT EXISTS station_operation (
    station_id TEXT NOT NULL REFERENCES station(station_id) ON DELETE CASCADE,
    operation_id TEXT NOT NULL,
    PRIMARY KEY (station_id, operation_id)
);

CREATE TABLE IF NOT EXISTS substation (
    substation_id TEXT PRIMARY KEY,
    station_id TEXT NOT NULL REFERENCES station(station_id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'inactive'))
);

-- ===== 工单与方案 =====
CREATE TABLE IF NOT EXISTS work_order (
    work_order_code TEXT PRIMARY KEY,
    production_state TEXT CHECK (production_state IS NULL OR production_state IN
        ('waiting_approval', 'in_production', 'paused', 'completed', 'cancelled')),
    production_state_updated_at INTEGER,
    is_urgent INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS production_plan (
    plan_id TEXT PRIMARY KEY,
    work_order_code TEXT NOT NULL REFERENCES work_order(work_order_code),
    status TEXT NOT NULL CHECK (status IN ('draft', 'production', 'template')),
    launch_status TEXT NOT NULL DEFAULT 'none'
        CHECK (launch_status IN ('none', 'launched', 'paused', 'cancelled')),
    launched_at INTEGER,
    quantity REAL NOT NULL CHECK (quantity >= 0),
    scheduling_mode TEXT NOT NULL DEFAULT 'fifo' CHECK (scheduling_mode IN ('fifo', 'optimized')),
    total_nodes INTEGER,
    assigned_count INTEGER,
    estimated_duration REAL,
    parallel_paths INTEGER,
    material_summary_json TEXT,
    summary_updated_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_plan_active_per_work_order
    ON production_plan(work_order_code)
    WHERE status = 'production' AND launch_status != 'cancelled';

CREATE TABLE IF NOT EXISTS operation_node (
    plan_id TEXT NOT NULL REFERENCES production_plan(plan_id) ON DELETE CASCADE,
    node_id TEXT NOT NULL,
    operation_id TEXT NOT NULL,
    output_code TEXT,
    output_quantity REAL NOT NULL DEFAULT 0,
    material_inputs_json TEXT NOT NULL DEFAULT '[]',
    predecessors_json TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (plan_id, node_id)
);

-- ===== 工人任务（持久化契约） =====
CREATE TABLE IF NOT EXISTS worker_assignment (
    assignment_id TEXT PRIMARY KEY,
    work_order_code TEXT NOT NULL REFERENCES work_order(work_order_code),
    plan_id TEXT NOT NULL REFERENCES production_plan(plan_id),
    node_id TEXT NOT NULL,
    worker_id TEXT NOT NULL REFERENCES worker(worker_id),
    station_id TEXT,
    substation_id TEXT,
    scheduling_mode TEXT NOT NULL DEFAULT 'fifo' CHECK (scheduling_mode IN ('fifo', 'optimized')),
    nominal_time REAL NOT NULL CHECK (nominal_time >= 0),
    effective_time REAL NOT NULL CHECK (effective_time >= 0),
    expected_start INTEGER NOT NULL,
    optimized_start INTEGER,
    planned_end INTEGER NOT NULL,
    actual_start INTEGER CHECK (actual_start IS NULL OR actual_start >= expected_start),
    actual_end INTEGER CHECK (actual_end IS NULL OR (actual_start IS NOT NULL AND actual_end >= actual_start)),
    optimized_index INTEGER CHECK (optimized_index IS NULL OR optimized_index > 0),
    status TEXT NOT NULL CHECK (status IN
        ('pending', 'ready', 'queued', 'in_progress', 'paused', 'completed', 'cancelled')),
    paused_at INTEGER,
    current_pause_start INTEGER,
    total_paused_time INTEGER NOT NULL DEFAULT 0 CHECK (total_paused_time >= 0),
    sequence_number INTEGER NOT NULL,
    is_urgent INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (work_order_code, worker_id, node_id)
);

-- 同一工人任一时刻至多一个进行中任务
CREATE UNIQUE INDEX IF NOT EXISTS ux_assignment_worker_in_progress
    ON worker_assignment(worker_id) WHERE status = 'in_progress';

-- FIFO 取数: worker + status, 加急优先, expected_start 升序
CREATE INDEX IF NOT EXISTS idx_assignment_fifo_queue
    ON worker_assignment(worker_id, status, is_urgent DESC, expected_start, sequence_number);

-- 优化取数: worker + status + mode, optimized_index 升序
CREATE INDEX IF NOT EXISTS idx_assignment_optimized_queue
    ON worker_assignment(worker_id, status, scheduling_mode, optimized_index);

CREATE INDEX IF NOT EXISTS idx_assignment_plan
    ON worker_assignment(plan_id, status);

-- ===== 占用锁 =====
CREATE TABLE IF NOT EXISTS worker_occupancy (
    worker_id TEXT PRIMARY KEY REFERENCES worker(worker_id),
    assignment_id TEXT NOT NULL UNIQUE REFERENCES worker_assignment(assignment_id),
    occupied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS substation_occupancy (
    substation_id TEXT PRIMARY KEY REFERENCES substation(substation_id),
    assignment_id TEXT NOT NULL UNIQUE REFERENCES worker_assignment(assignment_id),
    occupied_at INTEGER NOT NULL
);

-- ===== 库存与预留 =====
CREATE TABLE IF NOT EXISTS material_stock (
    material_code TEXT PRIMARY KEY,
    available_qty REAL NOT NULL DEFAULT 0,
    reserved_qty REAL NOT NULL DEFAULT 0 CHECK (reserved_qty >= -0.000001),
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS material_reservation (
    reservation_id TEXT PRIMARY KEY,
    plan_id TEXT NOT NULL REFERENCES production_plan(plan_id),
    material_code TEXT NOT NULL,
    reserved_qty REAL NOT NULL CHECK (reserved_qty >= 0),
    consumed_qty REAL NOT NULL DEFAULT 0 CHECK (consumed_qty >= 0),
    released_qty REAL NOT NULL DEFAULT 0 CHECK (released_qty >= 0),
    status TEXT NOT NULL CHECK (status IN ('reserved', 'consumed', 'partially_released', 'released')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (plan_id, material_code)
);

-- ===== 审计 =====
CREATE TABLE IF NOT EXISTS action_log (
    action_id TEXT PRIMARY KEY,
    work_order_code TEXT NOT NULL,
    plan_id TEXT,
    action_type TEXT NOT NULL,
    action_ts INTEGER NOT NULL,
    actor TEXT NOT NULL,
    payload_json TEXT,
    detail TEXT
);

CREATE INDEX IF NOT EXISTS idx_action_log_work_order
    ON action_log(work_order_code, action_ts DESC);
"#;

/// 默认数据库路径
///
/// 优先级: 环境变量 PRODUCTION_EXECUTION_DB_PATH → 用户数据目录 → 当前目录
pub fn default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("PRODUCTION_EXECUTION_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./production_execution.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("production-execution");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("production_execution.db");
        }
    }
    path.to_string_lossy().to_string()
}

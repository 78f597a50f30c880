// ==========================================
// 生产执行核心 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// 缺失或无法解析的配置项回退默认值（无法解析时记 warn）
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::db::open_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};

// ==========================================
// ExecutionConfig - 执行核心配置快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// 缺料超过 required × 该比例视为严重缺料
    pub critical_shortage_ratio: f64,
    /// 外部库存查询超时（毫秒）
    pub material_check_timeout_ms: u64,
    /// 工人效率 <= 0 时的回退效率
    pub default_worker_efficiency: f64,
    /// NoEligibleWorkers 诊断样本数量
    pub worker_sample_size: usize,
    /// 优化模式排序策略名
    pub optimization_heuristic: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            critical_shortage_ratio: 0.5,
            material_check_timeout_ms: 3_000,
            default_worker_efficiency: 1.0,
            worker_sample_size: 5,
            optimization_heuristic: "shortest_processing_time".to_string(),
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 按数据库路径创建
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析,缺失/无法解析时返回默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr,
    {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    tracing::warn!(config_key = key, raw_value = %raw, "配置值无法解析，使用默认值");
                    Ok(default)
                }
            },
        }
    }

    /// 加载执行核心配置
    pub fn load_execution_config(&self) -> RepositoryResult<ExecutionConfig> {
        let defaults = ExecutionConfig::default();

        let mut ratio =
            self.get_parsed_or_default(config_keys::CRITICAL_SHORTAGE_RATIO, defaults.critical_shortage_ratio)?;
        if !ratio.is_finite() || ratio < 0.0 {
            tracing::warn!(value = ratio, "critical_shortage_ratio 超出范围，使用默认值");
            ratio = defaults.critical_shortage_ratio;
        }

        let mut efficiency = self
            .get_parsed_or_default(config_keys::DEFAULT_WORKER_EFFICIENCY, defaults.default_worker_efficiency)?;
        if !efficiency.is_finite() || efficiency <= 0.0 {
            tracing::warn!(value = efficiency, "default_worker_efficiency 必须为正数，使用默认值");
            efficiency = defaults.default_worker_efficiency;
        }

        let heuristic = self
            .get_global_config_value(config_keys::OPTIMIZATION_HEURISTIC)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.optimization_heuristic);

        Ok(ExecutionConfig {
            critical_shortage_ratio: ratio,
            material_check_timeout_ms: self
                .get_parsed_or_default(config_keys::MATERIAL_CHECK_TIMEOUT_MS, defaults.material_check_timeout_ms)?,
            default_worker_efficiency: efficiency,
            worker_sample_size: self
                .get_parsed_or_default(config_keys::WORKER_SAMPLE_SIZE, defaults.worker_sample_size)?,
            optimization_heuristic: heuristic,
        })
    }

    /// 获取所有 global 配置的快照（JSON 格式）
    ///
    /// 用于下达审计: 记录排程时生效的配置
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let config_map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        serde_json::to_string(&json!(config_map)).map_err(|e| RepositoryError::InternalError(e.to_string()))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 物料齐套
    pub const CRITICAL_SHORTAGE_RATIO: &str = "critical_shortage_ratio";
    pub const MATERIAL_CHECK_TIMEOUT_MS: &str = "material_check_timeout_ms";

    // 排程
    pub const DEFAULT_WORKER_EFFICIENCY: &str = "default_worker_efficiency";
    pub const WORKER_SAMPLE_SIZE: &str = "worker_sample_size";
    pub const OPTIMIZATION_HEURISTIC: &str = "optimization_heuristic";
}

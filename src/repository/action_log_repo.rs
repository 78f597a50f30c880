// ==========================================
// 生产执行核心 - 操作日志数据仓储
// ==========================================
// 对齐: action_log 表
// 红线: 所有状态变更写入必须在同一事务内记录
// ==========================================

use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::action_log::{ActionLog, ActionType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::mapping::{get_ts, to_millis};

// ==========================================
// ActionLogRepository - 操作日志仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct ActionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ActionLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入操作日志（独立写入,状态变更场景请用 `insert_tx`）
    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, log)
    }

    pub fn insert_tx(tx: &Connection, log: &ActionLog) -> RepositoryResult<String> {
        tx.execute(
            r#"
            INSERT INTO action_log (
                action_id, work_order_code, plan_id, action_type, action_ts,
                actor, payload_json, detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                log.action_id,
                log.work_order_code,
                log.plan_id,
                log.action_type.as_str(),
                to_millis(log.action_ts),
                log.actor,
                log.payload_json.as_ref().map(|v| v.to_string()),
                log.detail,
            ],
        )?;
        Ok(log.action_id.clone())
    }

    /// 工单的操作日志（最新在前）
    pub fn list_by_work_order(&self, work_order_code: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT action_id, work_order_code, plan_id, action_type, action_ts,
                   actor, payload_json, detail
            FROM action_log
            WHERE work_order_code = ?1
            ORDER BY action_ts DESC, rowid DESC
            "#,
        )?;
        let logs = stmt
            .query_map(params![work_order_code], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }
}

fn map_row(row: &Row) -> rusqlite::Result<ActionLog> {
    let action_type: String = row.get(3)?;
    let payload: Option<String> = row.get(6)?;
    Ok(ActionLog {
        action_id: row.get(0)?,
        work_order_code: row.get(1)?,
        plan_id: row.get(2)?,
        action_type: ActionType::from_str(&action_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("未知的操作类型: {}", action_type).into(),
            )
        })?,
        action_ts: get_ts(row, 4)?,
        actor: row.get(5)?,
        payload_json: payload.and_then(|s| serde_json::from_str(&s).ok()),
        detail: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[test]
    fn test_insert_and_list_newest_first() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        let repo = ActionLogRepository::new(Arc::new(Mutex::new(conn)));

        let t0 = Utc::now();
        repo.insert(&ActionLog::new(ActionType::Launch, "WO-1", Some("P1"), "admin", t0)
            .with_payload(json!({"assignedCount": 2})))
            .unwrap();
        repo.insert(&ActionLog::new(ActionType::Pause, "WO-1", Some("P1"), "admin", t0 + Duration::seconds(5)))
            .unwrap();
        repo.insert(&ActionLog::new(ActionType::Launch, "WO-2", None, "admin", t0)).unwrap();

        let logs = repo.list_by_work_order("WO-1").unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action_type, ActionType::Pause);
        assert_eq!(logs[1].payload_json, Some(json!({"assignedCount": 2})));
    }
}

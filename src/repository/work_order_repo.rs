// ==========================================
// 生产执行核心 - 工单数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑,状态迁移的合法性由状态机判定
// 约束: 状态写入一律为条件更新（比对期望的旧状态）
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::types::ProductionState;
use crate::domain::work_order::WorkOrder;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::mapping::{get_opt_enum, get_opt_ts, get_ts, opt_to_millis, to_millis};

const SELECT_COLUMNS: &str = r#"
    SELECT work_order_code, production_state, production_state_updated_at, is_urgent, created_at
    FROM work_order
"#;

// ==========================================
// WorkOrderRepository - 工单仓储
// ==========================================
pub struct WorkOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WorkOrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入工单（工单由报价审批创建,这里供外部导入与测试使用）
    pub fn insert(&self, work_order: &WorkOrder) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, work_order)
    }

    pub fn find_by_code(&self, work_order_code: &str) -> RepositoryResult<Option<WorkOrder>> {
        let conn = self.get_conn()?;
        Self::find_tx(&conn, work_order_code)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn insert_tx(tx: &Connection, work_order: &WorkOrder) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO work_order (
                work_order_code, production_state, production_state_updated_at, is_urgent, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                work_order.work_order_code,
                work_order.production_state.map(|s| s.as_db_str()),
                opt_to_millis(work_order.production_state_updated_at),
                work_order.is_urgent,
                to_millis(work_order.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_tx(tx: &Connection, work_order_code: &str) -> RepositoryResult<Option<WorkOrder>> {
        let sql = format!("{} WHERE work_order_code = ?1", SELECT_COLUMNS);
        let work_order = tx
            .query_row(&sql, params![work_order_code], map_row)
            .optional()?;
        Ok(work_order)
    }

    /// 条件更新生产状态
    ///
    /// `expected` 为调用方读到的旧状态（None 表示持久化状态缺失）;
    /// 若期间已被其他事务迁移,返回 ConcurrentModification。
    pub fn update_state_tx(
        tx: &Connection,
        work_order_code: &str,
        expected: Option<ProductionState>,
        new_state: ProductionState,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let rows = tx.execute(
            r#"
            UPDATE work_order
            SET production_state = ?1, production_state_updated_at = ?2
            WHERE work_order_code = ?3 AND production_state IS ?4
            "#,
            params![
                new_state.as_db_str(),
                to_millis(now),
                work_order_code,
                expected.map(|s| s.as_db_str()),
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::ConcurrentModification {
                entity: "WorkOrder".to_string(),
                id: work_order_code.to_string(),
                expected: expected
                    .map(|s| s.as_db_str().to_string())
                    .unwrap_or_else(|| "NULL".to_string()),
            });
        }
        Ok(())
    }

    /// 设置加急标志（不触碰 production_state）
    pub fn set_urgent_tx(tx: &Connection, work_order_code: &str, urgent: bool) -> RepositoryResult<()> {
        let rows = tx.execute(
            "UPDATE work_order SET is_urgent = ?1 WHERE work_order_code = ?2",
            params![urgent, work_order_code],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("WorkOrder", work_order_code));
        }
        Ok(())
    }
}

fn map_row(row: &Row) -> rusqlite::Result<WorkOrder> {
    Ok(WorkOrder {
        work_order_code: row.get(0)?,
        production_state: get_opt_enum(row, 1)?,
        production_state_updated_at: get_opt_ts(row, 2)?,
        is_urgent: row.get(3)?,
        created_at: get_ts(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup() -> WorkOrderRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        WorkOrderRepository::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_insert_and_find() {
        let repo = setup();
        let wo = WorkOrder::new("WO-1", Utc::now());
        repo.insert(&wo).unwrap();

        let found = repo.find_by_code("WO-1").unwrap().unwrap();
        assert_eq!(found.production_state, Some(ProductionState::WaitingApproval));
        assert!(!found.is_urgent);
        assert!(repo.find_by_code("WO-404").unwrap().is_none());
    }

    #[test]
    fn test_conditional_state_update() {
        let repo = setup();
        repo.insert(&WorkOrder::new("WO-1", Utc::now())).unwrap();

        let conn = repo.get_conn().unwrap();
        WorkOrderRepository::update_state_tx(
            &conn,
            "WO-1",
            Some(ProductionState::WaitingApproval),
            ProductionState::InProduction,
            Utc::now(),
        )
        .unwrap();

        // 旧状态已变,第二次同样的迁移必须失败
        let err = WorkOrderRepository::update_state_tx(
            &conn,
            "WO-1",
            Some(ProductionState::WaitingApproval),
            ProductionState::InProduction,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, RepositoryError::ConcurrentModification { .. }));
    }

    #[test]
    fn test_null_state_matches_none_expectation() {
        let repo = setup();
        let mut wo = WorkOrder::new("WO-1", Utc::now());
        wo.production_state = None;
        repo.insert(&wo).unwrap();

        let conn = repo.get_conn().unwrap();
        WorkOrderRepository::update_state_tx(&conn, "WO-1", None, ProductionState::Paused, Utc::now())
            .unwrap();
        drop(conn);

        let found = repo.find_by_code("WO-1").unwrap().unwrap();
        assert_eq!(found.production_state, Some(ProductionState::Paused));
    }
}

// ==========================================
// 生产执行核心 - 工人任务数据仓储
// ==========================================
// 对齐: worker_assignment 表（持久化契约）
// 红线: 任务永不删除; 状态写入为条件更新（WHERE status = 期望旧状态）
// 取数:
// - FIFO:  worker + status + mode, 加急优先, expected_start 升序, sequence_number 兜底
// - 优化:  worker + status + mode, optimized_index 升序
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::assignment::WorkerAssignment;
use crate::domain::types::{AssignmentStatus, SchedulingMode};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::mapping::{get_enum, get_opt_ts, get_ts, opt_to_millis, to_millis};

const SELECT_COLUMNS: &str = r#"
    SELECT assignment_id, work_order_code, plan_id, node_id, worker_id,
           station_id, substation_id, scheduling_mode, nominal_time, effective_time,
           expected_start, optimized_start, optimized_index, planned_end,
           actual_start, actual_end, status, paused_at, current_pause_start,
           total_paused_time, sequence_number, is_urgent, created_at, updated_at
    FROM worker_assignment
"#;

/// 非终态集合（SQL 片段）
const NON_TERMINAL: &str = "('pending', 'ready', 'queued', 'in_progress', 'paused')";

/// 只有生产中工单的任务参与排队（SQL 片段）
///
/// 解析规则同 `WorkOrder::resolved_state`: production_state 优先,缺失时按方案下达状态推导
const IN_PRODUCTION_PLANS: &str = r#"plan_id IN (
    SELECT p.plan_id FROM production_plan p
    JOIN work_order w ON w.work_order_code = p.work_order_code
    WHERE COALESCE(w.production_state,
        CASE p.launch_status
            WHEN 'launched' THEN 'in_production'
            WHEN 'paused' THEN 'paused'
            WHEN 'cancelled' THEN 'cancelled'
            ELSE 'waiting_approval'
        END) = 'in_production')"#;

// ==========================================
// AssignmentRepository - 工人任务仓储
// ==========================================
pub struct AssignmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AssignmentRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 只读查询（读最近一致快照,不进写事务）
    // ==========================================

    pub fn find_by_id(&self, assignment_id: &str) -> RepositoryResult<Option<WorkerAssignment>> {
        let conn = self.get_conn()?;
        Self::find_tx(&conn, assignment_id)
    }

    pub fn list_by_plan(&self, plan_id: &str) -> RepositoryResult<Vec<WorkerAssignment>> {
        let conn = self.get_conn()?;
        Self::list_by_plan_tx(&conn, plan_id)
    }

    /// 工人在指定排程模式下的等待队列
    pub fn worker_queue(
        &self,
        worker_id: &str,
        mode: SchedulingMode,
    ) -> RepositoryResult<Vec<WorkerAssignment>> {
        let conn = self.get_conn()?;
        Self::worker_queue_tx(&conn, worker_id, mode)
    }

    /// 工人在指定排程模式下的下一个任务
    pub fn next_task(
        &self,
        worker_id: &str,
        mode: SchedulingMode,
    ) -> RepositoryResult<Option<WorkerAssignment>> {
        let conn = self.get_conn()?;
        Ok(Self::worker_queue_tx(&conn, worker_id, mode)?.into_iter().next())
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn insert_tx(tx: &Connection, a: &WorkerAssignment) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO worker_assignment (
                assignment_id, work_order_code, plan_id, node_id, worker_id,
                station_id, substation_id, scheduling_mode, nominal_time, effective_time,
                expected_start, optimized_start, optimized_index, planned_end,
                actual_start, actual_end, status, paused_at, current_pause_start,
                total_paused_time, sequence_number, is_urgent, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                      ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
            "#,
            params![
                a.assignment_id,
                a.work_order_code,
                a.plan_id,
                a.node_id,
                a.worker_id,
                a.station_id,
                a.substation_id,
                a.scheduling_mode.as_db_str(),
                a.nominal_time,
                a.effective_time,
                to_millis(a.expected_start),
                opt_to_millis(a.optimized_start),
                a.optimized_index,
                to_millis(a.planned_end),
                opt_to_millis(a.actual_start),
                opt_to_millis(a.actual_end),
                a.status.as_db_str(),
                opt_to_millis(a.paused_at),
                opt_to_millis(a.current_pause_start),
                a.total_paused_time,
                a.sequence_number,
                a.is_urgent,
                to_millis(a.created_at),
                to_millis(a.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_tx(tx: &Connection, assignment_id: &str) -> RepositoryResult<Option<WorkerAssignment>> {
        let sql = format!("{} WHERE assignment_id = ?1", SELECT_COLUMNS);
        Ok(tx.query_row(&sql, params![assignment_id], map_row).optional()?)
    }

    pub fn list_by_plan_tx(tx: &Connection, plan_id: &str) -> RepositoryResult<Vec<WorkerAssignment>> {
        let sql = format!("{} WHERE plan_id = ?1 ORDER BY sequence_number", SELECT_COLUMNS);
        query_list(tx, &sql, params![plan_id])
    }

    /// 工人当前进行中的任务
    pub fn in_progress_for_worker_tx(
        tx: &Connection,
        worker_id: &str,
    ) -> RepositoryResult<Option<WorkerAssignment>> {
        let sql = format!(
            "{} WHERE worker_id = ?1 AND status = 'in_progress' LIMIT 1",
            SELECT_COLUMNS
        );
        Ok(tx.query_row(&sql, params![worker_id], map_row).optional()?)
    }

    /// 工人已提交队列的尾部时间（非终态任务 planned_end 的最大值）
    pub fn worker_tail_tx(tx: &Connection, worker_id: &str) -> RepositoryResult<Option<DateTime<Utc>>> {
        let sql = format!(
            "SELECT MAX(planned_end) FROM worker_assignment WHERE worker_id = ?1 AND status IN {}",
            NON_TERMINAL
        );
        let ms: Option<i64> = tx.query_row(&sql, params![worker_id], |row| row.get(0))?;
        Ok(ms.and_then(|ms| chrono::TimeZone::timestamp_millis_opt(&Utc, ms).single()))
    }

    /// 工人优化队列已提交的最大序号（含历史任务,序号永不复用）
    pub fn max_optimized_index_tx(tx: &Connection, worker_id: &str) -> RepositoryResult<i64> {
        let max: Option<i64> = tx.query_row(
            "SELECT MAX(optimized_index) FROM worker_assignment WHERE worker_id = ?1",
            params![worker_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    /// 全局递增的插入序号
    pub fn next_sequence_number_tx(tx: &Connection) -> RepositoryResult<i64> {
        let max: Option<i64> =
            tx.query_row("SELECT MAX(sequence_number) FROM worker_assignment", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// 各子工位上的非终态任务数（用于均衡选择）
    pub fn substation_load_tx(tx: &Connection, substation_id: &str) -> RepositoryResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM worker_assignment WHERE substation_id = ?1 AND status IN {}",
            NON_TERMINAL
        );
        Ok(tx.query_row(&sql, params![substation_id], |row| row.get(0))?)
    }

    pub fn worker_queue_tx(
        tx: &Connection,
        worker_id: &str,
        mode: SchedulingMode,
    ) -> RepositoryResult<Vec<WorkerAssignment>> {
        let order_by = match mode {
            SchedulingMode::Fifo => "is_urgent DESC, expected_start ASC, sequence_number ASC",
            SchedulingMode::Optimized => "optimized_index ASC, sequence_number ASC",
        };
        let sql = format!(
            "{} WHERE worker_id = ?1 AND status IN ('ready', 'queued') AND scheduling_mode = ?2 AND {} ORDER BY {}",
            SELECT_COLUMNS, IN_PRODUCTION_PLANS, order_by
        );
        query_list(tx, &sql, params![worker_id, mode.as_db_str()])
    }

    /// 跨模式的等待任务（加急优先、expected_start 升序）,用于释放工人后晋级
    ///
    /// 暂停/终态工单的任务不参与
    pub fn waiting_for_worker_tx(
        tx: &Connection,
        worker_id: &str,
    ) -> RepositoryResult<Vec<WorkerAssignment>> {
        let sql = format!(
            "{} WHERE worker_id = ?1 AND status IN ('ready', 'queued') AND {}
             ORDER BY is_urgent DESC, expected_start ASC, sequence_number ASC",
            SELECT_COLUMNS, IN_PRODUCTION_PLANS
        );
        query_list(tx, &sql, params![worker_id])
    }

    /// 条件更新（整行可变字段）
    ///
    /// 仅当库中状态仍为 `expected` 时生效,否则返回 ConcurrentModification,
    /// 保证同一任务上的两个并发迁移至多一个成功。
    pub fn update_tx(
        tx: &Connection,
        a: &WorkerAssignment,
        expected: AssignmentStatus,
    ) -> RepositoryResult<()> {
        let rows = tx.execute(
            r#"
            UPDATE worker_assignment
            SET station_id = ?1, substation_id = ?2, expected_start = ?3,
                optimized_start = ?4, optimized_index = ?5, planned_end = ?6,
                actual_start = ?7, actual_end = ?8, status = ?9, paused_at = ?10,
                current_pause_start = ?11, total_paused_time = ?12, is_urgent = ?13,
                updated_at = ?14
            WHERE assignment_id = ?15 AND status = ?16
            "#,
            params![
                a.station_id,
                a.substation_id,
                to_millis(a.expected_start),
                opt_to_millis(a.optimized_start),
                a.optimized_index,
                to_millis(a.planned_end),
                opt_to_millis(a.actual_start),
                opt_to_millis(a.actual_end),
                a.status.as_db_str(),
                opt_to_millis(a.paused_at),
                opt_to_millis(a.current_pause_start),
                a.total_paused_time,
                a.is_urgent,
                to_millis(a.updated_at),
                a.assignment_id,
                expected.as_db_str(),
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::ConcurrentModification {
                entity: "WorkerAssignment".to_string(),
                id: a.assignment_id.clone(),
                expected: expected.as_db_str().to_string(),
            });
        }
        Ok(())
    }

    /// 同步工单加急标志到其非终态任务
    pub fn set_urgent_for_work_order_tx(
        tx: &Connection,
        work_order_code: &str,
        urgent: bool,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let sql = format!(
            "UPDATE worker_assignment SET is_urgent = ?1, updated_at = ?2
             WHERE work_order_code = ?3 AND status IN {}",
            NON_TERMINAL
        );
        Ok(tx.execute(&sql, params![urgent, to_millis(now), work_order_code])?)
    }
}

fn query_list(
    tx: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> RepositoryResult<Vec<WorkerAssignment>> {
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn map_row(row: &Row) -> rusqlite::Result<WorkerAssignment> {
    Ok(WorkerAssignment {
        assignment_id: row.get(0)?,
        work_order_code: row.get(1)?,
        plan_id: row.get(2)?,
        node_id: row.get(3)?,
        worker_id: row.get(4)?,
        station_id: row.get(5)?,
        substation_id: row.get(6)?,
        scheduling_mode: get_enum(row, 7)?,
        nominal_time: row.get(8)?,
        effective_time: row.get(9)?,
        expected_start: get_ts(row, 10)?,
        optimized_start: get_opt_ts(row, 11)?,
        optimized_index: row.get(12)?,
        planned_end: get_ts(row, 13)?,
        actual_start: get_opt_ts(row, 14)?,
        actual_end: get_opt_ts(row, 15)?,
        status: get_enum(row, 16)?,
        paused_at: get_opt_ts(row, 17)?,
        current_pause_start: get_opt_ts(row, 18)?,
        total_paused_time: row.get(19)?,
        sequence_number: row.get(20)?,
        is_urgent: row.get(21)?,
        created_at: get_ts(row, 22)?,
        updated_at: get_ts(row, 23)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use chrono::{Duration, TimeZone};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO worker (worker_id, name) VALUES ('W1', 'w1');
            INSERT INTO work_order (work_order_code, production_state, created_at)
                VALUES ('WO-1', 'in_production', 0);
            INSERT INTO production_plan (plan_id, work_order_code, status, quantity, created_at)
                VALUES ('P1', 'WO-1', 'production', 1, 0);
            "#,
        )
        .unwrap();
        conn
    }

    fn assignment(id: &str, node: &str, start_min: i64, urgent: bool, seq: i64) -> WorkerAssignment {
        let base = Utc.timestamp_millis_opt(0).unwrap();
        let start = base + Duration::minutes(start_min);
        WorkerAssignment {
            assignment_id: id.to_string(),
            work_order_code: "WO-1".to_string(),
            plan_id: "P1".to_string(),
            node_id: node.to_string(),
            worker_id: "W1".to_string(),
            station_id: None,
            substation_id: None,
            scheduling_mode: SchedulingMode::Fifo,
            nominal_time: 10.0,
            effective_time: 10.0,
            expected_start: start,
            optimized_start: None,
            optimized_index: None,
            planned_end: start + Duration::minutes(10),
            actual_start: None,
            actual_end: None,
            status: AssignmentStatus::Queued,
            paused_at: None,
            current_pause_start: None,
            total_paused_time: 0,
            sequence_number: seq,
            is_urgent: urgent,
            created_at: base,
            updated_at: base,
        }
    }

    #[test]
    fn test_fifo_queue_order_urgent_first() {
        let conn = setup();
        AssignmentRepository::insert_tx(&conn, &assignment("A1", "N1", 30, false, 1)).unwrap();
        AssignmentRepository::insert_tx(&conn, &assignment("A2", "N2", 10, false, 2)).unwrap();
        AssignmentRepository::insert_tx(&conn, &assignment("A3", "N3", 50, true, 3)).unwrap();

        let queue = AssignmentRepository::worker_queue_tx(&conn, "W1", SchedulingMode::Fifo).unwrap();
        let ids: Vec<&str> = queue.iter().map(|a| a.assignment_id.as_str()).collect();
        assert_eq!(ids, vec!["A3", "A2", "A1"]);
    }

    #[test]
    fn test_duplicate_worker_node_rejected() {
        let conn = setup();
        AssignmentRepository::insert_tx(&conn, &assignment("A1", "N1", 0, false, 1)).unwrap();
        let err = AssignmentRepository::insert_tx(&conn, &assignment("A2", "N1", 5, false, 2)).unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));
    }

    #[test]
    fn test_conditional_update_rejects_stale_status() {
        let conn = setup();
        let mut a = assignment("A1", "N1", 0, false, 1);
        AssignmentRepository::insert_tx(&conn, &a).unwrap();

        a.status = AssignmentStatus::Ready;
        AssignmentRepository::update_tx(&conn, &a, AssignmentStatus::Queued).unwrap();

        a.status = AssignmentStatus::Cancelled;
        let err = AssignmentRepository::update_tx(&conn, &a, AssignmentStatus::Queued).unwrap_err();
        assert!(matches!(err, RepositoryError::ConcurrentModification { .. }));
    }

    #[test]
    fn test_single_in_progress_per_worker_index() {
        let conn = setup();
        let base = Utc.timestamp_millis_opt(0).unwrap();
        for (id, node, seq) in [("A1", "N1", 1), ("A2", "N2", 2)] {
            let mut a = assignment(id, node, 0, false, seq);
            a.status = AssignmentStatus::InProgress;
            a.actual_start = Some(base);
            let result = AssignmentRepository::insert_tx(&conn, &a);
            if seq == 1 {
                result.unwrap();
            } else {
                assert!(matches!(result, Err(RepositoryError::UniqueConstraintViolation(_))));
            }
        }
    }

    #[test]
    fn test_tail_and_sequence() {
        let conn = setup();
        assert_eq!(AssignmentRepository::next_sequence_number_tx(&conn).unwrap(), 1);
        assert!(AssignmentRepository::worker_tail_tx(&conn, "W1").unwrap().is_none());

        AssignmentRepository::insert_tx(&conn, &assignment("A1", "N1", 0, false, 1)).unwrap();
        AssignmentRepository::insert_tx(&conn, &assignment("A2", "N2", 20, false, 2)).unwrap();

        let tail = AssignmentRepository::worker_tail_tx(&conn, "W1").unwrap().unwrap();
        assert_eq!(tail, Utc.timestamp_millis_opt(0).unwrap() + Duration::minutes(30));
        assert_eq!(AssignmentRepository::next_sequence_number_tx(&conn).unwrap(), 3);
    }
}

// ==========================================
// 生产执行核心 - 占用锁数据仓储
// ==========================================
// 工人/子工位占用以主键互斥: 同一工人或子工位至多一个占用者
// 冲突表现为 UniqueConstraintViolation,由引擎映射为 AssignmentConflict
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;

use crate::repository::error::RepositoryResult;
use crate::repository::mapping::to_millis;

/// 释放结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleasedOccupancy {
    pub worker_released: bool,
    pub substation_released: bool,
}

pub struct OccupancyRepository;

impl OccupancyRepository {
    pub fn acquire_worker_tx(
        tx: &Connection,
        worker_id: &str,
        assignment_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        tx.execute(
            "INSERT INTO worker_occupancy (worker_id, assignment_id, occupied_at) VALUES (?1, ?2, ?3)",
            params![worker_id, assignment_id, to_millis(now)],
        )?;
        Ok(())
    }

    pub fn acquire_substation_tx(
        tx: &Connection,
        substation_id: &str,
        assignment_id: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        tx.execute(
            "INSERT INTO substation_occupancy (substation_id, assignment_id, occupied_at) VALUES (?1, ?2, ?3)",
            params![substation_id, assignment_id, to_millis(now)],
        )?;
        Ok(())
    }

    /// 释放任务持有的全部占用
    pub fn release_for_assignment_tx(
        tx: &Connection,
        assignment_id: &str,
    ) -> RepositoryResult<ReleasedOccupancy> {
        let workers = tx.execute(
            "DELETE FROM worker_occupancy WHERE assignment_id = ?1",
            params![assignment_id],
        )?;
        let substations = tx.execute(
            "DELETE FROM substation_occupancy WHERE assignment_id = ?1",
            params![assignment_id],
        )?;
        Ok(ReleasedOccupancy {
            worker_released: workers > 0,
            substation_released: substations > 0,
        })
    }

    /// 子工位当前占用者
    pub fn substation_holder_tx(tx: &Connection, substation_id: &str) -> RepositoryResult<Option<String>> {
        Ok(tx
            .query_row(
                "SELECT assignment_id FROM substation_occupancy WHERE substation_id = ?1",
                params![substation_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// 工人当前占用者
    pub fn worker_holder_tx(tx: &Connection, worker_id: &str) -> RepositoryResult<Option<String>> {
        Ok(tx
            .query_row(
                "SELECT assignment_id FROM worker_occupancy WHERE worker_id = ?1",
                params![worker_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn occupied_substations_tx(tx: &Connection) -> RepositoryResult<BTreeSet<String>> {
        let mut stmt = tx.prepare("SELECT substation_id FROM substation_occupancy")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::repository::error::RepositoryError;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO worker (worker_id, name) VALUES ('W1', 'w1');
            INSERT INTO station (station_id, name) VALUES ('S1', 's1');
            INSERT INTO substation (substation_id, station_id) VALUES ('SS1', 'S1');
            INSERT INTO work_order (work_order_code, production_state, created_at)
                VALUES ('WO-1', 'in_production', 0);
            INSERT INTO production_plan (plan_id, work_order_code, status, quantity, created_at)
                VALUES ('P1', 'WO-1', 'production', 1, 0);
            INSERT INTO worker_assignment (assignment_id, work_order_code, plan_id, node_id, worker_id,
                nominal_time, effective_time, expected_start, planned_end, status, sequence_number,
                created_at, updated_at)
            VALUES ('A1', 'WO-1', 'P1', 'N1', 'W1', 1, 1, 0, 60000, 'ready', 1, 0, 0),
                   ('A2', 'WO-1', 'P1', 'N2', 'W1', 1, 1, 0, 60000, 'queued', 2, 0, 0);
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_substation_single_occupant() {
        let conn = setup();
        let now = Utc::now();
        OccupancyRepository::acquire_substation_tx(&conn, "SS1", "A1", now).unwrap();
        let err = OccupancyRepository::acquire_substation_tx(&conn, "SS1", "A2", now).unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));
        assert_eq!(
            OccupancyRepository::substation_holder_tx(&conn, "SS1").unwrap(),
            Some("A1".to_string())
        );
    }

    #[test]
    fn test_release_reports_what_was_held() {
        let conn = setup();
        let now = Utc::now();
        OccupancyRepository::acquire_worker_tx(&conn, "W1", "A1", now).unwrap();

        let released = OccupancyRepository::release_for_assignment_tx(&conn, "A1").unwrap();
        assert!(released.worker_released);
        assert!(!released.substation_released);
        assert!(OccupancyRepository::worker_holder_tx(&conn, "W1").unwrap().is_none());
    }
}

// ==========================================
// 生产执行核心 - 库存与物料预留数据仓储
// ==========================================
// 对齐: material_stock / material_reservation 表
// 约束: 库存行缺失时,涉及非零数量的写入返回 NotFound（事务随之回滚）
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::material::MaterialReservation;
use crate::domain::types::ReservationStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::mapping::{get_enum, get_ts, placeholders, to_millis};

/// 浮点比较容差
pub const QTY_EPSILON: f64 = 1e-9;

// ==========================================
// StockRepository - 库存仓储
// ==========================================
#[derive(Clone)]
pub struct StockRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StockRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入/覆盖库存（库存维护属于外部系统,这里供导入与测试使用）
    pub fn upsert_stock(&self, material_code: &str, available_qty: f64, now: DateTime<Utc>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO material_stock (material_code, available_qty, reserved_qty, updated_at)
            VALUES (?1, ?2, 0, ?3)
            ON CONFLICT(material_code) DO UPDATE SET available_qty = ?2, updated_at = ?3
            "#,
            params![material_code, available_qty, to_millis(now)],
        )?;
        Ok(())
    }

    /// 查询单个物料可用量（无库存行返回 None）
    pub fn available_quantity(&self, material_code: &str) -> RepositoryResult<Option<f64>> {
        let conn = self.get_conn()?;
        Self::available_tx(&conn, material_code)
    }

    /// 批量查询可用量
    pub fn available_quantities(&self, material_codes: &[String]) -> RepositoryResult<HashMap<String, f64>> {
        if material_codes.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT material_code, available_qty FROM material_stock WHERE material_code IN ({})",
            placeholders(material_codes.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(material_codes.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }

    pub fn reservations_for_plan(&self, plan_id: &str) -> RepositoryResult<Vec<MaterialReservation>> {
        let conn = self.get_conn()?;
        Self::reservations_for_plan_tx(&conn, plan_id)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn available_tx(tx: &Connection, material_code: &str) -> RepositoryResult<Option<f64>> {
        Ok(tx
            .query_row(
                "SELECT available_qty FROM material_stock WHERE material_code = ?1",
                params![material_code],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// 为方案预留物料: reserved = min(required, max(available, 0))
    ///
    /// 返回实际预留数量; 无库存行时预留 0 并仍记录预留行。
    pub fn reserve_tx(
        tx: &Connection,
        plan_id: &str,
        material_code: &str,
        required: f64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<f64> {
        let available = Self::available_tx(tx, material_code)?.unwrap_or(0.0);
        let reserved = required.min(available.max(0.0)).max(0.0);

        if reserved > QTY_EPSILON {
            adjust_stock_tx(tx, material_code, -reserved, reserved, now)?;
        }

        tx.execute(
            r#"
            INSERT INTO material_reservation (
                reservation_id, plan_id, material_code, reserved_qty, consumed_qty,
                released_qty, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, 0, 'reserved', ?5, ?5)
            "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                plan_id,
                material_code,
                reserved,
                to_millis(now),
            ],
        )?;
        Ok(reserved)
    }

    pub fn reservations_for_plan_tx(tx: &Connection, plan_id: &str) -> RepositoryResult<Vec<MaterialReservation>> {
        let mut stmt = tx.prepare(
            r#"
            SELECT reservation_id, plan_id, material_code, reserved_qty, consumed_qty,
                   released_qty, status, created_at, updated_at
            FROM material_reservation
            WHERE plan_id = ?1
            ORDER BY material_code
            "#,
        )?;
        let rows = stmt
            .query_map(params![plan_id], map_reservation_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// 结清一条预留: released 退回可用库存, consumed 计入消耗
    pub fn settle_reservation_tx(
        tx: &Connection,
        reservation: &MaterialReservation,
        consumed: f64,
        released: f64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<ReservationStatus> {
        let status = settled_status(reservation.reserved_qty, consumed, released);

        let rows = tx.execute(
            r#"
            UPDATE material_reservation
            SET consumed_qty = ?1, released_qty = ?2, status = ?3, updated_at = ?4
            WHERE reservation_id = ?5 AND status = 'reserved'
            "#,
            params![
                consumed,
                released,
                status.as_db_str(),
                to_millis(now),
                reservation.reservation_id,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::ConcurrentModification {
                entity: "MaterialReservation".to_string(),
                id: reservation.reservation_id.clone(),
                expected: ReservationStatus::Reserved.as_db_str().to_string(),
            });
        }

        if reservation.reserved_qty > QTY_EPSILON {
            adjust_stock_tx(tx, &reservation.material_code, released, -reservation.reserved_qty, now)?;
        }
        Ok(status)
    }
}

/// 调整库存行: available += delta_available, reserved += delta_reserved
fn adjust_stock_tx(
    tx: &Connection,
    material_code: &str,
    delta_available: f64,
    delta_reserved: f64,
    now: DateTime<Utc>,
) -> RepositoryResult<()> {
    let rows = tx.execute(
        r#"
        UPDATE material_stock
        SET available_qty = available_qty + ?1,
            reserved_qty = reserved_qty + ?2,
            updated_at = ?3
        WHERE material_code = ?4
        "#,
        params![delta_available, delta_reserved, to_millis(now), material_code],
    )?;
    if rows == 0 {
        return Err(RepositoryError::not_found("MaterialStock", material_code));
    }
    Ok(())
}

fn settled_status(reserved: f64, consumed: f64, released: f64) -> ReservationStatus {
    if reserved <= QTY_EPSILON || released + QTY_EPSILON >= reserved {
        if consumed > QTY_EPSILON {
            ReservationStatus::PartiallyReleased
        } else {
            ReservationStatus::Released
        }
    } else if released <= QTY_EPSILON {
        ReservationStatus::Consumed
    } else {
        ReservationStatus::PartiallyReleased
    }
}

fn map_reservation_row(row: &Row) -> rusqlite::Result<MaterialReservation> {
    Ok(MaterialReservation {
        reservation_id: row.get(0)?,
        plan_id: row.get(1)?,
        material_code: row.get(2)?,
        reserved_qty: row.get(3)?,
        consumed_qty: row.get(4)?,
        released_qty: row.get(5)?,
        status: get_enum(row, 6)?,
        created_at: get_ts(row, 7)?,
        updated_at: get_ts(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup() -> (Arc<Mutex<Connection>>, StockRepository) {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO work_order (work_order_code, production_state, created_at)
                VALUES ('WO-1', 'in_production', 0);
            INSERT INTO production_plan (plan_id, work_order_code, status, quantity, created_at)
                VALUES ('P1', 'WO-1', 'production', 10, 0);
            "#,
        )
        .unwrap();
        let conn = Arc::new(Mutex::new(conn));
        (conn.clone(), StockRepository::new(conn))
    }

    #[test]
    fn test_reserve_caps_at_available() {
        let (conn, repo) = setup();
        let now = Utc::now();
        repo.upsert_stock("M-1", 4.0, now).unwrap();

        let reserved = {
            let guard = conn.lock().unwrap();
            StockRepository::reserve_tx(&guard, "P1", "M-1", 10.0, now).unwrap()
        };
        assert_eq!(reserved, 4.0);
        assert_eq!(repo.available_quantity("M-1").unwrap(), Some(0.0));

        let reservations = repo.reservations_for_plan("P1").unwrap();
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].reserved_qty, 4.0);
    }

    #[test]
    fn test_reserve_without_stock_row_records_zero() {
        let (conn, repo) = setup();
        let guard = conn.lock().unwrap();
        let reserved = StockRepository::reserve_tx(&guard, "P1", "M-404", 3.0, Utc::now()).unwrap();
        drop(guard);
        assert_eq!(reserved, 0.0);
        assert_eq!(repo.reservations_for_plan("P1").unwrap()[0].reserved_qty, 0.0);
    }

    #[test]
    fn test_settle_returns_released_quantity() {
        let (conn, repo) = setup();
        let now = Utc::now();
        repo.upsert_stock("M-1", 10.0, now).unwrap();

        let guard = conn.lock().unwrap();
        StockRepository::reserve_tx(&guard, "P1", "M-1", 8.0, now).unwrap();
        let reservation = StockRepository::reservations_for_plan_tx(&guard, "P1").unwrap().remove(0);
        let status = StockRepository::settle_reservation_tx(&guard, &reservation, 2.0, 6.0, now).unwrap();
        drop(guard);

        assert_eq!(status, ReservationStatus::PartiallyReleased);
        assert_eq!(repo.available_quantity("M-1").unwrap(), Some(8.0));
    }

    #[test]
    fn test_settled_status_classification() {
        assert_eq!(settled_status(5.0, 5.0, 0.0), ReservationStatus::Consumed);
        assert_eq!(settled_status(5.0, 0.0, 5.0), ReservationStatus::Released);
        assert_eq!(settled_status(5.0, 2.0, 3.0), ReservationStatus::PartiallyReleased);
        assert_eq!(settled_status(0.0, 0.0, 0.0), ReservationStatus::Released);
    }
}

// ==========================================
// 生产执行核心 - 取消对账
// ==========================================
// 职责: 按实际产出/不良数量结清方案的物料预留
// unproduced_ratio = (计划产出 − 实际产出 − 不良) / 计划产出
// released = reserved × unproduced_ratio, consumed = reserved − released
// 约束: 在调用方的事务内执行,任一预留结清失败则整体回滚
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::domain::material::{CancellationProgress, MaterialAdjustment, MaterialAdjustments};
use crate::domain::types::ReservationStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::stock_repo::{StockRepository, QTY_EPSILON};

#[derive(Debug, Default, Clone, Copy)]
pub struct CancellationReconciler;

impl CancellationReconciler {
    pub fn new() -> Self {
        Self
    }

    /// 进度参数的基础校验（不依赖方案,在事务之前调用）
    pub fn validate_progress(&self, progress: &CancellationProgress) -> EngineResult<()> {
        let CancellationProgress {
            actual_output_quantity,
            defect_quantity,
        } = *progress;

        if !actual_output_quantity.is_finite() || actual_output_quantity < 0.0 {
            return Err(EngineError::ValidationError(format!(
                "实际产出数量必须为非负数: {}",
                actual_output_quantity
            )));
        }
        if !defect_quantity.is_finite() || defect_quantity < 0.0 {
            return Err(EngineError::ValidationError(format!(
                "不良数量必须为非负数: {}",
                defect_quantity
            )));
        }
        Ok(())
    }

    /// 未产出比例（需方案的计划产出）
    pub fn unproduced_ratio(&self, planned_output: f64, progress: &CancellationProgress) -> EngineResult<f64> {
        self.validate_progress(progress)?;
        if !planned_output.is_finite() || planned_output <= 0.0 {
            return Err(EngineError::ValidationError(format!(
                "方案计划产出必须大于0: {}",
                planned_output
            )));
        }

        let accounted = progress.actual_output_quantity + progress.defect_quantity;
        if accounted > planned_output + QTY_EPSILON {
            return Err(EngineError::ValidationError(format!(
                "实际产出({}) + 不良({}) 超出计划产出({})",
                progress.actual_output_quantity, progress.defect_quantity, planned_output
            )));
        }

        Ok(((planned_output - accounted) / planned_output).clamp(0.0, 1.0))
    }

    /// 结清方案全部未结预留,返回逐物料调整明细
    pub fn reconcile_tx(
        &self,
        tx: &Connection,
        plan_id: &str,
        unproduced_ratio: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<MaterialAdjustments> {
        let reservations = StockRepository::reservations_for_plan_tx(tx, plan_id)?;
        let mut adjustments = MaterialAdjustments {
            unproduced_ratio,
            input_materials: Vec::with_capacity(reservations.len()),
        };

        for reservation in reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Reserved)
        {
            let (consumed, released) = split_reservation(reservation.reserved_qty, unproduced_ratio);
            let status = StockRepository::settle_reservation_tx(tx, reservation, consumed, released, now)?;
            debug!(
                plan_id = %plan_id,
                material_code = %reservation.material_code,
                reserved = reservation.reserved_qty,
                consumed,
                released,
                status = %status,
                "预留结清"
            );
            adjustments.input_materials.push(MaterialAdjustment {
                material_code: reservation.material_code.clone(),
                reserved: reservation.reserved_qty,
                consumed,
                released,
            });
        }
        Ok(adjustments)
    }
}

/// 按未产出比例拆分预留: (consumed, released)
pub fn split_reservation(reserved: f64, unproduced_ratio: f64) -> (f64, f64) {
    if reserved <= QTY_EPSILON {
        return (0.0, 0.0);
    }
    let released = reserved * unproduced_ratio.clamp(0.0, 1.0);
    (reserved - released, released)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(actual: f64, defect: f64) -> CancellationProgress {
        CancellationProgress {
            actual_output_quantity: actual,
            defect_quantity: defect,
        }
    }

    #[test]
    fn test_ratio_bounds() {
        let r = CancellationReconciler::new();
        assert_eq!(r.unproduced_ratio(10.0, &progress(10.0, 0.0)).unwrap(), 0.0);
        assert_eq!(r.unproduced_ratio(10.0, &progress(6.0, 4.0)).unwrap(), 0.0);
        assert_eq!(r.unproduced_ratio(10.0, &progress(0.0, 0.0)).unwrap(), 1.0);
        assert!((r.unproduced_ratio(10.0, &progress(3.0, 1.0)).unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_invalid_progress() {
        let r = CancellationReconciler::new();
        assert!(matches!(
            r.validate_progress(&progress(-1.0, 0.0)),
            Err(EngineError::ValidationError(_))
        ));
        assert!(matches!(
            r.validate_progress(&progress(1.0, f64::NAN)),
            Err(EngineError::ValidationError(_))
        ));
        assert!(matches!(
            r.unproduced_ratio(10.0, &progress(8.0, 3.0)),
            Err(EngineError::ValidationError(_))
        ));
        assert!(matches!(
            r.unproduced_ratio(0.0, &progress(0.0, 0.0)),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_split_reservation() {
        assert_eq!(split_reservation(20.0, 0.0), (20.0, 0.0));
        assert_eq!(split_reservation(20.0, 1.0), (0.0, 20.0));
        let (consumed, released) = split_reservation(20.0, 0.25);
        assert!((consumed - 15.0).abs() < 1e-12);
        assert!((released - 5.0).abs() < 1e-12);
        assert_eq!(split_reservation(0.0, 0.5), (0.0, 0.0));
    }
}

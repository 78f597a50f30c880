// ==========================================
// 生产执行核心 - 物料领域模型
// ==========================================
// 职责: 物料需求汇总、缺料判定、预留与取消对账的数据结构
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::ReservationStatus;

// ==========================================
// MaterialRequirement - 汇总后的物料需求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRequirement {
    pub material_code: String,
    pub required_quantity: f64,
}

// ==========================================
// MaterialShortage - 缺料明细
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterialShortage {
    pub material_code: String,
    pub required: f64,
    pub available: f64,
    pub shortage: f64,
    pub critical: bool, // shortage > 临界比例 × required
}

// ==========================================
// MaterialCheckResult - 物料齐套检查结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterialCheckResult {
    pub all_available: bool,
    pub shortages: Vec<MaterialShortage>,
    pub has_critical_shortages: bool,
    /// 库存查询失败时的降级原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MaterialCheckResult {
    /// 无物料需求
    pub fn nothing_required() -> Self {
        Self {
            all_available: true,
            shortages: vec![],
            has_critical_shortages: false,
            error: None,
        }
    }

    /// 库存查询不可用时的降级结果
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            all_available: false,
            shortages: vec![],
            has_critical_shortages: false,
            error: Some(reason.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

// ==========================================
// MaterialReservation - 方案物料预留
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterialReservation {
    pub reservation_id: String,
    pub plan_id: String,
    pub material_code: String,
    pub reserved_qty: f64,
    pub consumed_qty: f64,
    pub released_qty: f64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// CancellationProgress - 取消时的实际进度
// ==========================================
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CancellationProgress {
    pub actual_output_quantity: f64,
    pub defect_quantity: f64,
}

// ==========================================
// MaterialAdjustment - 单个物料的对账结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterialAdjustment {
    pub material_code: String,
    pub reserved: f64,
    pub consumed: f64,
    pub released: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaterialAdjustments {
    pub unproduced_ratio: f64,
    pub input_materials: Vec<MaterialAdjustment>,
}

impl MaterialAdjustments {
    /// 释放回可用库存的总量
    pub fn total_released(&self) -> f64 {
        self.input_materials.iter().map(|m| m.released).sum()
    }
}

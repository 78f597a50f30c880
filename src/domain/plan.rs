// ==========================================
// 生产执行核心 - 生产方案领域模型
// ==========================================
// 方案 = 工序节点组成的有向无环图 (DAG)
// 红线: 方案节点图在进入 production 状态前由外部定稿,本核心只读
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::types::{LaunchStatus, PlanStatus, SchedulingMode};

// ==========================================
// ProductionPlan - 生产方案
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionPlan {
    pub plan_id: String,                    // 方案ID
    pub work_order_code: String,            // 所属工单
    pub status: PlanStatus,                 // 方案状态
    pub launch_status: LaunchStatus,        // 下达状态
    pub launched_at: Option<DateTime<Utc>>, // 下达时间
    pub quantity: f64,                      // 计划产出数量
    pub scheduling_mode: SchedulingMode,    // 排程模式
    pub nodes: Vec<OperationNode>,          // 工序节点
    pub summary: PlanSummary,               // 汇总字段（排程后重算）
    pub created_at: DateTime<Utc>,          // 创建时间
}

impl ProductionPlan {
    /// 按 node_id 查找节点
    pub fn node(&self, node_id: &str) -> Option<&OperationNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// 是否可下达（仅 production 状态的方案）
    pub fn is_launchable_status(&self) -> bool {
        self.status == PlanStatus::Production
    }
}

// ==========================================
// OperationNode - 工序节点
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationNode {
    pub node_id: String,                    // 节点ID
    pub operation_id: String,               // 工序定义引用
    pub output_code: Option<String>,        // 产出物编码
    pub output_quantity: f64,               // 产出数量
    pub material_inputs: Vec<MaterialInput>, // 投入物料
    pub predecessors: Vec<String>,          // 前置节点
}

// ==========================================
// MaterialInput - 节点投入物料
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterialInput {
    pub material_code: String,
    pub required_quantity: f64,
}

/// 物料投入项的问题分类
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialInputIssue {
    /// 编码缺失或数量非数值（数据损坏）
    Malformed(String),
    /// 数量 <= 0（汇总时丢弃即可）
    NonPositive,
}

impl MaterialInput {
    pub fn new(material_code: impl Into<String>, required_quantity: f64) -> Self {
        Self {
            material_code: material_code.into(),
            required_quantity,
        }
    }

    /// 检查投入项是否可用于汇总
    pub fn issue(&self) -> Option<MaterialInputIssue> {
        if self.material_code.trim().is_empty() {
            return Some(MaterialInputIssue::Malformed("物料编码为空".to_string()));
        }
        if !self.required_quantity.is_finite() {
            return Some(MaterialInputIssue::Malformed(format!(
                "物料{}需求数量无效",
                self.material_code
            )));
        }
        if self.required_quantity <= 0.0 {
            return Some(MaterialInputIssue::NonPositive);
        }
        None
    }

    /// 从宽松的 JSON 表示解析（兼容 camelCase / snake_case,数量允许为字符串）
    ///
    /// 解析永不失败: 缺失字段落为空编码或 NaN,交由 `issue()` 判定。
    pub fn from_json_lenient(value: &JsonValue) -> Self {
        let code = value
            .get("material_code")
            .or_else(|| value.get("materialCode"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();

        let quantity_value = value
            .get("required_quantity")
            .or_else(|| value.get("requiredQuantity"));
        let quantity = match quantity_value {
            Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
            Some(JsonValue::String(s)) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            _ => f64::NAN,
        };

        Self {
            material_code: code,
            required_quantity: quantity,
        }
    }
}

// ==========================================
// PlanSummary - 方案汇总（排程后重算）
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_nodes: Option<i64>,
    pub assigned_count: Option<i64>,
    pub estimated_duration: Option<f64>, // 分钟
    pub parallel_paths: Option<i64>,
    pub material_summary: Option<JsonValue>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ==========================================
// 生产执行核心 - 主数据只读视图
// ==========================================
// 主数据（技能/工位/工序/工人花名册）的增删改不属于本核心,
// 这里只定义排程所需的只读投影
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::types::WorkerStatus;

// ==========================================
// Worker - 工人
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub worker_id: String,
    pub name: String,
    pub status: WorkerStatus,
    pub on_leave: bool,
    pub efficiency: f64,          // 效率系数,1.0 为标准
    pub skills: BTreeSet<String>, // 技能编码
}

impl Worker {
    /// 技能是否覆盖要求
    pub fn has_skills(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.skills)
    }

    /// 缺少的技能
    pub fn missing_skills(&self, required: &BTreeSet<String>) -> Vec<String> {
        required.difference(&self.skills).cloned().collect()
    }
}

// ==========================================
// OperationDefinition - 工序定义
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationDefinition {
    pub operation_id: String,
    pub name: String,
    pub nominal_time: f64, // 标准工时（分钟）
    pub required_skills: BTreeSet<String>,
}

// ==========================================
// Substation - 子工位（含所属工位能力）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Substation {
    pub substation_id: String,
    pub station_id: String,
    pub active: bool,
    pub operations: BTreeSet<String>, // 所属工位可执行的工序
}

impl Substation {
    pub fn supports(&self, operation_id: &str) -> bool {
        self.active && self.operations.contains(operation_id)
    }
}

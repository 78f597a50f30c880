// ==========================================
// 生产执行核心 - 引擎层错误类型
// ==========================================
// 错误分类:
// - InvalidStateTransition: 前置状态不符,未做任何写入
// - NoEligibleWorkers: 下达时零节点可分配,整体回滚
// - AssignmentConflict: 节点级分配失败 / 占用冲突
// - ValidationError: 输入非法,在任何副作用之前拒绝
// ==========================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::types::WorkerStatus;
use crate::repository::error::RepositoryError;

/// 节点级冲突明细
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConflict {
    pub node_id: String,
    pub reason: String,
}

impl NodeConflict {
    pub fn new(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }
}

/// NoEligibleWorkers 的诊断样本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSample {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub on_leave: bool,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("非法状态迁移: {entity}({id}) 当前状态={from}, 不允许执行{operation}")]
    InvalidStateTransition {
        entity: String,
        id: String,
        from: String,
        operation: String,
    },

    #[error("无可分配工人: 方案{plan_id}没有任何节点可以分配")]
    NoEligibleWorkers {
        plan_id: String,
        worker_sample: Vec<WorkerSample>,
        conflicts: Vec<NodeConflict>,
    },

    #[error("任务分配冲突: {} 个节点", .conflicts.len())]
    AssignmentConflict { conflicts: Vec<NodeConflict> },

    #[error("参数校验失败: {0}")]
    ValidationError(String),

    #[error("记录未找到: {entity}(id={id})")]
    NotFound { entity: String, id: String },

    #[error("优化排序策略输出非法: {0}")]
    HeuristicViolation(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl EngineError {
    pub fn invalid_transition(entity: &str, id: &str, from: impl ToString, operation: &str) -> Self {
        EngineError::InvalidStateTransition {
            entity: entity.to_string(),
            id: id.to_string(),
            from: from.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::AssignmentConflict {
            conflicts: vec![NodeConflict::new(node_id, reason)],
        }
    }

    /// 机器可读错误码
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            EngineError::NoEligibleWorkers { .. } => "NO_ELIGIBLE_WORKERS",
            EngineError::AssignmentConflict { .. } => "ASSIGNMENT_CONFLICT",
            EngineError::ValidationError(_) => "VALIDATION_ERROR",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::HeuristicViolation(_) => "INTERNAL_ERROR",
            EngineError::Repository(RepositoryError::NotFound { .. }) => "NOT_FOUND",
            EngineError::Repository(_) => "DATABASE_ERROR",
        }
    }
}

/// 任务表/占用表上的并发冲突统一表现为 AssignmentConflict
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::ConcurrentModification { entity, id, expected }
                if entity == "WorkerAssignment" =>
            {
                EngineError::conflict(id, format!("任务状态已被并发修改（期望 {}）", expected))
            }
            RepositoryError::UniqueConstraintViolation(msg) if is_assignment_guard(&msg) => {
                EngineError::conflict("-", format!("占用冲突: {}", msg))
            }
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Repository(other),
        }
    }
}

fn is_assignment_guard(msg: &str) -> bool {
    msg.contains("worker_assignment") || msg.contains("worker_occupancy") || msg.contains("substation_occupancy")
}

pub type EngineResult<T> = Result<T, EngineError>;

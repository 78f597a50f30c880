// ==========================================
// 生产执行核心 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型,把引擎/仓储错误转换为带错误码的用户可读错误
// 每个错误 = 机器可读 code + 人类可读 message (+ 可选 details)
// ==========================================

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use crate::engine::error::{EngineError, NodeConflict, WorkerSample};
use crate::repository::error::RepositoryError;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 状态机错误
    // ==========================================
    #[error("非法状态迁移: {entity}({id}) 当前状态={from}, 不允许执行{operation}")]
    InvalidStateTransition {
        entity: String,
        id: String,
        from: String,
        operation: String,
    },

    // ==========================================
    // 排程错误
    // ==========================================
    #[error("无可分配工人: 方案{plan_id}没有任何节点可以分配")]
    NoEligibleWorkers {
        plan_id: String,
        worker_sample: Vec<WorkerSample>,
        conflicts: Vec<NodeConflict>,
    },

    #[error("任务分配冲突: {} 个节点", .conflicts.len())]
    AssignmentConflict { conflicts: Vec<NodeConflict> },

    #[error("物料检查不可用: {0}")]
    MaterialCheckUnavailable(String),

    // ==========================================
    // 输入错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 序列化给调用方的错误载荷
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    /// 本地化的错误标题
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl ApiError {
    /// 机器可读错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            ApiError::NoEligibleWorkers { .. } => "NO_ELIGIBLE_WORKERS",
            ApiError::AssignmentConflict { .. } => "ASSIGNMENT_CONFLICT",
            ApiError::MaterialCheckUnavailable(_) => "MATERIAL_CHECK_UNAVAILABLE",
            ApiError::InvalidInput(_) | ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::DatabaseError(_)
            | ApiError::DatabaseConnectionError(_)
            | ApiError::DatabaseTransactionError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }

    pub fn details(&self) -> Option<JsonValue> {
        match self {
            ApiError::InvalidStateTransition {
                entity,
                id,
                from,
                operation,
            } => Some(json!({ "entity": entity, "id": id, "from": from, "operation": operation })),
            ApiError::NoEligibleWorkers {
                plan_id,
                worker_sample,
                conflicts,
            } => Some(json!({ "planId": plan_id, "workerSample": worker_sample, "conflicts": conflicts })),
            ApiError::AssignmentConflict { conflicts } => Some(json!({ "conflicts": conflicts })),
            _ => None,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let code = self.code();
        ErrorPayload {
            code,
            message: self.to_string(),
            title: crate::i18n::t(&format!("error.{}", code.to_lowercase())),
            details: self.details(),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidStateTransition {
                entity,
                id,
                from,
                operation,
            } => ApiError::InvalidStateTransition {
                entity,
                id,
                from,
                operation,
            },
            EngineError::NoEligibleWorkers {
                plan_id,
                worker_sample,
                conflicts,
            } => ApiError::NoEligibleWorkers {
                plan_id,
                worker_sample,
                conflicts,
            },
            EngineError::AssignmentConflict { conflicts } => ApiError::AssignmentConflict { conflicts },
            EngineError::ValidationError(msg) => ApiError::ValidationError(msg),
            EngineError::NotFound { entity, id } => ApiError::NotFound(format!("{}(id={})不存在", entity, id)),
            EngineError::HeuristicViolation(msg) => ApiError::InternalError(format!("优化排序策略输出非法: {}", msg)),
            EngineError::Repository(err) => err.into(),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::ConcurrentModification { entity, id, expected } => {
                ApiError::DatabaseTransactionError(format!(
                    "{}(id={})已被并发修改（期望状态 {}）",
                    entity, id, expected
                ))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => ApiError::DatabaseTransactionError(msg),
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::DatabaseError(format!("外键约束违反: {}", msg))
            }
            RepositoryError::CheckConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("CHECK 约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::DatabaseError(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

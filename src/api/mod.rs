// ==========================================
// 生产执行核心 - API 层
// ==========================================
// 职责: 面向调用方的业务接口（传输框架由外部决定）
// ==========================================

pub mod error;
pub mod production_api;
pub mod validator;
pub mod worker_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult, ErrorPayload};
pub use production_api::{ActionLogView, CancelRequest, LaunchRequest, ProductionApi};
pub use worker_api::{AssignmentView, CompleteTaskResponse, WorkerApi};

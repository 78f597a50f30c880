// ==========================================
// 生产执行核心 - 核心库
// ==========================================
// 职责: 工单方案下达 → 工人任务 → 暂停/恢复/加急 → 完工/取消对账
// 技术栈: Rust + SQLite
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 执行规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/表结构）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AssignmentStatus, LaunchStatus, PlanStatus, ProductionState, ReservationStatus, SchedulingMode,
    WorkerStatus,
};

// 领域实体
pub use domain::{
    ActionLog, ActionType, MaterialInput, OperationNode, ProductionPlan, WorkOrder, WorkerAssignment,
};

// 引擎
pub use engine::{
    AssignmentScheduler, CancellationReconciler, EngineError, LaunchOrchestrator,
    MaterialAvailabilityChecker, PauseResumeAccountant, WorkOrderStateMachine,
};

// API
pub use api::{ApiError, ProductionApi, WorkerApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "生产执行核心";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

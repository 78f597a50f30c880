// ==========================================
// 生产执行核心 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、值对象
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod assignment;
pub mod master_data;
pub mod material;
pub mod plan;
pub mod types;
pub mod work_order;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use assignment::{minutes_to_duration, WorkerAssignment};
pub use master_data::{OperationDefinition, Substation, Worker};
pub use material::{
    CancellationProgress, MaterialAdjustment, MaterialAdjustments, MaterialCheckResult,
    MaterialRequirement, MaterialReservation, MaterialShortage,
};
pub use plan::{MaterialInput, MaterialInputIssue, OperationNode, PlanSummary, ProductionPlan};
pub use types::{
    AssignmentStatus, LaunchStatus, PlanStatus, ProductionState, ReservationStatus,
    SchedulingMode, UnknownVariant, WorkerStatus,
};
pub use work_order::WorkOrder;

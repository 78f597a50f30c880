// ==========================================
// 生产执行核心 - 引擎层
// ==========================================
// 职责: 实现执行规则（状态机/排程/暂停记账/齐套检查/取消对账）
// 红线: Engine 不拼 SQL, 所有拒绝必须输出 reason
// ==========================================

pub mod cancellation;
pub mod clock;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod material_check;
pub mod orchestrator;
pub mod pause_resume;
pub mod plan_graph;
pub mod scheduler;
pub mod state_machine;
pub mod strategy;

// 重导出核心引擎
pub use cancellation::CancellationReconciler;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, EngineResult, NodeConflict, WorkerSample};
pub use events::{
    BroadcastEventPublisher, ExecutionEvent, ExecutionEventPublisher, ExecutionEventType,
    NoOpEventPublisher, OptionalEventPublisher,
};
pub use material_check::{MaterialAvailabilityChecker, StockLookup};
pub use orchestrator::{LaunchOrchestrator, LaunchSummary, LaunchWarning};
pub use pause_resume::{EffectiveDuration, PauseResumeAccountant};
pub use plan_graph::PlanGraph;
pub use scheduler::{AssignmentScheduler, PlanMetrics, SchedulingRound};
pub use state_machine::{
    CancellationOutcome, CompleteOutcome, CompleteTaskOutcome, LaunchOutcome, PauseOutcome,
    ResumeOutcome, StartTaskOutcome, UrgencyAck, WorkOrderStateMachine, WorkOrderStatusView,
};
pub use strategy::{
    EarliestReadyHeuristic, HeuristicCandidate, OptimizationHeuristic,
    ShortestProcessingTimeHeuristic,
};

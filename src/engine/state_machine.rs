// ==========================================
// 生产执行核心 - 工单状态机
// ==========================================
// 状态: WaitingApproval → InProduction ⇄ Paused
//       任一非终态 → Completed / Cancelled（终态）
// 红线:
// 1. 每个操作 = 一个 IMMEDIATE 事务,前置状态检查先于任何写入
// 2. 状态写入为条件更新（比较期望旧状态）
// 3. 事件只在提交之后发布
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::config::{ConfigManager, ExecutionConfig};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::assignment::WorkerAssignment;
use crate::domain::material::{CancellationProgress, MaterialAdjustments};
use crate::domain::plan::{PlanSummary, ProductionPlan};
use crate::domain::types::{AssignmentStatus, LaunchStatus, ProductionState, SchedulingMode};
use crate::domain::work_order::WorkOrder;
use crate::engine::cancellation::CancellationReconciler;
use crate::engine::clock::{Clock, SystemClock};
use crate::engine::error::{EngineError, EngineResult, NodeConflict};
use crate::engine::events::{ExecutionEvent, ExecutionEventType, OptionalEventPublisher};
use crate::engine::material_check::plan_requirements;
use crate::engine::pause_resume::{EffectiveDuration, PauseResumeAccountant};
use crate::engine::plan_graph::PlanGraph;
use crate::engine::scheduler::{compute_metrics, worker_sample, AssignmentScheduler, PlanMetrics};
use crate::engine::strategy::{heuristic_from_name, OptimizationHeuristic};
use crate::repository::{
    with_immediate_transaction, ActionLogRepository, AssignmentRepository, MasterDataRepository,
    OccupancyRepository, PlanRepository, RepositoryError, StockRepository, WorkOrderRepository,
};

/// 状态迁移表
pub fn is_allowed_transition(from: ProductionState, to: ProductionState) -> bool {
    use ProductionState::*;
    match (from, to) {
        (WaitingApproval, InProduction) | (InProduction, Paused) | (Paused, InProduction) => true,
        (from, Completed | Cancelled) => !from.is_terminal(),
        _ => false,
    }
}

// ==========================================
// 操作结果
// ==========================================

/// 下达物料预留明细
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedMaterial {
    pub material_code: String,
    pub required_quantity: f64,
    pub reserved_quantity: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOutcome {
    pub plan_id: String,
    pub work_order_code: String,
    pub assigned_count: usize,
    pub total_nodes: usize,
    pub total_workers: usize,
    pub queued_count: usize,
    pub unassigned_count: usize,
    /// 分钟
    pub estimated_duration: f64,
    pub parallel_paths: usize,
    pub assignment_ids: Vec<String>,
    /// 就绪但无可用工人/工位
    pub unassigned: Vec<NodeConflict>,
    /// 节点校验失败
    pub conflicts: Vec<NodeConflict>,
    pub reserved_materials: Vec<ReservedMaterial>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseOutcome {
    pub plan_id: String,
    pub work_order_code: String,
    pub paused_assignments: Vec<String>,
    /// 被释放工人晋级为 ready 的其他工单任务
    pub promoted: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeOutcome {
    pub plan_id: String,
    pub work_order_code: String,
    pub resumed_count: usize,
    pub resumed_assignments: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOutcome {
    pub work_order_code: String,
    pub plan_id: Option<String>,
    pub consumed_materials: MaterialAdjustments,
    /// 收尾时关闭的任务（进行中/暂停 → completed, 未开工 → cancelled）
    pub closed_assignments: usize,
    pub promoted: Vec<String>,
}

/// 工单完工收尾结果
struct WorkOrderClosure {
    consumed: MaterialAdjustments,
    closed_assignments: usize,
    promoted: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationOutcome {
    pub plan_id: String,
    pub work_order_code: String,
    pub cancelled_count: usize,
    pub workers_cleared: usize,
    pub stations_cleared: usize,
    pub material_adjustments: MaterialAdjustments,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrgencyAck {
    pub work_order_code: String,
    pub is_urgent: bool,
    pub updated_assignments: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskOutcome {
    pub assignment: WorkerAssignment,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskOutcome {
    pub assignment: WorkerAssignment,
    /// 完工后新分配的后继任务
    pub newly_scheduled: Vec<String>,
    /// 被晋级为 ready 的队首任务
    pub promoted: Option<String>,
    pub work_order_completed: bool,
}

/// 工单状态视图（状态已按持久化优先规则解析）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderStatusView {
    pub work_order_code: String,
    pub production_state: ProductionState,
    pub label: String,
    /// false = 持久化状态缺失,由方案下达状态推导
    pub persisted: bool,
    pub is_urgent: bool,
    pub plan_id: Option<String>,
    pub launch_status: Option<LaunchStatus>,
}

// ==========================================
// WorkOrderStateMachine - 工单状态机
// ==========================================
pub struct WorkOrderStateMachine {
    conn: Arc<Mutex<Connection>>,
    config: ExecutionConfig,
    config_manager: ConfigManager,
    clock: Arc<dyn Clock>,
    events: OptionalEventPublisher,
    scheduler: AssignmentScheduler,
    accountant: PauseResumeAccountant,
    reconciler: CancellationReconciler,
    assignments: AssignmentRepository,
    work_orders: WorkOrderRepository,
    action_logs: ActionLogRepository,
}

impl WorkOrderStateMachine {
    /// 从 config_kv 读取配置创建
    pub fn new(conn: Arc<Mutex<Connection>>) -> EngineResult<Self> {
        let config = ConfigManager::from_connection(conn.clone()).load_execution_config()?;
        Ok(Self::with_config(conn, config))
    }

    pub fn with_config(conn: Arc<Mutex<Connection>>, config: ExecutionConfig) -> Self {
        let heuristic = heuristic_from_name(&config.optimization_heuristic);
        Self {
            scheduler: AssignmentScheduler::new(heuristic, config.default_worker_efficiency),
            config_manager: ConfigManager::from_connection(conn.clone()),
            clock: Arc::new(SystemClock),
            events: OptionalEventPublisher::none(),
            accountant: PauseResumeAccountant::new(),
            reconciler: CancellationReconciler::new(),
            assignments: AssignmentRepository::new(conn.clone()),
            work_orders: WorkOrderRepository::new(conn.clone()),
            action_logs: ActionLogRepository::new(conn.clone()),
            config,
            conn,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_publisher(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn with_heuristic(mut self, heuristic: Arc<dyn OptimizationHeuristic>) -> Self {
        self.scheduler = AssignmentScheduler::new(heuristic, self.config.default_worker_efficiency);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ==========================================
    // launch - 下达
    // ==========================================

    /// 下达方案: WaitingApproval → InProduction
    ///
    /// 部分下达: 只要有一个节点分配成功即推进状态;
    /// 零节点可分配时返回 NoEligibleWorkers,整体回滚。
    pub fn launch(&self, plan_id: &str, work_order_code: &str, actor: &str) -> EngineResult<LaunchOutcome> {
        let now = self.clock.now();
        let snapshot = self.config_snapshot();

        let outcome = with_immediate_transaction(&self.conn, |tx| {
            self.launch_tx(tx, plan_id, work_order_code, actor, snapshot, now)
        })?;

        info!(
            plan_id = %plan_id,
            work_order_code = %work_order_code,
            assigned_count = outcome.assigned_count,
            total_nodes = outcome.total_nodes,
            queued_count = outcome.queued_count,
            unassigned_count = outcome.unassigned_count,
            "方案下达完成"
        );
        self.events.publish_after_commit(ExecutionEvent::new(
            ExecutionEventType::Launched,
            work_order_code,
            Some(plan_id),
            ProductionState::InProduction,
            now,
        ));
        Ok(outcome)
    }

    fn launch_tx(
        &self,
        tx: &Connection,
        plan_id: &str,
        work_order_code: &str,
        actor: &str,
        snapshot: JsonValue,
        now: DateTime<Utc>,
    ) -> EngineResult<LaunchOutcome> {
        let wo = load_work_order(tx, work_order_code)?;
        let plan = load_plan(tx, plan_id)?;

        if plan.work_order_code != wo.work_order_code {
            return Err(EngineError::ValidationError(format!(
                "方案{}属于工单{},不属于{}",
                plan_id, plan.work_order_code, work_order_code
            )));
        }
        if !plan.is_launchable_status() {
            return Err(EngineError::ValidationError(format!(
                "方案{}状态为{},仅 production 方案可下达",
                plan_id, plan.status
            )));
        }
        ensure_transition(&wo, Some(&plan), ProductionState::InProduction, "launch")?;
        if plan.launch_status != LaunchStatus::None {
            return Err(EngineError::invalid_transition(
                "ProductionPlan",
                plan_id,
                plan.launch_status,
                "launch",
            ));
        }
        if plan.nodes.is_empty() {
            return Err(EngineError::ValidationError(format!("方案{}没有工序节点", plan_id)));
        }

        let graph = PlanGraph::build(&plan)?;
        let round = self
            .scheduler
            .schedule_ready_nodes(tx, &plan, &graph, wo.is_urgent, now)?;

        if round.created.is_empty() {
            let workers = MasterDataRepository::workers_tx(tx)?;
            let mut conflicts = round.conflicts;
            conflicts.extend(round.unassigned);
            warn!(plan_id = %plan_id, conflicts = conflicts.len(), "下达失败: 无任何节点可分配");
            return Err(EngineError::NoEligibleWorkers {
                plan_id: plan_id.to_string(),
                worker_sample: worker_sample(&workers, self.config.worker_sample_size),
                conflicts,
            });
        }

        // 物料预留
        let mut reserved_materials = Vec::new();
        for req in plan_requirements(&plan) {
            let reserved =
                StockRepository::reserve_tx(tx, plan_id, &req.material_code, req.required_quantity, now)?;
            reserved_materials.push(ReservedMaterial {
                material_code: req.material_code,
                required_quantity: req.required_quantity,
                reserved_quantity: reserved,
            });
        }

        let metrics = compute_metrics(&graph, plan.nodes.len(), &round.created);
        let summary = summary_from_metrics(&metrics, Some(json!(reserved_materials)), now);
        PlanRepository::update_summary_tx(tx, plan_id, &summary)?;
        PlanRepository::update_launch_status_tx(tx, plan_id, LaunchStatus::None, LaunchStatus::Launched, Some(now))?;
        WorkOrderRepository::update_state_tx(
            tx,
            work_order_code,
            wo.production_state,
            ProductionState::InProduction,
            now,
        )?;

        let workers: BTreeSet<&str> = round.created.iter().map(|a| a.worker_id.as_str()).collect();
        for worker_id in workers {
            promote_queue_head(tx, worker_id, now)?;
        }

        let outcome = LaunchOutcome {
            plan_id: plan_id.to_string(),
            work_order_code: work_order_code.to_string(),
            assigned_count: metrics.assigned_count,
            total_nodes: metrics.total_nodes,
            total_workers: metrics.total_workers,
            queued_count: round.queued_count(),
            unassigned_count: metrics.total_nodes.saturating_sub(metrics.assigned_count),
            estimated_duration: metrics.estimated_duration,
            parallel_paths: metrics.parallel_paths,
            assignment_ids: round.created.iter().map(|a| a.assignment_id.clone()).collect(),
            unassigned: round.unassigned,
            conflicts: round.conflicts,
            reserved_materials,
        };

        let log = ActionLog::new(ActionType::Launch, work_order_code, Some(plan_id), actor, now).with_payload(json!({
            "assignedCount": outcome.assigned_count,
            "totalNodes": outcome.total_nodes,
            "queuedCount": outcome.queued_count,
            "schedulingMode": plan.scheduling_mode.as_db_str(),
            "heuristic": self.scheduler.heuristic_name(),
            "configSnapshot": snapshot,
        }));
        ActionLogRepository::insert_tx(tx, &log)?;
        Ok(outcome)
    }

    // ==========================================
    // pause / resume - 暂停 / 恢复
    // ==========================================

    /// 暂停: InProduction → Paused,暂停全部进行中的任务并释放占用
    ///
    /// 暂停工单的等待任务退出工人队列,相关工人的下一个任务随之晋级
    pub fn pause(&self, plan_id: &str, actor: &str) -> EngineResult<PauseOutcome> {
        let now = self.clock.now();
        let outcome = with_immediate_transaction(&self.conn, |tx| {
            let plan = load_plan(tx, plan_id)?;
            let wo = load_work_order(tx, &plan.work_order_code)?;
            ensure_transition(&wo, Some(&plan), ProductionState::Paused, "pause")?;

            let assignments = AssignmentRepository::list_by_plan_tx(tx, plan_id)?;
            let affected_workers: BTreeSet<String> = assignments
                .iter()
                .filter(|a| !a.status.is_terminal())
                .map(|a| a.worker_id.clone())
                .collect();

            let mut paused = Vec::new();
            for mut a in assignments
                .into_iter()
                .filter(|a| a.status == AssignmentStatus::InProgress)
            {
                self.accountant.pause(&mut a, now)?;
                a.updated_at = now;
                AssignmentRepository::update_tx(tx, &a, AssignmentStatus::InProgress)?;
                OccupancyRepository::release_for_assignment_tx(tx, &a.assignment_id)?;
                paused.push(a.assignment_id);
            }

            if plan.launch_status == LaunchStatus::Launched {
                PlanRepository::update_launch_status_tx(tx, plan_id, LaunchStatus::Launched, LaunchStatus::Paused, None)?;
            }
            WorkOrderRepository::update_state_tx(tx, &wo.work_order_code, wo.production_state, ProductionState::Paused, now)?;

            let mut promoted = Vec::new();
            for worker_id in &affected_workers {
                promoted.extend(promote_queue_head(tx, worker_id, now)?);
            }

            let log = ActionLog::new(ActionType::Pause, &wo.work_order_code, Some(plan_id), actor, now)
                .with_payload(json!({ "pausedAssignments": paused, "promoted": promoted }));
            ActionLogRepository::insert_tx(tx, &log)?;

            Ok::<_, EngineError>(PauseOutcome {
                plan_id: plan_id.to_string(),
                work_order_code: wo.work_order_code,
                paused_assignments: paused,
                promoted,
            })
        })?;

        info!(plan_id = %plan_id, paused = outcome.paused_assignments.len(), "工单已暂停");
        self.events.publish_after_commit(ExecutionEvent::new(
            ExecutionEventType::Paused,
            &outcome.work_order_code,
            Some(plan_id),
            ProductionState::Paused,
            now,
        ));
        Ok(outcome)
    }

    /// 恢复: Paused → InProduction,重新获取占用
    ///
    /// 任一任务的工人或子工位已被占用时返回 AssignmentConflict,整体回滚
    pub fn resume(&self, plan_id: &str, actor: &str) -> EngineResult<ResumeOutcome> {
        let now = self.clock.now();
        let outcome = with_immediate_transaction(&self.conn, |tx| {
            let plan = load_plan(tx, plan_id)?;
            let wo = load_work_order(tx, &plan.work_order_code)?;
            ensure_transition(&wo, Some(&plan), ProductionState::InProduction, "resume")?;

            let mut resumed = Vec::new();
            for mut a in AssignmentRepository::list_by_plan_tx(tx, plan_id)?
                .into_iter()
                .filter(|a| a.status == AssignmentStatus::Paused)
            {
                self.accountant.resume(&mut a, now)?;
                a.updated_at = now;
                if a.status == AssignmentStatus::InProgress {
                    ensure_worker_free(tx, &a)?;
                    ensure_substation_free(tx, &a)?;
                }
                AssignmentRepository::update_tx(tx, &a, AssignmentStatus::Paused)?;
                if a.status == AssignmentStatus::InProgress {
                    acquire_occupancy(tx, &a, now)?;
                }
                resumed.push(a.assignment_id);
            }

            if plan.launch_status == LaunchStatus::Paused {
                PlanRepository::update_launch_status_tx(tx, plan_id, LaunchStatus::Paused, LaunchStatus::Launched, None)?;
            }
            WorkOrderRepository::update_state_tx(
                tx,
                &wo.work_order_code,
                wo.production_state,
                ProductionState::InProduction,
                now,
            )?;

            let log = ActionLog::new(ActionType::Resume, &wo.work_order_code, Some(plan_id), actor, now)
                .with_payload(json!({ "resumedAssignments": resumed }));
            ActionLogRepository::insert_tx(tx, &log)?;

            Ok::<_, EngineError>(ResumeOutcome {
                plan_id: plan_id.to_string(),
                work_order_code: wo.work_order_code,
                resumed_count: resumed.len(),
                resumed_assignments: resumed,
            })
        })?;

        info!(plan_id = %plan_id, resumed = outcome.resumed_count, "工单已恢复");
        self.events.publish_after_commit(ExecutionEvent::new(
            ExecutionEventType::Resumed,
            &outcome.work_order_code,
            Some(plan_id),
            ProductionState::InProduction,
            now,
        ));
        Ok(outcome)
    }

    // ==========================================
    // complete / cancel - 完工 / 取消
    // ==========================================

    /// 完工: 任一非终态 → Completed,消耗方案全部预留
    ///
    /// 未结束的任务在同一事务内关闭,工人占用随之释放。
    pub fn complete(&self, work_order_code: &str, actor: &str) -> EngineResult<CompleteOutcome> {
        let now = self.clock.now();
        let outcome = with_immediate_transaction(&self.conn, |tx| {
            let wo = load_work_order(tx, work_order_code)?;
            let plan = PlanRepository::find_active_for_work_order_tx(tx, work_order_code)?;
            ensure_transition(&wo, plan.as_ref(), ProductionState::Completed, "complete")?;

            let closure = self.complete_work_order_tx(tx, &wo, plan.as_ref(), now)?;
            let log = ActionLog::new(
                ActionType::Complete,
                work_order_code,
                plan.as_ref().map(|p| p.plan_id.as_str()),
                actor,
                now,
            )
            .with_payload(json!({
                "consumedMaterials": closure.consumed.input_materials,
                "closedAssignments": closure.closed_assignments,
                "promoted": closure.promoted,
            }));
            ActionLogRepository::insert_tx(tx, &log)?;

            Ok::<_, EngineError>(CompleteOutcome {
                work_order_code: work_order_code.to_string(),
                plan_id: plan.map(|p| p.plan_id),
                consumed_materials: closure.consumed,
                closed_assignments: closure.closed_assignments,
                promoted: closure.promoted,
            })
        })?;

        info!(
            work_order_code = %work_order_code,
            closed_assignments = outcome.closed_assignments,
            "工单已完工"
        );
        self.events.publish_after_commit(ExecutionEvent::new(
            ExecutionEventType::Completed,
            work_order_code,
            outcome.plan_id.as_deref(),
            ProductionState::Completed,
            now,
        ));
        Ok(outcome)
    }

    /// 按实际产出取消: 任一非终态 → Cancelled
    ///
    /// 取消全部非终态任务、释放占用、按未产出比例退回预留,单事务原子完成
    pub fn cancel_with_progress(
        &self,
        plan_id: &str,
        progress: CancellationProgress,
        actor: &str,
    ) -> EngineResult<CancellationOutcome> {
        self.reconciler.validate_progress(&progress)?;
        let now = self.clock.now();

        let outcome = with_immediate_transaction(&self.conn, |tx| {
            let plan = load_plan(tx, plan_id)?;
            let wo = load_work_order(tx, &plan.work_order_code)?;
            let ratio = self.reconciler.unproduced_ratio(plan.quantity, &progress)?;
            ensure_transition(&wo, Some(&plan), ProductionState::Cancelled, "cancel_with_progress")?;

            let mut cancelled_count = 0;
            let mut workers_cleared = 0;
            let mut stations_cleared = 0;
            let mut freed_workers = BTreeSet::new();
            for mut a in AssignmentRepository::list_by_plan_tx(tx, plan_id)?
                .into_iter()
                .filter(|a| !a.status.is_terminal())
            {
                let prior = a.status;
                self.accountant.close_open_pause(&mut a, now);
                if let Some(start) = a.actual_start {
                    a.actual_end = Some(now.max(start));
                }
                a.status = AssignmentStatus::Cancelled;
                a.updated_at = now;
                AssignmentRepository::update_tx(tx, &a, prior)?;

                let released = OccupancyRepository::release_for_assignment_tx(tx, &a.assignment_id)?;
                freed_workers.insert(a.worker_id.clone());
                if released.worker_released {
                    workers_cleared += 1;
                }
                if released.substation_released {
                    stations_cleared += 1;
                }
                cancelled_count += 1;
            }

            let material_adjustments = self.reconciler.reconcile_tx(tx, plan_id, ratio, now)?;

            if plan.launch_status != LaunchStatus::Cancelled {
                PlanRepository::update_launch_status_tx(
                    tx,
                    plan_id,
                    plan.launch_status,
                    LaunchStatus::Cancelled,
                    None,
                )?;
            }
            WorkOrderRepository::update_state_tx(
                tx,
                &wo.work_order_code,
                wo.production_state,
                ProductionState::Cancelled,
                now,
            )?;

            for worker_id in &freed_workers {
                promote_queue_head(tx, worker_id, now)?;
            }

            let log = ActionLog::new(ActionType::Cancel, &wo.work_order_code, Some(plan_id), actor, now)
                .with_payload(json!({
                    "actualOutputQuantity": progress.actual_output_quantity,
                    "defectQuantity": progress.defect_quantity,
                    "cancelledCount": cancelled_count,
                    "workersCleared": workers_cleared,
                    "stationsCleared": stations_cleared,
                    "materialAdjustments": material_adjustments,
                }));
            ActionLogRepository::insert_tx(tx, &log)?;

            Ok::<_, EngineError>(CancellationOutcome {
                plan_id: plan_id.to_string(),
                work_order_code: wo.work_order_code,
                cancelled_count,
                workers_cleared,
                stations_cleared,
                material_adjustments,
            })
        })?;

        info!(
            plan_id = %plan_id,
            cancelled_count = outcome.cancelled_count,
            workers_cleared = outcome.workers_cleared,
            stations_cleared = outcome.stations_cleared,
            released = outcome.material_adjustments.total_released(),
            "工单已取消"
        );
        self.events.publish_after_commit(ExecutionEvent::new(
            ExecutionEventType::Cancelled,
            &outcome.work_order_code,
            Some(plan_id),
            ProductionState::Cancelled,
            now,
        ));
        Ok(outcome)
    }

    // ==========================================
    // set_urgent_priority - 加急
    // ==========================================

    /// 设置/取消加急（不改变生产状态）
    ///
    /// 加急工单的可开工任务不受队首限制,可并发开工
    pub fn set_urgent_priority(&self, work_order_code: &str, urgent: bool, actor: &str) -> EngineResult<UrgencyAck> {
        let now = self.clock.now();
        let (ack, state, plan_id) = with_immediate_transaction(&self.conn, |tx| {
            let wo = load_work_order(tx, work_order_code)?;
            let plan = PlanRepository::find_active_for_work_order_tx(tx, work_order_code)?;
            let state = wo.resolved_state(plan.as_ref());
            if state.is_terminal() {
                return Err(EngineError::invalid_transition(
                    "WorkOrder",
                    work_order_code,
                    state,
                    "set_urgent_priority",
                ));
            }

            WorkOrderRepository::set_urgent_tx(tx, work_order_code, urgent)?;
            let updated = AssignmentRepository::set_urgent_for_work_order_tx(tx, work_order_code, urgent, now)?;

            let plan_id = plan.map(|p| p.plan_id);
            let log = ActionLog::new(ActionType::SetUrgent, work_order_code, plan_id.as_deref(), actor, now)
                .with_payload(json!({ "urgent": urgent, "updatedAssignments": updated }));
            ActionLogRepository::insert_tx(tx, &log)?;

            Ok::<_, EngineError>((
                UrgencyAck {
                    work_order_code: work_order_code.to_string(),
                    is_urgent: urgent,
                    updated_assignments: updated,
                },
                state,
                plan_id,
            ))
        })?;

        info!(work_order_code = %work_order_code, urgent, updated = ack.updated_assignments, "加急标志已更新");
        self.events.publish_after_commit(ExecutionEvent::new(
            ExecutionEventType::UrgencyChanged,
            work_order_code,
            plan_id.as_deref(),
            state,
            now,
        ));
        Ok(ack)
    }

    // ==========================================
    // start_task / complete_task - 工人开工 / 完工
    // ==========================================

    /// 工人开工: ready/queued → in_progress
    pub fn start_task(&self, assignment_id: &str, actor: &str) -> EngineResult<StartTaskOutcome> {
        let now = self.clock.now();
        let assignment = with_immediate_transaction(&self.conn, |tx| {
            let mut a = load_assignment(tx, assignment_id)?;
            let wo = load_work_order(tx, &a.work_order_code)?;
            let plan = PlanRepository::find_tx(tx, &a.plan_id)?;
            let state = wo.resolved_state(plan.as_ref());
            if state != ProductionState::InProduction {
                return Err(EngineError::invalid_transition(
                    "WorkOrder",
                    &wo.work_order_code,
                    state,
                    "start_task",
                ));
            }
            if !matches!(a.status, AssignmentStatus::Ready | AssignmentStatus::Queued) {
                return Err(EngineError::invalid_transition(
                    "WorkerAssignment",
                    assignment_id,
                    a.status,
                    "start_task",
                ));
            }

            ensure_worker_free(tx, &a)?;
            if !wo.is_urgent {
                let queue = AssignmentRepository::worker_queue_tx(tx, &a.worker_id, a.scheduling_mode)?;
                if let Some(head) = queue.first() {
                    if head.assignment_id != a.assignment_id {
                        return Err(EngineError::conflict(
                            a.node_id.clone(),
                            format!("任务不在工人{}队首（队首为{}）", a.worker_id, head.assignment_id),
                        ));
                    }
                }
            }
            ensure_substation_free(tx, &a)?;

            let prior = a.status;
            if now < a.expected_start {
                a.expected_start = now;
                a.planned_end = now + a.effective_duration();
                if a.optimized_start.is_some() {
                    a.optimized_start = Some(now);
                }
            }
            a.actual_start = Some(now);
            a.status = AssignmentStatus::InProgress;
            a.updated_at = now;
            AssignmentRepository::update_tx(tx, &a, prior)?;
            acquire_occupancy(tx, &a, now)?;

            let log = ActionLog::new(ActionType::StartTask, &a.work_order_code, Some(a.plan_id.as_str()), actor, now)
                .with_payload(json!({
                    "assignmentId": a.assignment_id,
                    "workerId": a.worker_id,
                    "nodeId": a.node_id,
                }));
            ActionLogRepository::insert_tx(tx, &log)?;
            Ok::<_, EngineError>(a)
        })?;

        info!(
            assignment_id = %assignment.assignment_id,
            worker_id = %assignment.worker_id,
            node_id = %assignment.node_id,
            "任务开工"
        );
        self.events.publish_after_commit(
            ExecutionEvent::new(
                ExecutionEventType::TaskStarted,
                &assignment.work_order_code,
                Some(assignment.plan_id.as_str()),
                ProductionState::InProduction,
                now,
            )
            .with_assignment(&assignment.assignment_id),
        );
        Ok(StartTaskOutcome { assignment })
    }

    /// 工人完工: in_progress → completed
    ///
    /// 释放占用、晋级工人队首、排程新就绪的后继节点;
    /// 全部节点完成时工单随之完工。
    pub fn complete_task(&self, assignment_id: &str, actor: &str) -> EngineResult<CompleteTaskOutcome> {
        let now = self.clock.now();
        let outcome = with_immediate_transaction(&self.conn, |tx| {
            let mut a = load_assignment(tx, assignment_id)?;
            let wo = load_work_order(tx, &a.work_order_code)?;
            let plan = load_plan(tx, &a.plan_id)?;
            let state = wo.resolved_state(Some(&plan));
            if state != ProductionState::InProduction {
                return Err(EngineError::invalid_transition(
                    "WorkOrder",
                    &wo.work_order_code,
                    state,
                    "complete_task",
                ));
            }
            if a.status != AssignmentStatus::InProgress {
                return Err(EngineError::invalid_transition(
                    "WorkerAssignment",
                    assignment_id,
                    a.status,
                    "complete_task",
                ));
            }

            let start = a.actual_start.unwrap_or(now);
            a.actual_end = Some(now.max(start));
            a.status = AssignmentStatus::Completed;
            a.updated_at = now;
            AssignmentRepository::update_tx(tx, &a, AssignmentStatus::InProgress)?;
            OccupancyRepository::release_for_assignment_tx(tx, &a.assignment_id)?;
            let promoted = promote_queue_head(tx, &a.worker_id, now)?;

            let graph = PlanGraph::build(&plan)?;
            let round = self
                .scheduler
                .schedule_ready_nodes(tx, &plan, &graph, wo.is_urgent, now)?;

            let all = AssignmentRepository::list_by_plan_tx(tx, &plan.plan_id)?;
            let metrics = compute_metrics(&graph, plan.nodes.len(), &all);
            let summary = summary_from_metrics(&metrics, plan.summary.material_summary.clone(), now);
            PlanRepository::update_summary_tx(tx, &plan.plan_id, &summary)?;

            let completed_nodes: HashSet<&str> = all
                .iter()
                .filter(|x| x.status == AssignmentStatus::Completed)
                .map(|x| x.node_id.as_str())
                .collect();
            let all_done = plan.nodes.iter().all(|n| completed_nodes.contains(n.node_id.as_str()));
            if all_done {
                self.complete_work_order_tx(tx, &wo, Some(&plan), now)?;
            }

            let log = ActionLog::new(ActionType::CompleteTask, &a.work_order_code, Some(a.plan_id.as_str()), actor, now)
                .with_payload(json!({
                    "assignmentId": a.assignment_id,
                    "newlyScheduled": round.created.len(),
                    "workOrderCompleted": all_done,
                }));
            ActionLogRepository::insert_tx(tx, &log)?;

            Ok::<_, EngineError>(CompleteTaskOutcome {
                newly_scheduled: round.created.into_iter().map(|x| x.assignment_id).collect(),
                promoted,
                work_order_completed: all_done,
                assignment: a,
            })
        })?;

        let a = &outcome.assignment;
        info!(
            assignment_id = %a.assignment_id,
            worker_id = %a.worker_id,
            newly_scheduled = outcome.newly_scheduled.len(),
            work_order_completed = outcome.work_order_completed,
            "任务完工"
        );
        let state = if outcome.work_order_completed {
            ProductionState::Completed
        } else {
            ProductionState::InProduction
        };
        self.events.publish_after_commit(
            ExecutionEvent::new(
                ExecutionEventType::TaskCompleted,
                &a.work_order_code,
                Some(a.plan_id.as_str()),
                state,
                now,
            )
            .with_assignment(&a.assignment_id),
        );
        if outcome.work_order_completed {
            self.events.publish_after_commit(ExecutionEvent::new(
                ExecutionEventType::Completed,
                &a.work_order_code,
                Some(a.plan_id.as_str()),
                ProductionState::Completed,
                now,
            ));
        }
        Ok(outcome)
    }

    // ==========================================
    // 只读查询
    // ==========================================

    /// 解析后的工单状态（持久化状态优先,缺失时按方案下达状态推导）
    pub fn work_order_status(&self, work_order_code: &str) -> EngineResult<WorkOrderStatusView> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let wo = load_work_order(&conn, work_order_code)?;
        let plan = PlanRepository::find_active_for_work_order_tx(&conn, work_order_code)?;
        let state = wo.resolved_state(plan.as_ref());

        Ok(WorkOrderStatusView {
            work_order_code: wo.work_order_code,
            production_state: state,
            label: crate::i18n::label(state.label_key()),
            persisted: wo.production_state.is_some(),
            is_urgent: wo.is_urgent,
            launch_status: plan.as_ref().map(|p| p.launch_status),
            plan_id: plan.map(|p| p.plan_id),
        })
    }

    pub fn worker_queue(&self, worker_id: &str, mode: SchedulingMode) -> EngineResult<Vec<WorkerAssignment>> {
        Ok(self.assignments.worker_queue(worker_id, mode)?)
    }

    pub fn next_task(&self, worker_id: &str, mode: SchedulingMode) -> EngineResult<Option<WorkerAssignment>> {
        Ok(self.assignments.next_task(worker_id, mode)?)
    }

    pub fn plan_assignments(&self, plan_id: &str) -> EngineResult<Vec<WorkerAssignment>> {
        Ok(self.assignments.list_by_plan(plan_id)?)
    }

    /// 任务有效工时（未完工返回 None）
    pub fn effective_duration(&self, assignment_id: &str) -> EngineResult<Option<EffectiveDuration>> {
        let a = self
            .assignments
            .find_by_id(assignment_id)?
            .ok_or_else(|| EngineError::not_found("WorkerAssignment", assignment_id))?;
        Ok(self.accountant.effective_duration(&a))
    }

    pub fn action_log(&self, work_order_code: &str) -> EngineResult<Vec<ActionLog>> {
        if self.work_orders.find_by_code(work_order_code)?.is_none() {
            return Err(EngineError::not_found("WorkOrder", work_order_code));
        }
        Ok(self.action_logs.list_by_work_order(work_order_code)?)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    /// 工单完工: 消耗预留并写入 Completed
    /// 工单完工收尾（调用方事务内）
    ///
    /// 进行中/暂停的任务记为完工,未开工的任务取消; 释放占用,
    /// 晋级相关工人的队首,最后消耗方案全部预留
    fn complete_work_order_tx(
        &self,
        tx: &Connection,
        wo: &WorkOrder,
        plan: Option<&ProductionPlan>,
        now: DateTime<Utc>,
    ) -> EngineResult<WorkOrderClosure> {
        let mut closed_assignments = 0;
        let mut workers = BTreeSet::new();
        if let Some(plan) = plan {
            for mut a in AssignmentRepository::list_by_plan_tx(tx, &plan.plan_id)?
                .into_iter()
                .filter(|a| !a.status.is_terminal())
            {
                let prior = a.status;
                self.accountant.close_open_pause(&mut a, now);
                match (prior, a.actual_start) {
                    (AssignmentStatus::InProgress | AssignmentStatus::Paused, Some(start)) => {
                        a.actual_end = Some(now.max(start));
                        a.status = AssignmentStatus::Completed;
                    }
                    _ => a.status = AssignmentStatus::Cancelled,
                }
                a.updated_at = now;
                AssignmentRepository::update_tx(tx, &a, prior)?;
                OccupancyRepository::release_for_assignment_tx(tx, &a.assignment_id)?;
                workers.insert(a.worker_id.clone());
                closed_assignments += 1;
            }
        }

        let consumed = match plan {
            Some(plan) => self.reconciler.reconcile_tx(tx, &plan.plan_id, 0.0, now)?,
            None => MaterialAdjustments::default(),
        };
        WorkOrderRepository::update_state_tx(
            tx,
            &wo.work_order_code,
            wo.production_state,
            ProductionState::Completed,
            now,
        )?;

        let mut promoted = Vec::new();
        for worker_id in &workers {
            promoted.extend(promote_queue_head(tx, worker_id, now)?);
        }
        Ok(WorkOrderClosure {
            consumed,
            closed_assignments,
            promoted,
        })
    }

    fn config_snapshot(&self) -> JsonValue {
        match self.config_manager.get_config_snapshot() {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or(JsonValue::Null),
            Err(e) => {
                warn!(error = %e, "读取配置快照失败");
                JsonValue::Null
            }
        }
    }
}

fn load_work_order(tx: &Connection, work_order_code: &str) -> EngineResult<WorkOrder> {
    WorkOrderRepository::find_tx(tx, work_order_code)?
        .ok_or_else(|| EngineError::not_found("WorkOrder", work_order_code))
}

fn load_plan(tx: &Connection, plan_id: &str) -> EngineResult<ProductionPlan> {
    PlanRepository::find_tx(tx, plan_id)?.ok_or_else(|| EngineError::not_found("ProductionPlan", plan_id))
}

fn load_assignment(tx: &Connection, assignment_id: &str) -> EngineResult<WorkerAssignment> {
    AssignmentRepository::find_tx(tx, assignment_id)?
        .ok_or_else(|| EngineError::not_found("WorkerAssignment", assignment_id))
}

/// 前置状态检查（任何写入之前）
fn ensure_transition(
    wo: &WorkOrder,
    plan: Option<&ProductionPlan>,
    to: ProductionState,
    operation: &str,
) -> EngineResult<ProductionState> {
    let from = wo.resolved_state(plan);
    if !is_allowed_transition(from, to) {
        return Err(EngineError::invalid_transition(
            "WorkOrder",
            &wo.work_order_code,
            from,
            operation,
        ));
    }
    Ok(from)
}

fn ensure_worker_free(tx: &Connection, a: &WorkerAssignment) -> EngineResult<()> {
    if let Some(current) = AssignmentRepository::in_progress_for_worker_tx(tx, &a.worker_id)? {
        if current.assignment_id != a.assignment_id {
            return Err(EngineError::conflict(
                a.node_id.clone(),
                format!("工人{}正在执行任务{}", a.worker_id, current.assignment_id),
            ));
        }
    }
    Ok(())
}

fn ensure_substation_free(tx: &Connection, a: &WorkerAssignment) -> EngineResult<()> {
    if let Some(substation_id) = &a.substation_id {
        if let Some(holder) = OccupancyRepository::substation_holder_tx(tx, substation_id)? {
            if holder != a.assignment_id {
                return Err(EngineError::conflict(
                    a.node_id.clone(),
                    format!("子工位{}已被任务{}占用", substation_id, holder),
                ));
            }
        }
    }
    Ok(())
}

fn acquire_occupancy(tx: &Connection, a: &WorkerAssignment, now: DateTime<Utc>) -> EngineResult<()> {
    OccupancyRepository::acquire_worker_tx(tx, &a.worker_id, &a.assignment_id, now)?;
    if let Some(substation_id) = &a.substation_id {
        OccupancyRepository::acquire_substation_tx(tx, substation_id, &a.assignment_id, now)?;
    }
    Ok(())
}

/// 工人空闲后把队首 queued 任务晋级为 ready
///
/// 只看生产中工单的任务; 工人仍有进行中或 ready 任务时不做任何事
fn promote_queue_head(tx: &Connection, worker_id: &str, now: DateTime<Utc>) -> EngineResult<Option<String>> {
    if AssignmentRepository::in_progress_for_worker_tx(tx, worker_id)?.is_some() {
        return Ok(None);
    }
    let waiting = AssignmentRepository::waiting_for_worker_tx(tx, worker_id)?;
    if waiting.iter().any(|a| a.status == AssignmentStatus::Ready) {
        return Ok(None);
    }

    match waiting.into_iter().next() {
        Some(mut head) => {
            head.status = AssignmentStatus::Ready;
            head.updated_at = now;
            AssignmentRepository::update_tx(tx, &head, AssignmentStatus::Queued)?;
            Ok(Some(head.assignment_id))
        }
        None => Ok(None),
    }
}

fn summary_from_metrics(metrics: &PlanMetrics, material_summary: Option<JsonValue>, now: DateTime<Utc>) -> PlanSummary {
    PlanSummary {
        total_nodes: Some(metrics.total_nodes as i64),
        assigned_count: Some(metrics.assigned_count as i64),
        estimated_duration: Some(metrics.estimated_duration),
        parallel_paths: Some(metrics.parallel_paths as i64),
        material_summary,
        updated_at: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProductionState::*;

    #[test]
    fn test_transition_table() {
        assert!(is_allowed_transition(WaitingApproval, InProduction));
        assert!(is_allowed_transition(InProduction, Paused));
        assert!(is_allowed_transition(Paused, InProduction));
        assert!(is_allowed_transition(WaitingApproval, Cancelled));
        assert!(is_allowed_transition(Paused, Completed));

        assert!(!is_allowed_transition(WaitingApproval, Paused));
        assert!(!is_allowed_transition(Paused, Paused));
        assert!(!is_allowed_transition(InProduction, InProduction));
        assert!(!is_allowed_transition(Completed, Cancelled));
        assert!(!is_allowed_transition(Cancelled, InProduction));
    }
}

// ==========================================
// 生产执行核心 - 引擎层事件发布
// ==========================================
// 职责: 定义执行事件发布 trait,实现依赖倒置
// 约束: 事件只在事务提交之后发布; 发布失败只记日志,不影响已提交的结果
// 投递语义: 至少一次,消费方按 event_id 去重
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::domain::types::ProductionState;

// ==========================================
// 执行事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionEventType {
    Launched,
    Paused,
    Resumed,
    Cancelled,
    Completed,
    UrgencyChanged,
    TaskStarted,
    TaskCompleted,
}

impl ExecutionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionEventType::Launched => "Launched",
            ExecutionEventType::Paused => "Paused",
            ExecutionEventType::Resumed => "Resumed",
            ExecutionEventType::Cancelled => "Cancelled",
            ExecutionEventType::Completed => "Completed",
            ExecutionEventType::UrgencyChanged => "UrgencyChanged",
            ExecutionEventType::TaskStarted => "TaskStarted",
            ExecutionEventType::TaskCompleted => "TaskCompleted",
        }
    }
}

/// 执行事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub event_id: String,
    pub event_type: ExecutionEventType,
    pub work_order_code: String,
    pub plan_id: Option<String>,
    pub production_state: ProductionState,
    /// 任务级事件关联的任务
    pub assignment_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(
        event_type: ExecutionEventType,
        work_order_code: &str,
        plan_id: Option<&str>,
        production_state: ProductionState,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            work_order_code: work_order_code.to_string(),
            plan_id: plan_id.map(str::to_string),
            production_state,
            assignment_id: None,
            occurred_at,
        }
    }

    pub fn with_assignment(mut self, assignment_id: &str) -> Self {
        self.assignment_id = Some(assignment_id.to_string());
        self
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 执行事件发布者
///
/// UI 刷新、跨端广播等观察者实现此 trait
pub trait ExecutionEventPublisher: Send + Sync {
    /// 发布事件,返回投递标识（如不支持可为空字符串）
    fn publish(&self, event: ExecutionEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl ExecutionEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: ExecutionEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - work_order_code={}, event_type={}",
            event.work_order_code,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 基于 tokio broadcast 的进程内广播
///
/// 无订阅者时发送失败,由调用方记日志
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }
}

impl ExecutionEventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: ExecutionEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let event_id = event.event_id.clone();
        self.sender.send(event).map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
        Ok(event_id)
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn ExecutionEventPublisher>> 的使用
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn ExecutionEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn ExecutionEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn publish(&self, event: ExecutionEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者，跳过事件 - work_order_code={}, event_type={}",
                    event.work_order_code,
                    event.event_type.as_str()
                );
                Ok(String::new())
            }
        }
    }

    /// 发布并吞掉错误（提交后调用）
    pub fn publish_after_commit(&self, event: ExecutionEvent) {
        let event_id = event.event_id.clone();
        let event_type = event.event_type;
        if let Err(e) = self.publish(event) {
            tracing::warn!(
                event_id = %event_id,
                event_type = event_type.as_str(),
                error = %e,
                "事件发布失败，已忽略"
            );
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

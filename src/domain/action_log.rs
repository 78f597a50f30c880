// ==========================================
// 生产执行核心 - 操作日志领域模型
// ==========================================
// 红线: 所有状态变更写入必须记录
// 用途: 审计追踪
// 对齐: action_log 表
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,               // 日志ID
    pub work_order_code: String,         // 关联工单
    pub plan_id: Option<String>,         // 关联方案（工单级操作可为None）
    pub action_type: ActionType,         // 操作类型
    pub action_ts: DateTime<Utc>,        // 操作时间戳
    pub actor: String,                   // 操作人
    pub payload_json: Option<JsonValue>, // 操作参数与影响摘要
    pub detail: Option<String>,          // 详细描述
}

impl ActionLog {
    pub fn new(
        action_type: ActionType,
        work_order_code: &str,
        plan_id: Option<&str>,
        actor: &str,
        action_ts: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            work_order_code: work_order_code.to_string(),
            plan_id: plan_id.map(str::to_string),
            action_type,
            action_ts,
            actor: actor.to_string(),
            payload_json: None,
            detail: None,
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload_json = Some(payload);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Launch,       // 下达
    Pause,        // 暂停
    Resume,       // 恢复
    Cancel,       // 取消（含进度对账）
    Complete,     // 完工
    SetUrgent,    // 加急/取消加急
    StartTask,    // 工人开工
    CompleteTask, // 工人完工
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Launch => "LAUNCH",
            ActionType::Pause => "PAUSE",
            ActionType::Resume => "RESUME",
            ActionType::Cancel => "CANCEL",
            ActionType::Complete => "COMPLETE",
            ActionType::SetUrgent => "SET_URGENT",
            ActionType::StartTask => "START_TASK",
            ActionType::CompleteTask => "COMPLETE_TASK",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LAUNCH" => Some(ActionType::Launch),
            "PAUSE" => Some(ActionType::Pause),
            "RESUME" => Some(ActionType::Resume),
            "CANCEL" => Some(ActionType::Cancel),
            "COMPLETE" => Some(ActionType::Complete),
            "SET_URGENT" => Some(ActionType::SetUrgent),
            "START_TASK" => Some(ActionType::StartTask),
            "COMPLETE_TASK" => Some(ActionType::CompleteTask),
            _ => None,
        }
    }
}

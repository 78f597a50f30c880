// ==========================================
// 生产执行核心 - 领域类型定义
// ==========================================
// 红线: 领域状态为封闭枚举,显示文案一律走 i18n 标签表
// 序列化格式: snake_case (与数据库 CHECK 约束一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 枚举解析失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub type_name: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "未知的{}取值: {}", self.type_name, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// 为封闭枚举生成 as_db_str / Display / FromStr / label_key
macro_rules! db_enum {
    ($name:ident, $label_prefix:literal, { $($variant:ident => $db:literal),+ $(,)? }) => {
        impl $name {
            /// 转换为数据库存储的字符串
            pub fn as_db_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $db),+
                }
            }

            /// i18n 标签键
            pub fn label_key(&self) -> &'static str {
                match self {
                    $($name::$variant => concat!($label_prefix, ".", $db)),+
                }
            }

            /// 全部取值
            pub fn all() -> &'static [$name] {
                &[$($name::$variant),+]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_db_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($db => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        type_name: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ==========================================
// 工单生产状态 (Production State)
// ==========================================
// WaitingApproval → InProduction ⇄ Paused
// 任一非终态 → Completed / Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionState {
    WaitingApproval, // 待下达
    InProduction,    // 生产中
    Paused,          // 已暂停
    Completed,       // 已完成
    Cancelled,       // 已取消
}

db_enum!(ProductionState, "production_state", {
    WaitingApproval => "waiting_approval",
    InProduction => "in_production",
    Paused => "paused",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl ProductionState {
    /// 是否终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProductionState::Completed | ProductionState::Cancelled)
    }
}

// ==========================================
// 生产方案状态 (Plan Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,      // 草稿
    Production, // 生产用
    Template,   // 模板
}

db_enum!(PlanStatus, "plan_status", {
    Draft => "draft",
    Production => "production",
    Template => "template",
});

// ==========================================
// 方案下达状态 (Launch Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStatus {
    None,      // 未下达
    Launched,  // 已下达
    Paused,    // 已暂停
    Cancelled, // 已取消
}

db_enum!(LaunchStatus, "launch_status", {
    None => "none",
    Launched => "launched",
    Paused => "paused",
    Cancelled => "cancelled",
});

impl LaunchStatus {
    /// 工单状态缺失时的回退推导
    pub fn fallback_production_state(&self) -> ProductionState {
        match self {
            LaunchStatus::None => ProductionState::WaitingApproval,
            LaunchStatus::Launched => ProductionState::InProduction,
            LaunchStatus::Paused => ProductionState::Paused,
            LaunchStatus::Cancelled => ProductionState::Cancelled,
        }
    }
}

// ==========================================
// 任务状态 (Assignment Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,    // 待定
    Ready,      // 可开工（队首）
    Queued,     // 排队中（工人争用）
    InProgress, // 进行中
    Paused,     // 已暂停
    Completed,  // 已完成
    Cancelled,  // 已取消
}

db_enum!(AssignmentStatus, "assignment_status", {
    Pending => "pending",
    Ready => "ready",
    Queued => "queued",
    InProgress => "in_progress",
    Paused => "paused",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl AssignmentStatus {
    /// 是否终态（终态任务只作为历史保留）
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Completed | AssignmentStatus::Cancelled)
    }

    /// 是否处于等待开工（参与队列排序）
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::Pending | AssignmentStatus::Ready | AssignmentStatus::Queued
        )
    }
}

// ==========================================
// 排程模式 (Scheduling Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    #[default]
    Fifo,      // 先进先出
    Optimized, // 优化排程
}

db_enum!(SchedulingMode, "scheduling_mode", {
    Fifo => "fifo",
    Optimized => "optimized",
});

// ==========================================
// 工人状态 (Worker Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active,   // 在岗
    Inactive, // 停用
}

db_enum!(WorkerStatus, "worker_status", {
    Active => "active",
    Inactive => "inactive",
});

// ==========================================
// 物料预留状态 (Reservation Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Reserved,          // 已预留
    Consumed,          // 全部消耗
    PartiallyReleased, // 部分释放
    Released,          // 全部释放
}

db_enum!(ReservationStatus, "reservation_status", {
    Reserved => "reserved",
    Consumed => "consumed",
    PartiallyReleased => "partially_released",
    Released => "released",
});

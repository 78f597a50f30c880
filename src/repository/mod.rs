// ==========================================
// 生产执行核心 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约定: `*_tx` 关联函数在调用方的事务内执行,实例方法自行加锁
// ==========================================

pub mod action_log_repo;
pub mod assignment_repo;
pub mod error;
pub mod mapping;
pub mod master_data_repo;
pub mod occupancy_repo;
pub mod plan_repo;
pub mod stock_repo;
pub mod transaction;
pub mod work_order_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use assignment_repo::AssignmentRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use master_data_repo::MasterDataRepository;
pub use occupancy_repo::{OccupancyRepository, ReleasedOccupancy};
pub use plan_repo::PlanRepository;
pub use stock_repo::StockRepository;
pub use transaction::with_immediate_transaction;
pub use work_order_repo::WorkOrderRepository;

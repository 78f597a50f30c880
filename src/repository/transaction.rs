// ==========================================
// 生产执行核心 - 事务管理
// ==========================================
// 红线: 每个状态变更操作 = 一个 IMMEDIATE 事务
// 闭包返回 Err 时事务随 drop 回滚,不留部分写入
// ==========================================

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::Mutex;

use crate::repository::error::RepositoryError;

/// 在 IMMEDIATE 事务中执行闭包
///
/// - IMMEDIATE: 开始即获取写锁,两个并发状态迁移不会同时读到同一旧状态
/// - 闭包 Ok → 提交; Err → 回滚
pub fn with_immediate_transaction<T, E, F>(conn: &Mutex<Connection>, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<RepositoryError>,
{
    let mut guard = conn
        .lock()
        .map_err(|e| RepositoryError::LockError(e.to_string()))?;

    let tx = guard
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

    let value = f(&tx)?;

    tx.commit()
        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
    Ok(value)
}

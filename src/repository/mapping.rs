// ==========================================
// 生产执行核心 - 行映射辅助
// ==========================================
// 时间戳 <-> epoch 毫秒; 枚举列 <-> snake_case 字符串
// ==========================================

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use std::str::FromStr;

/// 时间戳转 epoch 毫秒
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn opt_to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(to_millis)
}

/// 读取毫秒时间戳列
pub fn get_ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("无效的时间戳: {}", ms).into(),
        )
    })
}

/// 读取可空毫秒时间戳列
pub fn get_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    match ms {
        None => Ok(None),
        Some(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(Some)
            .ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    Type::Integer,
                    format!("无效的时间戳: {}", ms).into(),
                )
            }),
    }
}

/// 读取枚举列
pub fn get_enum<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 读取可空枚举列
pub fn get_opt_enum<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

/// 生成 IN 子句占位符: "?,?,?"
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

// ==========================================
// 生产执行核心 - 命令行入口
// ==========================================
// 用法: production-execution [数据库路径]
// 打开（或创建）数据库,初始化表结构,输出当前配置
// ==========================================

use production_execution::config::ConfigManager;
use production_execution::{db, i18n, logging, VERSION};
use std::sync::{Arc, Mutex};

fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    logging::init();

    let db_path = std::env::args()
        .nth(1)
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(db::default_db_path);

    tracing::info!("==================================================");
    tracing::info!("生产执行核心 版本: {}", VERSION);
    tracing::info!("使用数据库: {}", db_path);
    tracing::info!("==================================================");

    let conn = db::open_sqlite_connection(&db_path)?;
    db::enable_wal(&conn)?;
    db::init_schema(&conn)?;

    let config_manager = ConfigManager::from_connection(Arc::new(Mutex::new(conn)));
    let config = config_manager.load_execution_config()?;
    tracing::info!(config = ?config, "执行配置已加载");

    println!(
        "{}",
        i18n::t_with_args("app.started", &[("version", VERSION), ("path", &db_path)])
    );
    println!("{}", config_manager.get_config_snapshot()?);
    Ok(())
}

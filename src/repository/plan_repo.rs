// ==========================================
// 生产执行核心 - 生产方案数据仓储
// ==========================================
// 对齐: production_plan / operation_node 表
// 节点的 material_inputs_json 采用宽松解析:
// 单个投入项损坏不影响整张方案的读取,由排程器按节点报告冲突
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::plan::{MaterialInput, OperationNode, PlanSummary, ProductionPlan};
use crate::domain::types::LaunchStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::mapping::{get_enum, get_opt_ts, get_ts, opt_to_millis, to_millis};

const SELECT_PLAN: &str = r#"
    SELECT plan_id, work_order_code, status, launch_status, launched_at, quantity,
           scheduling_mode, total_nodes, assigned_count, estimated_duration,
           parallel_paths, material_summary_json, summary_updated_at, created_at
    FROM production_plan
"#;

// ==========================================
// PlanRepository - 生产方案仓储
// ==========================================
pub struct PlanRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PlanRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入方案及其节点（方案定稿属于外部流程,这里供导入与测试使用）
    pub fn insert(&self, plan: &ProductionPlan) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        Self::insert_tx(&tx, plan)?;
        tx.commit()?;
        Ok(())
    }

    pub fn find_by_id(&self, plan_id: &str) -> RepositoryResult<Option<ProductionPlan>> {
        let conn = self.get_conn()?;
        Self::find_tx(&conn, plan_id)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn insert_tx(tx: &Connection, plan: &ProductionPlan) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO production_plan (
                plan_id, work_order_code, status, launch_status, launched_at, quantity,
                scheduling_mode, total_nodes, assigned_count, estimated_duration,
                parallel_paths, material_summary_json, summary_updated_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                plan.plan_id,
                plan.work_order_code,
                plan.status.as_db_str(),
                plan.launch_status.as_db_str(),
                opt_to_millis(plan.launched_at),
                plan.quantity,
                plan.scheduling_mode.as_db_str(),
                plan.summary.total_nodes,
                plan.summary.assigned_count,
                plan.summary.estimated_duration,
                plan.summary.parallel_paths,
                plan.summary.material_summary.as_ref().map(|v| v.to_string()),
                opt_to_millis(plan.summary.updated_at),
                to_millis(plan.created_at),
            ],
        )?;

        let mut stmt = tx.prepare(
            r#"
            INSERT INTO operation_node (
                plan_id, node_id, operation_id, output_code, output_quantity,
                material_inputs_json, predecessors_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;
        for node in &plan.nodes {
            let inputs = serde_json::to_string(&node.material_inputs)
                .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
            let predecessors = serde_json::to_string(&node.predecessors)
                .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
            stmt.execute(params![
                plan.plan_id,
                node.node_id,
                node.operation_id,
                node.output_code,
                node.output_quantity,
                inputs,
                predecessors,
            ])?;
        }
        Ok(())
    }

    /// 读取方案（含节点）
    pub fn find_tx(tx: &Connection, plan_id: &str) -> RepositoryResult<Option<ProductionPlan>> {
        let sql = format!("{} WHERE plan_id = ?1", SELECT_PLAN);
        let plan = tx.query_row(&sql, params![plan_id], map_plan_row).optional()?;
        match plan {
            None => Ok(None),
            Some(mut plan) => {
                plan.nodes = Self::nodes_tx(tx, plan_id)?;
                Ok(Some(plan))
            }
        }
    }

    /// 工单当前的生产用方案（未取消者优先,否则取最近创建的一张）
    pub fn find_active_for_work_order_tx(
        tx: &Connection,
        work_order_code: &str,
    ) -> RepositoryResult<Option<ProductionPlan>> {
        let sql = format!(
            "{} WHERE work_order_code = ?1 AND status = 'production'
             ORDER BY (launch_status = 'cancelled') ASC, created_at DESC
             LIMIT 1",
            SELECT_PLAN
        );
        let plan = tx
            .query_row(&sql, params![work_order_code], map_plan_row)
            .optional()?;
        match plan {
            None => Ok(None),
            Some(mut plan) => {
                plan.nodes = Self::nodes_tx(tx, &plan.plan_id)?;
                Ok(Some(plan))
            }
        }
    }

    pub fn nodes_tx(tx: &Connection, plan_id: &str) -> RepositoryResult<Vec<OperationNode>> {
        let mut stmt = tx.prepare(
            r#"
            SELECT node_id, operation_id, output_code, output_quantity,
                   material_inputs_json, predecessors_json
            FROM operation_node
            WHERE plan_id = ?1
            ORDER BY node_id
            "#,
        )?;

        let raw_rows = stmt
            .query_map(params![plan_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut nodes = Vec::with_capacity(raw_rows.len());
        for (node_id, operation_id, output_code, output_quantity, inputs_json, preds_json) in raw_rows {
            let predecessors: Vec<String> =
                serde_json::from_str(&preds_json).map_err(|e| RepositoryError::FieldValueError {
                    field: format!("operation_node[{}].predecessors_json", node_id),
                    message: e.to_string(),
                })?;
            let material_inputs = parse_material_inputs(&node_id, &inputs_json);

            nodes.push(OperationNode {
                node_id,
                operation_id,
                output_code,
                output_quantity,
                material_inputs,
                predecessors,
            });
        }
        Ok(nodes)
    }

    /// 条件更新下达状态
    pub fn update_launch_status_tx(
        tx: &Connection,
        plan_id: &str,
        expected: LaunchStatus,
        new_status: LaunchStatus,
        launched_at: Option<DateTime<Utc>>,
    ) -> RepositoryResult<()> {
        let rows = tx.execute(
            r#"
            UPDATE production_plan
            SET launch_status = ?1, launched_at = COALESCE(?2, launched_at)
            WHERE plan_id = ?3 AND launch_status = ?4
            "#,
            params![
                new_status.as_db_str(),
                opt_to_millis(launched_at),
                plan_id,
                expected.as_db_str(),
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::ConcurrentModification {
                entity: "ProductionPlan".to_string(),
                id: plan_id.to_string(),
                expected: expected.as_db_str().to_string(),
            });
        }
        Ok(())
    }

    /// 写回排程后的汇总字段
    pub fn update_summary_tx(tx: &Connection, plan_id: &str, summary: &PlanSummary) -> RepositoryResult<()> {
        tx.execute(
            r#"
            UPDATE production_plan
            SET total_nodes = ?1, assigned_count = ?2, estimated_duration = ?3,
                parallel_paths = ?4, material_summary_json = ?5, summary_updated_at = ?6
            WHERE plan_id = ?7
            "#,
            params![
                summary.total_nodes,
                summary.assigned_count,
                summary.estimated_duration,
                summary.parallel_paths,
                summary.material_summary.as_ref().map(|v| v.to_string()),
                opt_to_millis(summary.updated_at),
                plan_id,
            ],
        )?;
        Ok(())
    }
}

/// 解析节点投入物料; 整体 JSON 不可解析时返回一个损坏占位项
fn parse_material_inputs(node_id: &str, raw: &str) -> Vec<MaterialInput> {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Array(items)) => items.iter().map(MaterialInput::from_json_lenient).collect(),
        Ok(JsonValue::Null) => vec![],
        Ok(_) | Err(_) => {
            tracing::warn!(node_id = %node_id, raw = %raw, "节点投入物料 JSON 无法解析");
            vec![MaterialInput::new("", f64::NAN)]
        }
    }
}

fn map_plan_row(row: &Row) -> rusqlite::Result<ProductionPlan> {
    let material_summary: Option<String> = row.get(11)?;
    Ok(ProductionPlan {
        plan_id: row.get(0)?,
        work_order_code: row.get(1)?,
        status: get_enum(row, 2)?,
        launch_status: get_enum(row, 3)?,
        launched_at: get_opt_ts(row, 4)?,
        quantity: row.get(5)?,
        scheduling_mode: get_enum(row, 6)?,
        nodes: vec![],
        summary: PlanSummary {
            total_nodes: row.get(7)?,
            assigned_count: row.get(8)?,
            estimated_duration: row.get(9)?,
            parallel_paths: row.get(10)?,
            material_summary: material_summary.and_then(|s| serde_json::from_str(&s).ok()),
            updated_at: get_opt_ts(row, 12)?,
        },
        created_at: get_ts(row, 13)?,
    })
}

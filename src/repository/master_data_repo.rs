// ==========================================
// 生产执行核心 - 主数据只读仓储
// ==========================================
// 只读: 工人花名册、工序定义、工位/子工位能力
// ==========================================

use rusqlite::{params, Connection};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::master_data::{OperationDefinition, Substation, Worker};
use crate::repository::error::RepositoryResult;
use crate::repository::mapping::get_enum;

pub struct MasterDataRepository;

impl MasterDataRepository {
    /// 全部工人（含技能）,按 worker_id 排序
    pub fn workers_tx(tx: &Connection) -> RepositoryResult<Vec<Worker>> {
        let mut skills: HashMap<String, BTreeSet<String>> = HashMap::new();
        {
            let mut stmt = tx.prepare("SELECT worker_id, skill_code FROM worker_skill")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                let (worker_id, skill) = row?;
                skills.entry(worker_id).or_default().insert(skill);
            }
        }

        let mut stmt = tx.prepare(
            "SELECT worker_id, name, status, on_leave, efficiency FROM worker ORDER BY worker_id",
        )?;
        let workers = stmt
            .query_map([], |row| {
                Ok(Worker {
                    worker_id: row.get(0)?,
                    name: row.get(1)?,
                    status: get_enum(row, 2)?,
                    on_leave: row.get(3)?,
                    efficiency: row.get(4)?,
                    skills: BTreeSet::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(workers
            .into_iter()
            .map(|mut w| {
                w.skills = skills.remove(&w.worker_id).unwrap_or_default();
                w
            })
            .collect())
    }

    /// 工序定义（含技能要求）
    pub fn operations_tx(tx: &Connection) -> RepositoryResult<BTreeMap<String, OperationDefinition>> {
        let mut operations: BTreeMap<String, OperationDefinition> = BTreeMap::new();
        {
            let mut stmt = tx.prepare("SELECT operation_id, name, nominal_time FROM operation_def")?;
            let rows = stmt.query_map([], |row| {
                Ok(OperationDefinition {
                    operation_id: row.get(0)?,
                    name: row.get(1)?,
                    nominal_time: row.get(2)?,
                    required_skills: BTreeSet::new(),
                })
            })?;
            for op in rows {
                let op = op?;
                operations.insert(op.operation_id.clone(), op);
            }
        }

        let mut stmt = tx.prepare("SELECT operation_id, skill_code FROM operation_skill")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (operation_id, skill) = row?;
            if let Some(op) = operations.get_mut(&operation_id) {
                op.required_skills.insert(skill);
            }
        }
        Ok(operations)
    }

    /// 全部子工位（active = 子工位与所属工位均在用）
    pub fn substations_tx(tx: &Connection) -> RepositoryResult<Vec<Substation>> {
        let mut station_ops: HashMap<String, BTreeSet<String>> = HashMap::new();
        {
            let mut stmt = tx.prepare("SELECT station_id, operation_id FROM station_operation")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                let (station_id, operation_id) = row?;
                station_ops.entry(station_id).or_default().insert(operation_id);
            }
        }

        let mut stmt = tx.prepare(
            r#"
            SELECT ss.substation_id, ss.station_id,
                   (ss.status = 'active' AND s.status = 'active') AS active
            FROM substation ss
            JOIN station s ON s.station_id = ss.station_id
            ORDER BY ss.substation_id
            "#,
        )?;
        let substations = stmt
            .query_map(params![], |row| {
                let station_id: String = row.get(1)?;
                Ok(Substation {
                    substation_id: row.get(0)?,
                    operations: station_ops.get(&station_id).cloned().unwrap_or_default(),
                    station_id,
                    active: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(substations)
    }
}

// ==========================================
// 生产执行核心 - 物料齐套检查
// ==========================================
// 纯只读: 汇总方案物料需求并与库存比对
// 降级策略: 库存查询失败/超时 → {allAvailable:false, shortages:[], error},不抛错
// 本检查从不单独阻断下达
// ==========================================

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::material::{MaterialCheckResult, MaterialRequirement, MaterialShortage};
use crate::domain::plan::{MaterialInput, MaterialInputIssue, ProductionPlan};
use crate::repository::stock_repo::{StockRepository, QTY_EPSILON};

// ==========================================
// StockLookup - 外部库存查询
// ==========================================
#[async_trait]
pub trait StockLookup: Send + Sync {
    /// 物料当前可用量（无库存记录返回 None）
    async fn available_quantity(&self, material_code: &str) -> anyhow::Result<Option<f64>>;
}

#[async_trait]
impl StockLookup for StockRepository {
    async fn available_quantity(&self, material_code: &str) -> anyhow::Result<Option<f64>> {
        let repo = self.clone();
        let code = material_code.to_string();
        let qty = tokio::task::spawn_blocking(move || StockRepository::available_quantity(&repo, &code)).await??;
        Ok(qty)
    }
}

/// 汇总物料需求（按 material_code 累加,丢弃非正数/损坏项）
pub fn aggregate_requirements<'a, I>(inputs: I) -> Vec<MaterialRequirement>
where
    I: IntoIterator<Item = &'a MaterialInput>,
{
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for input in inputs {
        match input.issue() {
            None => *totals.entry(input.material_code.clone()).or_insert(0.0) += input.required_quantity,
            Some(MaterialInputIssue::NonPositive) => {}
            Some(MaterialInputIssue::Malformed(reason)) => {
                tracing::debug!(reason = %reason, "汇总时丢弃损坏的物料需求");
            }
        }
    }
    totals
        .into_iter()
        .map(|(material_code, required_quantity)| MaterialRequirement {
            material_code,
            required_quantity,
        })
        .collect()
}

/// 方案全部节点的物料需求
pub fn plan_requirements(plan: &ProductionPlan) -> Vec<MaterialRequirement> {
    aggregate_requirements(plan.nodes.iter().flat_map(|n| n.material_inputs.iter()))
}

/// 比对需求与可用量（缺失库存视为 0）
pub fn evaluate(
    requirements: &[MaterialRequirement],
    available: &HashMap<String, f64>,
    critical_ratio: f64,
) -> MaterialCheckResult {
    if requirements.is_empty() {
        return MaterialCheckResult::nothing_required();
    }

    let shortages: Vec<MaterialShortage> = requirements
        .iter()
        .filter_map(|req| {
            let avail = available.get(&req.material_code).copied().unwrap_or(0.0);
            let shortage = (req.required_quantity - avail).max(0.0);
            if shortage <= QTY_EPSILON {
                return None;
            }
            Some(MaterialShortage {
                material_code: req.material_code.clone(),
                required: req.required_quantity,
                available: avail,
                shortage,
                critical: shortage > critical_ratio * req.required_quantity,
            })
        })
        .collect();

    MaterialCheckResult {
        all_available: shortages.is_empty(),
        has_critical_shortages: shortages.iter().any(|s| s.critical),
        shortages,
        error: None,
    }
}

// ==========================================
// MaterialAvailabilityChecker - 物料齐套检查器
// ==========================================
pub struct MaterialAvailabilityChecker<S: StockLookup> {
    stock: Arc<S>,
    critical_ratio: f64,
    timeout: Duration,
}

impl<S: StockLookup> MaterialAvailabilityChecker<S> {
    pub fn new(stock: Arc<S>, critical_ratio: f64, timeout: Duration) -> Self {
        Self {
            stock,
            critical_ratio,
            timeout,
        }
    }

    /// 检查方案
    pub async fn check_plan(&self, plan: &ProductionPlan) -> MaterialCheckResult {
        self.check_requirements(&plan_requirements(plan)).await
    }

    /// 检查任意物料清单
    pub async fn check_materials(&self, materials: &[MaterialInput]) -> MaterialCheckResult {
        self.check_requirements(&aggregate_requirements(materials)).await
    }

    async fn check_requirements(&self, requirements: &[MaterialRequirement]) -> MaterialCheckResult {
        if requirements.is_empty() {
            return MaterialCheckResult::nothing_required();
        }

        let lookups = requirements.iter().map(|req| {
            let stock = self.stock.clone();
            let code = req.material_code.clone();
            async move {
                let qty = stock.available_quantity(&code).await;
                (code, qty)
            }
        });

        let results = match tokio::time::timeout(self.timeout, join_all(lookups)).await {
            Ok(results) => results,
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "库存查询超时，物料检查降级");
                return MaterialCheckResult::degraded(format!(
                    "库存查询超时（{}ms）",
                    self.timeout.as_millis()
                ));
            }
        };

        let mut available = HashMap::with_capacity(results.len());
        for (code, result) in results {
            match result {
                Ok(Some(qty)) => {
                    available.insert(code, qty);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(material_code = %code, error = %e, "库存查询失败，物料检查降级");
                    return MaterialCheckResult::degraded(format!("库存查询失败: {}", e));
                }
            }
        }

        evaluate(requirements, &available, self.critical_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedStock {
        quantities: HashMap<String, f64>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl StockLookup for FixedStock {
        async fn available_quantity(&self, material_code: &str) -> anyhow::Result<Option<f64>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("库存服务不可达");
            }
            Ok(self.quantities.get(material_code).copied())
        }
    }

    struct SlowStock;

    #[async_trait]
    impl StockLookup for SlowStock {
        async fn available_quantity(&self, _material_code: &str) -> anyhow::Result<Option<f64>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(100.0))
        }
    }

    fn checker(fail: bool) -> MaterialAvailabilityChecker<FixedStock> {
        let stock = FixedStock {
            quantities: HashMap::from([("M-1".to_string(), 10.0), ("M-2".to_string(), 3.0)]),
            fail: AtomicBool::new(fail),
        };
        MaterialAvailabilityChecker::new(Arc::new(stock), 0.5, Duration::from_millis(500))
    }

    #[test]
    fn test_aggregate_discards_invalid_entries() {
        let inputs = vec![
            MaterialInput::new("M-1", 2.0),
            MaterialInput::new("M-1", 3.0),
            MaterialInput::new("M-2", 0.0),
            MaterialInput::new("M-3", -1.0),
            MaterialInput::new("", 4.0),
            MaterialInput::new("M-4", f64::NAN),
        ];
        let reqs = aggregate_requirements(&inputs);
        assert_eq!(
            reqs,
            vec![MaterialRequirement {
                material_code: "M-1".to_string(),
                required_quantity: 5.0
            }]
        );
    }

    #[test]
    fn test_critical_threshold_is_strictly_greater_than_half() {
        let reqs = vec![
            MaterialRequirement { material_code: "M-1".to_string(), required_quantity: 10.0 },
            MaterialRequirement { material_code: "M-2".to_string(), required_quantity: 10.0 },
        ];
        let available = HashMap::from([("M-1".to_string(), 5.0), ("M-2".to_string(), 4.0)]);
        let result = evaluate(&reqs, &available, 0.5);
        assert!(!result.all_available);
        assert!(!result.shortages[0].critical); // shortage == 5 == 0.5 × 10
        assert!(result.shortages[1].critical);
        assert!(result.has_critical_shortages);
    }

    #[tokio::test]
    async fn test_nothing_required() {
        let result = checker(false).check_materials(&[]).await;
        assert!(result.all_available);
        assert!(result.shortages.is_empty());
    }

    #[tokio::test]
    async fn test_shortage_and_missing_stock() {
        let result = checker(false)
            .check_materials(&[MaterialInput::new("M-2", 4.0), MaterialInput::new("M-9", 1.0)])
            .await;
        assert_eq!(result.shortages.len(), 2);
        assert_eq!(result.shortages[0].material_code, "M-2");
        assert_eq!(result.shortages[0].shortage, 1.0);
        assert_eq!(result.shortages[1].available, 0.0);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades() {
        let result = checker(true).check_materials(&[MaterialInput::new("M-1", 1.0)]).await;
        assert!(!result.all_available);
        assert!(result.shortages.is_empty());
        assert!(result.is_degraded());
    }

    #[tokio::test]
    async fn test_timeout_degrades() {
        let checker = MaterialAvailabilityChecker::new(Arc::new(SlowStock), 0.5, Duration::from_millis(100));
        let result = checker.check_materials(&[MaterialInput::new("M-1", 1.0)]).await;
        assert!(result.is_degraded());
    }
}

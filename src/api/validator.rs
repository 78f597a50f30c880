// ==========================================
// 生产执行核心 - API 输入校验
// ==========================================
// 职责: 在进入引擎之前拒绝非法输入（无副作用）
// ==========================================

use serde_json::Value as JsonValue;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::material::CancellationProgress;
use crate::domain::plan::{MaterialInput, MaterialInputIssue};
use crate::domain::types::SchedulingMode;

/// 标识符必须非空
pub fn require_id<'a>(field: &str, value: &'a str) -> ApiResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidInput(format!("{}不能为空", field)));
    }
    Ok(trimmed)
}

/// 操作人缺省为 system
pub fn normalize_actor(actor: Option<&str>) -> String {
    actor
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("system")
        .to_string()
}

pub fn parse_scheduling_mode(value: &str) -> ApiResult<SchedulingMode> {
    value
        .trim()
        .to_ascii_lowercase()
        .parse::<SchedulingMode>()
        .map_err(|e| ApiError::InvalidInput(e.to_string()))
}

/// 取消进度: 数量必须为有限非负数
pub fn validate_progress(actual_output_quantity: f64, defect_quantity: f64) -> ApiResult<CancellationProgress> {
    for (field, value) in [
        ("actualOutputQuantity", actual_output_quantity),
        ("defectQuantity", defect_quantity),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ApiError::ValidationError(format!(
                "{}必须为非负数: {}",
                field, value
            )));
        }
    }
    Ok(CancellationProgress {
        actual_output_quantity,
        defect_quantity,
    })
}

/// 物料清单: 宽松解析,损坏项直接拒绝,非正数项保留（汇总时丢弃）
pub fn parse_materials(materials: &[JsonValue]) -> ApiResult<Vec<MaterialInput>> {
    let mut parsed = Vec::with_capacity(materials.len());
    for (index, raw) in materials.iter().enumerate() {
        let input = MaterialInput::from_json_lenient(raw);
        if let Some(MaterialInputIssue::Malformed(reason)) = input.issue() {
            return Err(ApiError::ValidationError(format!("第{}项物料: {}", index + 1, reason)));
        }
        parsed.push(input);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_id() {
        assert_eq!(require_id("planId", " P1 ").unwrap(), "P1");
        assert!(matches!(require_id("planId", "  "), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_progress_validation() {
        assert!(validate_progress(3.0, 0.0).is_ok());
        assert_eq!(validate_progress(-1.0, 0.0).unwrap_err().code(), "VALIDATION_ERROR");
        assert_eq!(validate_progress(1.0, f64::INFINITY).unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_parse_scheduling_mode() {
        assert_eq!(parse_scheduling_mode("FIFO").unwrap(), SchedulingMode::Fifo);
        assert_eq!(parse_scheduling_mode("optimized").unwrap(), SchedulingMode::Optimized);
        assert!(parse_scheduling_mode("random").is_err());
    }

    #[test]
    fn test_parse_materials() {
        let ok = parse_materials(&[json!({"materialCode": "M-1", "requiredQuantity": 2})]).unwrap();
        assert_eq!(ok, vec![MaterialInput::new("M-1", 2.0)]);
        assert!(parse_materials(&[json!({"materialCode": "M-1", "requiredQuantity": "x"})]).is_err());
        assert_eq!(normalize_actor(None), "system");
        assert_eq!(normalize_actor(Some(" ops ")), "ops");
    }
}

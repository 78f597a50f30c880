// ==========================================
// 国际化 (i18n) 模块
// ==========================================
// 使用 rust-i18n 库
// 支持中文（默认）、英文、土耳其语
// 领域枚举只提供 label_key,显示文案一律在此查表
// ==========================================
// 注意: rust_i18n::i18n! 宏已在 lib.rs 中初始化
// ==========================================

/// 支持的语言
pub const SUPPORTED_LOCALES: &[&str] = &["zh-CN", "en", "tr"];

/// 获取当前语言
pub fn current_locale() -> String {
    rust_i18n::locale().to_string()
}

/// 设置语言
///
/// # 参数
/// - locale: 语言代码（"zh-CN"、"en" 或 "tr"）
pub fn set_locale(locale: &str) {
    rust_i18n::set_locale(locale);
}

/// 翻译消息（无参数）
///
/// # 示例
/// ```no_run
/// use production_execution::i18n::t;
/// let msg = t("common.success");
/// ```
pub fn t(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// 翻译消息（带参数）
///
/// # 示例
/// ```no_run
/// use production_execution::i18n::t_with_args;
/// let msg = t_with_args("app.started", &[("version", "0.1.0"), ("path", "/tmp/mes.db")]);
/// ```
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    let mut result = rust_i18n::t!(key).to_string();
    for (k, v) in args {
        let placeholder = format!("%{{{}}}", k);
        result = result.replace(&placeholder, v);
    }
    result
}

/// 枚举显示标签（当前语言）
pub fn label(label_key: &str) -> String {
    t(label_key)
}

/// 枚举显示标签（指定语言,不改全局设置）
pub fn label_in(label_key: &str, locale: &str) -> String {
    rust_i18n::t!(label_key, locale = locale).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AssignmentStatus, ProductionState, ReservationStatus};
    use std::sync::Mutex;

    // rust-i18n 的 locale 为全局状态，且 Rust 测试默认并行执行；
    // 为避免测试互相干扰，这里对 i18n 相关测试串行化。
    static LOCALE_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_set_locale() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");
        assert_eq!(current_locale(), "en");

        // 恢复默认语言
        set_locale("zh-CN");
        assert_eq!(current_locale(), "zh-CN");
    }

    #[test]
    fn test_translate_simple() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("zh-CN");
        assert_eq!(t("common.success"), "操作成功");

        set_locale("en");
        assert_eq!(t("common.success"), "Operation successful");

        set_locale("zh-CN");
    }

    #[test]
    fn test_translate_with_args() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");
        let msg = t_with_args("app.started", &[("version", "0.1.0"), ("path", "/tmp/mes.db")]);
        assert!(msg.contains("0.1.0"));
        assert!(msg.contains("/tmp/mes.db"));

        set_locale("zh-CN");
    }

    #[test]
    fn test_every_state_has_a_label_in_every_locale() {
        for locale in SUPPORTED_LOCALES {
            for state in ProductionState::all() {
                let text = label_in(state.label_key(), locale);
                assert_ne!(text, state.label_key(), "{} 缺少 {}", locale, state.label_key());
            }
            for status in AssignmentStatus::all() {
                let text = label_in(status.label_key(), locale);
                assert_ne!(text, status.label_key(), "{} 缺少 {}", locale, status.label_key());
            }
            for status in ReservationStatus::all() {
                let text = label_in(status.label_key(), locale);
                assert_ne!(text, status.label_key());
            }
        }
    }

    #[test]
    fn test_labels_differ_from_domain_values() {
        assert_eq!(label_in(ProductionState::InProduction.label_key(), "tr"), "Üretimde");
        assert_eq!(label_in(ProductionState::InProduction.label_key(), "zh-CN"), "生产中");
        assert_eq!(
            label_in(AssignmentStatus::InProgress.label_key(), "en"),
            "In progress"
        );
    }
}

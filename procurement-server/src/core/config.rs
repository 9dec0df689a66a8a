use shared::models::OrderStatus;
use std::time::Duration;

use crate::db::RetryPolicy;

/// 服务器配置 - 采购协调服务的所有配置项
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | ./data | 工作目录 |
/// | DATABASE_PATH | {WORK_DIR}/procurement.db | SQLite 文件 |
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (none) | 日志目录, 存在时写入按天滚动文件 |
/// | DB_MAX_CONNECTIONS | 5 | 连接池大小 |
/// | DB_BUSY_TIMEOUT_MS | 5000 | SQLite busy_timeout |
/// | RETRY_MAX_ATTEMPTS | 5 | busy 重试次数 |
/// | RETRY_BASE_DELAY_MS | 20 | 首次重试延迟 |
/// | RETRY_MAX_DELAY_MS | 500 | 单次重试延迟上限 |
/// | RETRY_CALL_BUDGET_MS | (none) | 单次调用截止时间 |
/// | CONSOLIDATION_WINDOW_DAYS | 7 | 合并窗口(天) |
/// | CONSOLIDATION_STATUSES | SENT | 参与合并的订单状态, 逗号分隔 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/procurement HTTP_PORT=8080 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储数据库、日志等文件
    pub work_dir: String,
    pub database_path: String,
    /// HTTP API 服务端口
    pub http_port: u16,
    /// 运行环境: development | staging | production
    pub environment: String,
    pub log_level: String,
    pub log_dir: Option<String>,

    // === 存储 ===
    pub db_max_connections: u32,
    pub db_busy_timeout_ms: u64,
    pub retry: RetryPolicy,

    // === 合并 ===
    pub consolidation_window_days: i64,
    pub consolidation_statuses: Vec<OrderStatus>,
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Comma separated status list; unknown names are skipped
fn parse_statuses(value: Option<String>) -> Vec<OrderStatus> {
    let statuses: Vec<OrderStatus> = value
        .as_deref()
        .unwrap_or("SENT")
        .split(',')
        .filter_map(OrderStatus::parse)
        .collect();
    if statuses.is_empty() {
        vec![OrderStatus::Sent]
    } else {
        statuses
    }
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, map in tests)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let work_dir = lookup("WORK_DIR").unwrap_or_else(|| "./data".into());
        let database_path =
            lookup("DATABASE_PATH").unwrap_or_else(|| format!("{work_dir}/procurement.db"));
        let defaults = RetryPolicy::default();

        Self {
            database_path,
            http_port: parse_or(lookup("HTTP_PORT"), 3000),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".into()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_dir: lookup("LOG_DIR").filter(|d| !d.trim().is_empty()),
            db_max_connections: parse_or(lookup("DB_MAX_CONNECTIONS"), 5),
            db_busy_timeout_ms: parse_or(lookup("DB_BUSY_TIMEOUT_MS"), 5000),
            retry: RetryPolicy {
                max_attempts: parse_or(lookup("RETRY_MAX_ATTEMPTS"), defaults.max_attempts),
                base_delay: Duration::from_millis(parse_or(lookup("RETRY_BASE_DELAY_MS"), 20)),
                max_delay: Duration::from_millis(parse_or(lookup("RETRY_MAX_DELAY_MS"), 500)),
                call_budget: lookup("RETRY_CALL_BUDGET_MS")
                    .and_then(|v| v.trim().parse().ok())
                    .map(Duration::from_millis),
            },
            consolidation_window_days: parse_or(lookup("CONSOLIDATION_WINDOW_DAYS"), 7),
            consolidation_statuses: parse_statuses(lookup("CONSOLIDATION_STATUSES")),
            work_dir,
        }
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否开发环境
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.work_dir, "./data");
        assert_eq!(config.database_path, "./data/procurement.db");
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.consolidation_window_days, 7);
        assert_eq!(config.consolidation_statuses, vec![OrderStatus::Sent]);
        assert!(config.is_development());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("WORK_DIR", "/srv/p"),
            ("HTTP_PORT", "8080"),
            ("RETRY_MAX_ATTEMPTS", "3"),
            ("RETRY_CALL_BUDGET_MS", "250"),
            ("CONSOLIDATION_STATUSES", "sent, processing,bogus"),
            ("ENVIRONMENT", "production"),
        ]);
        assert_eq!(config.database_path, "/srv/p/procurement.db");
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.call_budget, Some(Duration::from_millis(250)));
        assert_eq!(
            config.consolidation_statuses,
            vec![OrderStatus::Sent, OrderStatus::Processing]
        );
        assert!(config.is_production());
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let config = config(&[("HTTP_PORT", "eighty"), ("CONSOLIDATION_STATUSES", "")]);
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.consolidation_statuses, vec![OrderStatus::Sent]);
    }
}

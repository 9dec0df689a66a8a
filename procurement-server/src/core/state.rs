use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::Config;
use crate::db::DbService;
use crate::orders::OrderStore;
use crate::pricing::PriceHistoryRecorder;
use crate::purchasing::{ConsolidationEngine, PurchaseLedger};
use crate::services::{SharedClock, SharedNotifier, SystemClock, TracingNotifier};
use crate::utils::AppError;

/// 服务器状态 - 持有所有服务的单例引用
///
/// 所有服务共享同一个连接池，克隆成本极低 (内部均为 Arc / 连接池句柄)。
///
/// | 字段 | 类型 | 说明 |
/// |------|------|------|
/// | config | Config | 配置项 (不可变) |
/// | pool | SqlitePool | SQLite 连接池 |
/// | orders | OrderStore | 订单与状态机 |
/// | consolidation | ConsolidationEngine | 合并采购批次 |
/// | ledger | PurchaseLedger | 采购记录与成本分摊 |
/// | prices | PriceHistoryRecorder | 价格历史 |
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub pool: SqlitePool,
    pub orders: OrderStore,
    pub consolidation: ConsolidationEngine,
    pub ledger: PurchaseLedger,
    pub prices: PriceHistoryRecorder,
}

impl ServerState {
    /// 用已打开的连接池和注入的时钟/通知出口组装服务
    pub fn new(
        config: Config,
        pool: SqlitePool,
        clock: SharedClock,
        notifier: SharedNotifier,
    ) -> Self {
        let retry = config.retry.clone();
        let consolidation = ConsolidationEngine::new(pool.clone(), clock.clone())
            .with_window_days(config.consolidation_window_days)
            .with_default_statuses(config.consolidation_statuses.clone());
        let orders = OrderStore::new(pool.clone(), clock.clone(), notifier.clone())
            .with_retry_policy(retry.clone());
        let ledger = PurchaseLedger::new(pool.clone(), clock.clone(), notifier, consolidation.clone())
            .with_retry_policy(retry.clone());
        let prices = PriceHistoryRecorder::new(pool.clone(), clock).with_retry_policy(retry);

        Self {
            config,
            pool,
            orders,
            consolidation,
            ledger,
            prices,
        }
    }

    /// 初始化服务器状态
    ///
    /// 1. 创建工作目录
    /// 2. 打开数据库 (WAL) 并执行迁移
    /// 3. 组装服务 (系统时钟 + 日志通知)
    pub async fn initialize(config: &Config) -> Result<Self, AppError> {
        std::fs::create_dir_all(&config.work_dir).map_err(|e| {
            AppError::internal(format!("Failed to create work dir {}: {e}", config.work_dir))
        })?;

        let db = DbService::new(
            &config.database_path,
            config.db_max_connections,
            config.db_busy_timeout_ms,
        )
        .await?;

        Ok(Self::new(
            config.clone(),
            db.pool,
            Arc::new(SystemClock),
            Arc::new(TracingNotifier),
        ))
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.work_dir)
    }
}

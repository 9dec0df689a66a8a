//! Procurement Server - 餐厅采购协调服务
//!
//! # 架构概述
//!
//! 多家餐厅提交采购订单，服务端把相同商品的需求合并为批次 (lot)，
//! 采购员认领批次、录入实际采购结果后，按数量比例把成本分摊回每个订单行。
//!
//! - **订单** (`orders`): 订单、明细与状态机
//! - **采购** (`purchasing`): 批次合并、采购记录与成本分摊
//! - **价格** (`pricing`): 价格历史、趋势与毛利
//! - **数据库** (`db`): SQLite (WAL) + 忙重试
//! - **HTTP API** (`api`): RESTful 接口
//!
//! # 模块结构
//!
//! ```text
//! procurement-server/src/
//! ├── core/          # 配置、状态、错误、服务器
//! ├── db/            # 连接池、迁移、仓储、重试
//! ├── orders/        # OrderStore、汇总、金额
//! ├── purchasing/    # ConsolidationEngine、PurchaseLedger、录入流程
//! ├── pricing/       # PriceHistoryRecorder
//! ├── services/      # 时钟、通知出口
//! ├── api/           # HTTP 路由和处理器
//! └── utils/         # 日志等工具
//! ```

pub mod api;
pub mod core;
pub mod db;
pub mod orders;
pub mod pricing;
pub mod purchasing;
pub mod services;
pub mod utils;

// Re-export 公共类型
pub use core::{Config, ErrorKind, PurchasingError, Server, ServerState};
pub use orders::OrderStore;
pub use pricing::PriceHistoryRecorder;
pub use purchasing::{ConsolidationEngine, PurchaseLedger};
pub use utils::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};

pub use utils::logger::{init_logger, init_logger_with_file};

/// 设置运行环境: 加载 .env、初始化日志
///
/// 日志目录不存在时只输出到终端。
pub fn setup_environment() -> Config {
    let _ = dotenv::dotenv();
    let config = Config::from_env();
    init_logger_with_file(Some(&config.log_level), config.log_dir.as_deref());
    config
}

pub fn print_banner() {
    println!(
        r#"
    ____                                                    __
   / __ \_________  _______  __________  ____ ___  ___  ____  / /_
  / /_/ / ___/ __ \/ ___/ / / / ___/ _ \/ __ `__ \/ _ \/ __ \/ __/
 / ____/ /  / /_/ / /__/ /_/ / /  /  __/ / / / / /  __/ / / / /_
/_/   /_/   \____/\___/\__,_/_/   \___/_/ /_/ /_/\___/_/ /_/\__/
    "#
    );
}

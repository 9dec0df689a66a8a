//! 服务层 - 注入到核心服务的外部依赖
//!
//! # 服务列表
//!
//! - [`Clock`] - 时间源 (生产: [`SystemClock`], 测试: [`ManualClock`])
//! - [`NotificationPort`] - 通知出口 (生产: [`TracingNotifier`], 测试: [`RecordingNotifier`])

pub mod clock;
pub mod notification;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use notification::{
    NotificationPort, RecordingNotifier, SharedNotifier, TracingNotifier, notify_quietly,
};

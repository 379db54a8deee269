//! 部署协调
//!
//! 包含部署协调引擎的核心组件：
//! - 部署选项与快照更新策略
//! - 部署计划与刷新集合计算
//! - 批量启停顺序
//! - 分阶段执行器与单工作者任务队列

/// 按 `verbose` 选项在 info 与 debug 级别之间切换的部署日志
macro_rules! deploy_log {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

pub mod executor;
pub mod lifecycle;
pub mod options;
pub mod plan;
pub mod refresh;
pub mod worker;

// 重导出常用类型
pub use executor::{ConfigInstaller, Deployer, DeploymentReport, DeploymentRequest};
pub use options::{DeployOptions, UpdateSnapshots};
pub use plan::{Deployment, DeploymentPlanner, PlanSummary};
pub use refresh::compute_refresh_set;
pub use worker::DeployWorker;

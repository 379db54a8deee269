//! 核心模块
//!
//! 包含特性服务的配置。

pub mod config;

pub use config::{DeploymentConfig, FeaturesConfig, FeaturesConfigBuilder, LogConfig, StateConfig};

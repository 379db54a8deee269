//! 工具模块
//!
//! 包含错误类型、日志系统与内容校验和等通用工具。

pub mod checksum;
pub mod error;
pub mod logger;

// 重导出常用类型
pub use error::{error_code, CoreError, DeployPhase, ModuleFailure, Result};
pub use logger::{FileOutput, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

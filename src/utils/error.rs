//! 特性服务错误类型定义
//!
//! 本模块定义了部署协调过程中使用的所有错误类型。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 部署阶段
///
/// 每个模块级失败都会附带其发生的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    /// 解析
    Resolve,
    /// 计划
    Plan,
    /// 停止
    Stop,
    /// 卸载
    Uninstall,
    /// 更新
    Update,
    /// 安装
    Install,
    /// 持久化
    Persist,
    /// 刷新
    Refresh,
    /// 启动
    Start,
    /// 通知
    Notify,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployPhase::Resolve => "resolve",
            DeployPhase::Plan => "plan",
            DeployPhase::Stop => "stop",
            DeployPhase::Uninstall => "uninstall",
            DeployPhase::Update => "update",
            DeployPhase::Install => "install",
            DeployPhase::Persist => "persist",
            DeployPhase::Refresh => "refresh",
            DeployPhase::Start => "start",
            DeployPhase::Notify => "notify",
        };
        f.write_str(name)
    }
}

/// 单个模块操作失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFailure {
    /// 失败阶段
    pub phase: DeployPhase,
    /// 模块描述（标识或位置）
    pub module: String,
    /// 失败原因
    pub error: String,
}

impl fmt::Display for ModuleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.phase, self.module, self.error)
    }
}

fn join_failures(failures: &[ModuleFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 特性服务核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 特性错误 ====================

    /// 特性未找到
    #[error("特性未找到: '{0}'")]
    FeatureNotFound(String),

    /// 特性未安装
    #[error("特性未安装: '{0}'")]
    FeatureNotInstalled(String),

    /// 卸载请求存在歧义
    #[error("特性 '{name}' 安装了多个版本: {versions:?}，请指定版本")]
    AmbiguousUninstall {
        name: String,
        versions: Vec<String>,
    },

    /// 仓库加载失败
    #[error("仓库加载失败: '{uri}' - {reason}")]
    RepositoryLoadFailed {
        uri: String,
        reason: String,
    },

    /// 仓库未注册
    #[error("仓库未注册: '{0}'")]
    RepositoryNotFound(String),

    // ==================== 解析错误 ====================

    /// 依赖解析失败
    #[error("依赖解析失败: {0}")]
    ResolutionFailed(String),

    /// 无效版本
    #[error("无效版本: '{0}'")]
    InvalidVersion(String),

    /// 无效版本范围
    #[error("无效版本范围: '{range}' - {reason}")]
    InvalidVersionRange {
        range: String,
        reason: String,
    },

    // ==================== 部署执行错误 ====================

    /// 单个模块操作失败
    #[error("模块操作失败 [{phase}]: '{module}' - {reason}")]
    ModuleOperation {
        phase: DeployPhase,
        module: String,
        reason: String,
    },

    /// 模块未找到
    #[error("模块未找到: {0}")]
    ModuleNotFound(u64),

    /// 部署聚合错误
    #[error("{message}: {}", join_failures(.failures))]
    Deployment {
        message: String,
        failures: Vec<ModuleFailure>,
    },

    /// 刷新等待被中断
    #[error("刷新等待被中断: {0}")]
    Interrupted(String),

    /// 状态持久化失败
    #[error("状态持久化失败: {0}")]
    Persistence(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 操作被取消
    #[error("操作被取消")]
    Cancelled,

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 特性服务操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 特性错误 (FEATURE-xxx)
    pub const FEATURE_NOT_FOUND: &str = "FEATURE-001";
    pub const FEATURE_NOT_INSTALLED: &str = "FEATURE-002";
    pub const FEATURE_AMBIGUOUS_UNINSTALL: &str = "FEATURE-003";

    // 仓库错误 (REPOSITORY-xxx)
    pub const REPOSITORY_LOAD_FAILED: &str = "REPOSITORY-001";
    pub const REPOSITORY_NOT_FOUND: &str = "REPOSITORY-002";

    // 解析错误 (RESOLVE-xxx)
    pub const RESOLUTION_FAILED: &str = "RESOLVE-001";
    pub const INVALID_VERSION: &str = "RESOLVE-002";

    // 部署错误 (DEPLOY-xxx)
    pub const DEPLOY_MODULE_FAILED: &str = "DEPLOY-001";
    pub const DEPLOY_AGGREGATE: &str = "DEPLOY-002";
    pub const DEPLOY_INTERRUPTED: &str = "DEPLOY-003";
    pub const DEPLOY_CANCELLED: &str = "DEPLOY-004";

    // 状态错误 (STATE-xxx)
    pub const STATE_PERSIST_FAILED: &str = "STATE-001";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::FeatureNotFound(_) => error_code::FEATURE_NOT_FOUND,
            CoreError::FeatureNotInstalled(_) => error_code::FEATURE_NOT_INSTALLED,
            CoreError::AmbiguousUninstall { .. } => error_code::FEATURE_AMBIGUOUS_UNINSTALL,
            CoreError::RepositoryLoadFailed { .. } => error_code::REPOSITORY_LOAD_FAILED,
            CoreError::RepositoryNotFound(_) => error_code::REPOSITORY_NOT_FOUND,
            CoreError::ResolutionFailed(_) => error_code::RESOLUTION_FAILED,
            CoreError::InvalidVersion(_)
            | CoreError::InvalidVersionRange { .. }
            | CoreError::VersionParse(_) => error_code::INVALID_VERSION,
            CoreError::ModuleOperation { .. } | CoreError::ModuleNotFound(_) => {
                error_code::DEPLOY_MODULE_FAILED
            }
            CoreError::Deployment { .. } => error_code::DEPLOY_AGGREGATE,
            CoreError::Interrupted(_) => error_code::DEPLOY_INTERRUPTED,
            CoreError::Cancelled => error_code::DEPLOY_CANCELLED,
            CoreError::Persistence(_) => error_code::STATE_PERSIST_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 构造模块操作错误
    pub fn module_operation(
        phase: DeployPhase,
        module: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        CoreError::ModuleOperation {
            phase,
            module: module.into(),
            reason: reason.to_string(),
        }
    }

    /// 是否在任何变更之前就已失败
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            CoreError::FeatureNotFound(_)
                | CoreError::FeatureNotInstalled(_)
                | CoreError::AmbiguousUninstall { .. }
                | CoreError::ResolutionFailed(_)
                | CoreError::Cancelled
        )
    }

    /// 聚合错误中的模块级失败
    pub fn failures(&self) -> &[ModuleFailure] {
        match self {
            CoreError::Deployment { failures, .. } => failures,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::FeatureNotFound("webconsole/1.0.0".to_string());
        assert!(err.to_string().contains("webconsole/1.0.0"));
    }

    #[test]
    fn test_error_code() {
        let err = CoreError::AmbiguousUninstall {
            name: "web".to_string(),
            versions: vec!["1.0.0".to_string(), "2.0.0".to_string()],
        };
        assert_eq!(err.error_code(), error_code::FEATURE_AMBIGUOUS_UNINSTALL);
        assert!(err.is_pre_mutation());
    }

    #[test]
    fn test_deployment_aggregate_lists_every_failure() {
        let err = CoreError::Deployment {
            message: "启动模块时出错".to_string(),
            failures: vec![
                ModuleFailure {
                    phase: DeployPhase::Start,
                    module: "7".to_string(),
                    error: "activator threw".to_string(),
                },
                ModuleFailure {
                    phase: DeployPhase::Install,
                    module: "mvn:org/b/1.0".to_string(),
                    error: "corrupt archive".to_string(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("[start] 7: activator threw"));
        assert!(text.contains("[install] mvn:org/b/1.0"));
        assert_eq!(err.failures().len(), 2);
        assert!(!err.is_pre_mutation());
    }

    #[test]
    fn test_module_operation() {
        let err = CoreError::module_operation(DeployPhase::Refresh, "a/1.0.0", "wiring changed");
        assert_eq!(err.to_string(), "模块操作失败 [refresh]: 'a/1.0.0' - wiring changed");
        assert_eq!(err.error_code(), error_code::DEPLOY_MODULE_FAILED);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();
        assert!(matches!(core_err, CoreError::Io(_)));
    }
}

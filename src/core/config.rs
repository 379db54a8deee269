//! 特性服务配置
//!
//! 定义特性服务的配置结构和加载逻辑。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::deploy::options::UpdateSnapshots;
use crate::feature::model::FeatureId;
use crate::module::metadata::ModuleId;
use crate::module::version::{RangeTemplate, DEFAULT_UPDATE_RANGE};
use crate::utils::logger::RotationStrategy;
use crate::utils::{CoreError, Result};

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留日志文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

/// 部署配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// 快照制品的更新检测策略
    #[serde(default)]
    pub update_snapshots: UpdateSnapshots,

    /// 以更新代替重装时使用的版本范围模板
    #[serde(default = "default_update_range")]
    pub module_update_range: String,

    /// 内容不可变的位置前缀
    #[serde(default = "default_immutable_schemes")]
    pub immutable_schemes: Vec<String>,

    /// 首次启动时安装的特性
    #[serde(default)]
    pub boot_features: Vec<String>,

    /// 特性服务自身所在的模块
    #[serde(default)]
    pub owner_module: Option<ModuleId>,
}

fn default_update_range() -> String {
    DEFAULT_UPDATE_RANGE.to_string()
}

fn default_immutable_schemes() -> Vec<String> {
    vec!["mvn:".to_string()]
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            update_snapshots: UpdateSnapshots::default(),
            module_update_range: default_update_range(),
            immutable_schemes: default_immutable_schemes(),
            boot_features: vec![],
            owner_module: None,
        }
    }
}

impl DeploymentConfig {
    /// 解析版本范围模板
    pub fn update_range(&self) -> Result<RangeTemplate> {
        RangeTemplate::parse(&self.module_update_range).map_err(|e| CoreError::InvalidConfigValue {
            key: "deployment.module_update_range".to_string(),
            reason: e.to_string(),
        })
    }

    /// 解析启动特性
    pub fn boot_feature_ids(&self) -> Result<Vec<FeatureId>> {
        self.boot_features
            .iter()
            .map(|s| {
                FeatureId::parse(s).map_err(|e| CoreError::InvalidConfigValue {
                    key: "deployment.boot_features".to_string(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

/// 状态存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    /// 状态文件路径
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/features-state.json")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// 特性服务配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 部署配置
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// 状态存储配置
    #[serde(default)]
    pub state: StateConfig,
}

impl FeaturesConfig {
    /// 创建配置构建器
    pub fn builder() -> FeaturesConfigBuilder {
        FeaturesConfigBuilder::new()
    }

    /// 从文件加载配置
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {e}", path.display())))?;

        let mut config: FeaturesConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.config_path = Some(path);
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        self.deployment.update_range()?;
        self.deployment.boot_feature_ids()?;
        if self.deployment.immutable_schemes.iter().any(|s| s.trim().is_empty()) {
            return Err(CoreError::InvalidConfigValue {
                key: "deployment.immutable_schemes".to_string(),
                reason: "不能包含空前缀".to_string(),
            });
        }
        self.logging.rotation.parse::<RotationStrategy>()?;
        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: FeaturesConfig) {
        // 只覆盖非默认值的配置
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.deployment.update_snapshots != UpdateSnapshots::default() {
            self.deployment.update_snapshots = other.deployment.update_snapshots;
        }
        if other.deployment.module_update_range != default_update_range() {
            self.deployment.module_update_range = other.deployment.module_update_range;
        }
        if other.deployment.immutable_schemes != default_immutable_schemes() {
            self.deployment.immutable_schemes = other.deployment.immutable_schemes;
        }
        for feature in other.deployment.boot_features {
            if !self.deployment.boot_features.contains(&feature) {
                self.deployment.boot_features.push(feature);
            }
        }
        if other.deployment.owner_module.is_some() {
            self.deployment.owner_module = other.deployment.owner_module;
        }
        if other.state.path != default_state_path() {
            self.state.path = other.state.path;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct FeaturesConfigBuilder {
    config: FeaturesConfig,
}

impl FeaturesConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: FeaturesConfig::default(),
        }
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置更新检测策略
    pub fn update_snapshots(mut self, policy: UpdateSnapshots) -> Self {
        self.config.deployment.update_snapshots = policy;
        self
    }

    /// 设置版本范围模板
    pub fn module_update_range(mut self, range: impl Into<String>) -> Self {
        self.config.deployment.module_update_range = range.into();
        self
    }

    /// 设置不可变位置前缀
    pub fn immutable_schemes(mut self, schemes: Vec<String>) -> Self {
        self.config.deployment.immutable_schemes = schemes;
        self
    }

    /// 添加启动特性
    pub fn boot_feature(mut self, feature: impl Into<String>) -> Self {
        self.config.deployment.boot_features.push(feature.into());
        self
    }

    /// 设置特性服务自身所在的模块
    pub fn owner_module(mut self, id: impl Into<ModuleId>) -> Self {
        self.config.deployment.owner_module = Some(id.into());
        self
    }

    /// 设置状态文件路径
    pub fn state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.state.path = path.into();
        self
    }

    /// 构建配置
    pub fn build(self) -> FeaturesConfig {
        self.config
    }
}

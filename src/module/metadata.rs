//! 模块元数据定义
//!
//! 定义运行时中已安装模块的快照数据结构：标识、状态、能力与需求、
//! 布线边以及服务引用。

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use super::version::{parse_version, VersionRange};

/// 模块标识
///
/// 由运行时在安装时分配，在模块生命周期内保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u64);

impl ModuleId {
    /// 系统模块（运行时自身），永远不参与部署
    pub const SYSTEM: ModuleId = ModuleId(0);

    /// 是否为系统模块
    pub fn is_system(&self) -> bool {
        *self == Self::SYSTEM
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ModuleId {
    fn from(value: u64) -> Self {
        ModuleId(value)
    }
}

/// 模块生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// 已安装，尚未解析
    Installed,
    /// 已解析
    Resolved,
    /// 启动中
    Starting,
    /// 运行中
    Active,
    /// 停止中
    Stopping,
    /// 已卸载
    Uninstalled,
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::Installed
    }
}

impl ModuleState {
    /// 是否需要显式停止（启动中的模块交给运行时处理）
    pub fn needs_stop(&self) -> bool {
        !matches!(
            self,
            ModuleState::Uninstalled
                | ModuleState::Resolved
                | ModuleState::Starting
                | ModuleState::Stopping
        )
    }

    /// 是否需要显式启动
    pub fn needs_start(&self) -> bool {
        !matches!(
            self,
            ModuleState::Uninstalled | ModuleState::Active | ModuleState::Starting
        )
    }

    /// 是否处于运行中
    pub fn is_running(&self) -> bool {
        matches!(self, ModuleState::Active | ModuleState::Starting)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Installed => "installed",
            ModuleState::Resolved => "resolved",
            ModuleState::Starting => "starting",
            ModuleState::Active => "active",
            ModuleState::Stopping => "stopping",
            ModuleState::Uninstalled => "uninstalled",
        };
        f.write_str(name)
    }
}

/// 未显式设置时模块所在的启动级别
pub const DEFAULT_START_LEVEL: u32 = 80;

fn default_start_level() -> u32 {
    DEFAULT_START_LEVEL
}

/// 能力中表示版本的属性名
pub const VERSION_ATTRIBUTE: &str = "version";

/// 模块提供的能力
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// 命名空间
    pub namespace: String,

    /// 属性
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Capability {
    /// 创建能力
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// 添加属性
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// 能力版本（未声明时为 `None`）
    pub fn version(&self) -> Option<Version> {
        self.attributes
            .get(VERSION_ATTRIBUTE)
            .and_then(|v| parse_version(v).ok())
    }
}

/// 模块声明的需求
///
/// 过滤条件中的每个属性都必须与能力属性相等；若给出版本范围，
/// 能力的 `version` 属性必须落在范围内。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// 命名空间
    pub namespace: String,

    /// 属性过滤条件
    #[serde(default)]
    pub filter: BTreeMap<String, String>,

    /// 版本范围
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionRange>,
}

impl Requirement {
    /// 创建需求
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            filter: BTreeMap::new(),
            version: None,
        }
    }

    /// 添加过滤属性
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    /// 设置版本范围
    pub fn with_version(mut self, range: VersionRange) -> Self {
        self.version = Some(range);
        self
    }

    /// 能力是否满足此需求
    pub fn matches(&self, capability: &Capability) -> bool {
        if self.namespace != capability.namespace {
            return false;
        }
        let attributes_match = self
            .filter
            .iter()
            .all(|(key, value)| capability.attributes.get(key) == Some(value));
        if !attributes_match {
            return false;
        }
        match &self.version {
            Some(range) => capability
                .version()
                .map(|version| range.includes(&version))
                .unwrap_or(false),
            None => true,
        }
    }
}

/// 运行时中的已安装模块快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// 模块标识
    pub id: ModuleId,

    /// 符号名（out-of-band 安装的模块可能没有）
    #[serde(default)]
    pub symbolic_name: Option<String>,

    /// 版本
    pub version: Version,

    /// 来源位置
    pub location: String,

    /// 生命周期状态
    #[serde(default)]
    pub state: ModuleState,

    /// 声明的需求
    #[serde(default)]
    pub requirements: Vec<Requirement>,

    /// 提供的能力
    #[serde(default)]
    pub capabilities: Vec<Capability>,

    /// 是否为片段模块（没有独立生命周期）
    #[serde(default)]
    pub fragment: bool,

    /// 启动级别
    #[serde(default = "default_start_level")]
    pub start_level: u32,

    /// 最后修改时间
    pub last_modified: DateTime<Utc>,
}

impl Module {
    /// 创建模块快照
    pub fn new(
        id: impl Into<ModuleId>,
        symbolic_name: impl Into<String>,
        version: Version,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            symbolic_name: Some(symbolic_name.into()),
            version,
            location: location.into(),
            state: ModuleState::Installed,
            requirements: Vec::new(),
            capabilities: Vec::new(),
            fragment: false,
            start_level: DEFAULT_START_LEVEL,
            last_modified: Utc::now(),
        }
    }

    /// 可读名称 `name/version`
    pub fn display_name(&self) -> String {
        match &self.symbolic_name {
            Some(name) => format!("{}/{}", name, self.version),
            None => format!("#{}", self.id),
        }
    }

    /// 是否可以被显式停止
    pub fn is_stoppable(&self) -> bool {
        !self.fragment && self.state.needs_stop()
    }

    /// 是否可以被显式启动
    pub fn is_startable(&self) -> bool {
        !self.fragment && self.state.needs_start()
    }

    /// 是否有任何能力满足需求
    pub fn provides(&self, requirement: &Requirement) -> bool {
        self.capabilities.iter().any(|cap| requirement.matches(cap))
    }
}

/// 已解析模块的一条需求布线
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleWire {
    /// 需求方
    pub requirer: ModuleId,
    /// 提供方
    pub provider: ModuleId,
    /// 命名空间
    pub namespace: String,
}

impl ModuleWire {
    /// 创建布线
    pub fn new(requirer: ModuleId, provider: ModuleId, namespace: impl Into<String>) -> Self {
        Self {
            requirer,
            provider,
            namespace: namespace.into(),
        }
    }
}

/// 模块注册的服务引用
///
/// 排序规则：排名越低越小；排名相同时，标识越大越小。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReference {
    /// 服务标识
    pub id: u64,
    /// 注册该服务的模块
    pub owner: ModuleId,
    /// 服务排名
    #[serde(default)]
    pub ranking: i32,
    /// 正在使用该服务的模块
    #[serde(default)]
    pub using: Vec<ModuleId>,
}

impl Ord for ServiceReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ranking
            .cmp(&other.ranking)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ServiceReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

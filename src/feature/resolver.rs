//! 解析器边界
//!
//! 解析器把一组特性的需求连同已解析模块（作为背景能力）解析为候选
//! 制品图。部署引擎只消费其输出：候选资源、资源之间的布线以及读取
//! 制品内容的流提供者。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::model::{FeatureDefinition, FeatureId};
use crate::module::metadata::{Capability, Module, ModuleId, Requirement};
use crate::module::version::{is_snapshot, qualifier, SNAPSHOT};
use crate::utils::{CoreError, Result};

/// 候选资源标识（在一次解析结果内唯一）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    /// 创建资源标识
    pub fn new(id: impl Into<String>) -> Self {
        ResourceId(id.into())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 布线端点：已安装模块或候选资源
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRef {
    /// 已安装模块
    Installed(ModuleId),
    /// 候选资源
    Candidate(ResourceId),
}

/// 解析得到的布线边
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wire {
    /// 命名空间
    pub namespace: String,
    /// 提供方
    pub provider: ResourceRef,
}

impl Wire {
    /// 创建布线
    pub fn new(namespace: impl Into<String>, provider: ResourceRef) -> Self {
        Self {
            namespace: namespace.into(),
            provider,
        }
    }
}

/// 候选资源
///
/// 没有位置的资源是虚拟节点（例如特性标记），不可安装。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// 资源标识
    pub id: ResourceId,

    /// 符号名
    #[serde(default)]
    pub symbolic_name: Option<String>,

    /// 版本
    pub version: Version,

    /// 安装位置
    #[serde(default)]
    pub location: Option<String>,

    /// 特性标记：此资源代表一个已解析的特性
    #[serde(default)]
    pub feature: Option<FeatureId>,

    /// 提供的能力
    #[serde(default)]
    pub capabilities: Vec<Capability>,

    /// 声明的需求
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

impl Resource {
    /// 可安装的模块资源
    pub fn module(
        symbolic_name: impl Into<String>,
        version: Version,
        location: impl Into<String>,
    ) -> Self {
        let location = location.into();
        Self {
            id: ResourceId::new(location.clone()),
            symbolic_name: Some(symbolic_name.into()),
            version,
            location: Some(location),
            feature: None,
            capabilities: Vec::new(),
            requirements: Vec::new(),
        }
    }

    /// 特性标记资源
    pub fn feature_marker(feature: FeatureId) -> Self {
        Self {
            id: ResourceId::new(format!("feature:{feature}")),
            symbolic_name: Some(feature.name.clone()),
            version: feature.version.clone(),
            location: None,
            feature: Some(feature),
            capabilities: Vec::new(),
            requirements: Vec::new(),
        }
    }

    /// 可读名称 `name/version`
    pub fn display_name(&self) -> String {
        match &self.symbolic_name {
            Some(name) => format!("{}/{}", name, self.version),
            None => self.id.to_string(),
        }
    }

    /// 内容是否可能在同一版本下变化
    ///
    /// 版本限定符以 `SNAPSHOT` 结尾、位置中包含 `SNAPSHOT`，
    /// 或位置不以任何不可变方案开头时成立。
    pub fn is_updateable(&self, immutable_schemes: &[String]) -> bool {
        if is_snapshot(&self.version) {
            return true;
        }
        match &self.location {
            Some(location) => {
                location.contains(SNAPSHOT)
                    || !immutable_schemes.iter().any(|scheme| location.starts_with(scheme.as_str()))
            }
            None => false,
        }
    }

    /// 版本限定符
    pub fn qualifier(&self) -> &str {
        qualifier(&self.version)
    }
}

/// 制品内容提供者
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// 读取制品完整内容
    async fn open(&self) -> Result<Vec<u8>>;
}

/// 内存中的制品内容
#[derive(Debug, Clone, Default)]
pub struct MemoryStreamProvider {
    content: Arc<RwLock<Vec<u8>>>,
}

impl MemoryStreamProvider {
    /// 以给定内容创建
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: Arc::new(RwLock::new(content.into())),
        }
    }

    /// 替换内容
    pub async fn replace(&self, content: impl Into<Vec<u8>>) {
        *self.content.write().await = content.into();
    }
}

#[async_trait]
impl StreamProvider for MemoryStreamProvider {
    async fn open(&self) -> Result<Vec<u8>> {
        Ok(self.content.read().await.clone())
    }
}

/// 本地文件制品
#[derive(Debug, Clone)]
pub struct FileStreamProvider {
    path: PathBuf,
}

impl FileStreamProvider {
    /// 以文件路径创建
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StreamProvider for FileStreamProvider {
    async fn open(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// 解析请求
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// 期望特性（依赖已展开）
    pub features: Vec<FeatureDefinition>,
    /// 已解析的非托管模块，作为背景能力
    pub background: Vec<Module>,
}

/// 解析结果
///
/// `wires` 的键是需求方：候选资源，或被重新解析的已安装模块。
/// 每个已解析特性对应一个特性标记资源，其布线指向该特性用到的资源。
#[derive(Clone, Default)]
pub struct Resolution {
    /// 全部候选资源
    pub resources: Vec<Resource>,
    /// 需求方 -> 有序布线
    pub wires: HashMap<ResourceRef, Vec<Wire>>,
    /// 位置 -> 内容提供者
    pub providers: HashMap<String, Arc<dyn StreamProvider>>,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("resources", &self.resources)
            .field("wires", &self.wires)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Resolution {
    /// 加入资源
    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    /// 加入布线
    pub fn add_wire(&mut self, requirer: ResourceRef, wire: Wire) {
        self.wires.entry(requirer).or_default().push(wire);
    }

    /// 加入内容提供者
    pub fn add_provider(&mut self, location: impl Into<String>, provider: Arc<dyn StreamProvider>) {
        self.providers.insert(location.into(), provider);
    }

    /// 需求方的布线
    pub fn wires_of(&self, requirer: &ResourceRef) -> Option<&[Wire]> {
        self.wires.get(requirer).map(Vec::as_slice)
    }

    /// 已解析的特性标识（排序去重）
    pub fn feature_ids(&self) -> Vec<FeatureId> {
        let mut ids: Vec<FeatureId> = self
            .resources
            .iter()
            .filter_map(|r| r.feature.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// 读取资源内容
    pub async fn open(&self, resource: &Resource) -> Result<Vec<u8>> {
        let location = resource.location.as_deref().ok_or_else(|| {
            CoreError::Internal(format!("资源 '{}' 没有安装位置", resource.id))
        })?;
        let provider = self.providers.get(location).ok_or_else(|| {
            CoreError::Internal(format!("资源 '{}' 没有内容提供者", location))
        })?;
        provider.open().await
    }

    /// 从给定资源出发，沿布线收集可达的候选资源
    pub fn transitive_candidates(&self, start: &ResourceId, into: &mut HashSet<ResourceId>) {
        let mut stack = vec![start.clone()];
        while let Some(next) = stack.pop() {
            if !into.insert(next.clone()) {
                continue;
            }
            let requirer = ResourceRef::Candidate(next);
            for wire in self.wires_of(&requirer).unwrap_or(&[]) {
                if let ResourceRef::Candidate(provider) = &wire.provider {
                    stack.push(provider.clone());
                }
            }
        }
    }
}

/// 依赖解析器
#[async_trait]
pub trait Resolver: Send + Sync {
    /// 解析期望特性
    ///
    /// 需求无法满足时返回 [`CoreError::ResolutionFailed`]。
    async fn resolve(&self, request: ResolveRequest) -> Result<Resolution>;
}

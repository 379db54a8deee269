//! 特性目录
//!
//! [`Catalog`] 负责加载仓库描述；[`FeatureIndex`] 在已加载的仓库上
//! 按名称与版本（或版本范围）查找特性，并展开特性依赖。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use semver::Version;
use tracing::debug;

use super::model::{FeatureDefinition, FeatureId, Repository};
use crate::module::version::{empty_version, parse_version, VersionRange};
use crate::utils::{CoreError, Result};

/// 仓库加载器
#[async_trait]
pub trait Catalog: Send + Sync {
    /// 加载仓库描述
    async fn load_repository(&self, uri: &str) -> Result<Repository>;
}

/// 基于本地文件的仓库加载器
///
/// 接受 `file:` 前缀或普通路径；`.json` 按 JSON 解析，其余按 YAML 解析。
#[derive(Debug, Clone, Default)]
pub struct FileCatalog {
    base_dir: Option<PathBuf>,
}

impl FileCatalog {
    /// 创建加载器
    pub fn new() -> Self {
        Self::default()
    }

    /// 相对路径的基准目录
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn path_for(&self, uri: &str) -> PathBuf {
        let raw = PathBuf::from(uri.strip_prefix("file:").unwrap_or(uri));
        match &self.base_dir {
            Some(base) if raw.is_relative() => base.join(raw),
            _ => raw,
        }
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn load_repository(&self, uri: &str) -> Result<Repository> {
        let path = self.path_for(uri);
        let failed = |reason: String| CoreError::RepositoryLoadFailed {
            uri: uri.to_string(),
            reason,
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let mut repository: Repository = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content).map_err(|e| failed(e.to_string()))?
        } else {
            serde_yaml::from_str(&content).map_err(|e| failed(e.to_string()))?
        };
        repository.uri = uri.to_string();
        Ok(repository)
    }
}

/// 已注册仓库的缓存
#[derive(Debug, Clone, Default)]
pub struct RepositoryCache {
    repositories: BTreeMap<String, Repository>,
}

impl RepositoryCache {
    /// 创建空缓存
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入仓库（同地址覆盖）
    pub fn insert(&mut self, repository: Repository) {
        self.repositories.insert(repository.uri.clone(), repository);
    }

    /// 是否已包含
    pub fn contains(&self, uri: &str) -> bool {
        self.repositories.contains_key(uri)
    }

    /// 按地址获取
    pub fn get(&self, uri: &str) -> Option<&Repository> {
        self.repositories.get(uri)
    }

    /// 按名称获取
    pub fn get_by_name(&self, name: &str) -> Option<&Repository> {
        self.repositories
            .values()
            .find(|r| r.name.as_deref() == Some(name))
    }

    /// 移除仓库，并级联移除不再被其他仓库引用的嵌套仓库
    ///
    /// 返回被移除的全部仓库。
    pub fn remove(&mut self, uri: &str) -> Vec<Repository> {
        let mut removed = Vec::new();
        let mut pending = vec![uri.to_string()];
        while let Some(next) = pending.pop() {
            let Some(repository) = self.repositories.remove(&next) else {
                continue;
            };
            for nested in &repository.repositories {
                let still_referenced = self
                    .repositories
                    .values()
                    .any(|r| r.repositories.contains(nested));
                if !still_referenced {
                    pending.push(nested.clone());
                }
            }
            removed.push(repository);
        }
        removed
    }

    /// 全部仓库
    pub fn list(&self) -> Vec<&Repository> {
        self.repositories.values().collect()
    }

    /// 全部仓库地址
    pub fn uris(&self) -> BTreeSet<String> {
        self.repositories.keys().cloned().collect()
    }

    /// 在全部仓库上构建特性索引
    pub fn index(&self) -> FeatureIndex {
        let mut index = FeatureIndex::new();
        for repository in self.repositories.values() {
            for feature in &repository.features {
                index.insert(feature.clone());
            }
        }
        index
    }
}

/// 特性索引：名称 -> 版本 -> 定义
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
    features: HashMap<String, BTreeMap<Version, FeatureDefinition>>,
}

impl FeatureIndex {
    /// 创建空索引
    pub fn new() -> Self {
        Self::default()
    }

    /// 从特性列表创建索引
    pub fn from_features(features: impl IntoIterator<Item = FeatureDefinition>) -> Self {
        let mut index = Self::new();
        for feature in features {
            index.insert(feature);
        }
        index
    }

    /// 加入特性（同名同版本覆盖）
    pub fn insert(&mut self, feature: FeatureDefinition) {
        self.features
            .entry(feature.name.clone())
            .or_default()
            .insert(feature.version.clone(), feature);
    }

    /// 按名称与版本查找特性
    ///
    /// - 未给出版本或给出 `0.0.0`：返回最高版本
    /// - 给出区间（`[1.0,2.0)`）：返回区间内最高版本
    /// - 给出具体版本：精确匹配
    pub fn get(&self, name: &str, version: Option<&str>) -> Result<Option<&FeatureDefinition>> {
        let Some(versions) = self.features.get(name) else {
            return Ok(None);
        };

        let wanted = version.map(str::trim).filter(|v| !v.is_empty());
        let found = match wanted {
            None => versions.values().next_back(),
            Some(text) if text.starts_with('[') || text.starts_with('(') => {
                let range = VersionRange::parse(text)?;
                versions
                    .iter()
                    .rev()
                    .find(|(v, _)| range.includes(v))
                    .map(|(_, f)| f)
            }
            Some(text) => {
                let exact = parse_version(text)?;
                if exact == empty_version() {
                    versions.values().next_back()
                } else {
                    versions.get(&exact)
                }
            }
        };
        Ok(found)
    }

    /// 按特性标识查找
    pub fn get_by_id(&self, id: &FeatureId) -> Option<&FeatureDefinition> {
        if id.is_unversioned() {
            self.features.get(&id.name).and_then(|v| v.values().next_back())
        } else {
            self.features.get(&id.name).and_then(|v| v.get(&id.version))
        }
    }

    /// 全部特性，按名称与版本排序
    pub fn list(&self) -> Vec<&FeatureDefinition> {
        let mut all: Vec<&FeatureDefinition> =
            self.features.values().flat_map(|v| v.values()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        all
    }

    /// 特性数量
    pub fn len(&self) -> usize {
        self.features.values().map(BTreeMap::len).sum()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 展开特性依赖，返回闭包（按首次出现顺序）
    ///
    /// 依赖的特性不存在时返回 [`CoreError::FeatureNotFound`]。
    pub fn closure<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a FeatureDefinition>,
    ) -> Result<Vec<FeatureDefinition>> {
        let mut seen = BTreeSet::new();
        let mut result = Vec::new();
        let mut stack: Vec<FeatureDefinition> = roots.into_iter().cloned().collect();
        stack.reverse();

        while let Some(feature) = stack.pop() {
            if !seen.insert(feature.id()) {
                continue;
            }
            for dependency in feature.dependencies.iter().rev() {
                let resolved = self
                    .get(&dependency.name, dependency.version.as_deref())?
                    .ok_or_else(|| {
                        CoreError::FeatureNotFound(match &dependency.version {
                            Some(v) => format!("{}/{}", dependency.name, v),
                            None => dependency.name.clone(),
                        })
                    })?;
                debug!(feature = %feature.id(), dependency = %resolved.id(), "展开特性依赖");
                stack.push(resolved.clone());
            }
            result.push(feature);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::model::ModuleCoordinate;

    fn feature(name: &str, version: &str) -> FeatureDefinition {
        FeatureDefinition::new(name, parse_version(version).unwrap())
    }

    fn index() -> FeatureIndex {
        FeatureIndex::from_features(vec![
            feature("http", "1.0"),
            feature("http", "1.5"),
            feature("http", "2.0"),
            feature("war", "1.0").with_dependency("http", Some("[1.0,2.0)")),
            feature("webconsole", "1.0").with_dependency("war", None),
        ])
    }

    #[test]
    fn test_latest_when_unversioned() {
        let index = index();
        assert_eq!(index.get("http", None).unwrap().unwrap().version.to_string(), "2.0.0");
        assert_eq!(
            index.get("http", Some("0.0.0")).unwrap().unwrap().version.to_string(),
            "2.0.0"
        );
        assert_eq!(index.get("http", Some("")).unwrap().unwrap().version.to_string(), "2.0.0");
    }

    #[test]
    fn test_exact_and_range() {
        let index = index();
        assert_eq!(
            index.get("http", Some("1.5")).unwrap().unwrap().version.to_string(),
            "1.5.0"
        );
        assert!(index.get("http", Some("1.7")).unwrap().is_none());
        assert_eq!(
            index.get("http", Some("[1.0,2.0)")).unwrap().unwrap().version.to_string(),
            "1.5.0"
        );
        assert!(index.get("nothing", None).unwrap().is_none());
        assert!(index.get("http", Some("[x")).is_err());
    }

    #[test]
    fn test_closure_follows_dependencies() {
        let index = index();
        let root = index.get("webconsole", None).unwrap().unwrap().clone();
        let closure = index.closure([&root]).unwrap();
        let ids: Vec<String> = closure.iter().map(|f| f.id().to_string()).collect();
        assert_eq!(ids, vec!["webconsole/1.0.0", "war/1.0.0", "http/1.5.0"]);
    }

    #[test]
    fn test_closure_missing_dependency() {
        let index = FeatureIndex::from_features(vec![
            feature("a", "1.0").with_dependency("ghost", None),
        ]);
        let root = index.get("a", None).unwrap().unwrap().clone();
        let err = index.closure([&root]).unwrap_err();
        assert!(matches!(err, CoreError::FeatureNotFound(name) if name == "ghost"));
    }

    #[test]
    fn test_cache_cascading_removal() {
        let mut cache = RepositoryCache::new();
        let mut parent = Repository::new("file:parent.yaml");
        parent.repositories.push("file:child.yaml".to_string());
        let mut other = Repository::new("file:other.yaml");
        other.repositories.push("file:shared.yaml".to_string());
        parent.repositories.push("file:shared.yaml".to_string());

        cache.insert(parent);
        cache.insert(other);
        cache.insert(
            Repository::new("file:child.yaml")
                .with_feature(feature("c", "1.0").with_module(ModuleCoordinate::new("mvn:c"))),
        );
        cache.insert(Repository::new("file:shared.yaml"));

        assert_eq!(cache.index().len(), 1);
        let removed = cache.remove("file:parent.yaml");
        let removed: Vec<&str> = removed.iter().map(|r| r.uri.as_str()).collect();
        assert!(removed.contains(&"file:parent.yaml"));
        assert!(removed.contains(&"file:child.yaml"));
        assert!(!removed.contains(&"file:shared.yaml"));
        assert!(cache.contains("file:shared.yaml"));
        assert!(cache.index().is_empty());
    }

    #[tokio::test]
    async fn test_file_catalog_loads_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("features.yaml");
        tokio::fs::write(
            &path,
            "name: sample\nfeatures:\n  - name: f\n    version: 1.0.0\n",
        )
        .await
        .unwrap();

        let catalog = FileCatalog::new().with_base_dir(dir.path());
        let repo = catalog.load_repository("file:features.yaml").await.unwrap();
        assert_eq!(repo.uri, "file:features.yaml");
        assert_eq!(repo.features[0].id().to_string(), "f/1.0.0");

        let err = catalog.load_repository("file:missing.yaml").await.unwrap_err();
        assert!(matches!(err, CoreError::RepositoryLoadFailed { .. }));
    }
}

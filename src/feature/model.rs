//! 特性与仓库描述
//!
//! 特性是一组模块坐标加配置的命名、带版本的声明；仓库是一组特性
//! 及其引用的其他仓库。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::module::version::{empty_version, parse_version};
use crate::utils::{CoreError, Result};

/// 特性标识 `name/version`
///
/// 省略版本时规范化为 `name/0.0.0`，表示“任意版本”。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeatureId {
    /// 名称
    pub name: String,
    /// 版本
    pub version: Version,
}

impl FeatureId {
    /// 创建特性标识
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// 解析 `name` 或 `name/version`
    pub fn parse(input: &str) -> Result<Self> {
        let text = input.trim();
        let (name, version) = match text.split_once('/') {
            Some((name, version)) => (name.trim(), parse_version(version)?),
            None => (text, empty_version()),
        };
        if name.is_empty() {
            return Err(CoreError::FeatureNotFound(input.to_string()));
        }
        Ok(Self::new(name, version))
    }

    /// 是否未指定版本
    pub fn is_unversioned(&self) -> bool {
        self.version == empty_version()
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

impl FromStr for FeatureId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FeatureId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<FeatureId> for String {
    fn from(value: FeatureId) -> Self {
        value.to_string()
    }
}

/// 特性中的模块坐标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleCoordinate {
    /// 制品位置
    pub location: String,

    /// 显式启动级别
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_level: Option<u32>,
}

impl ModuleCoordinate {
    /// 创建模块坐标
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            start_level: None,
        }
    }

    /// 设置启动级别
    pub fn with_start_level(mut self, level: u32) -> Self {
        self.start_level = Some(level);
        self
    }
}

/// 对其他特性的引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDependency {
    /// 名称
    pub name: String,

    /// 版本或版本范围（省略表示最新）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// 特性携带的配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// 配置标识
    pub pid: String,

    /// 配置属性
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// 特性定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    /// 名称
    pub name: String,

    /// 版本
    #[serde(default = "empty_version")]
    pub version: Version,

    /// 描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 模块坐标（有序）
    #[serde(default)]
    pub modules: Vec<ModuleCoordinate>,

    /// 引用的其他特性
    #[serde(default)]
    pub dependencies: Vec<FeatureDependency>,

    /// 配置
    #[serde(default)]
    pub configs: Vec<FeatureConfig>,
}

impl FeatureDefinition {
    /// 创建特性定义
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: None,
            modules: Vec::new(),
            dependencies: Vec::new(),
            configs: Vec::new(),
        }
    }

    /// 添加模块坐标
    pub fn with_module(mut self, coordinate: ModuleCoordinate) -> Self {
        self.modules.push(coordinate);
        self
    }

    /// 添加特性依赖
    pub fn with_dependency(mut self, name: impl Into<String>, version: Option<&str>) -> Self {
        self.dependencies.push(FeatureDependency {
            name: name.into(),
            version: version.map(str::to_string),
        });
        self
    }

    /// 特性标识
    pub fn id(&self) -> FeatureId {
        FeatureId::new(self.name.clone(), self.version.clone())
    }

    /// 某个位置的显式启动级别
    pub fn start_level(&self, location: &str) -> Option<u32> {
        self.modules
            .iter()
            .find(|m| m.location == location)
            .and_then(|m| m.start_level)
    }
}

/// 特性仓库
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// 仓库地址
    #[serde(default)]
    pub uri: String,

    /// 仓库名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// 引用的其他仓库
    #[serde(default)]
    pub repositories: Vec<String>,

    /// 特性
    #[serde(default)]
    pub features: Vec<FeatureDefinition>,
}

impl Repository {
    /// 创建空仓库
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
            repositories: Vec::new(),
            features: Vec::new(),
        }
    }

    /// 添加特性
    pub fn with_feature(mut self, feature: FeatureDefinition) -> Self {
        self.features.push(feature);
        self
    }

    /// 显示名称（未命名时使用地址）
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_id_normalization() {
        let id = FeatureId::parse("webconsole").unwrap();
        assert_eq!(id.to_string(), "webconsole/0.0.0");
        assert!(id.is_unversioned());

        let id = FeatureId::parse("webconsole/4.2").unwrap();
        assert_eq!(id.to_string(), "webconsole/4.2.0");
        assert!(!id.is_unversioned());

        assert!(FeatureId::parse("/1.0").is_err());
        assert!(FeatureId::parse("web/abc").is_err());
    }

    #[test]
    fn test_feature_id_ordering() {
        let mut ids = vec![
            FeatureId::parse("b/1.0").unwrap(),
            FeatureId::parse("a/2.0").unwrap(),
            FeatureId::parse("a/1.0").unwrap(),
        ];
        ids.sort();
        let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["a/1.0.0", "a/2.0.0", "b/1.0.0"]);
    }

    #[test]
    fn test_repository_yaml() {
        let yaml = r#"
name: standard
repositories:
  - mvn:org.example/enterprise/1.0/xml/features
features:
  - name: http
    version: 1.0.0
    modules:
      - location: mvn:org.example/http-api/1.0
      - location: mvn:org.example/http-impl/1.0
        start_level: 30
    configs:
      - pid: org.example.http
        properties:
          port: "8181"
  - name: war
    version: 1.0.0
    dependencies:
      - name: http
"#;
        let repo: Repository = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(repo.display_name(), "standard");
        assert_eq!(repo.features.len(), 2);
        let http = &repo.features[0];
        assert_eq!(http.id().to_string(), "http/1.0.0");
        assert_eq!(http.start_level("mvn:org.example/http-impl/1.0"), Some(30));
        assert_eq!(http.start_level("mvn:org.example/http-api/1.0"), None);
        assert_eq!(http.configs[0].properties["port"], "8181");
        assert_eq!(repo.features[1].dependencies[0].version, None);
    }
}

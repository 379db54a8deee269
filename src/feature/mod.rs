//! 特性模块
//!
//! 包含特性与仓库模型、目录加载与版本匹配、解析器边界以及特性事件。

pub mod catalog;
pub mod events;
pub mod model;
pub mod resolver;

// 重导出常用类型
pub use catalog::{Catalog, FeatureIndex, FileCatalog, RepositoryCache};
pub use events::{
    FeatureEventBus, FeatureEventKind, FeaturesEvent, FeaturesListener, ReplaySnapshot,
    RepositoryEventKind,
};
pub use model::{
    FeatureConfig, FeatureDefinition, FeatureDependency, FeatureId, ModuleCoordinate, Repository,
};
pub use resolver::{
    FileStreamProvider, MemoryStreamProvider, Resolution, ResolveRequest, Resolver, Resource,
    ResourceId, ResourceRef, StreamProvider, Wire,
};

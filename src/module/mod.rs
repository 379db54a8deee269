//! 模块管理模块
//!
//! 包含部署引擎看到的模块运行时视图：
//! - 模块元数据、能力与需求、布线和服务引用
//! - 宽松版本解析与版本范围
//! - 运行时接口与模块状态探针
//! - 按需求排序的依赖图

pub mod dependency;
pub mod metadata;
pub mod runtime;
pub mod status;
pub mod version;

// 重导出常用类型
pub use dependency::{requirement_sort, DependencyGraph};
pub use metadata::{
    Capability, Module, ModuleId, ModuleState, ModuleWire, Requirement, ServiceReference,
    DEFAULT_START_LEVEL,
};
pub use runtime::{ModuleRuntime, RefreshCallback, RefreshError};
pub use status::{CompositeStateProbe, ModuleStateProbe, ModuleStatus, ProbeState};
pub use version::{parse_version, RangeTemplate, VersionRange};

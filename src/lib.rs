//! # Chips Features - 薯片特性服务
//!
//! 特性服务是动态模块运行时之上的部署协调引擎，提供以下核心功能：
//!
//! - **特性仓库**: 仓库注册、嵌套仓库加载与特性版本匹配
//! - **部署协调**: 计算期望模块集合与已安装模块的差异，按阶段执行停止、卸载、
//!   更新、安装、刷新与启动
//! - **状态持久化**: 请求特性、已安装特性、托管模块与内容校验和的原子落盘
//! - **特性事件**: 监听者注册时重放当前状态，之后接收实时事件
//! - **日志系统**: 结构化日志记录
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_features::{DeployOptions, FeaturesService, FileCatalog, ModuleRuntime, Resolver};
//!
//! async fn run(
//!     runtime: Arc<dyn ModuleRuntime>,
//!     resolver: Arc<dyn Resolver>,
//! ) -> chips_features::Result<()> {
//!     let service = FeaturesService::builder(runtime, resolver, Arc::new(FileCatalog::new()))
//!         .build()
//!         .await?;
//!
//!     service.add_repository("file:features.yaml").await?;
//!     let report = service.install_features(&["web"], DeployOptions::new()).await?;
//!     println!("installed: {:?}", report.installed_features);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `feature` - 特性与仓库模型、目录、解析器边界与事件
//! - `module` - 模块运行时视图、版本与状态探针
//! - `deploy` - 部署计划、刷新计算与执行
//! - `state` - 持久化状态
//! - `service` - 对外服务入口
//! - `core` - 配置
//! - `utils` - 错误、日志与校验和

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod deploy;
pub mod feature;
pub mod module;
pub mod service;
pub mod state;
pub mod utils;

// 重导出常用类型，方便使用
pub use feature::{
    Catalog, FeatureDefinition, FeatureEventBus, FeatureEventKind, FeatureId, FeatureIndex,
    FeaturesEvent, FeaturesListener, FileCatalog, ModuleCoordinate, Repository,
    RepositoryEventKind, Resolution, ResolveRequest, Resolver, Resource, ResourceId,
    StreamProvider,
};

pub use module::{
    CompositeStateProbe, Module, ModuleId, ModuleRuntime, ModuleState, ModuleStateProbe,
    ModuleStatus, ModuleWire, ProbeState, RefreshCallback, RefreshError, ServiceReference,
};

pub use deploy::{
    ConfigInstaller, Deployer, DeploymentReport, DeploymentRequest, DeployOptions,
    PlanSummary, UpdateSnapshots,
};

pub use state::{JsonFileStorage, MemoryStorage, State, StateManager, StateStorage};

pub use service::{FeaturesService, FeaturesServiceBuilder};

pub use utils::{error_code, CoreError, DeployPhase, ModuleFailure, Result};
pub use utils::logger::{FileOutput, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{DeploymentConfig, FeaturesConfig, FeaturesConfigBuilder, LogConfig, StateConfig};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

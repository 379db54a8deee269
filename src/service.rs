//! 特性服务
//!
//! 对外入口：仓库管理、特性查询、安装与卸载、监听者注册、启动特性与模块状态。
//! 每次安装或卸载都计算新的期望特性集合，并提交到部署工作者上执行一次完整协调。

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::{DeploymentConfig, FeaturesConfig};
use crate::deploy::executor::{ConfigInstaller, Deployer, DeploymentReport, DeploymentRequest};
use crate::deploy::options::DeployOptions;
use crate::deploy::plan::DeploymentPlanner;
use crate::deploy::worker::DeployWorker;
use crate::feature::catalog::{Catalog, FeatureIndex, RepositoryCache};
use crate::feature::events::{
    FeatureEventBus, FeaturesEvent, FeaturesListener, ReplaySnapshot, RepositoryEventKind,
};
use crate::feature::model::{FeatureDefinition, FeatureId, Repository};
use crate::feature::resolver::Resolver;
use crate::module::metadata::ModuleId;
use crate::module::runtime::ModuleRuntime;
use crate::module::status::{CompositeStateProbe, ModuleStateProbe, ModuleStatus};
use crate::state::{JsonFileStorage, StateManager, StateStorage};
use crate::utils::{CoreError, Result};

/// 特性服务构建器
pub struct FeaturesServiceBuilder {
    config: FeaturesConfig,
    runtime: Arc<dyn ModuleRuntime>,
    resolver: Arc<dyn Resolver>,
    catalog: Arc<dyn Catalog>,
    storage: Option<Arc<dyn StateStorage>>,
    config_installer: Option<Arc<dyn ConfigInstaller>>,
}

impl FeaturesServiceBuilder {
    /// 以外部协作者创建构建器
    pub fn new(
        runtime: Arc<dyn ModuleRuntime>,
        resolver: Arc<dyn Resolver>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            config: FeaturesConfig::default(),
            runtime,
            resolver,
            catalog,
            storage: None,
            config_installer: None,
        }
    }

    /// 设置配置
    pub fn config(mut self, config: FeaturesConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置状态存储（默认使用配置中的 JSON 文件）
    pub fn storage(mut self, storage: Arc<dyn StateStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 设置特性配置安装器
    pub fn config_installer(mut self, installer: Arc<dyn ConfigInstaller>) -> Self {
        self.config_installer = Some(installer);
        self
    }

    /// 构建服务：加载状态并重新加载已注册的仓库
    ///
    /// 必须在 tokio 运行时内调用。
    pub async fn build(self) -> Result<FeaturesService> {
        self.config.validate()?;
        let deployment = self.config.deployment.clone();

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(JsonFileStorage::new(&self.config.state.path)));
        let state = Arc::new(StateManager::load(storage, deployment.update_snapshots).await);
        let events = FeatureEventBus::new();
        let probes = Arc::new(RwLock::new(CompositeStateProbe::new()));

        let planner = DeploymentPlanner::new(
            deployment.update_snapshots,
            deployment.update_range()?,
            deployment.immutable_schemes.clone(),
        );
        let deployer = Deployer::new(
            Arc::clone(&self.runtime),
            self.resolver,
            Arc::clone(&state),
            events.clone(),
            planner,
        )
        .with_owner_module(deployment.owner_module)
        .with_config_installer(self.config_installer)
        .with_probes(Arc::clone(&probes));

        let service = FeaturesService {
            deployment,
            catalog: self.catalog,
            runtime: self.runtime,
            repositories: RwLock::new(RepositoryCache::new()),
            state,
            events,
            probes,
            deployer: Arc::new(deployer),
            worker: DeployWorker::spawn(),
        };
        service.reload_repositories().await;
        Ok(service)
    }
}

/// 特性服务
pub struct FeaturesService {
    deployment: DeploymentConfig,
    catalog: Arc<dyn Catalog>,
    runtime: Arc<dyn ModuleRuntime>,
    repositories: RwLock<RepositoryCache>,
    state: Arc<StateManager>,
    events: FeatureEventBus,
    probes: Arc<RwLock<CompositeStateProbe>>,
    deployer: Arc<Deployer>,
    worker: DeployWorker,
}

impl FeaturesService {
    /// 创建构建器
    pub fn builder(
        runtime: Arc<dyn ModuleRuntime>,
        resolver: Arc<dyn Resolver>,
        catalog: Arc<dyn Catalog>,
    ) -> FeaturesServiceBuilder {
        FeaturesServiceBuilder::new(runtime, resolver, catalog)
    }

    // ==================== 仓库 ====================

    /// 注册仓库（连同其引用的仓库）
    #[instrument(skip(self))]
    pub async fn add_repository(&self, uri: &str) -> Result<()> {
        if self.repositories.read().await.contains(uri) {
            debug!(repository = %uri, "仓库已注册");
            return Ok(());
        }

        let loaded = self.load_repository_tree(uri).await?;
        {
            let mut cache = self.repositories.write().await;
            for repository in loaded {
                cache.insert(repository);
            }
        }
        let registered = uri.to_string();
        self.state
            .transact(move |state| {
                state.repositories.insert(registered);
            })
            .await;

        info!(repository = %uri, "已添加仓库");
        self.events
            .publish(FeaturesEvent::repository(RepositoryEventKind::Added, uri, false))
            .await;
        Ok(())
    }

    /// 移除仓库，级联移除不再被引用的嵌套仓库
    ///
    /// 已安装的特性不受影响。
    #[instrument(skip(self))]
    pub async fn remove_repository(&self, uri: &str) -> Result<()> {
        let removed = {
            let mut cache = self.repositories.write().await;
            if !cache.contains(uri) {
                return Err(CoreError::RepositoryNotFound(uri.to_string()));
            }
            cache.remove(uri)
        };
        let unregistered = uri.to_string();
        self.state
            .transact(move |state| {
                state.repositories.remove(&unregistered);
            })
            .await;

        info!(repository = %uri, cascaded = removed.len().saturating_sub(1), "已移除仓库");
        self.events
            .publish(FeaturesEvent::repository(RepositoryEventKind::Removed, uri, false))
            .await;
        Ok(())
    }

    /// 全部已加载的仓库
    pub async fn list_repositories(&self) -> Vec<Repository> {
        self.repositories.read().await.list().into_iter().cloned().collect()
    }

    /// 按名称（或地址）查找仓库
    pub async fn get_repository(&self, name: &str) -> Option<Repository> {
        let cache = self.repositories.read().await;
        cache.get_by_name(name).or_else(|| cache.get(name)).cloned()
    }

    // ==================== 特性查询 ====================

    /// 查找特性
    ///
    /// 未给出版本（或为 `0.0.0`）时返回最高版本；`[1.0,2.0)` 形式的范围返回范围内最高版本。
    pub async fn get_feature(&self, name: &str, version: Option<&str>) -> Result<Option<FeatureDefinition>> {
        let index = self.index().await;
        Ok(index.get(name, version)?.cloned())
    }

    /// 全部可用特性
    pub async fn list_features(&self) -> Vec<FeatureDefinition> {
        self.index().await.list().into_iter().cloned().collect()
    }

    /// 已安装的特性（请求特性及其依赖）
    pub async fn list_installed_features(&self) -> Vec<FeatureId> {
        self.state.snapshot().await.installed_features.into_iter().collect()
    }

    /// 请求的特性
    pub async fn list_required_features(&self) -> Vec<FeatureId> {
        self.state.snapshot().await.features.into_iter().collect()
    }

    /// 特性是否已安装
    pub async fn is_installed(&self, id: &FeatureId) -> bool {
        self.state.snapshot().await.installed_features.contains(id)
    }

    /// 特性是否被请求
    pub async fn is_required(&self, id: &FeatureId) -> bool {
        self.state.snapshot().await.features.contains(id)
    }

    // ==================== 安装与卸载 ====================

    /// 安装特性
    ///
    /// `name` 形式的标识安装最高版本。特性不存在时失败，
    /// 除非设置了 `skip_missing`，此时跳过并记录警告。
    #[instrument(skip(self, options))]
    pub async fn install_features(&self, features: &[&str], options: DeployOptions) -> Result<DeploymentReport> {
        let index = self.index().await;
        let mut requested = self.state.snapshot().await.features;

        for text in features {
            let id = FeatureId::parse(text)?;
            let version = if id.is_unversioned() {
                None
            } else {
                Some(id.version.to_string())
            };
            match index.get(&id.name, version.as_deref())? {
                Some(feature) => {
                    debug!(feature = %feature.id(), "请求安装特性");
                    requested.insert(feature.id());
                }
                None if options.skip_missing => {
                    warn!(feature = %id, "特性未找到，已跳过");
                }
                None => return Err(CoreError::FeatureNotFound(id.to_string())),
            }
        }

        self.reconcile(requested, &index, options).await
    }

    /// 卸载特性
    ///
    /// `name` 形式的标识卸载该名称唯一被请求的版本；若请求了多个版本则报歧义错误。
    #[instrument(skip(self, options))]
    pub async fn uninstall_features(&self, features: &[&str], options: DeployOptions) -> Result<DeploymentReport> {
        let index = self.index().await;
        let mut requested = self.state.snapshot().await.features;

        for text in features {
            let id = FeatureId::parse(text)?;
            let matches: Vec<FeatureId> = if id.is_unversioned() {
                requested.iter().filter(|f| f.name == id.name).cloned().collect()
            } else {
                requested.iter().filter(|f| **f == id).cloned().collect()
            };
            match matches.as_slice() {
                [] => return Err(CoreError::FeatureNotInstalled(id.to_string())),
                [single] => {
                    debug!(feature = %single, "请求卸载特性");
                    requested.remove(single);
                }
                _ => {
                    return Err(CoreError::AmbiguousUninstall {
                        name: id.name.clone(),
                        versions: matches.iter().map(|f| f.version.to_string()).collect(),
                    })
                }
            }
        }

        self.reconcile(requested, &index, options).await
    }

    /// 安装启动特性（只执行一次）
    ///
    /// 安装失败只记录错误；无论成功与否都会标记启动完成。
    pub async fn boot(&self) -> Result<Option<DeploymentReport>> {
        if self.state.snapshot().await.boot_done {
            debug!("启动特性已安装");
            return Ok(None);
        }

        let boot_features = self.deployment.boot_feature_ids()?;
        let mut report = None;
        if !boot_features.is_empty() {
            let names: Vec<String> = boot_features.iter().map(boot_request).collect();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            info!(features = ?names, "安装启动特性");
            match self.install_features(&names, DeployOptions::new().skip_missing()).await {
                Ok(installed) => report = Some(installed),
                Err(e) => error!(error = %e, "安装启动特性失败"),
            }
        }

        self.state
            .transact(|state| {
                state.boot_done = true;
            })
            .await;
        Ok(report)
    }

    // ==================== 监听者 ====================

    /// 注册监听者，先重放已注册仓库与已安装特性
    pub async fn subscribe(&self, listener: FeaturesListener) -> String {
        let snapshot = async {
            ReplaySnapshot {
                repositories: self.repositories.read().await.uris().into_iter().collect(),
                installed: self.list_installed_features().await,
            }
        };
        self.events.subscribe(listener, snapshot).await
    }

    /// 注销监听者
    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.events.unsubscribe(subscription_id).await
    }

    // ==================== 模块状态 ====================

    /// 注册模块状态探针
    pub async fn register_probe(&self, probe: Arc<dyn ModuleStateProbe>) {
        self.probes.write().await.register(probe);
    }

    /// 模块的综合状态与诊断信息
    pub async fn module_status(&self, id: ModuleId) -> Result<ModuleStatus> {
        let module = self
            .runtime
            .module(id)
            .await?
            .ok_or(CoreError::ModuleNotFound(id.0))?;
        Ok(self.probes.read().await.status(&module))
    }

    /// 停止部署工作者，已提交的协调会执行完
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }

    // ==================== 内部 ====================

    async fn index(&self) -> FeatureIndex {
        self.repositories.read().await.index()
    }

    /// 以新的期望特性集合执行一次协调
    async fn reconcile(
        &self,
        requested: BTreeSet<FeatureId>,
        index: &FeatureIndex,
        options: DeployOptions,
    ) -> Result<DeploymentReport> {
        let mut features = BTreeSet::new();
        let mut roots = Vec::new();
        for id in requested {
            match index.get_by_id(&id) {
                Some(feature) => {
                    roots.push(feature);
                    features.insert(id);
                }
                None if options.skip_missing => {
                    warn!(feature = %id, "请求的特性已不在任何仓库中，已跳过");
                }
                None => return Err(CoreError::FeatureNotFound(id.to_string())),
            }
        }
        let definitions = index.closure(roots)?;

        let request = DeploymentRequest {
            features,
            definitions,
            options,
        };
        let deployer = Arc::clone(&self.deployer);
        self.worker
            .submit(async move { deployer.deploy(request).await })
            .await
    }

    /// 加载仓库及其引用的全部仓库（跳过已在缓存中的）
    async fn load_repository_tree(&self, uri: &str) -> Result<Vec<Repository>> {
        let known = self.repositories.read().await.uris();
        let mut seen: HashSet<String> = HashSet::new();
        let mut pending = vec![uri.to_string()];
        let mut loaded = Vec::new();

        while let Some(next) = pending.pop() {
            if known.contains(&next) || !seen.insert(next.clone()) {
                continue;
            }
            let repository = self.catalog.load_repository(&next).await?;
            debug!(repository = %repository.display_name(), features = repository.features.len(), "已加载仓库");
            pending.extend(repository.repositories.iter().cloned());
            loaded.push(repository);
        }
        Ok(loaded)
    }

    /// 重新加载状态中记录的仓库，加载失败的仓库保留在状态中
    async fn reload_repositories(&self) {
        let uris = self.state.snapshot().await.repositories;
        let results = join_all(uris.iter().map(|uri| self.load_repository_tree(uri))).await;
        for (uri, result) in uris.iter().zip(results) {
            match result {
                Ok(loaded) => {
                    let mut cache = self.repositories.write().await;
                    for repository in loaded {
                        cache.insert(repository);
                    }
                }
                Err(e) => warn!(repository = %uri, error = %e, "重新加载仓库失败"),
            }
        }
    }
}

fn boot_request(id: &FeatureId) -> String {
    if id.is_unversioned() {
        id.name.clone()
    } else {
        id.to_string()
    }
}

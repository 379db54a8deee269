//! 部署执行器
//!
//! 一次协调严格按阶段顺序执行：解析、计划与刷新集合、停止、卸载、更新、
//! 安装、持久化、刷新、启动、通知。每个阶段完成（或失败）后才进入下一阶段。
//! 第 5 到第 10 阶段不回滚：模块级失败会被记录并继续执行剩余计划，
//! 最后以一个聚合错误返回给调用方。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::lifecycle::{select_stop_batch, start_order, startable, stoppable};
use super::options::{DeployOptions, UpdateSnapshots};
use super::plan::{Deployment, DeploymentPlanner, PlanSummary};
use super::refresh::compute_refresh_set;
use crate::feature::events::{FeatureEventBus, FeatureEventKind, FeaturesEvent};
use crate::feature::model::{FeatureDefinition, FeatureId};
use crate::feature::resolver::{Resolution, ResolveRequest, Resolver, ResourceId};
use crate::module::metadata::{Module, ModuleId, ModuleState};
use crate::module::runtime::{ModuleRuntime, RefreshError};
use crate::module::status::{CompositeStateProbe, ProbeState};
use crate::state::StateManager;
use crate::utils::checksum::checksum;
use crate::utils::error::{DeployPhase, ModuleFailure};
use crate::utils::{CoreError, Result};

/// 特性配置安装器
///
/// 新安装的特性在状态持久化之后交给安装器写入其配置。
#[async_trait]
pub trait ConfigInstaller: Send + Sync {
    /// 安装特性携带的配置
    async fn install_feature_configs(&self, feature: &FeatureDefinition) -> Result<()>;
}

/// 一次协调的输入
#[derive(Debug, Clone, Default)]
pub struct DeploymentRequest {
    /// 请求的特性（将原样持久化）
    pub features: BTreeSet<FeatureId>,
    /// 请求特性的依赖闭包
    pub definitions: Vec<FeatureDefinition>,
    /// 部署选项
    pub options: DeployOptions,
}

/// 一次协调的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentReport {
    /// 计划摘要
    pub plan: PlanSummary,
    /// 刷新的模块
    pub refreshed: Vec<ModuleId>,
    /// 启动的模块
    pub started: Vec<ModuleId>,
    /// 新安装的特性
    pub installed_features: Vec<FeatureId>,
    /// 被移除的特性
    pub uninstalled_features: Vec<FeatureId>,
    /// 仅模拟
    pub simulated: bool,
    /// 没有任何变化
    pub no_change: bool,
}

/// 部署执行器
pub struct Deployer {
    runtime: Arc<dyn ModuleRuntime>,
    resolver: Arc<dyn Resolver>,
    state: Arc<StateManager>,
    events: FeatureEventBus,
    planner: DeploymentPlanner,
    owner_module: Option<ModuleId>,
    config_installer: Option<Arc<dyn ConfigInstaller>>,
    probes: Arc<RwLock<CompositeStateProbe>>,
}

impl Deployer {
    /// 创建执行器
    pub fn new(
        runtime: Arc<dyn ModuleRuntime>,
        resolver: Arc<dyn Resolver>,
        state: Arc<StateManager>,
        events: FeatureEventBus,
        planner: DeploymentPlanner,
    ) -> Self {
        Self {
            runtime,
            resolver,
            state,
            events,
            planner,
            owner_module: None,
            config_installer: None,
            probes: Arc::new(RwLock::new(CompositeStateProbe::new())),
        }
    }

    /// 设置编排者自身所在的模块
    pub fn with_owner_module(mut self, owner: Option<ModuleId>) -> Self {
        self.owner_module = owner;
        self
    }

    /// 设置配置安装器
    pub fn with_config_installer(mut self, installer: Option<Arc<dyn ConfigInstaller>>) -> Self {
        self.config_installer = installer;
        self
    }

    /// 共享状态探针
    pub fn with_probes(mut self, probes: Arc<RwLock<CompositeStateProbe>>) -> Self {
        self.probes = probes;
        self
    }

    /// 执行一次协调
    #[instrument(skip_all, fields(features = request.features.len(), simulate = request.options.simulate))]
    pub async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentReport> {
        let options = &request.options;
        let verbose = options.verbose;
        let snapshot = self.state.snapshot().await;
        let mut managed = snapshot.managed_modules.clone();

        // 1. 解析
        let installed = self.runtime.modules().await?;
        let background: Vec<Module> = installed
            .iter()
            .filter(|m| !managed.contains(&m.id) && is_resolved(m))
            .cloned()
            .collect();
        let resolution = self
            .resolver
            .resolve(ResolveRequest {
                features: request.definitions.clone(),
                background,
            })
            .await?;

        let mut installed_features: BTreeSet<FeatureId> = resolution.feature_ids().into_iter().collect();
        if installed_features.is_empty() {
            installed_features = request.definitions.iter().map(FeatureDefinition::id).collect();
        }
        let added: Vec<FeatureId> = installed_features
            .difference(&snapshot.installed_features)
            .cloned()
            .collect();
        let removed: Vec<FeatureId> = snapshot
            .installed_features
            .difference(&installed_features)
            .cloned()
            .collect();

        // 2. 计划与刷新集合
        let mut deployment = self
            .planner
            .plan(&managed, &installed, &resolution, &snapshot.checksums)
            .await?;
        if let Some(owner) = self.owner_module {
            let updated = deployment.to_update.remove(&owner).is_some();
            let deleted = deployment.to_delete.remove(&owner);
            if updated || deleted {
                warn!(module_id = %owner, "不支持更新或卸载特性服务自身所在的模块");
            }
        }

        let mut report = DeploymentReport {
            plan: deployment.summary(),
            installed_features: added.clone(),
            uninstalled_features: removed.clone(),
            simulated: options.simulate,
            ..DeploymentReport::default()
        };

        // 3. 无变化
        let features_unchanged = snapshot.features == request.features
            && snapshot.installed_features == installed_features;
        if deployment.is_empty() && features_unchanged {
            deploy_log!(verbose, "部署无变化");
            report.no_change = true;
            return Ok(report);
        }
        log_deployment(&deployment, verbose);

        let mut old_wiring = HashMap::new();
        for module in &installed {
            if let Some(wires) = self.runtime.wiring(module.id).await? {
                old_wiring.insert(module.id, wires);
            }
        }
        let to_refresh = compute_refresh_set(
            &deployment,
            &installed,
            &old_wiring,
            &resolution,
            &managed,
            options,
        );

        if options.simulate {
            let by_id = table(&installed);
            for id in &to_refresh {
                info!(module = %describe(&by_id, *id), "待刷新模块");
            }
            report.refreshed = to_refresh.into_iter().collect();
            return Ok(report);
        }

        let start_levels = start_levels(&request.definitions);
        let linked_to_old = if options.no_auto_start {
            linked_to_features(&resolution, &snapshot.installed_features)
        } else {
            HashSet::new()
        };
        let mut failures = Vec::new();
        let mut to_start: BTreeSet<ModuleId> = BTreeSet::new();

        // 4. 停止
        let by_id = table(&installed);
        let to_stop = stoppable(
            deployment.to_update.keys().chain(deployment.to_delete.iter()).copied(),
            &by_id,
        );
        let stopped: HashSet<ModuleId> = self
            .stop_modules(to_stop, &by_id, verbose, &mut failures)
            .await?
            .into_iter()
            .collect();

        // 5. 卸载
        for id in &deployment.to_delete {
            deploy_log!(verbose, module = %describe(&by_id, *id), "卸载模块");
            if let Err(e) = self.runtime.uninstall(*id).await {
                error!(module_id = %id, error = %e, "卸载模块失败");
                failures.push(failure(DeployPhase::Uninstall, describe(&by_id, *id), e));
            }
            managed.remove(id);
        }

        // 6. 更新
        let policy = self.planner.policy();
        for (id, resource) in &deployment.to_update {
            let location = resource.location.clone().unwrap_or_default();
            deploy_log!(verbose, module_id = %id, location = %location, "更新模块");
            let result = async {
                let content = resolution.open(resource).await?;
                let sum = checksum(&content);
                self.runtime.update(*id, content).await?;
                Ok::<u32, CoreError>(sum)
            }
            .await;
            match result {
                Ok(sum) => {
                    to_start.insert(*id);
                    if let Some(module) = by_id.get(id) {
                        if policy == UpdateSnapshots::Checksum && self.planner.is_updateable(resource) {
                            deployment
                                .new_checksums
                                .entry(module.location.clone())
                                .or_insert(sum);
                        }
                    }
                    self.apply_start_level(*id, &location, &start_levels, DeployPhase::Update, &mut failures)
                        .await;
                }
                Err(e) => {
                    error!(module_id = %id, location = %location, error = %e, "更新模块失败");
                    failures.push(failure(DeployPhase::Update, location, e));
                }
            }
        }

        // 7. 安装
        for resource in &deployment.to_install {
            let location = resource.location.clone().unwrap_or_default();
            deploy_log!(verbose, location = %location, "安装模块");
            let result = async {
                let content = resolution.open(resource).await?;
                let sum = checksum(&content);
                let module = self.runtime.install(&location, content).await?;
                Ok::<(Module, u32), CoreError>((module, sum))
            }
            .await;
            match result {
                Ok((module, sum)) => {
                    managed.insert(module.id);
                    if !options.no_auto_start || linked_to_old.contains(&resource.id) {
                        to_start.insert(module.id);
                    }
                    deployment
                        .resource_to_module
                        .insert(resource.id.clone(), module.id);
                    if policy == UpdateSnapshots::Checksum && self.planner.is_updateable(resource) {
                        deployment
                            .new_checksums
                            .entry(module.location.clone())
                            .or_insert(sum);
                    }
                    self.apply_start_level(module.id, &location, &start_levels, DeployPhase::Install, &mut failures)
                        .await;
                }
                Err(e) => {
                    error!(location = %location, error = %e, "安装模块失败");
                    failures.push(failure(DeployPhase::Install, location, e));
                }
            }
        }

        // 8. 持久化
        let new_checksums = std::mem::take(&mut deployment.new_checksums);
        let features = request.features.clone();
        let persisted_features = installed_features.clone();
        let persisted_managed = managed.clone();
        self.state
            .transact(move |state| {
                state.checksums.extend(new_checksums);
                state.features = features;
                state.installed_features = persisted_features;
                state.managed_modules = persisted_managed;
            })
            .await;

        if let Some(installer) = &self.config_installer {
            for feature in request.definitions.iter().filter(|f| added.contains(&f.id())) {
                if let Err(e) = installer.install_feature_configs(feature).await {
                    error!(feature = %feature.id(), error = %e, "安装特性配置失败");
                    failures.push(failure(DeployPhase::Persist, feature.id().to_string(), e));
                }
            }
        }

        // 9. 刷新
        if !options.no_refresh && !to_refresh.is_empty() {
            let current = table(&self.runtime.modules().await?);
            let to_stop = stoppable(
                to_refresh.iter().copied().filter(|id| !stopped.contains(id)),
                &current,
            );
            let stopped_for_refresh = self
                .stop_modules(to_stop, &current, verbose, &mut failures)
                .await?;
            to_start.extend(stopped_for_refresh);

            for id in &to_refresh {
                deploy_log!(verbose, module = %describe(&current, *id), "刷新模块");
            }
            self.refresh(&to_refresh).await?;
            report.refreshed = to_refresh.iter().copied().collect();
        }

        // 10. 启动
        if !to_start.is_empty() {
            let current = table(&self.runtime.modules().await?);
            let pending = startable(to_start, &current);
            let probes = self.probes.read().await.clone();
            for id in start_order(&pending, &current, self.owner_module) {
                info!(module = %describe(&current, id), "启动模块");
                match self.runtime.start(id, false).await {
                    Ok(()) => report.started.push(id),
                    Err(e) => {
                        error!(module_id = %id, error = %e, "启动模块失败");
                        failures.push(failure(DeployPhase::Start, describe(&current, id), e));
                        continue;
                    }
                }
                if !probes.is_empty() {
                    if let Ok(Some(module)) = self.runtime.module(id).await {
                        let status = probes.status(&module);
                        if status.state == ProbeState::Failure {
                            warn!(
                                module_id = %id,
                                diagnostic = status.diagnostic.as_deref().unwrap_or(""),
                                "模块启动后处于失败状态"
                            );
                        }
                    }
                }
            }
        }

        // 11. 通知
        for feature in removed {
            self.events
                .publish(FeaturesEvent::feature(FeatureEventKind::Uninstalled, feature, false))
                .await;
        }
        for feature in added {
            self.events
                .publish(FeaturesEvent::feature(FeatureEventKind::Installed, feature, false))
                .await;
        }

        if !failures.is_empty() {
            return Err(CoreError::Deployment {
                message: "部署过程中模块操作失败".to_string(),
                failures,
            });
        }
        deploy_log!(verbose, "部署完成");
        Ok(report)
    }

    /// 分批停止模块，返回已停止的模块
    async fn stop_modules(
        &self,
        mut pending: BTreeSet<ModuleId>,
        modules: &HashMap<ModuleId, Module>,
        verbose: bool,
        failures: &mut Vec<ModuleFailure>,
    ) -> Result<Vec<ModuleId>> {
        let mut stopped = Vec::new();
        while !pending.is_empty() {
            let mut services = HashMap::new();
            for id in &pending {
                services.insert(*id, self.runtime.registered_services(*id).await?);
            }
            for id in select_stop_batch(&pending, modules, &services) {
                deploy_log!(verbose, module = %describe(modules, id), "停止模块");
                match self.runtime.stop(id, true).await {
                    Ok(()) => stopped.push(id),
                    Err(e) => {
                        error!(module_id = %id, error = %e, "停止模块失败");
                        failures.push(failure(DeployPhase::Stop, describe(modules, id), e));
                    }
                }
                pending.remove(&id);
            }
        }
        Ok(stopped)
    }

    /// 调用运行时批量刷新并等待完成回调
    async fn refresh(&self, ids: &BTreeSet<ModuleId>) -> Result<()> {
        let (tx, rx) = oneshot::channel::<Vec<RefreshError>>();
        self.runtime.refresh(
            ids.iter().copied().collect(),
            Box::new(move |errors| {
                let _ = tx.send(errors);
            }),
        )?;

        let errors = rx.await.map_err(|_| {
            CoreError::Interrupted("运行时未调用刷新完成回调".to_string())
        })?;
        for refresh_error in errors {
            match refresh_error.module {
                Some(id) => error!(module_id = %id, error = %refresh_error.message, "刷新模块出错"),
                None => error!(error = %refresh_error.message, "刷新出错"),
            }
        }
        Ok(())
    }

    async fn apply_start_level(
        &self,
        id: ModuleId,
        location: &str,
        start_levels: &HashMap<String, u32>,
        phase: DeployPhase,
        failures: &mut Vec<ModuleFailure>,
    ) {
        let Some(level) = start_levels.get(location).copied().filter(|l| *l > 0) else {
            return;
        };
        debug!(module_id = %id, start_level = level, "设置启动级别");
        if let Err(e) = self.runtime.set_start_level(id, level).await {
            warn!(module_id = %id, error = %e, "设置启动级别失败");
            failures.push(failure(phase, location.to_string(), e));
        }
    }
}

fn is_resolved(module: &Module) -> bool {
    matches!(
        module.state,
        ModuleState::Resolved | ModuleState::Starting | ModuleState::Active | ModuleState::Stopping
    )
}

fn table(modules: &[Module]) -> HashMap<ModuleId, Module> {
    modules.iter().map(|m| (m.id, m.clone())).collect()
}

fn describe(modules: &HashMap<ModuleId, Module>, id: ModuleId) -> String {
    modules
        .get(&id)
        .map(Module::display_name)
        .unwrap_or_else(|| id.to_string())
}

fn failure(phase: DeployPhase, module: impl Into<String>, error: CoreError) -> ModuleFailure {
    ModuleFailure {
        phase,
        module: module.into(),
        error: error.to_string(),
    }
}

/// 位置 -> 显式启动级别（先出现的特性优先）
fn start_levels(definitions: &[FeatureDefinition]) -> HashMap<String, u32> {
    let mut levels = HashMap::new();
    for feature in definitions {
        for coordinate in &feature.modules {
            if let Some(level) = coordinate.start_level {
                levels.entry(coordinate.location.clone()).or_insert(level);
            }
        }
    }
    levels
}

/// 上一次已安装特性用到的候选资源
fn linked_to_features(resolution: &Resolution, features: &BTreeSet<FeatureId>) -> HashSet<ResourceId> {
    let mut linked = HashSet::new();
    for resource in &resolution.resources {
        if resource.feature.as_ref().is_some_and(|f| features.contains(f)) {
            resolution.transitive_candidates(&resource.id, &mut linked);
        }
    }
    linked
}

fn log_deployment(deployment: &Deployment, verbose: bool) {
    info!(
        to_install = deployment.to_install.len(),
        to_update = deployment.to_update.len(),
        to_delete = deployment.to_delete.len(),
        "部署计划"
    );
    for resource in &deployment.to_install {
        deploy_log!(verbose, resource = %resource.display_name(), "待安装");
    }
    for (id, resource) in &deployment.to_update {
        deploy_log!(verbose, module_id = %id, resource = %resource.display_name(), "待更新");
    }
    for id in &deployment.to_delete {
        deploy_log!(verbose, module_id = %id, "待卸载");
    }
}

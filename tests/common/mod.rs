//! 集成测试共用的模拟运行时、解析器与仓库目录

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use semver::Version;

use chips_features::feature::{MemoryStreamProvider, ResourceRef, Wire};
use chips_features::module::parse_version;
use chips_features::{
    Catalog, CoreError, DeployPhase, FeatureDefinition, FeaturesService, MemoryStorage, Module,
    ModuleCoordinate, ModuleId, ModuleRuntime, ModuleState, ModuleWire, RefreshCallback,
    RefreshError, Repository, Resolution, ResolveRequest, Resolver, Resource, ResourceId,
    Result, ServiceReference, State,
};

// ============================================================================
// 位置约定
// ============================================================================

/// `mvn:org/<name>/<version>`
pub fn location(name: &str, version: &str) -> String {
    format!("mvn:org/{name}/{version}")
}

/// 从位置中取出符号名与版本
pub fn parse_location(location: &str) -> (String, Version) {
    let mut parts = location.rsplit('/');
    let version = parts.next().unwrap_or("0.0.0");
    let name = parts.next().unwrap_or(location);
    (name.to_string(), parse_version(version).unwrap())
}

pub fn v(s: &str) -> Version {
    parse_version(s).unwrap()
}

/// 构造带模块的特性
pub fn feature(name: &str, version: &str, locations: &[String]) -> FeatureDefinition {
    let mut definition = FeatureDefinition::new(name, v(version));
    for location in locations {
        definition = definition.with_module(ModuleCoordinate::new(location.as_str()));
    }
    definition
}

/// 只包含给定特性的仓库
pub fn repository(uri: &str, features: Vec<FeatureDefinition>) -> Repository {
    let mut repository = Repository::new(uri);
    repository.features = features;
    repository
}

// ============================================================================
// 模拟运行时
// ============================================================================

#[derive(Default)]
struct RuntimeInner {
    modules: BTreeMap<ModuleId, Module>,
    contents: HashMap<ModuleId, Vec<u8>>,
    wiring: HashMap<ModuleId, Vec<ModuleWire>>,
    services: HashMap<ModuleId, Vec<ServiceReference>>,
    start_levels: HashMap<ModuleId, u32>,
    failing_starts: HashSet<String>,
    drop_refresh: bool,
    next_id: u64,
    calls: Vec<String>,
}

/// 内存中的模块运行时
///
/// 位置按 [`parse_location`] 约定得出符号名与版本。所有操作按调用顺序记录在
/// [`FakeRuntime::calls`] 中。
#[derive(Clone)]
pub struct FakeRuntime {
    inner: Arc<Mutex<RuntimeInner>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RuntimeInner {
                next_id: 1,
                ..RuntimeInner::default()
            })),
        }
    }

    /// 预置一个已安装模块，返回其标识
    pub fn preinstall(&self, location: &str, state: ModuleState) -> ModuleId {
        let mut inner = self.inner.lock().unwrap();
        let id = ModuleId(inner.next_id);
        inner.next_id += 1;
        let (name, version) = parse_location(location);
        let mut module = Module::new(id, name, version, location);
        module.state = state;
        inner.modules.insert(id, module);
        inner.contents.insert(id, location.as_bytes().to_vec());
        id
    }

    /// 设置需求布线 requirer -> provider
    pub fn wire(&self, requirer: ModuleId, provider: ModuleId) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .wiring
            .entry(requirer)
            .or_default()
            .push(ModuleWire::new(requirer, provider, "package"));
    }

    pub fn register_service(&self, reference: ServiceReference) {
        let mut inner = self.inner.lock().unwrap();
        inner.services.entry(reference.owner).or_default().push(reference);
    }

    /// 符号名为 `name` 的模块启动时失败
    pub fn fail_start(&self, name: &str) {
        self.inner.lock().unwrap().failing_starts.insert(name.to_string());
    }

    /// 刷新时丢弃完成回调
    pub fn drop_refresh_callback(&self) {
        self.inner.lock().unwrap().drop_refresh = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn snapshot(&self) -> Vec<Module> {
        self.inner.lock().unwrap().modules.values().cloned().collect()
    }

    pub fn by_name(&self, name: &str) -> Option<Module> {
        self.inner
            .lock()
            .unwrap()
            .modules
            .values()
            .find(|m| m.symbolic_name.as_deref() == Some(name))
            .cloned()
    }

    pub fn content(&self, id: ModuleId) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().contents.get(&id).cloned()
    }

    pub fn start_level(&self, id: ModuleId) -> Option<u32> {
        self.inner.lock().unwrap().start_levels.get(&id).copied()
    }

    fn with_module<T>(&self, id: ModuleId, f: impl FnOnce(&mut Module) -> T) -> Result<T> {
        let mut inner = self.inner.lock().unwrap();
        let module = inner
            .modules
            .get_mut(&id)
            .ok_or(CoreError::ModuleNotFound(id.0))?;
        Ok(f(module))
    }

    fn record(&self, call: String) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ModuleRuntime for FakeRuntime {
    async fn modules(&self) -> Result<Vec<Module>> {
        Ok(self.snapshot())
    }

    async fn install(&self, location: &str, content: Vec<u8>) -> Result<Module> {
        self.record(format!("install:{location}"));
        let mut inner = self.inner.lock().unwrap();
        let id = ModuleId(inner.next_id);
        inner.next_id += 1;
        let (name, version) = parse_location(location);
        let module = Module::new(id, name, version, location);
        inner.modules.insert(id, module.clone());
        inner.contents.insert(id, content);
        Ok(module)
    }

    async fn update(&self, id: ModuleId, content: Vec<u8>) -> Result<()> {
        self.record(format!("update:{}", id.0));
        self.with_module(id, |module| {
            module.state = ModuleState::Installed;
            module.last_modified = Utc::now();
        })?;
        self.inner.lock().unwrap().contents.insert(id, content);
        Ok(())
    }

    async fn uninstall(&self, id: ModuleId) -> Result<()> {
        self.record(format!("uninstall:{}", id.0));
        let mut inner = self.inner.lock().unwrap();
        inner
            .modules
            .remove(&id)
            .ok_or(CoreError::ModuleNotFound(id.0))?;
        inner.contents.remove(&id);
        inner.wiring.remove(&id);
        Ok(())
    }

    async fn start(&self, id: ModuleId, _transient: bool) -> Result<()> {
        self.record(format!("start:{}", id.0));
        let failing = self.inner.lock().unwrap().failing_starts.clone();
        self.with_module(id, |module| {
            let name = module.symbolic_name.clone().unwrap_or_default();
            if failing.contains(&name) {
                module.state = ModuleState::Resolved;
                return Err(CoreError::module_operation(DeployPhase::Start, name, "激活失败"));
            }
            module.state = ModuleState::Active;
            Ok(())
        })?
    }

    async fn stop(&self, id: ModuleId, _transient: bool) -> Result<()> {
        self.record(format!("stop:{}", id.0));
        self.with_module(id, |module| module.state = ModuleState::Resolved)
    }

    async fn wiring(&self, id: ModuleId) -> Result<Option<Vec<ModuleWire>>> {
        let inner = self.inner.lock().unwrap();
        let resolved = inner
            .modules
            .get(&id)
            .is_some_and(|m| m.state != ModuleState::Installed);
        if !resolved {
            return Ok(None);
        }
        Ok(Some(inner.wiring.get(&id).cloned().unwrap_or_default()))
    }

    async fn registered_services(&self, id: ModuleId) -> Result<Vec<ServiceReference>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .services
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_start_level(&self, id: ModuleId, level: u32) -> Result<()> {
        self.record(format!("start_level:{}:{}", id.0, level));
        self.with_module(id, |module| module.start_level = level)?;
        self.inner.lock().unwrap().start_levels.insert(id, level);
        Ok(())
    }

    fn refresh(&self, ids: Vec<ModuleId>, on_complete: RefreshCallback) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let list: Vec<String> = ids.iter().map(|id| id.0.to_string()).collect();
        inner.calls.push(format!("refresh:{}", list.join(",")));
        for id in &ids {
            if let Some(module) = inner.modules.get_mut(id) {
                if module.state == ModuleState::Installed {
                    module.state = ModuleState::Resolved;
                }
            }
        }
        if inner.drop_refresh {
            drop(on_complete);
            return Ok(());
        }
        drop(inner);
        tokio::spawn(async move {
            on_complete(Vec::<RefreshError>::new());
        });
        Ok(())
    }
}

// ============================================================================
// 模拟解析器
// ============================================================================

/// 直接展开特性定义的解析器
///
/// 每个特性产生一个特性标记资源，每个模块坐标产生一个模块资源；
/// 资源内容取自共享的内容表，未设置时为位置字符串本身。
#[derive(Clone, Default)]
pub struct FakeResolver {
    contents: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    dependencies: Arc<Mutex<HashMap<String, Vec<String>>>>,
    failure: Arc<Mutex<Option<String>>>,
    requests: Arc<Mutex<Vec<ResolveRequest>>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置位置对应的内容
    pub fn set_content(&self, location: &str, content: &[u8]) {
        self.contents
            .lock()
            .unwrap()
            .insert(location.to_string(), content.to_vec());
    }

    /// 声明资源之间的布线 requirer -> provider
    pub fn depends_on(&self, requirer: &str, provider: &str) {
        self.dependencies
            .lock()
            .unwrap()
            .entry(requirer.to_string())
            .or_default()
            .push(provider.to_string());
    }

    /// 之后的解析全部失败
    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }

    pub fn requests(&self) -> Vec<ResolveRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, request: ResolveRequest) -> Result<Resolution> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(reason) = self.failure.lock().unwrap().clone() {
            return Err(CoreError::ResolutionFailed(reason));
        }

        let contents = self.contents.lock().unwrap().clone();
        let dependencies = self.dependencies.lock().unwrap().clone();
        let mut resolution = Resolution::default();
        let mut seen = HashSet::new();

        for definition in &request.features {
            let marker = Resource::feature_marker(definition.id());
            for coordinate in &definition.modules {
                resolution.add_wire(
                    ResourceRef::Candidate(marker.id.clone()),
                    Wire::new("module", ResourceRef::Candidate(ResourceId::new(&coordinate.location))),
                );
                if !seen.insert(coordinate.location.clone()) {
                    continue;
                }
                let (name, version) = parse_location(&coordinate.location);
                resolution.add_resource(Resource::module(name, version, &coordinate.location));
                let content = contents
                    .get(&coordinate.location)
                    .cloned()
                    .unwrap_or_else(|| coordinate.location.as_bytes().to_vec());
                resolution.add_provider(
                    coordinate.location.clone(),
                    Arc::new(MemoryStreamProvider::new(content)),
                );
                for provider in dependencies.get(&coordinate.location).into_iter().flatten() {
                    resolution.add_wire(
                        ResourceRef::Candidate(ResourceId::new(&coordinate.location)),
                        Wire::new("package", ResourceRef::Candidate(ResourceId::new(provider))),
                    );
                }
            }
            resolution.add_resource(marker);
        }
        Ok(resolution)
    }
}

// ============================================================================
// 模拟仓库目录
// ============================================================================

#[derive(Clone, Default)]
pub struct FakeCatalog {
    repositories: Arc<Mutex<HashMap<String, Repository>>>,
    loads: Arc<Mutex<Vec<String>>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, repository: Repository) {
        self.repositories
            .lock()
            .unwrap()
            .insert(repository.uri.clone(), repository);
    }

    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn load_repository(&self, uri: &str) -> Result<Repository> {
        self.loads.lock().unwrap().push(uri.to_string());
        self.repositories
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| CoreError::RepositoryLoadFailed {
                uri: uri.to_string(),
                reason: "不存在".to_string(),
            })
    }
}

// ============================================================================
// 组装
// ============================================================================

pub struct Fixture {
    pub runtime: FakeRuntime,
    pub resolver: FakeResolver,
    pub catalog: FakeCatalog,
    pub storage: Arc<MemoryStorage>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            runtime: FakeRuntime::new(),
            resolver: FakeResolver::new(),
            catalog: FakeCatalog::new(),
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    /// 以初始持久化状态构建
    pub fn with_state(state: State) -> Self {
        Self {
            storage: Arc::new(MemoryStorage::with_state(state)),
            ..Self::new()
        }
    }

    /// 当前持久化状态
    pub fn stored(&self) -> State {
        self.storage.stored().unwrap_or_default()
    }

    /// 以内存存储构建服务
    pub async fn service(&self) -> FeaturesService {
        self.service_with(chips_features::FeaturesConfig::default()).await
    }

    pub async fn service_with(&self, config: chips_features::FeaturesConfig) -> FeaturesService {
        FeaturesService::builder(
            Arc::new(self.runtime.clone()),
            Arc::new(self.resolver.clone()),
            Arc::new(self.catalog.clone()),
        )
        .config(config)
        .storage(self.storage.clone())
        .build()
        .await
        .unwrap()
    }
}

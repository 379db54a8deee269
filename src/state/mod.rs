//! 持久化状态
//!
//! [`StateManager`] 是持久化状态的唯一持有者：读取只能拿到快照，
//! 写入只能通过 [`StateManager::transact`]，在全局锁内修改并原子落盘。

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::deploy::options::UpdateSnapshots;
use crate::feature::model::FeatureId;
use crate::module::metadata::ModuleId;
use crate::utils::{CoreError, Result};

/// 状态文件格式版本
pub const STATE_VERSION: u32 = 1;

fn state_version() -> u32 {
    STATE_VERSION
}

/// 持久化状态记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// 格式版本
    #[serde(default = "state_version")]
    pub version: u32,

    /// 已注册仓库地址
    #[serde(default)]
    pub repositories: BTreeSet<String>,

    /// 请求的特性
    #[serde(default)]
    pub features: BTreeSet<FeatureId>,

    /// 已安装特性（请求特性的依赖闭包）
    #[serde(default)]
    pub installed_features: BTreeSet<FeatureId>,

    /// 托管模块
    #[serde(default)]
    pub managed_modules: BTreeSet<ModuleId>,

    /// 位置 -> 最近一次的内容校验和
    #[serde(default)]
    pub checksums: BTreeMap<String, u32>,

    /// 启动特性是否已安装
    #[serde(default)]
    pub boot_done: bool,

    /// 最近保存时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            repositories: BTreeSet::new(),
            features: BTreeSet::new(),
            installed_features: BTreeSet::new(),
            managed_modules: BTreeSet::new(),
            checksums: BTreeMap::new(),
            boot_done: false,
            saved_at: None,
        }
    }
}

/// 状态存储后端
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// 读取状态，不存在时返回 `None`
    async fn load(&self) -> Result<Option<State>>;

    /// 原子写入状态
    async fn save(&self, state: &State) -> Result<()>;
}

/// JSON 文件存储
///
/// 先写入同目录下的临时文件并同步，再重命名覆盖目标文件，
/// 崩溃时不会留下写了一半的状态文件。
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// 以文件路径创建
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 状态文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn atomic_write_file(final_path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match final_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| {
        CoreError::Persistence(format!("无法创建目录 {}: {e}", dir.display()))
    })?;

    let mut named_temp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| {
        CoreError::Persistence(format!("无法在 {} 创建临时文件: {e}", dir.display()))
    })?;
    named_temp
        .as_file_mut()
        .write_all(bytes)
        .map_err(|e| CoreError::Persistence(format!("写入临时文件失败: {e}")))?;
    named_temp
        .as_file()
        .sync_all()
        .map_err(|e| CoreError::Persistence(format!("同步临时文件失败: {e}")))?;
    named_temp.persist(final_path).map_err(|e| {
        CoreError::Persistence(format!("无法替换 {}: {e}", final_path.display()))
    })?;
    Ok(())
}

#[async_trait]
impl StateStorage for JsonFileStorage {
    async fn load(&self) -> Result<Option<State>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &State) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic_write_file(&path, &bytes))
            .await
            .map_err(|e| CoreError::Persistence(format!("写入任务失败: {e}")))?
    }
}

/// 内存存储
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<std::sync::Mutex<Option<State>>>,
    fail_saves: Arc<std::sync::atomic::AtomicBool>,
}

impl MemoryStorage {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 以初始状态创建
    pub fn with_state(state: State) -> Self {
        let storage = Self::default();
        if let Ok(mut guard) = storage.state.lock() {
            *guard = Some(state);
        }
        storage
    }

    /// 让后续保存失败
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// 最近保存的状态
    pub fn stored(&self) -> Option<State> {
        self.state.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl StateStorage for MemoryStorage {
    async fn load(&self) -> Result<Option<State>> {
        Ok(self.stored())
    }

    async fn save(&self, state: &State) -> Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::Persistence("存储不可写".to_string()));
        }
        let mut guard = self
            .state
            .lock()
            .map_err(|_| CoreError::Persistence("存储锁已损坏".to_string()))?;
        *guard = Some(state.clone());
        Ok(())
    }
}

/// 状态管理器
pub struct StateManager {
    state: Mutex<State>,
    storage: Arc<dyn StateStorage>,
    policy: UpdateSnapshots,
}

impl StateManager {
    /// 从存储加载状态
    ///
    /// 读取失败时记录警告并从空状态开始，不影响启动。
    pub async fn load(storage: Arc<dyn StateStorage>, policy: UpdateSnapshots) -> Self {
        let state = match storage.load().await {
            Ok(Some(state)) => {
                info!(
                    features = state.features.len(),
                    managed_modules = state.managed_modules.len(),
                    "已加载特性服务状态"
                );
                state
            }
            Ok(None) => {
                debug!("未找到特性服务状态，使用空状态");
                State::default()
            }
            Err(e) => {
                warn!(error = %e, "读取特性服务状态失败，使用空状态");
                State::default()
            }
        };
        Self {
            state: Mutex::new(state),
            storage,
            policy,
        }
    }

    /// 一致性快照
    pub async fn snapshot(&self) -> State {
        self.state.lock().await.clone()
    }

    /// 在锁内修改状态并保存
    ///
    /// 保存失败只记录警告，内存中的状态保持修改后的值，下一次事务会重试写入。
    pub async fn transact<F, R>(&self, mutate: F) -> R
    where
        F: FnOnce(&mut State) -> R,
    {
        let mut state = self.state.lock().await;
        let result = mutate(&mut state);
        if self.policy != UpdateSnapshots::Checksum {
            state.checksums.clear();
        }
        state.version = STATE_VERSION;
        state.saved_at = Some(Utc::now());
        if let Err(e) = self.storage.save(&state).await {
            warn!(error = %e, "保存特性服务状态失败");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_storage_roundtrip_and_missing() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("nested/state.json"));
        assert!(storage.load().await.unwrap().is_none());

        let mut state = State::default();
        state.features.insert(FeatureId::parse("web/1.0").unwrap());
        state.managed_modules.insert(ModuleId(12));
        state.checksums.insert("file:/a.jar".to_string(), 42);
        storage.save(&state).await.unwrap();

        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);
        // 临时文件不会残留
        let entries = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let storage = Arc::new(JsonFileStorage::new(&path));
        assert!(storage.load().await.is_err());
        let manager = StateManager::load(storage, UpdateSnapshots::Checksum).await;
        assert_eq!(manager.snapshot().await, State::default());
    }

    #[tokio::test]
    async fn test_transact_persists() {
        let storage = MemoryStorage::new();
        let manager = StateManager::load(Arc::new(storage.clone()), UpdateSnapshots::Checksum).await;

        let count = manager
            .transact(|state| {
                state.managed_modules.insert(ModuleId(3));
                state.checksums.insert("file:/x".to_string(), 7);
                state.managed_modules.len()
            })
            .await;
        assert_eq!(count, 1);

        let stored = storage.stored().unwrap();
        assert!(stored.managed_modules.contains(&ModuleId(3)));
        assert_eq!(stored.checksums.get("file:/x"), Some(&7));
        assert!(stored.saved_at.is_some());
    }

    #[tokio::test]
    async fn test_checksums_cleared_without_checksum_policy() {
        let mut initial = State::default();
        initial.checksums.insert("file:/old".to_string(), 1);
        let storage = MemoryStorage::with_state(initial);
        let manager = StateManager::load(Arc::new(storage.clone()), UpdateSnapshots::Always).await;

        manager
            .transact(|state| {
                state.checksums.insert("file:/new".to_string(), 2);
            })
            .await;
        assert!(manager.snapshot().await.checksums.is_empty());
        assert!(storage.stored().unwrap().checksums.is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_memory_state() {
        let storage = MemoryStorage::new();
        storage.fail_saves(true);
        let manager = StateManager::load(Arc::new(storage.clone()), UpdateSnapshots::Checksum).await;

        manager
            .transact(|state| {
                state.boot_done = true;
            })
            .await;
        assert!(manager.snapshot().await.boot_done);
        assert!(storage.stored().is_none());
    }

    #[test]
    fn test_state_file_format() {
        let json = r#"{
            "features": ["web/1.0.0"],
            "installed_features": ["web/1.0.0", "http/2.0.0"],
            "managed_modules": [5, 6],
            "checksums": {"mvn:org/a/1.0-SNAPSHOT": 1234},
            "boot_done": true
        }"#;
        let state: State = serde_json::from_str(json).unwrap();
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.installed_features.len(), 2);
        assert!(state.managed_modules.contains(&ModuleId(6)));
        assert!(state.repositories.is_empty());
    }
}

//! 特性与仓库事件
//!
//! 监听者注册时会先收到当前已注册仓库与已安装特性的重放事件
//! （`replay = true`），之后才收到实时事件，因此不会错过已生效的特性。

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::model::FeatureId;

/// 特性事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureEventKind {
    /// 特性已安装
    Installed,
    /// 特性已卸载
    Uninstalled,
}

/// 仓库事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryEventKind {
    /// 仓库已添加
    Added,
    /// 仓库已移除
    Removed,
}

/// 特性服务事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeaturesEvent {
    /// 特性事件
    Feature {
        /// 事件类型
        kind: FeatureEventKind,
        /// 特性
        feature: FeatureId,
        /// 是否为注册时的重放
        replay: bool,
        /// 事件时间
        timestamp: DateTime<Utc>,
    },
    /// 仓库事件
    Repository {
        /// 事件类型
        kind: RepositoryEventKind,
        /// 仓库地址
        uri: String,
        /// 是否为注册时的重放
        replay: bool,
        /// 事件时间
        timestamp: DateTime<Utc>,
    },
}

impl FeaturesEvent {
    /// 特性事件
    pub fn feature(kind: FeatureEventKind, feature: FeatureId, replay: bool) -> Self {
        FeaturesEvent::Feature {
            kind,
            feature,
            replay,
            timestamp: Utc::now(),
        }
    }

    /// 仓库事件
    pub fn repository(kind: RepositoryEventKind, uri: impl Into<String>, replay: bool) -> Self {
        FeaturesEvent::Repository {
            kind,
            uri: uri.into(),
            replay,
            timestamp: Utc::now(),
        }
    }

    /// 是否为重放事件
    pub fn is_replay(&self) -> bool {
        match self {
            FeaturesEvent::Feature { replay, .. } | FeaturesEvent::Repository { replay, .. } => {
                *replay
            }
        }
    }
}

/// 事件监听回调
pub type FeaturesListener = Arc<dyn Fn(&FeaturesEvent) + Send + Sync>;

/// 注册监听者时重放的当前状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySnapshot {
    /// 已注册的仓库地址
    pub repositories: Vec<String>,
    /// 已安装的特性
    pub installed: Vec<FeatureId>,
}

struct ListenerEntry {
    id: String,
    listener: FeaturesListener,
}

/// 特性事件总线
///
/// 监听者按注册顺序同步调用；单个监听者 panic 不影响其他监听者。
#[derive(Clone, Default)]
pub struct FeatureEventBus {
    listeners: Arc<RwLock<BTreeMap<u64, ListenerEntry>>>,
    sequence: Arc<AtomicU64>,
}

impl FeatureEventBus {
    /// 创建事件总线
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听者并重放当前状态
    ///
    /// `snapshot` 在持有写锁之后才求值，重放和注册也在这把锁内完成，
    /// 期间发布的实时事件要等注册后才送达。
    /// `snapshot` 不能再发布事件。先重放仓库添加事件，再重放特性安装事件。
    /// 返回订阅标识。
    pub async fn subscribe<F>(&self, listener: FeaturesListener, snapshot: F) -> String
    where
        F: Future<Output = ReplaySnapshot>,
    {
        let mut listeners = self.listeners.write().await;
        let snapshot = snapshot.await;

        for uri in snapshot.repositories {
            let event = FeaturesEvent::repository(RepositoryEventKind::Added, uri, true);
            deliver(&listener, &event);
        }
        for feature in snapshot.installed {
            let event = FeaturesEvent::feature(FeatureEventKind::Installed, feature, true);
            deliver(&listener, &event);
        }

        let id = Uuid::new_v4().to_string();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        listeners.insert(
            seq,
            ListenerEntry {
                id: id.clone(),
                listener,
            },
        );
        debug!(subscription_id = %id, "注册特性事件监听者");
        id
    }

    /// 注销监听者
    ///
    /// 返回是否找到该订阅。
    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut listeners = self.listeners.write().await;
        let key = listeners
            .iter()
            .find(|(_, entry)| entry.id == subscription_id)
            .map(|(key, _)| *key);
        match key {
            Some(key) => {
                listeners.remove(&key);
                debug!(subscription_id = %subscription_id, "注销特性事件监听者");
                true
            }
            None => false,
        }
    }

    /// 发布实时事件
    pub async fn publish(&self, event: FeaturesEvent) {
        let listeners = self.listeners.read().await;
        for entry in listeners.values() {
            deliver(&entry.listener, &event);
        }
    }

    /// 监听者数量
    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

fn deliver(listener: &FeaturesListener, event: &FeaturesEvent) {
    if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        warn!(event = ?event, "特性事件监听者处理失败");
    }
}

//! 模块状态探针
//!
//! 多个状态服务可以对同一模块给出各自的判断，组合探针按注册顺序
//! 汇总：最后一个非 `Unknown` 的回答生效，诊断信息全部拼接。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::metadata::Module;

/// 探针给出的模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    /// 无法判断
    Unknown,
    /// 等待中
    Waiting,
    /// 启动中
    Starting,
    /// 运行正常
    Active,
    /// 停止中
    Stopping,
    /// 失败
    Failure,
}

impl Default for ProbeState {
    fn default() -> Self {
        ProbeState::Unknown
    }
}

/// 模块状态探针
pub trait ModuleStateProbe: Send + Sync {
    /// 模块状态
    fn state(&self, module: &Module) -> ProbeState;

    /// 诊断信息
    fn diagnostic(&self, module: &Module) -> Option<String>;
}

/// 组合状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    /// 汇总状态
    pub state: ProbeState,
    /// 拼接后的诊断信息
    pub diagnostic: Option<String>,
}

/// 组合状态探针
#[derive(Default, Clone)]
pub struct CompositeStateProbe {
    probes: Vec<Arc<dyn ModuleStateProbe>>,
}

impl CompositeStateProbe {
    /// 创建空的组合探针
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册探针
    pub fn register(&mut self, probe: Arc<dyn ModuleStateProbe>) {
        self.probes.push(probe);
    }

    /// 已注册探针数量
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// 是否没有注册探针
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// 汇总模块状态
    pub fn status(&self, module: &Module) -> ModuleStatus {
        ModuleStatus {
            state: self.state(module),
            diagnostic: self.diagnostic(module),
        }
    }
}

impl ModuleStateProbe for CompositeStateProbe {
    fn state(&self, module: &Module) -> ProbeState {
        // 后注册的探针覆盖先注册的
        self.probes
            .iter()
            .map(|probe| probe.state(module))
            .filter(|state| *state != ProbeState::Unknown)
            .next_back()
            .unwrap_or(ProbeState::Unknown)
    }

    fn diagnostic(&self, module: &Module) -> Option<String> {
        let parts: Vec<String> = self
            .probes
            .iter()
            .filter_map(|probe| probe.diagnostic(module))
            .filter(|d| !d.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

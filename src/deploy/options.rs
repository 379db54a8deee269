//! 部署选项

use serde::{Deserialize, Serialize};

/// 快照制品的更新检测策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSnapshots {
    /// 已匹配的模块从不重新更新
    None,
    /// 比较内容校验和，变化时才更新
    #[serde(alias = "crc")]
    Checksum,
    /// 每次都更新
    Always,
}

impl Default for UpdateSnapshots {
    fn default() -> Self {
        UpdateSnapshots::Checksum
    }
}

/// 调用方传入的部署选项
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// 请求的特性不存在时跳过而不是失败
    #[serde(default)]
    pub skip_missing: bool,

    /// 把每一步部署信息提升到 info 级别
    #[serde(default)]
    pub verbose: bool,

    /// 只计算并记录计划，不执行
    #[serde(default)]
    pub simulate: bool,

    /// 新安装的模块不自动启动
    #[serde(default)]
    pub no_auto_start: bool,

    /// 完全跳过刷新
    #[serde(default)]
    pub no_refresh: bool,

    /// 不刷新非托管模块
    #[serde(default)]
    pub no_refresh_unmanaged: bool,

    /// 不沿布线扩展刷新集合
    #[serde(default)]
    pub no_refresh_managed: bool,
}

impl DeployOptions {
    /// 默认选项
    pub fn new() -> Self {
        Self::default()
    }

    /// 跳过缺失特性
    pub fn skip_missing(mut self) -> Self {
        self.skip_missing = true;
        self
    }

    /// 详细日志
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// 仅模拟
    pub fn simulate(mut self) -> Self {
        self.simulate = true;
        self
    }

    /// 不自动启动
    pub fn no_auto_start(mut self) -> Self {
        self.no_auto_start = true;
        self
    }

    /// 不刷新
    pub fn no_refresh(mut self) -> Self {
        self.no_refresh = true;
        self
    }

    /// 不刷新非托管模块
    pub fn no_refresh_unmanaged(mut self) -> Self {
        self.no_refresh_unmanaged = true;
        self
    }

    /// 不扩展刷新集合
    pub fn no_refresh_managed(mut self) -> Self {
        self.no_refresh_managed = true;
        self
    }
}

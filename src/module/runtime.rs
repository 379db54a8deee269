//! 模块运行时接口
//!
//! 部署引擎通过 [`ModuleRuntime`] 操作外部模块运行时：枚举模块、
//! 安装/更新/卸载、启停、查询布线与服务使用情况，以及批量刷新。

use async_trait::async_trait;

use super::metadata::{Module, ModuleId, ModuleWire, ServiceReference};
use crate::utils::Result;

/// 刷新过程中运行时报告的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshError {
    /// 出错的模块（运行时无法确定时为 `None`）
    pub module: Option<ModuleId>,
    /// 错误信息
    pub message: String,
}

/// 批量刷新完成回调
///
/// 运行时在刷新结束后调用一次，携带刷新期间发生的错误。
pub type RefreshCallback = Box<dyn FnOnce(Vec<RefreshError>) + Send + 'static>;

/// 模块运行时接口
///
/// 所有调用都可能阻塞（读取制品、加载代码），由部署工作线程串行调用。
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    /// 枚举所有模块及其状态
    async fn modules(&self) -> Result<Vec<Module>>;

    /// 按标识查询模块
    async fn module(&self, id: ModuleId) -> Result<Option<Module>> {
        Ok(self.modules().await?.into_iter().find(|m| m.id == id))
    }

    /// 从内容安装新模块
    async fn install(&self, location: &str, content: Vec<u8>) -> Result<Module>;

    /// 替换模块内容，保留模块标识
    async fn update(&self, id: ModuleId, content: Vec<u8>) -> Result<()>;

    /// 卸载模块
    async fn uninstall(&self, id: ModuleId) -> Result<()>;

    /// 启动模块
    async fn start(&self, id: ModuleId, transient: bool) -> Result<()>;

    /// 停止模块
    async fn stop(&self, id: ModuleId, transient: bool) -> Result<()>;

    /// 查询模块当前的需求布线（未解析的模块返回 `None`）
    async fn wiring(&self, id: ModuleId) -> Result<Option<Vec<ModuleWire>>>;

    /// 查询模块注册的服务及其使用者
    async fn registered_services(&self, id: ModuleId) -> Result<Vec<ServiceReference>>;

    /// 设置模块启动级别
    async fn set_start_level(&self, id: ModuleId, level: u32) -> Result<()>;

    /// 批量刷新
    ///
    /// 立即返回；刷新完成后调用 `on_complete`。
    fn refresh(&self, ids: Vec<ModuleId>, on_complete: RefreshCallback) -> Result<()>;
}

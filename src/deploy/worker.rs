//! 单工作者部署队列
//!
//! 所有协调都提交到同一个后台任务上串行执行，调用方等待结果。
//! 调用方在等待中被取消（例如其会话被关闭）不会中断正在执行的协调；
//! 只有尚未开始、且调用方已放弃等待的任务会被跳过。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::utils::{CoreError, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 部署工作者
pub struct DeployWorker {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeployWorker {
    /// 启动工作者
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn spawn() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let running = Arc::new(AtomicBool::new(true));

        let handle = tokio::spawn(async move {
            debug!("部署工作者启动");
            while let Some(job) = receiver.recv().await {
                job.await;
            }
            debug!("部署工作者结束");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            running,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// 提交任务并等待其结果
    pub async fn submit<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("部署工作者已停止".to_string()));
        }

        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            if result_tx.is_closed() {
                debug!("调用方已放弃等待，跳过部署任务");
                return;
            }
            let result = task.await;
            if result_tx.send(result).is_err() {
                debug!("调用方已放弃等待，部署结果被丢弃");
            }
        });

        {
            let sender = self.sender.lock().await;
            sender
                .as_ref()
                .ok_or_else(|| CoreError::Internal("部署工作者已停止".to_string()))?
                .send(job)
                .map_err(|_| CoreError::Internal("部署工作者已停止".to_string()))?;
        }

        result_rx.await.map_err(|_| CoreError::Cancelled)?
    }

    /// 是否正在运行
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 停止接收新任务并等待已提交的任务完成
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("停止部署工作者");
        // 已入队的任务仍会执行完
        self.sender.lock().await.take();
        if let Some(handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(30), handle).await.is_err() {
                warn!("等待部署工作者结束超时");
            }
        }
    }
}

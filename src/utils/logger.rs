//! 日志系统模块
//!
//! 基于 tracing 生态。控制台与滚动文件两路输出都经过非阻塞写入器，
//! 支持 JSON 结构化格式和 EnvFilter 指令过滤。
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_features::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::builder()
//!         .level("debug")
//!         .file_output("./logs", RotationStrategy::Daily)
//!         .build();
//!     let _guard = Logger::init(config)?;
//!
//!     tracing::info!(feature = "web/1.0.0", "特性已安装");
//!     Ok(())
//! }
//! ```

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// 日志文件轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 单个文件，不轮转
    Never,
    /// 每分钟
    Minutely,
    /// 每小时
    Hourly,
    /// 每天
    #[default]
    Daily,
}

impl RotationStrategy {
    const ALL: [(RotationStrategy, &'static str); 4] = [
        (RotationStrategy::Never, "never"),
        (RotationStrategy::Minutely, "minutely"),
        (RotationStrategy::Hourly, "hourly"),
        (RotationStrategy::Daily, "daily"),
    ];

    fn name(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(strategy, _)| *strategy == self)
            .map_or("daily", |(_, name)| *name)
    }

    fn rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Minutely => Rotation::MINUTELY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }
}

impl FromStr for RotationStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|(_, name)| *name == lowered)
            .map(|(strategy, _)| *strategy)
            .ok_or_else(|| CoreError::InvalidConfigValue {
                key: "logging.rotation".to_string(),
                reason: format!("未知的轮转策略 '{s}'"),
            })
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 滚动文件输出设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutput {
    /// 日志目录
    pub dir: PathBuf,
    /// 文件名前缀
    pub prefix: String,
    /// 轮转策略
    pub rotation: RotationStrategy,
    /// 最多保留的文件数
    pub keep: usize,
}

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认级别，`RUST_LOG` 存在时被覆盖
    pub level: String,
    /// JSON 格式
    pub json: bool,
    /// 写控制台
    pub console: bool,
    /// 写滚动文件
    pub file: Option<FileOutput>,
    /// 附加的 EnvFilter 指令，逗号分隔
    pub directives: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            console: true,
            file: None,
            directives: None,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 由配置文件的 `logging` 段转换，未知轮转策略按每天处理
    pub fn from_log_config(log: &LogConfig) -> Self {
        let file = match (&log.log_dir, log.file_output) {
            (Some(dir), true) => Some(FileOutput {
                dir: dir.clone(),
                prefix: env!("CARGO_PKG_NAME").to_string(),
                rotation: log.rotation.parse().unwrap_or_default(),
                keep: log.max_files,
            }),
            _ => None,
        };
        Self {
            level: log.level.clone(),
            json: log.json_format,
            file,
            ..Default::default()
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 默认级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// JSON 格式
    pub fn json(mut self, enable: bool) -> Self {
        self.config.json = enable;
        self
    }

    /// 关闭控制台输出
    pub fn quiet(mut self) -> Self {
        self.config.console = false;
        self
    }

    /// 写入 `dir` 下的滚动文件，保留 7 个
    pub fn file_output(mut self, dir: impl Into<PathBuf>, rotation: RotationStrategy) -> Self {
        self.config.file = Some(FileOutput {
            dir: dir.into(),
            prefix: env!("CARGO_PKG_NAME").to_string(),
            rotation,
            keep: 7,
        });
        self
    }

    /// 附加过滤指令，例如 `chips_features::deploy=trace`
    pub fn directives(mut self, directives: impl Into<String>) -> Self {
        self.config.directives = Some(directives.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

/// 日志守卫
///
/// 丢弃时刷新非阻塞写入器中挂起的日志，需保持到进程退出。
#[derive(Default)]
pub struct LogGuard {
    guards: Vec<WorkerGuard>,
}

impl LogGuard {
    /// 是否持有写入器
    pub fn is_active(&self) -> bool {
        !self.guards.is_empty()
    }
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 日志系统
pub struct Logger;

impl Logger {
    /// 安装全局订阅者，进程内只能成功一次
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(CoreError::InitFailed("日志系统已初始化".to_string()));
        }

        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);

        if config.console {
            let (writer, g) = tracing_appender::non_blocking(std::io::stdout());
            guard.guards.push(g);
            layers.push(Self::layer(writer, config.json, true));
        }

        if let Some(file) = &config.file {
            let appender = RollingFileAppender::builder()
                .rotation(file.rotation.rotation())
                .filename_prefix(&file.prefix)
                .filename_suffix("log")
                .max_log_files(file.keep.max(1))
                .build(&file.dir)
                .map_err(|e| {
                    INSTALLED.store(false, Ordering::SeqCst);
                    CoreError::InitFailed(format!("无法创建日志文件 {}: {e}", file.dir.display()))
                })?;
            let (writer, g) = tracing_appender::non_blocking(appender);
            guard.guards.push(g);
            layers.push(Self::layer(writer, config.json, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(Self::filter(&config))
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {e}")))?;

        Ok(guard)
    }

    /// 安装失败时返回空守卫，供测试和命令行使用
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    fn layer(writer: NonBlocking, json: bool, ansi: bool) -> BoxedLayer {
        let layer = fmt::layer().with_writer(writer).with_target(true);
        if json {
            layer.json().with_ansi(false).boxed()
        } else {
            layer.with_ansi(ansi).boxed()
        }
    }

    /// `RUST_LOG` 优先于配置级别，附加指令中无法解析的项被忽略
    fn filter(config: &LoggerConfig) -> EnvFilter {
        let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
        config
            .directives
            .iter()
            .flat_map(|d| d.split(','))
            .filter_map(|d| d.trim().parse::<Directive>().ok())
            .fold(base, EnvFilter::add_directive)
    }
}

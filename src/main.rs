//! Chips Features 命令行入口
//!
//! 特性服务的命令行工具，提供配置检查与状态查看功能。
//!
//! # 命令概览
//!
//! - `version` - 显示版本信息
//! - `check-config` - 验证配置文件
//! - `show-state` - 查看持久化状态
//!
//! # 使用示例
//!
//! ```bash
//! # 检查配置文件
//! chips-features check-config -c config.yaml
//!
//! # 查看状态文件
//! chips-features -c config.yaml show-state
//!
//! # 查看版本
//! chips-features version
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use chips_features::{
    FeaturesConfig, JsonFileStorage, Logger, LoggerConfig, StateStorage,
};

/// Chips Features - 薯片特性服务
///
/// 动态模块运行时之上的特性部署协调引擎。
#[derive(Parser)]
#[command(name = "chips-features")]
#[command(version, about = "薯片特性服务命令行工具", long_about = None)]
#[command(author = "Chips Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 查看版本信息
    Version,

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 查看持久化状态
    ///
    /// 读取配置中的状态文件，显示请求特性、已安装特性与托管模块。
    ShowState {
        /// 状态文件路径（不指定则使用配置中的路径）
        #[arg(short, long)]
        state: Option<PathBuf>,
    },
}

/// 加载配置，文件不存在时使用默认配置
async fn load_config(path: &Path) -> Result<FeaturesConfig, Box<dyn std::error::Error>> {
    if path.exists() {
        Ok(FeaturesConfig::from_file(path).await?)
    } else {
        tracing::debug!(path = %path.display(), "配置文件不存在，使用默认配置");
        Ok(FeaturesConfig::default())
    }
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    if !path.exists() {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        println!();
        print_config(&FeaturesConfig::default());
        return Ok(());
    }

    match FeaturesConfig::from_file(path).await {
        Ok(config) => {
            println!("✅ 配置文件有效！");
            println!();
            print_config(&config);
            Ok(())
        }
        Err(e) => {
            println!("❌ 配置文件无效: {}", e);
            Err(Box::new(e))
        }
    }
}

/// 打印配置内容
fn print_config(config: &FeaturesConfig) {
    let deployment = &config.deployment;
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [部署配置]");
    println!("    更新检测策略:   {:?}", deployment.update_snapshots);
    println!("    更新版本范围:   {}", deployment.module_update_range);
    println!("    不可变前缀:     {:?}", deployment.immutable_schemes);
    println!("    启动特性:       {:?}", deployment.boot_features);
    match deployment.owner_module {
        Some(id) => println!("    所属模块:       {}", id),
        None => println!("    所属模块:       无"),
    }
    println!();
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!("    轮转策略:       {}", config.logging.rotation);
    println!();
    println!("  [状态存储]");
    println!("    状态文件:       {}", config.state.path.display());
    println!("────────────────────────────────────────");
}

/// 显示持久化状态
async fn show_state(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let storage = JsonFileStorage::new(path);
    println!();
    println!("特性服务状态: {}", path.display());
    println!("═══════════════════════════════════════");

    let Some(state) = storage.load().await? else {
        println!();
        println!("⚠️  状态文件不存在");
        println!("═══════════════════════════════════════");
        println!();
        return Ok(());
    };

    println!("  格式版本:   {}", state.version);
    if let Some(saved_at) = state.saved_at {
        println!("  保存时间:   {}", saved_at.to_rfc3339());
    }
    println!("  启动完成:   {}", if state.boot_done { "是" } else { "否" });
    println!();
    println!("  [仓库] ({})", state.repositories.len());
    for uri in &state.repositories {
        println!("    {}", uri);
    }
    println!("  [请求特性] ({})", state.features.len());
    for feature in &state.features {
        println!("    {}", feature);
    }
    println!("  [已安装特性] ({})", state.installed_features.len());
    for feature in &state.installed_features {
        println!("    {}", feature);
    }
    println!("  [托管模块] ({})", state.managed_modules.len());
    for id in &state.managed_modules {
        println!("    {}", id);
    }
    println!("  [校验和] ({})", state.checksums.len());
    for (location, checksum) in &state.checksums {
        println!("    {:08x}  {}", checksum, location);
    }
    println!("═══════════════════════════════════════");
    println!();
    Ok(())
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Chips Features - 薯片特性服务");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", chips_features::VERSION);
    println!("  状态格式版本:     {}", chips_features::state::STATE_VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let _guard = Logger::try_init(LoggerConfig::builder().level(&cli.log_level).build());

    match cli.command {
        Commands::Version => {
            print_version();
        }

        Commands::CheckConfig { config } => {
            let config_path = config.unwrap_or(cli.config);
            check_config(&config_path).await?;
        }

        Commands::ShowState { state } => {
            let path = match state {
                Some(path) => path,
                None => load_config(&cli.config).await?.state.path,
            };
            show_state(&path).await?;
        }
    }

    Ok(())
}

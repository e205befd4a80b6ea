use std::time::Duration;

use anyhow::{Context, Result};
use clap::{parser::ValueSource, Arg, Command};
use reminder_core::AppConfig;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .context("缺少配置文件参数")?;
    let mode_str = matches
        .get_one::<String>("mode")
        .context("缺少运行模式参数")?;

    // 未显式指定配置文件时按默认路径查找，找不到就用内置默认值
    let explicit_config = matches.value_source("config") != Some(ValueSource::DefaultValue);
    let mut config = if explicit_config {
        AppConfig::load(Some(config_path))
            .with_context(|| format!("加载配置文件失败: {config_path}"))?
    } else {
        AppConfig::load(None).context("加载默认配置失败")?
    };

    if let Some(id) = matches.get_one::<String>("node-id") {
        config.scheduler.node_id = Some(id.clone());
    }

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.logging.level.clone());
    let log_format = matches
        .get_one::<String>("log-format")
        .cloned()
        .unwrap_or_else(|| config.logging.format.clone());
    init_logging(&log_level, &log_format)?;

    let node_id = config.resolve_node_id();
    info!("启动提醒推送系统");
    info!("配置文件: {}", if explicit_config { config_path.as_str() } else { "默认" });
    info!("运行模式: {mode_str}");
    info!("节点标识: {node_id}");

    let app_mode = parse_app_mode(mode_str, &config)?;
    let app = Application::new(config, app_mode, node_id).await?;

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    shutdown::wait_for_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("提醒推送系统已退出");
    Ok(())
}

fn build_cli() -> Command {
    Command::new("reminder")
        .version("1.0.0")
        .about("定时提醒与多平台消息推送系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/reminder.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["scheduler", "fanout", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("node-id")
                .long("node-id")
                .value_name("ID")
                .help("节点标识，覆盖配置中的scheduler.node_id"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，默认取配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，默认取配置文件")
                .value_parser(["json", "pretty"]),
        )
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 解析应用运行模式
fn parse_app_mode(mode_str: &str, config: &AppConfig) -> Result<AppMode> {
    match mode_str {
        "scheduler" => {
            if !config.scheduler.enabled {
                return Err(anyhow::anyhow!("调度模式被禁用，请检查配置"));
            }
            Ok(AppMode::Scheduler)
        }
        "fanout" => {
            if !config.fanout.enabled {
                return Err(anyhow::anyhow!("扇出模式被禁用，请检查配置"));
            }
            Ok(AppMode::Fanout)
        }
        "all" => Ok(AppMode::All),
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode_str}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ArgMatches;

    fn parse(args: &[&str]) -> ArgMatches {
        build_cli().try_get_matches_from(args).unwrap()
    }

    #[test]
    fn test_cli_defaults() {
        let matches = parse(&["reminder"]);
        assert_eq!(matches.get_one::<String>("mode").unwrap(), "all");
        assert_eq!(
            matches.value_source("config"),
            Some(ValueSource::DefaultValue)
        );
        assert!(matches.get_one::<String>("log-level").is_none());
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(build_cli()
            .try_get_matches_from(["reminder", "--mode", "api"])
            .is_err());
    }

    #[test]
    fn test_parse_app_mode_respects_config() {
        let mut config = AppConfig::default();
        assert_eq!(parse_app_mode("all", &config).unwrap(), AppMode::All);
        assert_eq!(
            parse_app_mode("scheduler", &config).unwrap(),
            AppMode::Scheduler
        );

        config.fanout.enabled = false;
        assert!(parse_app_mode("fanout", &config).is_err());
        assert_eq!(parse_app_mode("all", &config).unwrap(), AppMode::All);
    }
}

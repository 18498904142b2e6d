mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{CacheAction, Cli, Commands, ConfigAction, ScanArgs};
use deepscan::cache::ResultsCache;
use deepscan::config::Config;
use deepscan::pool::worker::serve_stdio;
use deepscan::utils::{format_duration, format_size, format_time};
use deepscan::Scanner;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 日志输出到 stderr，stdout 留给 JSON 结果和 worker 协议
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // worker 不读取配置，分析器描述由调度进程通过握手下发
    if let Commands::Worker = cli.command {
        return tokio::task::spawn_blocking(serve_stdio).await?;
    }

    // 加载配置
    let mut config = if let Some(config_path) = &cli.config {
        Config::load_from_file(config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        Config::load_or_create_default()?
    };

    match cli.command {
        Commands::Scan(args) => {
            args.apply_to(&mut config);
            run_scan(config, args).await?;
        }
        Commands::Cache { action } => {
            let cache = ResultsCache::open(&config.cache)?;
            match action {
                CacheAction::Stats => {
                    let stats = cache.stats()?;
                    println!("缓存目录: {}", stats.directory.display());
                    println!("分片数量: {}", stats.shards);
                    println!("条目数量: {}", stats.entries);
                    println!("已用空间: {} / {}", format_size(stats.total_bytes), format_size(stats.size_limit));
                }
                CacheAction::Clear => {
                    let removed = cache.clear()?;
                    println!("已清除 {} 条缓存记录", removed);
                }
            }
            cache.close()?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Path => {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::default_config_path()?,
                };
                println!("{}", path.display());
            }
        },
        Commands::Worker => {}
    }

    Ok(())
}

async fn run_scan(config: Config, args: ScanArgs) -> Result<()> {
    let cache = if config.cache.enabled {
        Some(Arc::new(ResultsCache::open(&config.cache)?))
    } else {
        None
    };

    let progress = create_progress_bar();
    let mut scanner = Scanner::new(config.scan.clone(), config.analyser_specs())?.on_progress({
        let progress = progress.clone();
        move |finished, total| {
            progress.set_length(total as u64);
            progress.set_position(finished as u64);
        }
    });
    if let Some(cache) = &cache {
        scanner = scanner.with_cache(cache.clone(), config.cache.use_fastpath);
    }

    // Ctrl-C 协作式取消，已得到的部分结果仍然输出
    let token = scanner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping scan");
            token.cancel();
        }
    });

    let scan = scanner.run(&args.paths).await;
    progress.finish_and_clear();
    drop(scanner);

    if let Some(cache) = cache {
        match Arc::try_unwrap(cache) {
            Ok(cache) => cache.close()?,
            Err(_) => warn!("Results cache still shared, skipping checkpoint"),
        }
    }

    let scan = scan?;
    let json = scan.to_json()?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
            info!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }

    let failed: usize = scan.errors.values().map(Vec::len).sum();
    info!(
        "Scan started {} finished {}/{} files in {} ({} ignored, {} cache hits, {} errors)",
        format_time(&scan.time),
        scan.stats.finished,
        scan.stats.total,
        format_duration(scan.stats.duration_ms),
        scan.stats.ignored,
        scan.stats.cache_hits,
        failed
    );

    Ok(())
}

/// 创建进度条，非终端环境下不绘制
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

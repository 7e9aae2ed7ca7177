//! 锁演示进程
//!
//! 加载配置，抢占一把命名锁，在持锁期间自动续约，完成工作或收到 Ctrl-C 后释放。
//! 同时启动多个进程可以直接观察互斥效果。
//!
//! 用法: `lock_worker <key> [hold_secs]`

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lock_shared::{config::AppConfig, observability};
use redis_lock::{CancellationToken, Lock, LockClient, LockConfig, LockError};
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "lock-worker";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let key = args.next().unwrap_or_else(|| "demo".to_string());
    let hold = args
        .next()
        .map(|s| s.parse::<u64>().context("hold_secs must be an integer"))
        .transpose()?
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30));

    // 1. 加载配置，失败时使用默认值
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..AppConfig::default()
        }
    });

    // 2. 初始化日志和指标
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    observability::init(&obs_config)?;

    info!(environment = %config.environment, "Configuration loaded");

    // 3. 连接 Redis
    let client = LockClient::from_config(&config).await?;
    info!(instance_id = %client.instance_id(), "Starting lock worker...");

    // 4. Ctrl-C 取消加锁等待，或提前结束持锁
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down...");
                shutdown.cancel();
            }
        });
    }

    let lock = match client.lock_with_defaults(&key, &shutdown).await {
        Ok(lock) => Arc::new(lock),
        Err(LockError::AcquisitionFailed { key }) => {
            warn!(key = %key, "Lock is held elsewhere, giving up");
            return Ok(());
        }
        Err(LockError::Cancelled) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    info!(key = %lock.key(), hold_secs = hold.as_secs(), "Lock acquired");

    // 5. 持锁期间自动续约，续约失败时中止工作
    let work = async {
        tokio::select! {
            _ = tokio::time::sleep(hold) => info!("Work finished"),
            _ = shutdown.cancelled() => info!("Work interrupted"),
        }
    };
    if let Err(e) = run_protected(lock, client.config(), work).await {
        error!(error = %e, "Lease was lost, work aborted");
    }

    info!("Lock worker stopped");
    Ok(())
}

/// 在自动续约保护下执行 `work`，结束后释放锁
///
/// 续约任务先于工作结束（锁已丢失）时立即放弃工作并返回续约错误。
async fn run_protected<F>(lock: Arc<Lock>, config: &LockConfig, work: F) -> redis_lock::Result<()>
where
    F: Future<Output = ()>,
{
    let mut watchdog = {
        let lock = lock.clone();
        let config = config.clone();
        tokio::spawn(async move { lock.auto_refresh_with(&config).await })
    };

    let stopped_early = tokio::select! {
        _ = work => None,
        result = &mut watchdog => Some(result),
    };

    // 6. 释放锁并等待续约任务退出
    if let Err(e) = lock.unlock().await {
        warn!(error = %e, "Failed to release lock");
    }
    let watchdog_result = match stopped_early {
        Some(result) => result,
        None => watchdog.await,
    };
    watchdog_result.map_err(|e| LockError::Internal(format!("watchdog task failed: {e}")))?
}

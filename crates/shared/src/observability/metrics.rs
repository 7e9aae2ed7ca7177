//! Prometheus 指标模块
//!
//! 锁客户端通过 metrics 门面记录指标，这里负责描述指标并安装导出器。
//! 导出器使用 metrics-exporter-prometheus 自带的 HTTP 监听，供 Prometheus 抓取。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use super::ObservabilityConfig;

/// 初始化 Prometheus 指标导出
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone())
        .install()?;

    describe_lock_metrics();
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// 描述锁相关指标
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中。
pub fn describe_lock_metrics() {
    metrics::describe_counter!(
        "lock_acquire_total",
        "Lock acquisition results by outcome (acquired, contended, exhausted, cancelled, error)"
    );
    metrics::describe_counter!(
        "lock_refresh_total",
        "Lock lease extensions by outcome (extended, not_held, timeout, error)"
    );
    metrics::describe_counter!(
        "lock_release_total",
        "Lock releases by outcome (released, not_held, error)"
    );
    metrics::describe_counter!(
        "lock_single_flight_shared_total",
        "Acquisition calls that joined an in-flight call for the same key"
    );
}

use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use owo_colors::OwoColorize;
use std::sync::OnceLock;
use tokio::net::TcpListener;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn install_recorder_once() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Serve a Prometheus scrape endpoint on `port`. Installs the process-wide
/// recorder on first call; counters recorded anywhere in the process land
/// here.
pub fn spawn_metrics_server(port: u16) {
    let handle = install_recorder_once().clone();
    tokio::spawn(async move {
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("{}", format!("🛑 metrics listener on {addr}: {e}").red());
                return;
            }
        };
        println!("{}", format!("📈 Metrics on http://{addr}/metrics").green());
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("{}", format!("🛑 metrics server failed: {e}").red());
        }
    });
}

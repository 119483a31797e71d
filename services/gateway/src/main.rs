//! Gatehouse gateway entry point.
//!
//! # Purpose
//! Loads configuration, wires storage and services, then runs the HTTP API,
//! the metrics listener, and the reconcile controller until shutdown.
use gateway::app::{build_router, build_state};
use gateway::config::GatewayConfig;
use gateway::observability;
use std::future::Future;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env_or_yaml()?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: GatewayConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("gatehouse-gateway");
    let (state, controller) = build_state(&config).await?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let controller_task = tokio::spawn(controller.run(async move {
        let mut stop_rx = stop_rx;
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
    }));

    let app = build_router(state);
    let addr = config.bind_addr;
    tracing::info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = serve_api(listener, app, shutdown).await;

    let _ = stop_tx.send(true);
    let _ = controller_task.await;
    metrics_task.abort();
    let _ = metrics_task.await;
    served?;
    Ok(())
}

/// Serves until `shutdown` resolves, then lets in-flight requests finish.
async fn serve_api<F>(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    fn local_config() -> GatewayConfig {
        GatewayConfig {
            bind_addr: "127.0.0.1:0".parse().expect("bind"),
            metrics_bind: "127.0.0.1:0".parse().expect("metrics"),
            ..GatewayConfig::default()
        }
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_starts_and_stops() {
        run_with_shutdown(local_config(), async {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        })
        .await
        .expect("run should stop cleanly");
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_fails_without_postgres_config() {
        let config = GatewayConfig {
            storage: gateway::config::StorageBackend::Postgres,
            postgres: None,
            ..local_config()
        };
        let err = run_with_shutdown(config, async {})
            .await
            .expect_err("missing postgres");
        assert!(err.to_string().contains("postgres configuration missing"));
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_requests() {
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();
        let entered_tx = std::sync::Arc::new(std::sync::Mutex::new(Some(entered_tx)));
        let app = axum::Router::new().route(
            "/slow",
            axum::routing::get(move || {
                if let Some(tx) = entered_tx.lock().expect("lock").take() {
                    let _ = tx.send(());
                }
                async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    "done"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_api(listener, app, async move {
            let _ = stop_rx.await;
        }));

        let request = tokio::spawn(async move {
            reqwest::Client::builder()
                .no_proxy()
                .build()
                .expect("client")
                .get(format!("http://{addr}/slow"))
                .send()
                .await
                .expect("send")
                .text()
                .await
                .expect("body")
        });
        entered_rx.await.expect("handler entered");
        stop_tx.send(()).expect("stop");

        assert_eq!(request.await.expect("join"), "done");
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("server stops")
            .expect("join")
            .expect("serve");
    }
}

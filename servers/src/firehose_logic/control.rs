use crate::firehose_logic::state::{AppState, CommandError};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use lib_firehose::stream::RawFilterSpec;
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::broadcast;

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/filters", post(filters_handler))
        .route("/reconnect", post(reconnect_handler))
        .with_state(app_state)
}

pub async fn run(port: u16, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Control API listening on {}", addr);

    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Control API shutting down.");
        })
        .await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status();
    Json(json!({
        "state": status.state.as_str(),
        "filters": status.filters,
    }))
}

async fn filters_handler(
    State(state): State<AppState>,
    body: Result<Json<RawFilterSpec>, JsonRejection>,
) -> impl IntoResponse {
    let Json(filters) = match body {
        Ok(body) => body,
        Err(rejection) => return (StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text()),
    };
    acknowledge(state.update_filters(filters).await)
}

async fn reconnect_handler(State(state): State<AppState>) -> impl IntoResponse {
    acknowledge(state.reconnect().await)
}

fn acknowledge(ack: Result<(), CommandError>) -> (StatusCode, String) {
    match ack {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted".to_string()),
        Err(e @ CommandError::InvalidFilter(_)) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        Err(e @ CommandError::Unavailable(_)) => {
            log::error!("Control command failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firehose_logic::state::{ConsumerCommand, ConsumerRequest, StatusSnapshot};
    use lib_firehose::core::ConnectionState;
    use lib_firehose::stream::{normalize, FilterSpec};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::{mpsc, watch};

    async fn serve() -> SocketAddr {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ConsumerRequest>();
        let snapshot = StatusSnapshot {
            state: ConnectionState::Connected,
            filters: FilterSpec { follow: vec![7], track: vec!["rust".into()] },
        };
        let (status_tx, status_rx) = watch::channel(snapshot);

        // Stand-in supervisor: validates filters the same way the consumer does.
        tokio::spawn(async move {
            let _status_tx = status_tx;
            while let Some(request) = cmd_rx.recv().await {
                let ack = match &request.command {
                    ConsumerCommand::UpdateFilters(raw) => {
                        normalize(Some(raw)).map(|_| ()).map_err(|e| CommandError::InvalidFilter(e.to_string()))
                    }
                    ConsumerCommand::Reconnect => Ok(()),
                };
                let _ = request.responder.send(ack);
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState::new(cmd_tx, status_rx));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn send(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, String) {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        let status = response[9..12].parse().unwrap();
        let body = response.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
        (status, body)
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let addr = serve().await;

        let (status, body) = send(addr, "GET", "/health", "").await;
        assert_eq!(status, 200);
        assert_eq!(body, "OK");

        let (status, body) = send(addr, "GET", "/status", "").await;
        assert_eq!(status, 200);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["state"], "connected");
        assert_eq!(parsed["filters"]["follow"], json!([7]));
        assert_eq!(parsed["filters"]["track"], json!(["rust"]));
    }

    #[tokio::test]
    async fn test_filters_accepted_or_rejected() {
        let addr = serve().await;

        let (status, _) = send(addr, "POST", "/filters", r#"{"follow":[1,"2"],"track":["a"]}"#).await;
        assert_eq!(status, 202);

        let (status, body) = send(addr, "POST", "/filters", r#"{"follow":["abc"]}"#).await;
        assert_eq!(status, 422);
        assert!(body.contains("abc"), "unexpected body: {body}");

        let (status, _) = send(addr, "POST", "/filters", "not json").await;
        assert_eq!(status, 422);

        let (status, body) = send(addr, "POST", "/reconnect", "").await;
        assert_eq!(status, 202);
        assert_eq!(body, "Accepted");
    }
}

//! End-to-end tests over real sockets: the same calls travel HTTP, TCP,
//! and WebSocket, and the structured log pipeline drains on stop.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

use polyrpc_server::{
    LogDestination, LogFormat, Logger, LoggerConfig, Server, ServerConfig, TaskPipeline,
    TokioPipeline,
};

struct Running {
    server: Server,
    log_path: std::path::PathBuf,
}

impl Running {
    fn addr(&self, transport: &str) -> SocketAddr {
        self.server
            .bound_addrs()
            .iter()
            .find(|(label, _)| *label == transport)
            .map(|(_, addr)| *addr)
            .expect("transport not bound")
    }
}

async fn start_server() -> Running {
    let log_path = std::env::temp_dir().join(format!(
        "polyrpc-e2e-{}-{}.log",
        std::process::id(),
        rand::random::<u32>()
    ));

    let pipeline: Arc<dyn TaskPipeline> = Arc::new(TokioPipeline::new());
    let logger = Arc::new(
        Logger::new(
            LoggerConfig {
                destination: LogDestination::File,
                file_path: Some(log_path.clone()),
                format: LogFormat::Json,
                log_success_only: false,
                flush_interval: Duration::ZERO,
                ..LoggerConfig::default()
            },
            Arc::clone(&pipeline),
            Arc::new(polyrpc_server::SystemClock),
        )
        .unwrap(),
    );

    let config = ServerConfig {
        http_addr: Some(([127, 0, 0, 1], 0).into()),
        https_addr: None,
        tcp_addr: Some(([127, 0, 0, 1], 0).into()),
        tls_addr: None,
        ws_addr: Some(([127, 0, 0, 1], 0).into()),
        wss_addr: None,
        ..ServerConfig::default()
    };

    let server = Server::new(config, logger, pipeline);
    server.start().await.unwrap();
    Running { server, log_path }
}

async fn http_post(addr: SocketAddr, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST /rpc HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        addr,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();

    let status: u16 = text
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    (status, body)
}

/// Strip any chunked-encoding framing hyper may have applied.
fn body_json(body: &str) -> Value {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return value;
    }
    let line = trimmed
        .lines()
        .find(|line| line.starts_with('{') || line.starts_with('['))
        .expect("no JSON in body");
    serde_json::from_str(line).unwrap()
}

#[tokio::test]
async fn test_same_call_identical_over_http_tcp_ws() {
    let running = start_server().await;
    let call = r#"{"jsonrpc":"2.0","method":"calculate","params":{"operation":"add","a":2,"b":3},"id":1}"#;

    // HTTP
    let (status, body) = http_post(running.addr("HTTP"), call).await;
    assert_eq!(status, 200);
    let http_resp = body_json(&body);

    // TCP
    let mut tcp = TcpStream::connect(running.addr("TCP")).await.unwrap();
    tcp.write_all(call.as_bytes()).await.unwrap();
    tcp.write_all(b"\n").await.unwrap();
    let mut reader = tokio::io::BufReader::new(tcp);
    let mut line = String::new();
    tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line)
        .await
        .unwrap();
    let tcp_resp: Value = serde_json::from_str(line.trim()).unwrap();

    // WebSocket
    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{}/ws",
        running.addr("WebSocket")
    ))
    .await
    .unwrap();
    ws.send(Message::Text(call.to_string())).await.unwrap();
    let frame = ws.next().await.unwrap().unwrap();
    let ws_resp: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    ws.close(None).await.unwrap();

    for resp in [&http_resp, &tcp_resp, &ws_resp] {
        assert_eq!(resp["jsonrpc"], "2.0");
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["result"], 5.0);
        assert!(resp.get("error").is_none());
    }

    running.server.stop().await.unwrap();
    let _ = tokio::fs::remove_file(&running.log_path).await;
}

#[tokio::test]
async fn test_notification_writes_zero_bytes_on_http() {
    let running = start_server().await;

    let (status, body) = http_post(
        running.addr("HTTP"),
        r#"{"jsonrpc":"2.0","method":"echo","params":{"x":1}}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert!(body.trim().is_empty() || body.trim() == "0");

    running.server.stop().await.unwrap();
    let _ = tokio::fs::remove_file(&running.log_path).await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let running = start_server().await;
    let addr = running.addr("HTTP");

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /health HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();

    assert!(text.starts_with("HTTP/1.1 200"));
    let health = body_json(text.split_once("\r\n\r\n").unwrap().1);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "polyrpc");

    running.server.stop().await.unwrap();
    let _ = tokio::fs::remove_file(&running.log_path).await;
}

#[tokio::test]
async fn test_stop_drains_log_entries_to_sink() {
    let running = start_server().await;

    for i in 0..5 {
        let call = format!(r#"{{"jsonrpc":"2.0","method":"time","id":{}}}"#, i);
        let (status, _) = http_post(running.addr("HTTP"), &call).await;
        assert_eq!(status, 200);
    }

    // Stop drains the pipeline and closes (flushes) the file sink.
    running.server.stop().await.unwrap();

    let contents = tokio::fs::read_to_string(&running.log_path).await.unwrap();
    let entries: Vec<Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(entries.len(), 5);

    for entry in &entries {
        assert_eq!(entry["method"], "time");
        assert_eq!(entry["transport"], "HTTP");
        assert_eq!(entry["success"], true);
        assert_eq!(entry["level"], "info");
        assert_eq!(entry["handler"], "TimeHandler");
        let request_id = entry["request_id"].as_str().unwrap();
        assert_eq!(request_id.len(), 16);
        assert!(entry["duration_ms"].as_i64().unwrap() >= 0);
    }

    let _ = tokio::fs::remove_file(&running.log_path).await;
}

#[tokio::test]
async fn test_rpc_error_logged_at_warn_level() {
    let running = start_server().await;

    let (status, _) = http_post(
        running.addr("HTTP"),
        r#"{"jsonrpc":"2.0","method":"calculate","params":{"operation":"divide","a":1,"b":0},"id":1}"#,
    )
    .await;
    assert_eq!(status, 200);

    running.server.stop().await.unwrap();

    let contents = tokio::fs::read_to_string(&running.log_path).await.unwrap();
    let entry: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["success"], false);
    assert_eq!(entry["level"], "warn");
    assert_eq!(entry["error_code"], -32602);

    let _ = tokio::fs::remove_file(&running.log_path).await;
}

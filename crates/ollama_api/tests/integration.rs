use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use chat_provider::{BackendError, ChatBackend, ChatDelta, ChatMessage, ChatRequest, Role, ThinkMode};
use futures_util::StreamExt;
use ollama_api::{OllamaApiConfig, OllamaBackend};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct ResponseChunk {
    delay_ms: u64,
    bytes: Vec<u8>,
}

#[derive(Clone)]
enum ScriptedResponse {
    Respond {
        status: u16,
        content_type: &'static str,
        chunks: Vec<ResponseChunk>,
    },
    Reset,
}

struct ScriptedServer {
    base_url: String,
    request_count: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
    handle: JoinHandle<()>,
}

impl ScriptedServer {
    async fn new(scripts: Vec<ScriptedResponse>) -> Self {
        let scripts = Arc::new(scripts);
        let request_count = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("local TCP listener should bind");
        let addr = listener
            .local_addr()
            .expect("resolved local listener address");
        let base_url = format!("http://{addr}");

        let handle = tokio::spawn({
            let scripts = Arc::clone(&scripts);
            let request_count = Arc::clone(&request_count);
            let bodies = Arc::clone(&bodies);

            async move {
                loop {
                    let (socket, _) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let scripts = Arc::clone(&scripts);
                    let request_count = Arc::clone(&request_count);
                    let bodies = Arc::clone(&bodies);
                    tokio::spawn(async move {
                        serve_one(socket, scripts, request_count, bodies).await;
                    });
                }
            }
        });

        Self {
            base_url,
            request_count,
            bodies,
            handle,
        }
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Acquire)
    }

    fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().expect("bodies lock").clone()
    }

    fn backend(&self) -> OllamaBackend {
        OllamaBackend::new(
            OllamaApiConfig::new(&self.base_url).with_timeout(Duration::from_secs(5)),
        )
        .expect("backend should build")
    }

    fn shutdown(&self) {
        self.handle.abort();
    }
}

fn response_ndjson(status: u16, frames: &[Value]) -> ScriptedResponse {
    ScriptedResponse::Respond {
        status,
        content_type: "application/x-ndjson",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: ndjson_lines(frames),
        }],
    }
}

fn response_json(status: u16, body: &str) -> ScriptedResponse {
    ScriptedResponse::Respond {
        status,
        content_type: "application/json",
        chunks: vec![ResponseChunk {
            delay_ms: 0,
            bytes: body.as_bytes().to_vec(),
        }],
    }
}

fn ndjson_lines(frames: &[Value]) -> Vec<u8> {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&frame.to_string());
        body.push('\n');
    }
    body.into_bytes()
}

fn content_frame(text: &str) -> Value {
    json!({"message": {"role": "assistant", "content": text}, "done": false})
}

fn done_frame() -> Value {
    json!({"message": {"role": "assistant", "content": ""}, "done": true, "done_reason": "stop"})
}

fn chat_request(think: Option<ThinkMode>, tools: Vec<Value>) -> ChatRequest {
    ChatRequest {
        model: "llama3.2".to_string(),
        messages: vec![ChatMessage::new(Role::User, "hi")],
        context_window: 4096,
        think,
        tools,
    }
}

async fn collect_deltas(
    backend: &OllamaBackend,
    request: ChatRequest,
) -> Result<Vec<ChatDelta>, BackendError> {
    let mut stream = backend
        .stream_chat(request, CancellationToken::new())
        .await?;
    let mut deltas = Vec::new();
    while let Some(delta) = stream.next().await {
        deltas.push(delta?);
    }
    Ok(deltas)
}

#[tokio::test]
async fn chat_stream_yields_content_in_order_and_stops_at_done() {
    let server = ScriptedServer::new(vec![response_ndjson(
        200,
        &[
            json!({"message": {"role": "assistant", "content": "", "thinking": "hmm"}, "done": false}),
            content_frame("Hel"),
            content_frame("lo"),
            done_frame(),
            content_frame("ignored after done"),
        ],
    )])
    .await;

    let deltas = collect_deltas(&server.backend(), chat_request(None, Vec::new()))
        .await
        .expect("stream should succeed");

    assert_eq!(deltas.len(), 4);
    assert_eq!(deltas[0].thinking, "hmm");
    assert_eq!(deltas[1].content, "Hel");
    assert_eq!(deltas[2].content, "lo");
    assert!(deltas[3].done);

    let bodies = server.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["stream"], json!(true));
    assert_eq!(bodies[0]["options"]["num_ctx"], json!(4096));
    assert!(bodies[0].get("think").is_none());
    assert!(bodies[0].get("tools").is_none());

    server.shutdown();
}

#[tokio::test]
async fn chat_stream_sends_think_and_tools_when_requested() {
    let server = ScriptedServer::new(vec![response_ndjson(200, &[done_frame()])]).await;
    let tools = vec![json!({"type": "function", "function": {"name": "ls"}})];

    collect_deltas(
        &server.backend(),
        chat_request(Some(ThinkMode::Enabled), tools.clone()),
    )
    .await
    .expect("stream should succeed");

    let bodies = server.bodies();
    assert_eq!(bodies[0]["think"], json!(true));
    assert_eq!(bodies[0]["tools"], json!(tools));

    server.shutdown();
}

#[tokio::test]
async fn chat_stream_retries_transient_status_before_streaming() {
    let server = ScriptedServer::new(vec![
        response_json(503, r#"{"error":"server busy"}"#),
        response_ndjson(200, &[content_frame("recovered"), done_frame()]),
    ])
    .await;

    let deltas = collect_deltas(&server.backend(), chat_request(None, Vec::new()))
        .await
        .expect("second attempt should succeed");

    assert_eq!(deltas[0].content, "recovered");
    assert_eq!(server.request_count(), 2);

    server.shutdown();
}

#[tokio::test]
async fn missing_model_is_reported_without_retry() {
    let server = ScriptedServer::new(vec![response_json(
        404,
        r#"{"error":"model \"llama3.2\" not found, try pulling it first"}"#,
    )])
    .await;

    let error = collect_deltas(&server.backend(), chat_request(None, Vec::new()))
        .await
        .expect_err("missing model should fail");

    assert!(matches!(error, BackendError::ModelNotFound { ref model, .. } if model == "llama3.2"));
    assert_eq!(server.request_count(), 1);

    server.shutdown();
}

#[tokio::test]
async fn error_frame_mid_stream_fails_the_turn() {
    let server = ScriptedServer::new(vec![response_ndjson(
        200,
        &[content_frame("part"), json!({"error": "runner crashed"})],
    )])
    .await;

    let error = collect_deltas(&server.backend(), chat_request(None, Vec::new()))
        .await
        .expect_err("error frame should fail");

    assert!(matches!(error, BackendError::Streaming(ref message) if message.contains("runner crashed")));

    server.shutdown();
}

#[tokio::test]
async fn connection_reset_surfaces_retryable_error() {
    let server = ScriptedServer::new(vec![
        ScriptedResponse::Reset,
        ScriptedResponse::Reset,
        ScriptedResponse::Reset,
    ])
    .await;

    let error = collect_deltas(&server.backend(), chat_request(None, Vec::new()))
        .await
        .expect_err("reset should fail");

    assert!(error.is_retryable(), "unexpected error: {error:?}");

    server.shutdown();
}

#[tokio::test]
async fn unreachable_host_maps_to_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener address");
    drop(listener);

    let backend = OllamaBackend::new(OllamaApiConfig::new(format!("http://{addr}")))
        .expect("backend should build");
    let error = collect_deltas(&backend, chat_request(None, Vec::new()))
        .await
        .expect_err("closed port should fail");

    assert!(matches!(error, BackendError::Connection { .. }));
}

#[tokio::test]
async fn cancellation_interrupts_a_stalled_stream() {
    let server = ScriptedServer::new(vec![ScriptedResponse::Respond {
        status: 200,
        content_type: "application/x-ndjson",
        chunks: vec![
            ResponseChunk {
                delay_ms: 0,
                bytes: ndjson_lines(&[content_frame("first")]),
            },
            ResponseChunk {
                delay_ms: 5_000,
                bytes: ndjson_lines(&[done_frame()]),
            },
        ],
    }])
    .await;

    let backend = server.backend();
    let cancel = CancellationToken::new();
    let mut stream = backend
        .stream_chat(chat_request(None, Vec::new()), cancel.clone())
        .await
        .expect("stream should open");

    let first = stream
        .next()
        .await
        .expect("first delta")
        .expect("first delta should succeed");
    assert_eq!(first.content, "first");

    cancel.cancel();
    let next = timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("cancel should end the stream promptly");
    assert_eq!(next, Some(Err(BackendError::Cancelled)));

    server.shutdown();
}

#[tokio::test]
async fn show_and_tags_report_model_metadata() {
    let server = ScriptedServer::new(vec![
        response_json(200, r#"{"capabilities":["completion","tools"]}"#),
        response_json(200, r#"{"details":{}}"#),
        response_json(
            200,
            r#"{"models":[{"name":"llama3.2:latest"},{"name":"","model":"qwen3:8b"}]}"#,
        ),
    ])
    .await;
    let backend = server.backend();

    let described = backend
        .show_model("llama3.2")
        .await
        .expect("show should succeed");
    assert_eq!(described.capabilities, Some(json!(["completion", "tools"])));

    let legacy = backend
        .show_model("old-model")
        .await
        .expect("show should succeed");
    assert_eq!(legacy.capabilities, None);

    let models = backend.list_models().await.expect("tags should succeed");
    assert_eq!(models, vec!["llama3.2:latest".to_string(), "qwen3:8b".to_string()]);

    assert_eq!(server.bodies()[0], json!({"model": "llama3.2"}));

    server.shutdown();
}

#[tokio::test]
async fn pull_reports_server_error_frames() {
    let server = ScriptedServer::new(vec![
        response_ndjson(
            200,
            &[json!({"status": "pulling manifest"}), json!({"status": "success"})],
        ),
        response_ndjson(200, &[json!({"error": "pull model manifest: file does not exist"})]),
    ])
    .await;
    let backend = server.backend();

    backend
        .pull_model("llama3.2")
        .await
        .expect("first pull should succeed");

    let error = backend
        .pull_model("missing")
        .await
        .expect_err("second pull should fail");
    assert!(matches!(error, BackendError::Streaming(_)));

    server.shutdown();
}

async fn serve_one(
    mut socket: TcpStream,
    scripts: Arc<Vec<ScriptedResponse>>,
    request_count: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
) {
    let Ok(body) = read_request(&mut socket).await else {
        return;
    };

    let index = request_count.fetch_add(1, Ordering::AcqRel);
    if let Ok(value) = serde_json::from_slice::<Value>(&body) {
        bodies.lock().expect("bodies lock").push(value);
    }
    let response = scripts
        .get(index)
        .cloned()
        .unwrap_or_else(|| response_json(500, r#"{"error":"unexpected request"}"#));

    match response {
        ScriptedResponse::Reset => {}
        ScriptedResponse::Respond {
            status,
            content_type,
            chunks,
        } => {
            let headers = format!(
                "HTTP/1.1 {status} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
                status_reason(status),
                content_type,
            );

            if socket.write_all(headers.as_bytes()).await.is_err() {
                return;
            }

            for chunk in chunks {
                if chunk.delay_ms > 0 {
                    sleep(Duration::from_millis(chunk.delay_ms)).await;
                }
                let prefix = format!("{:X}\r\n", chunk.bytes.len());
                if socket.write_all(prefix.as_bytes()).await.is_err() {
                    return;
                }
                if socket.write_all(&chunk.bytes).await.is_err() {
                    return;
                }
                if socket.write_all(b"\r\n").await.is_err() {
                    return;
                }
            }

            let _ = socket.write_all(b"0\r\n\r\n").await;
            let _ = socket.shutdown().await;
        }
    }
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut request = Vec::new();
    let mut buffer = [0_u8; 2048];

    let header_end = loop {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        request.extend_from_slice(&buffer[..n]);
        if let Some(position) = request.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let headers = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while request.len() < header_end + content_length {
        let n = socket.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buffer[..n]);
    }

    Ok(request[header_end..].to_vec())
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

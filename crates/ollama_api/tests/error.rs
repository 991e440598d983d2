use chat_provider::BackendError;
use ollama_api::error::parse_error_message;
use ollama_api::OllamaApiError;
use reqwest::StatusCode;

const HOST: &str = "http://localhost:11434";

#[test]
fn parse_error_message_prefers_error_field() {
    assert_eq!(
        parse_error_message(StatusCode::BAD_REQUEST, r#"{"error":"invalid options"}"#),
        "invalid options"
    );
    assert_eq!(parse_error_message(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
    assert_eq!(parse_error_message(StatusCode::SERVICE_UNAVAILABLE, ""), "Service Unavailable");
}

#[test]
fn not_found_status_maps_to_model_not_found() {
    let error = OllamaApiError::status(StatusCode::NOT_FOUND, "not found");
    assert_eq!(
        error.into_backend_error(HOST, "llama9"),
        BackendError::model_not_found("llama9", HOST)
    );
}

#[test]
fn missing_model_message_maps_to_model_not_found() {
    let error = OllamaApiError::Backend("model \"llama9\" not found, try pulling it first".to_string());
    assert!(matches!(
        error.into_backend_error(HOST, "llama9"),
        BackendError::ModelNotFound { .. }
    ));
}

#[test]
fn other_failures_map_to_streaming_or_cancelled() {
    let error = OllamaApiError::status(StatusCode::INTERNAL_SERVER_ERROR, "boom");
    assert!(matches!(
        error.into_backend_error(HOST, "llama3"),
        BackendError::Streaming(message) if message.contains("boom")
    ));
    assert_eq!(
        OllamaApiError::Cancelled.into_backend_error(HOST, "llama3"),
        BackendError::Cancelled
    );
}

mod support;

use std::sync::Arc;
use std::time::Duration;

use chat_provider::{BackendError, ChatDelta, Role, ThinkMode};
use chat_provider_mock::{ScriptedBackend, ScriptedTurn};
use ollama_chat::agent_loop::{ChatChunk, SendRequest};
use ollama_chat::error::ChatError;
use ollama_chat::message_store::MessageStore;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use support::{
    agent, agent_with, agent_with_store, content_of, echo_registry, history, options,
    send_collect, tool_results,
};

#[tokio::test]
async fn plain_reply_is_streamed_and_committed() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::text(&[
        "Hello", ", ", "world",
    ])]));
    let mut agent = agent(&backend);

    let (result, chunks) = send_collect(&mut agent, SendRequest::new("  hi  ")).await;

    result.expect("send should succeed");
    assert_eq!(content_of(&chunks), "Hello, world");
    assert_eq!(
        history(&agent),
        vec![
            ("system".to_string(), "be brief".to_string()),
            ("user".to_string(), "hi".to_string()),
            ("assistant".to_string(), "Hello, world".to_string()),
        ]
    );
}

#[tokio::test]
async fn blank_message_without_images_is_a_no_op() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut agent = agent(&backend);

    let (result, chunks) = send_collect(&mut agent, SendRequest::new("   ")).await;

    result.expect("blank send is not an error");
    assert!(chunks.is_empty());
    assert_eq!(backend.stream_calls(), 0);
    assert_eq!(agent.messages().len(), 1);
}

#[tokio::test]
async fn history_is_evicted_oldest_first_across_turns() {
    let backend = Arc::new(ScriptedBackend::new(Vec::new()).with_repeating(ScriptedTurn::text(&["ok"])));
    let store = MessageStore::with_system_prompt("sys", 4, 4096);
    let mut agent = agent_with_store(&backend, store);

    for text in ["one", "two", "three"] {
        let (result, _) = send_collect(&mut agent, SendRequest::new(text)).await;
        result.expect("send should succeed");
    }

    assert_eq!(
        history(&agent),
        vec![
            ("system".to_string(), "sys".to_string()),
            ("assistant".to_string(), "ok".to_string()),
            ("user".to_string(), "three".to_string()),
            ("assistant".to_string(), "ok".to_string()),
        ]
    );
}

#[tokio::test]
async fn repeating_tool_calls_stop_at_the_iteration_budget() {
    let backend = Arc::new(
        ScriptedBackend::new(Vec::new())
            .with_repeating(ScriptedTurn::tool_call("echo", json!({"text": "again"}), None)),
    );
    let mut agent = agent(&backend);
    let request = SendRequest::new("loop forever")
        .with_tools(echo_registry())
        .with_max_tool_iterations(3);

    let (result, chunks) = send_collect(&mut agent, request).await;

    result.expect("exhausting the budget is not an error");
    assert_eq!(tool_results(&chunks), vec!["echo: again".to_string(); 3]);
    assert_eq!(backend.stream_calls(), 3);
    assert_eq!(agent.messages()[1].content(), "loop forever");
}

#[tokio::test]
async fn tool_results_are_fed_back_before_the_final_answer() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedTurn::Reply(vec![
            ChatDelta::thinking("need a tool"),
            ChatDelta::tool_call("echo", json!({"text": "first"}), None),
            ChatDelta::tool_call("echo", json!({"text": "second"}), Some(7)),
            ChatDelta::done(),
        ]),
        ScriptedTurn::text(&["all done"]),
    ]));
    let mut agent = agent(&backend);

    let (result, chunks) =
        send_collect(&mut agent, SendRequest::new("use tools").with_tools(echo_registry())).await;

    result.expect("send should succeed");
    assert_eq!(
        tool_results(&chunks),
        vec!["echo: first".to_string(), "echo: second".to_string()]
    );

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    let follow_up = &requests[1].messages;
    let echoed = &follow_up[follow_up.len() - 3];
    assert_eq!(echoed.role, Role::Assistant);
    assert_eq!(echoed.thinking.as_deref(), Some("need a tool"));
    let indices: Vec<Option<u32>> = echoed.tool_calls.iter().map(|call| call.index).collect();
    assert_eq!(indices, vec![Some(0), Some(7)]);
    assert_eq!(follow_up[follow_up.len() - 2].role, Role::Tool);
    assert_eq!(
        follow_up[follow_up.len() - 2].tool_name.as_deref(),
        Some("echo")
    );
    assert_eq!(follow_up[follow_up.len() - 1].content, "echo: second");

    let last = agent.messages().last().expect("assistant reply");
    assert_eq!(last.content(), "all done");
    assert_eq!(agent.messages().len(), 3);
}

#[tokio::test]
async fn unknown_tool_and_bad_arguments_become_text_for_the_model() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedTurn::Reply(vec![
            ChatDelta::tool_call("missing", json!({}), None),
            ChatDelta::tool_call("echo", json!({"wrong": 1}), None),
            ChatDelta::done(),
        ]),
        ScriptedTurn::text(&["recovered"]),
    ]));
    let mut agent = agent(&backend);

    let (result, chunks) =
        send_collect(&mut agent, SendRequest::new("try").with_tools(echo_registry())).await;

    result.expect("tool failures do not fail the turn");
    let results = tool_results(&chunks);
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|text| text.starts_with("[Tool error:")));
    assert_eq!(content_of(&chunks), "recovered");
}

#[tokio::test]
async fn inline_json_tool_calls_are_recovered_from_content() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedTurn::text(&[
            "```json\n{\"name\": \"echo\", \"arguments\": {\"text\": \"inline\"}}\n```",
        ]),
        ScriptedTurn::text(&["finished"]),
    ]));
    let mut agent = agent(&backend);

    let (result, chunks) =
        send_collect(&mut agent, SendRequest::new("go").with_tools(echo_registry())).await;

    result.expect("send should succeed");
    assert!(chunks.contains(&ChatChunk::ToolCall {
        name: "echo".to_string(),
        arguments: json!({"text": "inline"}),
        index: None,
    }));
    assert_eq!(tool_results(&chunks), vec!["echo: inline".to_string()]);
}

#[tokio::test]
async fn inline_json_is_plain_text_when_no_tools_are_sent() {
    let reply = "{\"name\": \"echo\", \"arguments\": {}}";
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::text(&[reply])]));
    let mut agent = agent(&backend);

    let (result, chunks) = send_collect(&mut agent, SendRequest::new("go")).await;

    result.expect("send should succeed");
    assert!(tool_results(&chunks).is_empty());
    assert_eq!(agent.messages().last().map(|m| m.content()), Some(reply));
}

#[tokio::test]
async fn transient_failure_is_retried_and_recovers() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedTurn::Refuse(BackendError::connection("mock://local", "refused")),
        ScriptedTurn::text(&["recovered"]),
    ]));
    let mut agent = agent(&backend);

    let (result, chunks) = send_collect(&mut agent, SendRequest::new("hello")).await;

    result.expect("second attempt should succeed");
    // One failed attempt plus one retry: exactly one retry was taken.
    assert_eq!(backend.stream_calls(), 2);
    assert_eq!(content_of(&chunks), "recovered");
    assert_eq!(agent.messages().last().map(|m| m.content()), Some("recovered"));
}

#[tokio::test]
async fn mid_stream_failure_restarts_the_turn_from_scratch() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedTurn::BreakAfter(
            vec![ChatDelta::content("partial ")],
            BackendError::streaming("connection reset"),
        ),
        ScriptedTurn::text(&["complete"]),
    ]));
    let mut agent = agent(&backend);

    let (result, chunks) = send_collect(&mut agent, SendRequest::new("hello")).await;

    result.expect("retry should succeed");
    assert_eq!(content_of(&chunks), "partial complete");
    assert_eq!(agent.messages().last().map(|m| m.content()), Some("complete"));
}

#[tokio::test]
async fn exhausted_retries_roll_back_the_user_message() {
    let backend = Arc::new(
        ScriptedBackend::new(Vec::new())
            .with_repeating(ScriptedTurn::Refuse(BackendError::streaming("boom"))),
    );
    let mut agent = agent(&backend);
    let before = history(&agent);

    let (result, _) = send_collect(&mut agent, SendRequest::new("hello")).await;

    assert!(matches!(result, Err(ChatError::Streaming(_))));
    assert_eq!(backend.stream_calls(), 3);
    assert_eq!(history(&agent), before);
}

#[tokio::test]
async fn missing_model_is_not_retried() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::Refuse(
        BackendError::model_not_found("mock:latest", "mock://local"),
    )]));
    let mut agent = agent(&backend);

    let (result, _) = send_collect(&mut agent, SendRequest::new("hello")).await;

    assert!(matches!(result, Err(ChatError::ModelNotFound { .. })));
    assert_eq!(backend.stream_calls(), 1);
    assert_eq!(agent.messages().len(), 1);
}

#[tokio::test]
async fn zero_retries_fail_on_the_first_transient_error() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ScriptedTurn::Refuse(BackendError::streaming("boom")),
        ScriptedTurn::text(&["unused"]),
    ]));
    let store = MessageStore::with_system_prompt("", 50, 4096);
    let mut agent = agent_with(&backend, store, options().with_retries(0));

    let (result, _) = send_collect(&mut agent, SendRequest::new("hello")).await;

    assert!(result.is_err());
    assert_eq!(backend.stream_calls(), 1);
    assert!(agent.messages().is_empty());
}

#[tokio::test]
async fn cancellation_mid_stream_rolls_back() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::Stall(vec![
        ChatDelta::content("thinking about it"),
    ])]));
    let mut agent = agent(&backend);
    let before = history(&agent);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let mut seen = Vec::new();

    let result = agent
        .send(SendRequest::new("hello"), &cancel, |chunk| {
            seen.push(chunk);
            trigger.cancel();
        })
        .await;

    assert!(matches!(result, Err(ChatError::Cancelled)));
    assert_eq!(seen.len(), 1);
    assert_eq!(backend.stream_calls(), 1);
    assert_eq!(history(&agent), before);
}

#[tokio::test]
async fn dropping_the_send_future_rolls_back() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::Stall(Vec::new())]));
    let mut agent = agent(&backend);
    let before = history(&agent);
    let cancel = CancellationToken::new();

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        agent.send(SendRequest::new("hello"), &cancel, |_| {}),
    )
    .await;

    assert!(outcome.is_err(), "stalled send should time out");
    assert_eq!(history(&agent), before);
}

#[tokio::test]
async fn unknown_capabilities_send_think_and_tools() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![ScriptedTurn::text(&["ok"])]).with_unknown_capabilities(),
    );
    let mut agent = agent(&backend);

    let request = SendRequest::new("hi").with_think(true).with_tools(echo_registry());
    let (result, _) = send_collect(&mut agent, request).await;

    result.expect("send should succeed");
    let sent = &backend.requests()[0];
    assert_eq!(sent.think, Some(ThinkMode::Enabled));
    assert_eq!(sent.tools.len(), 1);
    let effective = agent.capabilities().effective();
    assert!(effective.think && effective.tools_enabled && effective.vision_enabled);
}

#[tokio::test]
async fn unsupported_features_are_not_sent() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![ScriptedTurn::text(&["ok"])])
            .with_capabilities(json!(["completion"])),
    );
    let mut agent = agent(&backend);

    let request = SendRequest::new("hi").with_think(true).with_tools(echo_registry());
    let (result, _) = send_collect(&mut agent, request).await;

    result.expect("send should succeed");
    let sent = &backend.requests()[0];
    assert_eq!(sent.think, None);
    assert!(sent.tools.is_empty());
    assert_eq!(
        agent.capabilities().unsupported_features(),
        vec!["thinking", "tools", "vision"]
    );
}

#[tokio::test]
async fn level_based_models_get_a_think_level() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![ScriptedTurn::text(&["ok"])])
            .with_capabilities(json!(["completion", "thinking"])),
    );
    let store = MessageStore::with_system_prompt("", 50, 4096);
    let mut agent = agent_with(
        &backend,
        store,
        ollama_chat::AgentLoopOptions::new("gpt-oss:20b"),
    );

    let (result, _) = send_collect(&mut agent, SendRequest::new("hi").with_think(true)).await;

    result.expect("send should succeed");
    let think = backend.requests()[0].think.clone().expect("think level");
    assert_eq!(think.to_value(), json!("medium"));
}

#[tokio::test]
async fn images_ride_on_the_last_message_of_one_request_only() {
    let backend = Arc::new(
        ScriptedBackend::new(Vec::new()).with_repeating(ScriptedTurn::text(&["a cat"])),
    );
    let mut agent = agent(&backend);

    let request = SendRequest::new("what is this?").with_images(vec!["aGVsbG8=".to_string()]);
    let (first, _) = send_collect(&mut agent, request).await;
    let (second, _) = send_collect(&mut agent, SendRequest::new("and now?")).await;

    first.expect("first send");
    second.expect("second send");
    let requests = backend.requests();
    let first_messages = &requests[0].messages;
    assert_eq!(
        first_messages.last().map(|m| m.images.clone()),
        Some(vec!["aGVsbG8=".to_string()])
    );
    assert!(first_messages[..first_messages.len() - 1]
        .iter()
        .all(|m| m.images.is_empty()));
    assert!(requests[1].messages.iter().all(|m| m.images.is_empty()));
}

#[tokio::test]
async fn context_window_follows_the_store_budget() {
    let backend = Arc::new(ScriptedBackend::new(vec![ScriptedTurn::text(&["ok"])]));
    let store = MessageStore::with_system_prompt("sys", 50, 2048);
    let mut agent = agent_with_store(&backend, store);

    let (result, _) = send_collect(&mut agent, SendRequest::new("hi")).await;

    result.expect("send should succeed");
    assert_eq!(backend.requests()[0].context_window, 2048);
}

#[tokio::test]
async fn switching_models_redetects_capabilities() {
    let backend = Arc::new(
        ScriptedBackend::new(Vec::new()).with_repeating(ScriptedTurn::text(&["ok"])),
    );
    let mut agent = agent(&backend);

    let (first, _) = send_collect(&mut agent, SendRequest::new("one")).await;
    let (second, _) = send_collect(&mut agent, SendRequest::new("two")).await;
    agent.set_model("  other:7b ");
    let (third, _) = send_collect(&mut agent, SendRequest::new("three")).await;

    first.and(second).and(third).expect("all sends succeed");
    assert_eq!(agent.model(), "other:7b");
    assert_eq!(backend.show_calls(), 2);
    assert_eq!(backend.requests()[2].model, "other:7b");
}

#[tokio::test]
async fn ensure_model_ready_pulls_missing_models_only_when_allowed() {
    let backend = Arc::new(ScriptedBackend::default().with_models(vec!["llama3.2:latest".to_string()]));
    let store = MessageStore::with_system_prompt("", 50, 4096);

    let present = agent_with(
        &backend,
        store.clone(),
        ollama_chat::AgentLoopOptions::new("llama3.2"),
    );
    present
        .ensure_model_ready(false)
        .await
        .expect("tag-less name matches :latest");

    let missing = agent_with(&backend, store, ollama_chat::AgentLoopOptions::new("qwen3:8b"));
    assert!(matches!(
        missing.ensure_model_ready(false).await,
        Err(ChatError::ModelNotFound { .. })
    ));
    missing.ensure_model_ready(true).await.expect("pull succeeds");
    assert_eq!(backend.pulled_models(), vec!["qwen3:8b".to_string()]);
}

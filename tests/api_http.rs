//! End-to-end API tests over a live server with a scripted provider and
//! a counting embedder.

mod common;

use campfire::provider::{FunctionCall, ProviderFrame, ToolCall};
use common::{event_types, parse_sse, spawn_app};
use std::io::Read;

fn content(text: &str) -> ProviderFrame {
    ProviderFrame::Content(text.to_string())
}

fn tool_round(id: &str, name: &str, arguments: &str) -> Vec<ProviderFrame> {
    vec![
        ProviderFrame::ToolCalls(vec![ToolCall {
            id: id.to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }]),
        ProviderFrame::Done,
    ]
}

async fn chat(
    app: &common::TestApp,
    user_input: &str,
    session_id: Option<&str>,
) -> Vec<serde_json::Value> {
    let mut form = reqwest::multipart::Form::new().text("user_input", user_input.to_string());
    if let Some(session_id) = session_id {
        form = form.text("session_id", session_id.to_string());
    }
    let body = app
        .client
        .post(format!("{}/api/chat-stream", app.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    parse_sse(&body)
}

#[tokio::test]
async fn test_cold_start_no_context() {
    let app = spawn_app(vec![vec![
        content("Hello"),
        content(" there!"),
        ProviderFrame::Done,
    ]])
    .await;

    let events = chat(&app, "hello", None).await;
    let types = event_types(&events);
    assert_eq!(types.first().unwrap(), "session_info");
    assert_eq!(types.get(1).unwrap(), "rule_chunks");
    assert!(types[2..types.len() - 1].iter().all(|t| t == "token"));
    assert_eq!(types.last().unwrap(), "end");
    assert_eq!(events.last().unwrap()["reason"], "complete");

    let rule_chunks = &events[1];
    assert!(rule_chunks["chunk_ids"].as_array().unwrap().is_empty());

    // The store shows one session with a user and an assistant message.
    let session_id = events[0]["session_id"].as_str().unwrap();
    let detail: serde_json::Value = app
        .client
        .get(format!("{}/api/chat-sessions/{}", app.base_url, session_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = detail["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Hello there!");
}

#[tokio::test]
async fn test_event_grammar_regex_property() {
    let app = spawn_app(vec![vec![
        ProviderFrame::Thinking("let me see".into()),
        content("Sure."),
        ProviderFrame::Done,
    ]])
    .await;

    let events = chat(&app, "hi", None).await;
    let types = event_types(&events);

    // session_info rule_chunks (thinking|tool_calls)* token* end
    assert_eq!(types[0], "session_info");
    assert_eq!(types[1], "rule_chunks");
    let mut i = 2;
    while i < types.len() && (types[i] == "thinking" || types[i] == "tool_calls") {
        i += 1;
    }
    while i < types.len() && types[i] == "token" {
        i += 1;
    }
    assert_eq!(types[i], "end");
    assert_eq!(i, types.len() - 1);

    // Exactly-once framing.
    for name in ["session_info", "rule_chunks", "end"] {
        assert_eq!(types.iter().filter(|t| *t == name).count(), 1);
    }
}

#[tokio::test]
async fn test_context_ingest_then_retrieval() {
    let app = spawn_app(vec![vec![
        content("Up to 4 members per team."),
        ProviderFrame::Done,
    ]])
    .await;

    // Ingest context for session X.
    let response = app
        .client
        .post(format!("{}/api/context/add-text", app.base_url))
        .json(&serde_json::json!({
            "text": "Teams may have up to 4 members. Deadline is March 15.",
            "session_id": "session-x",
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Poll status until the index is ready.
    let mut ready = false;
    for _ in 0..100 {
        let status: serde_json::Value = app
            .client
            .get(format!(
                "{}/api/context/status?session_id=session-x",
                app.base_url
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if status["ready"] == true {
            assert_eq!(status["n_chunks"], 1);
            ready = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(ready, "index never became ready");

    // Chat; the emitted rule_chunks must carry the ingested chunk.
    let events = chat(&app, "team size?", Some("session-x")).await;
    let texts = events[1]["texts"].as_array().unwrap();
    assert!(texts.iter().any(|t| t.as_str().unwrap().contains("4 members")));
}

#[tokio::test]
async fn test_multi_round_tool_use() {
    let app = spawn_app(vec![
        tool_round("call_1", "add_todo", r#"{"item":"design schema"}"#),
        vec![content("Added design schema to your list."), ProviderFrame::Done],
    ])
    .await;

    let events = chat(&app, "plan the schema work", Some("session-t")).await;
    let types = event_types(&events);
    assert_eq!(types.iter().filter(|t| *t == "tool_calls").count(), 1);

    let final_content: String = events
        .iter()
        .filter_map(|e| e["token"].as_str())
        .collect();
    assert!(!final_content.is_empty());

    let todos: serde_json::Value = app
        .client
        .get(format!(
            "{}/api/todos?session_id=session-t&detailed=true",
            app.base_url
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = todos["todos"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["item"], "design schema");
}

#[tokio::test]
async fn test_url_rejection_writes_nothing() {
    let app = spawn_app(vec![]).await;

    // Local fixture returning a disallowed content type.
    let fixture = {
        use axum::http::header;
        use axum::response::IntoResponse;
        use axum::routing::get;
        async fn blob() -> impl IntoResponse {
            (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                vec![0u8, 1, 2],
            )
        }
        let router = axum::Router::new().route("/blob", get(blob));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{}", addr)
    };

    let response = app
        .client
        .post(format!("{}/api/context/add-text", app.base_url))
        .json(&serde_json::json!({
            "text": format!("{}/blob", fixture),
            "session_id": "session-u",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 415);

    let listing: serde_json::Value = app
        .client
        .get(format!(
            "{}/api/context/list?session_id=session-u",
            app.base_url
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listing["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_export_pack_entries_and_determinism() {
    // Scripts: one chat turn with a tool call, its final round, then
    // three artifact derivations.
    let app = spawn_app(vec![
        tool_round("call_1", "add_todo", r#"{"item":"design schema"}"#),
        vec![content("Task recorded."), ProviderFrame::Done],
        vec![content("An offline hackathon copilot."), ProviderFrame::Done],
        vec![content("Backend: Rust"), ProviderFrame::Done],
        vec![content("We made progress."), ProviderFrame::Done],
    ])
    .await;

    chat(&app, "plan the schema work", Some("session-e")).await;

    for endpoint in [
        "derive-project-idea",
        "create-tech-stack",
        "summarize-chat-history",
    ] {
        let response = app
            .client
            .post(format!(
                "{}/api/chat-sessions/session-e/{}",
                app.base_url, endpoint
            ))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success(), "{} failed", endpoint);
    }

    let export = |_: ()| async {
        app.client
            .post(format!(
                "{}/api/export/submission-pack?session_id=session-e",
                app.base_url
            ))
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
            .to_vec()
    };
    let first = export(()).await;
    let second = export(()).await;
    assert_eq!(first, second, "back-to-back exports must be byte-identical");

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(first)).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "idea.md",
            "tech_stack.md",
            "summary.md",
            "todos.json",
            "rules_ingested.txt",
            "session_metadata.json",
        ]
    );

    let mut todos_text = String::new();
    archive
        .by_name("todos.json")
        .unwrap()
        .read_to_string(&mut todos_text)
        .unwrap();
    let todos: serde_json::Value = serde_json::from_str(&todos_text).unwrap();
    assert_eq!(todos[0]["item"], "design schema");
}

#[tokio::test]
async fn test_cache_hit_skips_embedder() {
    let app = spawn_app(vec![]).await;

    app.client
        .post(format!("{}/api/context/add-text", app.base_url))
        .json(&serde_json::json!({
            "text": "Some context rules.",
            "session_id": "session-c",
        }))
        .send()
        .await
        .unwrap();

    for _ in 0..100 {
        if app.state.index.status(Some("session-c")).ready {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let calls_after_build = app.embedder.call_count();
    assert!(calls_after_build >= 1);

    // Drop the in-memory index, then ask for status again: the rebuild
    // must be served from the disk cache without re-embedding.
    app.state.index.evict(Some("session-c"));
    app.client
        .get(format!(
            "{}/api/context/status?session_id=session-c",
            app.base_url
        ))
        .send()
        .await
        .unwrap();

    let mut ready_again = false;
    for _ in 0..100 {
        if app.state.index.status(Some("session-c")).ready {
            ready_again = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(ready_again);
    assert_eq!(app.embedder.call_count(), calls_after_build);
}

#[tokio::test]
async fn test_session_scoping_across_apis() {
    let app = spawn_app(vec![]).await;

    // Tasks under session A.
    app.client
        .post(format!("{}/api/todos", app.base_url))
        .json(&serde_json::json!({"item": "a-only", "session_id": "session-a"}))
        .send()
        .await
        .unwrap();

    let b_todos: serde_json::Value = app
        .client
        .get(format!("{}/api/todos?session_id=session-b", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(b_todos["todos"].as_array().unwrap().is_empty());

    // Context under A is invisible to B.
    app.client
        .post(format!("{}/api/context/add-text", app.base_url))
        .json(&serde_json::json!({"text": "a context", "session_id": "session-a"}))
        .send()
        .await
        .unwrap();
    let b_context: serde_json::Value = app
        .client
        .get(format!(
            "{}/api/context/list?session_id=session-b",
            app.base_url
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(b_context["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_todos_requires_session_id() {
    let app = spawn_app(vec![]).await;
    let response = app
        .client
        .delete(format!("{}/api/todos", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_todo_update_and_delete() {
    let app = spawn_app(vec![]).await;

    let created: serde_json::Value = app
        .client
        .post(format!("{}/api/todos", app.base_url))
        .json(&serde_json::json!({"item": "try it", "session_id": "s"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["todo"]["id"].as_i64().unwrap();

    let updated: serde_json::Value = app
        .client
        .put(format!("{}/api/todos/{}", app.base_url, id))
        .json(&serde_json::json!({"status": "done"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["todo"]["status"], "done");
    assert!(updated["todo"]["completed_at"].is_string());

    let missing = app
        .client
        .put(format!("{}/api/todos/999999", app.base_url))
        .json(&serde_json::json!({"status": "done"}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    let deleted = app
        .client
        .delete(format!("{}/api/todos/{}?session_id=s", app.base_url, id))
        .send()
        .await
        .unwrap();
    assert!(deleted.status().is_success());
}

#[tokio::test]
async fn test_artifact_streaming_endpoint() {
    let app = spawn_app(vec![
        vec![content("Hi."), ProviderFrame::Done],
        vec![content("A "), content("great idea."), ProviderFrame::Done],
    ])
    .await;
    chat(&app, "hello", Some("session-s")).await;

    let body = app
        .client
        .post(format!(
            "{}/api/chat-sessions/session-s/derive-project-idea?stream=true",
            app.base_url
        ))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events = parse_sse(&body);
    let types = event_types(&events);
    assert!(types.iter().any(|t| t == "token"));
    assert_eq!(types.last().unwrap(), "end");

    let artifact: serde_json::Value = app
        .client
        .get(format!(
            "{}/api/chat-sessions/session-s/project-artifacts/project_idea",
            app.base_url
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(artifact["artifact"]["content"], "A great idea.");
}

#[tokio::test]
async fn test_provider_status_and_model_switch() {
    let app = spawn_app(vec![]).await;

    let status: serde_json::Value = app
        .client
        .get(format!("{}/api/ollama/status", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["connected"], true);
    assert_eq!(status["available_models"][0], "stub-model");

    let switched: serde_json::Value = app
        .client
        .post(format!("{}/api/ollama/model", app.base_url))
        .json(&serde_json::json!({"model": "stub-model"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(switched["model"], "stub-model");

    let rejected = app
        .client
        .post(format!("{}/api/ollama/model", app.base_url))
        .json(&serde_json::json!({"model": "unknown-model"}))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status().as_u16(), 400);
}

#[tokio::test]
async fn test_session_delete_cascades() {
    let app = spawn_app(vec![vec![content("Hi."), ProviderFrame::Done]]).await;
    chat(&app, "hello", Some("session-d")).await;
    app.client
        .post(format!("{}/api/todos", app.base_url))
        .json(&serde_json::json!({"item": "x", "session_id": "session-d"}))
        .send()
        .await
        .unwrap();

    let deleted = app
        .client
        .delete(format!("{}/api/chat-sessions/session-d", app.base_url))
        .send()
        .await
        .unwrap();
    assert!(deleted.status().is_success());

    let detail = app
        .client
        .get(format!("{}/api/chat-sessions/session-d", app.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(detail.status().as_u16(), 404);

    let todos: serde_json::Value = app
        .client
        .get(format!("{}/api/todos?session_id=session-d", app.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(todos["todos"].as_array().unwrap().is_empty());
}

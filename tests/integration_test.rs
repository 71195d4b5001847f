//! End-to-end tests for the chat actor
//!
//! The completion API is served by wiremock; storage is in memory.

use parley::chat::{Role, FAILED_RESPONSE_MARKER};
use parley::config::Settings;
use parley::history::DEFAULT_TITLE;
use parley::storage::{InMemoryStorage, SessionStorage};
use parley::{ChatHandle, LLMClient, Services, SessionPhase};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion_body(content: &str, total_tokens: u64) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": total_tokens}
    })
}

async fn mount_title(server: &MockServer, title: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(title, 5)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_chat(server: &MockServer, reply: &str, delay: Option<Duration>) {
    let mut response = ResponseTemplate::new(200).set_body_json(completion_body(reply, 42));
    if let Some(delay) = delay {
        response = response.set_delay(delay);
    }
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o"})))
        .respond_with(response)
        .mount(server)
        .await;
}

struct Harness {
    handle: ChatHandle,
    storage: Arc<InMemoryStorage>,
}

async fn start(server: &MockServer, credential: Option<&str>) -> Harness {
    let mut settings = Settings::default();
    settings.api.base_url = server.uri();
    settings.api.request_timeout_secs = 5;

    let storage = Arc::new(InMemoryStorage::new());
    let api = Arc::new(LLMClient::new(&settings.api).unwrap());
    let services = Services::new(api, storage.clone(), storage.clone());

    let handle = ChatHandle::spawn(settings, services).await.unwrap();
    if let Some(key) = credential {
        handle.set_credential(Some(key.to_string())).await.unwrap();
    }

    Harness { handle, storage }
}

async fn say(handle: &ChatHandle, text: &str) {
    handle.change_input(text).await.unwrap();
    handle.send().await.unwrap();
}

#[tokio::test]
async fn test_first_exchange_is_saved_and_titled_once() {
    let server = MockServer::start().await;
    mount_title(&server, "Greeting The Assistant", 1).await;
    mount_chat(&server, "Hi there", None).await;
    let Harness { handle, storage } = start(&server, Some("sk-test")).await;

    say(&handle, "Hello").await;
    let snapshot = handle.wait_until_idle().await.unwrap();

    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].role, Role::Assistant);
    assert_eq!(snapshot.messages[1].content, "Hi there");
    assert_eq!(snapshot.total_tokens, 42);
    assert_eq!(snapshot.input, "");
    assert_eq!(snapshot.phase, SessionPhase::Titled);
    assert_eq!(snapshot.current_title.as_deref(), Some("Greeting The Assistant"));
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].title, "Greeting The Assistant");

    let id = snapshot.current_session_id.clone().unwrap();
    let stored = storage.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 2);
    assert_eq!(stored.total_tokens, 42);
    assert_eq!(stored.title, "Greeting The Assistant");

    // A second exchange must not ask for another title
    say(&handle, "How are you?").await;
    let snapshot = handle.wait_until_idle().await.unwrap();

    assert_eq!(snapshot.messages.len(), 4);
    assert_eq!(snapshot.total_tokens, 84);
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(storage.get(&id).await.unwrap().unwrap().messages.len(), 4);
}

#[tokio::test]
async fn test_send_without_credential_saves_but_does_not_call_api() {
    let server = MockServer::start().await;
    let Harness { handle, storage } = start(&server, None).await;

    say(&handle, "Hello").await;
    let snapshot = handle.wait_until_idle().await.unwrap();

    assert!(snapshot.credential_required);
    assert!(!snapshot.has_credential);
    assert!(!snapshot.is_generating);
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.phase, SessionPhase::Persisted);
    assert_eq!(snapshot.current_title.as_deref(), Some(DEFAULT_TITLE));
    assert_eq!(storage.get_all().await.unwrap().len(), 1);
    assert!(server.received_requests().await.unwrap().is_empty());

    handle.set_credential(Some("sk-test".to_string())).await.unwrap();
    assert!(!handle.snapshot().credential_required);
}

#[tokio::test]
async fn test_api_error_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "upstream exploded"}
        })))
        .mount(&server)
        .await;
    let Harness { handle, .. } = start(&server, Some("sk-test")).await;

    say(&handle, "Hello").await;
    let snapshot = handle.wait_until_idle().await.unwrap();

    assert_eq!(snapshot.error.as_deref(), Some("HTTP 500: upstream exploded"));
    assert!(!snapshot.is_generating);
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].role, Role::User);
}

#[tokio::test]
async fn test_send_is_rejected_while_generating() {
    let server = MockServer::start().await;
    mount_title(&server, "Slow Chat", 1).await;
    mount_chat(&server, "Eventually", Some(Duration::from_millis(300))).await;
    let Harness { handle, .. } = start(&server, Some("sk-test")).await;

    say(&handle, "First").await;
    assert!(handle.snapshot().is_generating);

    say(&handle, "Second").await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.input, "Second");

    let snapshot = handle.wait_until_idle().await.unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].content, "Eventually");
}

#[tokio::test]
async fn test_deleting_retry_target_drops_the_response() {
    let server = MockServer::start().await;
    mount_title(&server, "Retry Chat", 1).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("First answer", 10)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_chat(&server, "Late answer", Some(Duration::from_millis(300))).await;
    let Harness { handle, storage } = start(&server, Some("sk-test")).await;

    say(&handle, "Question").await;
    let snapshot = handle.wait_until_idle().await.unwrap();
    let assistant_id = snapshot.messages[1].id.clone();

    handle.retry(assistant_id.clone()).await.unwrap();
    assert_eq!(
        handle.snapshot().retrying_message_id.as_deref(),
        Some(assistant_id.as_str())
    );
    handle.delete_message(assistant_id).await.unwrap();

    let snapshot = handle.wait_until_idle().await.unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].content, "Question");
    assert!(snapshot.retrying_message_id.is_none());
    assert!(snapshot.messages.iter().all(|m| m.content != "Late answer"));

    // Tokens spent on the dropped response are still saved
    assert_eq!(snapshot.total_tokens, 52);
    let id = snapshot.current_session_id.clone().unwrap();
    assert_eq!(storage.get(&id).await.unwrap().unwrap().total_tokens, 52);
}

#[tokio::test]
async fn test_deleting_only_message_does_not_overwrite_saved_session() {
    let server = MockServer::start().await;
    let Harness { handle, storage } = start(&server, None).await;

    say(&handle, "Hello").await;
    let snapshot = handle.snapshot();
    let id = snapshot.current_session_id.clone().unwrap();

    handle.delete_message(snapshot.messages[0].id.clone()).await.unwrap();

    assert!(handle.snapshot().messages.is_empty());
    let stored = storage.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 1);
    assert_eq!(stored.messages[0].content, "Hello");
}

#[tokio::test]
async fn test_sending_after_emptying_a_session_starts_a_new_one() {
    let server = MockServer::start().await;
    let Harness { handle, storage } = start(&server, None).await;

    say(&handle, "Original question").await;
    let snapshot = handle.snapshot();
    let original_id = snapshot.current_session_id.clone().unwrap();
    handle.delete_message(snapshot.messages[0].id.clone()).await.unwrap();

    say(&handle, "Unrelated new topic").await;
    let snapshot = handle.snapshot();
    let new_id = snapshot.current_session_id.clone().unwrap();

    assert_ne!(new_id, original_id);
    assert_eq!(snapshot.history.len(), 2);
    let original = storage.get(&original_id).await.unwrap().unwrap();
    assert_eq!(original.messages.len(), 1);
    assert_eq!(original.messages[0].content, "Original question");
    let fresh = storage.get(&new_id).await.unwrap().unwrap();
    assert_eq!(fresh.messages[0].content, "Unrelated new topic");
}

#[tokio::test]
async fn test_late_automatic_title_keeps_manual_rename() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("Auto Title", 5))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_chat(&server, "Hi there", None).await;
    let Harness { handle, storage } = start(&server, Some("sk-test")).await;

    say(&handle, "Hello").await;
    let mut updates = handle.subscribe();
    updates
        .wait_for(|s| !s.is_generating && s.messages.len() == 2 && s.titles_pending == 1)
        .await
        .unwrap();
    let id = handle.snapshot().current_session_id.unwrap();

    handle.rename_session(id.clone(), "My Manual Title").await.unwrap();
    let snapshot = handle.wait_until_idle().await.unwrap();

    assert_eq!(snapshot.current_title.as_deref(), Some("My Manual Title"));
    assert_eq!(snapshot.history[0].title, "My Manual Title");
    assert_eq!(storage.get(&id).await.unwrap().unwrap().title, "My Manual Title");
}

#[tokio::test]
async fn test_edit_is_persisted_with_original_content() {
    let server = MockServer::start().await;
    let Harness { handle, storage } = start(&server, None).await;

    say(&handle, "Helo").await;
    let snapshot = handle.snapshot();
    let id = snapshot.current_session_id.clone().unwrap();

    handle
        .edit_message(snapshot.messages[0].id.clone(), "Hello")
        .await
        .unwrap();

    let stored = storage.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.messages[0].content, "Hello");
    assert!(stored.messages[0].is_edited);
    assert_eq!(stored.messages[0].original_content.as_deref(), Some("Helo"));
}

#[tokio::test]
async fn test_session_switching_and_management() {
    let server = MockServer::start().await;
    let Harness { handle, .. } = start(&server, None).await;

    say(&handle, "First conversation").await;
    let first_id = handle.snapshot().current_session_id.unwrap();

    handle.new_session().await.unwrap();
    let snapshot = handle.snapshot();
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.phase, SessionPhase::None);
    assert!(snapshot.current_session_id.is_none());

    say(&handle, "Second conversation").await;
    let second_id = handle.snapshot().current_session_id.unwrap();
    assert_ne!(first_id, second_id);

    let snapshot = handle.snapshot();
    let order: Vec<&str> = snapshot.history.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(order, vec![second_id.as_str(), first_id.as_str()]);

    handle.select_session(first_id.clone()).await.unwrap();
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.messages[0].content, "First conversation");
    assert_eq!(snapshot.current_session_id.as_deref(), Some(first_id.as_str()));

    handle.rename_session(first_id.clone(), "Renamed").await.unwrap();
    assert_eq!(handle.snapshot().current_title.as_deref(), Some("Renamed"));

    handle.duplicate_session(first_id.clone()).await.unwrap();
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.history.len(), 3);
    assert_eq!(snapshot.current_title.as_deref(), Some("Renamed (Copy)"));
    let copy_id = snapshot.current_session_id.clone().unwrap();
    assert_ne!(copy_id, first_id);

    handle.delete_session(copy_id.clone()).await.unwrap();
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.history.len(), 2);
    assert!(snapshot.current_session_id.is_none());
    assert!(snapshot.messages.is_empty());

    // Unknown ids leave the current state alone
    handle.select_session(first_id.clone()).await.unwrap();
    handle.select_session("missing").await.unwrap();
    assert_eq!(
        handle.snapshot().current_session_id.as_deref(),
        Some(first_id.as_str())
    );
}

#[tokio::test]
async fn test_stale_response_after_new_session_is_dropped() {
    let server = MockServer::start().await;
    mount_chat(&server, "Too late", Some(Duration::from_millis(300))).await;
    let Harness { handle, storage } = start(&server, Some("sk-test")).await;

    say(&handle, "Hello").await;
    let id = handle.snapshot().current_session_id.unwrap();
    handle.new_session().await.unwrap();

    let snapshot = handle.wait_until_idle().await.unwrap();
    assert!(snapshot.messages.is_empty());

    // Give the delayed response time to arrive and be discarded
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(handle.snapshot().messages.is_empty());
    assert_eq!(storage.get(&id).await.unwrap().unwrap().messages.len(), 1);
}

#[tokio::test]
async fn test_loading_session_with_unfinished_placeholder_marks_it_failed() {
    let server = MockServer::start().await;
    let Harness { handle, storage } = start(&server, None).await;

    say(&handle, "Hello").await;
    let id = handle.snapshot().current_session_id.unwrap();

    let mut stored = storage.get(&id).await.unwrap().unwrap();
    stored.messages.push(parley::chat::Message::placeholder());
    storage.put(&stored).await.unwrap();

    handle.new_session().await.unwrap();
    handle.select_session(id).await.unwrap();

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.messages.len(), 2);
    assert!(!snapshot.messages[1].is_loading);
    assert_eq!(snapshot.messages[1].content, FAILED_RESPONSE_MARKER);
}

#[tokio::test]
async fn test_preferences_are_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "gpt-4o-mini"}, {"id": "gpt-4o"}]
        })))
        .mount(&server)
        .await;
    let Harness { handle, storage } = start(&server, Some("sk-test")).await;

    handle.set_temperature(5.0).await.unwrap();
    handle.set_system_prompt("Be terse").await.unwrap();
    handle.select_model("gpt-4o-mini").await.unwrap();
    handle.refresh_models().await.unwrap();
    let snapshot = handle.wait_until_idle().await.unwrap();

    assert_eq!(snapshot.temperature, 2.0);
    assert_eq!(snapshot.system_prompt, "Be terse");
    assert_eq!(snapshot.selected_model, "gpt-4o-mini");
    let ids: Vec<&str> = snapshot.models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini"]);

    handle.shutdown().await.unwrap();

    // A fresh actor over the same storage sees the saved values
    let mut settings = Settings::default();
    settings.api.base_url = server.uri();
    let api = Arc::new(LLMClient::new(&settings.api).unwrap());
    let handle = ChatHandle::spawn(settings, Services::new(api, storage.clone(), storage.clone()))
        .await
        .unwrap();

    let snapshot = handle.snapshot();
    assert!(snapshot.has_credential);
    assert_eq!(snapshot.temperature, 2.0);
    assert_eq!(snapshot.system_prompt, "Be terse");
    assert_eq!(snapshot.selected_model, "gpt-4o-mini");
}

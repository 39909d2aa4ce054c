use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tdbridge_client::mock::{MockEngine, MockHandle};
use tdbridge_client::types::functions::{GetMe, GetOption, SetTdlibParameters};
use tdbridge_client::types::{AuthorizationState, TdError, types::OptionValue};
use tdbridge_client::{Authenticator, Client, Config, Credential, InvocationError, Lifecycle};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn config() -> Config {
    Config {
        request_timeout:  Some(WAIT),
        receive_timeout:  Duration::from_millis(10),
        close_on_stop:    false,
        handler_grace:    Duration::from_millis(200),
        td_log_verbosity: None,
        ..Config::default()
    }
}

fn answer(req: &Value) -> Vec<Value> {
    match req["@type"].as_str() {
        Some("getMe") => vec![MockEngine::reply(req, json!({
            "@type": "user", "id": 7, "first_name": "Ada", "last_name": "Lovelace",
        }))],
        Some("getOption") => vec![MockEngine::reply(req, json!({
            "@type": "optionValueString", "value": "1.8.0",
        }))],
        Some("getChat") => vec![MockEngine::error(req, 400, "Chat not found")],
        _ => vec![],
    }
}

fn client_with(config: Config) -> (Client, MockHandle) {
    let (engine, handle) = MockEngine::new();
    handle.respond_with(answer);
    (Client::with_engine(config, engine), handle)
}

async fn running() -> (Client, MockHandle) {
    let (client, handle) = client_with(config());
    client.start().await.unwrap();
    (client, handle)
}

async fn wait_for_state(client: &Client, pred: impl Fn(&AuthorizationState) -> bool) {
    let mut rx = client.subscribe_authorization();
    tokio::time::timeout(WAIT, rx.wait_for(|s| s.as_ref().is_some_and(&pred)))
        .await
        .expect("state not reached")
        .unwrap();
}

// ── Requests ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn typed_invoke_round_trip() {
    let (client, handle) = running().await;

    let me = client.invoke(&GetMe {}).await.unwrap();
    assert_eq!(me.id, 7);
    assert_eq!(me.full_name(), "Ada Lovelace");

    let sent = handle.sent_request("getMe", WAIT).await.unwrap();
    assert!(sent["@extra"].is_u64());
    client.stop().await;
}

#[tokio::test]
async fn duplicate_response_is_ignored() {
    let (engine, handle) = MockEngine::new();
    handle.respond_with(|req| {
        let reply = MockEngine::reply(req, json!({"@type": "user", "id": 1}));
        vec![reply.clone(), reply]
    });
    let client = Client::with_engine(config(), engine);
    client.start().await.unwrap();

    assert_eq!(client.invoke(&GetMe {}).await.unwrap().id, 1);
    assert_eq!(client.invoke(&GetMe {}).await.unwrap().id, 1);
    client.stop().await;
}

#[tokio::test]
async fn library_error_is_returned_as_td() {
    let (client, _handle) = running().await;
    let err = client.invoke_raw(json!({"@type": "getChat", "chat_id": 1})).await.unwrap_err();
    assert_eq!(err, InvocationError::Td(TdError::new(400, "Chat not found")));
    client.stop().await;
}

#[tokio::test]
async fn raw_request_without_type_is_rejected() {
    let (client, handle) = running().await;
    let err = client.invoke_raw(json!({"chat_id": 1})).await.unwrap_err();
    assert!(matches!(err, InvocationError::InvalidRequest(_)));
    let err = client.invoke_raw(json!([1, 2])).await.unwrap_err();
    assert!(matches!(err, InvocationError::InvalidRequest(_)));
    assert!(handle.sent().iter().all(|r| r.get("@type").is_some()));
    client.stop().await;
}

#[tokio::test]
async fn concurrent_invokes_are_independent() {
    let (client, handle) = running().await;

    // getSupergroup is never answered.
    let slow = client.invoke_raw_with_timeout(
        json!({"@type": "getSupergroup", "supergroup_id": 1}),
        Some(Duration::from_millis(100)),
    );
    let fast = client.invoke(&GetMe {});
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(slow.unwrap_err(), InvocationError::Timeout(Duration::from_millis(100)));
    assert_eq!(fast.unwrap().id, 7);

    // A response that shows up after the deadline is dropped quietly.
    let late = handle.sent_request("getSupergroup", WAIT).await.unwrap();
    handle.push(MockEngine::reply(&late, json!({"@type": "supergroup", "id": 1})));
    assert_eq!(client.invoke(&GetMe {}).await.unwrap().id, 7);
    client.stop().await;
}

#[tokio::test]
async fn execute_bypasses_the_queue() {
    let (engine, handle) = MockEngine::new();
    handle.execute_with(|req| match req["@type"].as_str() {
        Some("getTextEntities") => Some(json!({"@type": "textEntities", "entities": []})),
        Some("setLogVerbosityLevel") => Some(json!({"@type": "ok"})),
        _ => Some(json!({"@type": "error", "code": 400, "message": "not synchronous"})),
    });
    let client = Client::with_engine(config(), engine);

    // Works before start.
    let entities = client.execute_raw(json!({"@type": "getTextEntities", "text": "@tdlib"})).unwrap();
    assert_eq!(entities["@type"], "textEntities");

    let err = client.execute_raw(json!({"@type": "getMe"})).unwrap_err();
    assert!(err.is("not synchronous"));
    assert!(handle.sent().is_empty());
    client.stop().await;
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invoke_on_stopped_client_is_closed() {
    let (client, handle) = running().await;
    client.stop().await;
    assert_eq!(client.lifecycle(), Lifecycle::Stopped);

    let before = handle.sent().len();
    assert_eq!(client.invoke(&GetMe {}).await.unwrap_err(), InvocationError::Closed);
    assert_eq!(handle.sent().len(), before);
    assert_eq!(client.start().await, Err(InvocationError::Closed));
}

#[tokio::test]
async fn only_allow_listed_calls_before_start() {
    let (client, handle) = client_with(config());
    assert_eq!(client.lifecycle(), Lifecycle::Created);

    assert_eq!(client.invoke(&GetMe {}).await.unwrap_err(), InvocationError::Closed);

    let queued = tokio::spawn({
        let client = client.clone();
        async move { client.invoke(&GetOption { name: "version".into() }).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.sent().is_empty());

    client.start().await.unwrap();
    assert_eq!(
        queued.await.unwrap().unwrap(),
        OptionValue::String { value: "1.8.0".into() }
    );
    client.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (client, handle) = running().await;
    tokio::join!(client.stop(), client.stop());
    client.stop().await;
    assert_eq!(client.lifecycle(), Lifecycle::Stopped);
    assert_eq!(handle.destroy_count(), 1);
}

#[tokio::test]
async fn stop_cancels_pending_calls() {
    let (client, _handle) = running().await;
    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.invoke_raw(json!({"@type": "getSupergroup", "supergroup_id": 1})).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.stop().await;
    assert_eq!(pending.await.unwrap(), Err(InvocationError::Closed));
}

#[tokio::test]
async fn stop_before_start_releases_engine() {
    let (client, handle) = client_with(config());
    client.stop().await;
    assert_eq!(client.lifecycle(), Lifecycle::Stopped);
    assert_eq!(handle.destroy_count(), 1);
}

#[tokio::test]
async fn dropping_every_handle_releases_engine() {
    let (client, handle) = running().await;
    let watcher = client.subscribe_authorization();
    drop(client);

    // The dispatcher notices, winds down and drops the state sender.
    let mut watcher = watcher;
    tokio::time::timeout(WAIT, async { while watcher.changed().await.is_ok() {} })
        .await
        .unwrap();
    assert_eq!(handle.destroy_count(), 1);
}

#[tokio::test]
async fn receive_failure_fails_every_pending_call() {
    let (client, handle) = running().await;

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client.invoke_raw(json!({"@type": "getSupergroup", "supergroup_id": i})).await
            })
        })
        .collect();
    for _ in 0..100 {
        if handle.sent().iter().filter(|r| r["@type"] == "getSupergroup").count() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    handle.fail_receive("connection to the library lost");
    for call in calls {
        assert_eq!(
            call.await.unwrap(),
            Err(InvocationError::Transport("connection to the library lost".into()))
        );
    }

    tokio::time::timeout(WAIT, client.wait_stopped()).await.unwrap();
    assert_eq!(client.lifecycle(), Lifecycle::Stopped);
    assert_eq!(handle.destroy_count(), 1);
    assert_eq!(client.invoke(&GetMe {}).await.unwrap_err(), InvocationError::Closed);
}

#[tokio::test]
async fn send_failure_is_fatal() {
    let (client, handle) = running().await;
    handle.fail_send(true);

    let err = client.invoke(&GetMe {}).await.unwrap_err();
    assert!(matches!(err, InvocationError::Transport(_)));
    tokio::time::timeout(WAIT, client.wait_stopped()).await.unwrap();
    assert_eq!(handle.destroy_count(), 1);
}

#[tokio::test]
async fn queued_calls_share_the_send_failure() {
    let (client, handle) = client_with(config());
    handle.fail_send(true);

    // Queued before start; the first send fails and takes the rest with it.
    let option = || async { client.invoke(&GetOption { name: "version".into() }).await };
    let (a, b, c, started) = tokio::join!(option(), option(), option(), client.start());
    started.unwrap();
    for result in [a, b, c] {
        assert_eq!(result, Err(InvocationError::Transport("mock send failure".into())));
    }

    tokio::time::timeout(WAIT, client.wait_stopped()).await.unwrap();
    assert_eq!(handle.destroy_count(), 1);
}

#[tokio::test]
async fn closed_state_stops_the_client() {
    let (client, handle) = running().await;
    handle.push_authorization("authorizationStateClosing");
    handle.push_authorization("authorizationStateClosed");

    tokio::time::timeout(WAIT, client.wait_stopped()).await.unwrap();
    assert_eq!(client.authorization_state(), Some(AuthorizationState::Closed));
    assert_eq!(client.invoke(&GetMe {}).await.unwrap_err(), InvocationError::Closed);
    assert_eq!(handle.destroy_count(), 1);
}

#[tokio::test]
async fn stop_closes_the_instance_first() {
    let (engine, handle) = MockEngine::new();
    handle.respond_with(|req| match req["@type"].as_str() {
        Some("close") => vec![
            MockEngine::reply(req, json!({"@type": "ok"})),
            MockEngine::authorization_update("authorizationStateClosing"),
            MockEngine::authorization_update("authorizationStateClosed"),
        ],
        _ => vec![],
    });
    let client = Client::with_engine(Config { close_on_stop: true, ..config() }, engine);
    client.start().await.unwrap();
    handle.push_authorization("authorizationStateWaitTdlibParameters");
    wait_for_state(&client, |s| *s == AuthorizationState::WaitTdlibParameters).await;

    tokio::time::timeout(WAIT, client.stop()).await.unwrap();
    assert!(handle.sent().iter().any(|r| r["@type"] == "close"));
    assert_eq!(client.authorization_state(), Some(AuthorizationState::Closed));
    assert_eq!(handle.destroy_count(), 1);
}

// ── Authorization ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn ready_releases_gated_calls() {
    let (client, handle) = client_with(Config { gate_until_ready: true, ..config() });
    client.start().await.unwrap();
    handle.push_authorization("authorizationStateWaitPhoneNumber");
    wait_for_state(&client, |s| *s == AuthorizationState::WaitPhoneNumber).await;

    let gated = tokio::spawn({
        let client = client.clone();
        async move { client.invoke(&GetMe {}).await }
    });
    // Allow-listed calls are not held back.
    client.invoke(&GetOption { name: "version".into() }).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.sent().iter().all(|r| r["@type"] != "getMe"));

    handle.push_authorization("authorizationStateReady");
    assert_eq!(gated.await.unwrap().unwrap().id, 7);
    client.stop().await;
}

#[tokio::test]
async fn gated_calls_fail_when_logging_out() {
    let (client, handle) = client_with(Config { gate_until_ready: true, ..config() });
    client.start().await.unwrap();

    let gated = tokio::spawn({
        let client = client.clone();
        async move { client.invoke(&GetMe {}).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.push_authorization("authorizationStateLoggingOut");

    assert_eq!(gated.await.unwrap().unwrap_err(), InvocationError::Closed);
    client.stop().await;
}

#[tokio::test]
async fn state_after_closed_is_ignored() {
    let (client, handle) = running().await;
    handle.push_authorization("authorizationStateClosed");
    handle.push_authorization("authorizationStateReady");
    tokio::time::timeout(WAIT, client.wait_stopped()).await.unwrap();
    assert_eq!(client.authorization_state(), Some(AuthorizationState::Closed));
    assert_eq!(client.wait_until_ready().await, Err(InvocationError::Closed));
}

struct BotLogin {
    rejections: AtomicUsize,
}

#[async_trait]
impl Authenticator for BotLogin {
    async fn tdlib_parameters(&self) -> Result<SetTdlibParameters, InvocationError> {
        Ok(SetTdlibParameters::new(12345, "0123456789abcdef", "/tmp/tdbridge-test"))
    }

    async fn credential(&self) -> Result<Credential, InvocationError> {
        let attempt = self.rejections.load(Ordering::SeqCst);
        Ok(Credential::BotToken(format!("token-{attempt}")))
    }

    async fn code(&self, _: &Value) -> Result<String, InvocationError> {
        unreachable!("bots are never asked for a code")
    }

    async fn password(&self, _: &str) -> Result<String, InvocationError> {
        unreachable!("bots are never asked for a password")
    }

    async fn rejected(&self, _: &AuthorizationState, _: &TdError) {
        self.rejections.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn scripted_bot_login_retries_rejected_token() {
    let (engine, handle) = MockEngine::new();
    handle.respond_with(|req| match req["@type"].as_str() {
        Some("getAuthorizationState") => vec![
            MockEngine::reply(req, json!({"@type": "authorizationStateWaitTdlibParameters"})),
            MockEngine::authorization_update("authorizationStateWaitTdlibParameters"),
        ],
        Some("setTdlibParameters") => {
            assert_eq!(req["api_id"], 12345);
            vec![
                MockEngine::reply(req, json!({"@type": "ok"})),
                MockEngine::authorization_update("authorizationStateWaitPhoneNumber"),
            ]
        }
        Some("checkAuthenticationBotToken") if req["token"] == "token-0" => {
            vec![MockEngine::error(req, 400, "ACCESS_TOKEN_INVALID")]
        }
        Some("checkAuthenticationBotToken") => vec![
            MockEngine::reply(req, json!({"@type": "ok"})),
            MockEngine::authorization_update("authorizationStateReady"),
        ],
        _ => vec![],
    });

    let auth = Arc::new(BotLogin { rejections: AtomicUsize::new(0) });
    let client = Client::with_engine(Config { authenticator: Some(auth.clone()), ..config() }, engine);
    client.start().await.unwrap();

    tokio::time::timeout(WAIT, client.wait_until_ready()).await.unwrap().unwrap();
    assert_eq!(auth.rejections.load(Ordering::SeqCst), 1);

    let tokens: Vec<_> = handle.sent().into_iter()
        .filter(|r| r["@type"] == "checkAuthenticationBotToken")
        .map(|r| r["token"].clone())
        .collect();
    assert_eq!(tokens, vec![json!("token-0"), json!("token-1")]);
    client.stop().await;
}

/// Asks for a phone number and never gets one.
struct Unanswered {
    asked: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl Authenticator for Unanswered {
    async fn tdlib_parameters(&self) -> Result<SetTdlibParameters, InvocationError> {
        Ok(SetTdlibParameters::new(12345, "0123456789abcdef", "/tmp/tdbridge-test"))
    }

    async fn credential(&self) -> Result<Credential, InvocationError> {
        let _ = self.asked.send(());
        std::future::pending().await
    }

    async fn code(&self, _: &Value) -> Result<String, InvocationError> {
        unreachable!("no code was requested")
    }

    async fn password(&self, _: &str) -> Result<String, InvocationError> {
        unreachable!("no password was requested")
    }
}

#[tokio::test]
async fn pending_login_prompt_does_not_keep_the_client_alive() {
    let (asked, mut asked_rx) = mpsc::unbounded_channel();
    let (client, handle) = client_with(Config {
        authenticator: Some(Arc::new(Unanswered { asked })),
        ..config()
    });
    client.start().await.unwrap();
    handle.push_authorization("authorizationStateWaitPhoneNumber");
    tokio::time::timeout(WAIT, asked_rx.recv()).await.unwrap().unwrap();

    let mut watcher = client.subscribe_authorization();
    drop(client);

    tokio::time::timeout(WAIT, async { while watcher.changed().await.is_ok() {} })
        .await
        .expect("dispatcher kept running after the last handle was dropped");
    assert_eq!(handle.destroy_count(), 1);
}

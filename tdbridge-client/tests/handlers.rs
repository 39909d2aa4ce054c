use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tdbridge_client::mock::{MockEngine, MockHandle};
use tdbridge_client::types::functions::GetMe;
use tdbridge_client::types::{AuthorizationState, UpdateKind};
use tdbridge_client::{Client, Config, HandlerError, Lifecycle, Subscription};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

async fn running() -> (Client, MockHandle) {
    let (engine, handle) = MockEngine::new();
    handle.respond_with(|req| match req["@type"].as_str() {
        Some("getMe") => vec![MockEngine::reply(req, json!({"@type": "user", "id": 7}))],
        _ => vec![],
    });
    let config = Config {
        receive_timeout:  Duration::from_millis(10),
        close_on_stop:    false,
        handler_grace:    Duration::from_millis(500),
        td_log_verbosity: None,
        ..Config::default()
    };
    let client = Client::with_engine(config, engine);
    client.start().await.unwrap();
    (client, handle)
}

fn new_message(chat_id: i64, id: i64) -> serde_json::Value {
    json!({
        "@type": "updateNewMessage",
        "message": {"@type": "message", "id": id, "chat_id": chat_id, "content": {"@type": "messageText"}},
    })
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv()).await.expect("nothing received").unwrap()
}

/// Collect everything that arrives until `quiet` passes without a message.
async fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>, quiet: Duration) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(Some(v)) = tokio::time::timeout(quiet, rx.recv()).await {
        out.push(v);
    }
    out
}

#[tokio::test]
async fn filter_selects_updates() {
    let (client, handle) = running().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.add_handler(
        Subscription::on("updateNewMessage").filter(|u| u.chat_id() == Some(1)),
        move |_, update| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(update.get("message").and_then(|m| m["id"].as_i64()));
                Ok(())
            }
        },
    );

    handle.push(new_message(1, 10));
    handle.push(new_message(2, 20));
    handle.push(new_message(1, 30));

    let got = drain(&mut rx, Duration::from_millis(200)).await;
    assert_eq!(got, vec![Some(10), Some(30)]);
    client.stop().await;
}

#[tokio::test]
async fn wildcard_and_exact_interest() {
    let (client, handle) = running().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let any = tx.clone();
    client.add_handler(Subscription::any(), move |_, update| {
        let tx = any.clone();
        async move {
            let _ = tx.send(format!("any:{}", update.type_name()));
            Ok(())
        }
    });
    client.add_handler(Subscription::on("updateOption"), move |_, update| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(format!("option:{}", update.type_name()));
            Ok(())
        }
    });

    handle.push(json!({"@type": "updateOption", "name": "version", "value": {"@type": "optionValueString", "value": "1.8"}}));
    handle.push(json!({"@type": "updateUser", "user": {"id": 1}}));

    let mut got = drain(&mut rx, Duration::from_millis(200)).await;
    got.sort();
    assert_eq!(got, vec!["any:updateOption", "any:updateUser", "option:updateOption"]);
    client.stop().await;
}

#[tokio::test]
async fn lower_groups_are_scheduled_first() {
    let (client, handle) = running().await;
    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    for group in [10, 0] {
        let order = order.clone();
        let done  = done_tx.clone();
        client.add_handler(Subscription::on("updateNewMessage").group(group), move |_, _| {
            let order = order.clone();
            let done  = done.clone();
            async move {
                order.lock().unwrap().push(group);
                let _ = done.send(());
                Ok(())
            }
        });
    }

    handle.push(new_message(1, 1));
    recv(&mut done_rx).await;
    recv(&mut done_rx).await;
    assert_eq!(*order.lock().unwrap(), vec![0, 10]);
    client.stop().await;
}

#[tokio::test]
async fn failing_handlers_do_not_disturb_others() {
    let (client, handle) = running().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.add_handler(Subscription::on("updateNewMessage"), |_, update| async move {
        match update.chat_id() {
            Some(1) => panic!("handler blew up"),
            Some(2) => Err(HandlerError::from("handler refused")),
            _ => Ok(()),
        }
    });
    client.add_handler(Subscription::on("updateNewMessage").group(1), move |_, update| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(update.chat_id());
            Ok(())
        }
    });

    for chat in 1..=3 {
        handle.push(new_message(chat, chat));
    }
    let mut got = drain(&mut rx, Duration::from_millis(200)).await;
    got.sort();
    assert_eq!(got, vec![Some(1), Some(2), Some(3)]);

    // Requests still work after a handler panicked.
    assert_eq!(client.invoke(&GetMe {}).await.unwrap().id, 7);
    client.stop().await;
}

#[tokio::test]
async fn sequential_handler_sees_receipt_order() {
    let (client, handle) = running().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.add_handler(Subscription::on("updateNewMessage").sequential(), move |_, update| {
        let tx = tx.clone();
        async move {
            let id = update.get("message").and_then(|m| m["id"].as_i64()).unwrap_or_default();
            // Earlier updates take longer; overlapping calls would finish out of order.
            tokio::time::sleep(Duration::from_millis(10 * (5 - id as u64))).await;
            let _ = tx.send(id);
            Ok(())
        }
    });

    for id in 1..=4 {
        handle.push(new_message(9, id));
    }
    let mut got = Vec::new();
    for _ in 0..4 {
        got.push(recv(&mut rx).await);
    }
    assert_eq!(got, vec![1, 2, 3, 4]);
    client.stop().await;
}

#[tokio::test]
async fn removed_handler_gets_nothing() {
    let (client, handle) = running().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let id = client.add_handler(Subscription::on("updateNewMessage"), move |_, update| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(update.chat_id());
            Ok(())
        }
    });
    handle.push(new_message(1, 1));
    assert_eq!(recv(&mut rx).await, Some(1));

    client.remove_handler(id);
    handle.push(new_message(2, 2));
    assert!(drain(&mut rx, Duration::from_millis(100)).await.is_empty());
    client.stop().await;
}

#[tokio::test]
async fn handlers_see_authorization_updates_after_the_state_changes() {
    let (client, handle) = running().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    client.add_handler(Subscription::on("updateAuthorizationState"), move |client, update| {
        let tx = tx.clone();
        async move {
            if let UpdateKind::AuthorizationState(state) = update.kind() {
                let _ = tx.send((state.clone(), client.authorization_state()));
            }
            Ok(())
        }
    });

    handle.push_authorization("authorizationStateReady");
    let (announced, current) = recv(&mut rx).await;
    assert_eq!(announced, AuthorizationState::Ready);
    assert_eq!(current, Some(AuthorizationState::Ready));
    client.stop().await;
}

#[tokio::test]
async fn slow_handlers_are_aborted_after_grace() {
    let (client, handle) = running().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    client.add_handler(Subscription::any(), move |_, _| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(());
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    });
    handle.push(new_message(1, 1));
    recv(&mut rx).await;

    tokio::time::timeout(WAIT, client.stop()).await.expect("stop hung on a handler");
    assert_eq!(handle.destroy_count(), 1);
}

#[tokio::test]
async fn handler_can_stop_its_own_client() {
    let (engine, handle) = MockEngine::new();
    handle.respond_with(|req| match req["@type"].as_str() {
        Some("close") => vec![
            MockEngine::reply(req, json!({"@type": "ok"})),
            MockEngine::authorization_update("authorizationStateClosing"),
            MockEngine::authorization_update("authorizationStateClosed"),
        ],
        _ => vec![],
    });
    // A grace period far longer than the test may take.
    let config = Config {
        receive_timeout:  Duration::from_millis(10),
        close_on_stop:    true,
        handler_grace:    Duration::from_secs(60),
        td_log_verbosity: None,
        ..Config::default()
    };
    let client = Client::with_engine(config, engine);
    client.start().await.unwrap();
    handle.push_authorization("authorizationStateReady");

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.add_handler(Subscription::on("updateNewMessage"), move |client, _| {
        let tx = tx.clone();
        async move {
            client.stop().await;
            let _ = tx.send(client.authorization_state());
            Ok(())
        }
    });
    handle.push(new_message(1, 1));

    // The handler gets past `stop` and the client winds down without
    // waiting out the grace period.
    assert_eq!(recv(&mut rx).await, Some(AuthorizationState::Closed));
    tokio::time::timeout(WAIT, client.wait_stopped()).await.expect("client did not stop");
    assert_eq!(client.lifecycle(), Lifecycle::Stopped);
    assert!(handle.sent().iter().any(|r| r["@type"] == "close"));
    assert_eq!(handle.destroy_count(), 1);

    // Stopping again from outside is a no-op.
    tokio::time::timeout(WAIT, client.stop()).await.unwrap();
}

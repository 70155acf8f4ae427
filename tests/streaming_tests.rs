use futures_util::SinkExt;
use lmlocal::{LocalClient, StreamMessage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

const RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
enum Step {
    Text(&'static str),
    Binary(&'static [u8]),
    Pause(u64),
}

/// Fake machine: each accepted connection plays the next script, then closes.
/// Returns the port and a log of "<path> <authorization>" per handshake.
async fn spawn_machine(sessions: Vec<Vec<Step>>) -> (u16, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handshakes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&handshakes);

    tokio::spawn(async move {
        let mut sessions = VecDeque::from(sessions);
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let steps = sessions.pop_front().unwrap_or_default();
            let seen = Arc::clone(&seen);
            let callback = move |request: &Request,
                                 response: Response|
                  -> Result<Response, ErrorResponse> {
                let auth = request
                    .headers()
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                seen.lock()
                    .unwrap()
                    .push(format!("{} {}", request.uri().path(), auth));
                Ok(response)
            };
            let Ok(mut socket) = accept_hdr_async(stream, callback).await else {
                continue;
            };
            for step in steps {
                match step {
                    Step::Text(text) => socket.send(Message::text(text)).await.unwrap(),
                    Step::Binary(data) => socket
                        .send(Message::binary(data.to_vec()))
                        .await
                        .unwrap(),
                    Step::Pause(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                }
            }
            let _ = socket.close(None).await;
        }
    });

    (port, handshakes)
}

fn client(port: u16) -> Arc<LocalClient> {
    Arc::new(
        LocalClient::new("127.0.0.1", "secret")
            .with_port(port)
            .with_retry_delay(RETRY_DELAY),
    )
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<StreamMessage>) -> StreamMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no message within 5s")
        .expect("subscription dropped the sink")
}

#[tokio::test]
async fn test_reconnects_after_close_and_delivers_messages() {
    let (port, handshakes) = spawn_machine(vec![
        vec![],
        vec![
            Step::Text(r#"[{"Boiler":"CoffeeBoiler1","Temperature":93.5}]"#),
            Step::Binary(&[1, 2, 3]),
            Step::Pause(500),
        ],
    ])
    .await;
    let client = client(port);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task_client = Arc::clone(&client);
    let task = tokio::spawn(async move {
        let mut sink = tx;
        task_client.websocket_connect(Some(&mut sink), false).await
    });

    let first = recv(&mut rx).await;
    assert_eq!(
        first.as_text(),
        Some(r#"[{"Boiler":"CoffeeBoiler1","Temperature":93.5}]"#)
    );
    assert_eq!(recv(&mut rx).await, StreamMessage::Binary(vec![1, 2, 3]));
    assert!(client.is_connected());

    client.terminate();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("subscription did not stop")
        .unwrap();
    assert!(!client.is_connected());

    let handshakes = handshakes.lock().unwrap().clone();
    assert_eq!(
        handshakes,
        vec![
            "/api/v1/streaming Bearer secret".to_string(),
            "/api/v1/streaming Bearer secret".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_callback_error_does_not_stop_subscription() {
    let (port, _) = spawn_machine(vec![vec![
        Step::Text("one"),
        Step::Text("two"),
        Step::Text("three"),
        Step::Pause(500),
    ]])
    .await;
    let client = client(port);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task_client = Arc::clone(&client);
    let task = tokio::spawn(async move {
        let mut sink = move |message: StreamMessage| -> anyhow::Result<()> {
            let failing = message.as_text() == Some("one");
            tx.send(message)?;
            if failing {
                anyhow::bail!("cannot handle message");
            }
            Ok(())
        };
        task_client.websocket_connect(Some(&mut sink), false).await
    });

    assert_eq!(recv(&mut rx).await.as_text(), Some("one"));
    assert_eq!(recv(&mut rx).await.as_text(), Some("two"));
    assert_eq!(recv(&mut rx).await.as_text(), Some("three"));

    client.terminate();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("subscription did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_rejected_token_keeps_retrying() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            seen.fetch_add(1, Ordering::SeqCst);
            let reject = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                Err(Response::builder()
                    .status(StatusCode::FORBIDDEN)
                    .body(None)
                    .unwrap())
            };
            let _ = accept_hdr_async(stream, reject).await;
        }
    });

    let client = Arc::new(
        LocalClient::new("127.0.0.1", "wrong")
            .with_port(port)
            .with_retry_delay(Duration::from_millis(20)),
    );
    let task_client = Arc::clone(&client);
    let task = tokio::spawn(async move { task_client.websocket_connect(None, false).await });

    // backoff starts at 20ms and doubles: attempts at 0, 20, 60ms, ...
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!task.is_finished());
    assert!(attempts.load(Ordering::SeqCst) >= 2);
    assert!(!client.is_connected());

    client.terminate();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("subscription did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_machine_keeps_retrying_until_terminated() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = client(port);
    let task_client = Arc::clone(&client);
    let task = tokio::spawn(async move { task_client.websocket_connect(None, false).await });

    tokio::time::sleep(RETRY_DELAY * 3).await;
    assert!(!task.is_finished());
    assert!(!client.is_connected());

    client.terminate();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("subscription did not stop")
        .unwrap();
}

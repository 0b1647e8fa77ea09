//! End-to-end orchestration tests against a simulated kernel.
//!
//! The kernel runs on the far end of a loopback transport. It answers each
//! `execute_request` with the messages a real kernel would publish for the
//! submitted code, so these tests cover request/reply/result correlation,
//! streamed output and failure mapping through the public API only.

use burdock::channels::ChannelKind;
use burdock::client::{ClientError, ExecuteRequest, KernelClient};
use burdock::config::ExecuteConfig;
use burdock::errors::ExecutionFailure;
use burdock::manager::{BurdockManager, ManagerError};
use burdock::message::{predicates, Envelope, Session};
use burdock::transport::{loopback, KernelEnd};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Simulated kernel
// ─────────────────────────────────────────────────────────────────────────────

const TIMEOUT: Duration = Duration::from_secs(5);

fn content(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Publishes on iopub and replies on shell for one request.
struct Responder<'a> {
    kernel: &'a KernelEnd,
    session: &'a Session,
    request: &'a Envelope,
}

impl Responder<'_> {
    async fn iopub(&self, msg_type: &str, body: Value) {
        let message = self.session.reply(self.request, msg_type, content(body));
        self.kernel
            .deliver(ChannelKind::IoPub, &message)
            .await
            .expect("iopub delivery");
    }

    async fn status(&self, state: &str) {
        self.iopub("status", json!({"execution_state": state})).await;
    }

    async fn stdout(&self, text: &str) {
        self.iopub("stream", json!({"name": "stdout", "text": text})).await;
    }

    async fn result(&self, plain: &str) {
        self.iopub(
            "execute_result",
            json!({"execution_count": 1, "data": {"text/plain": plain}, "metadata": {}}),
        )
        .await;
    }

    async fn reply(&self, body: Value) {
        let message = self.session.reply(self.request, "execute_reply", content(body));
        self.kernel
            .deliver(ChannelKind::Shell, &message)
            .await
            .expect("shell delivery");
    }

    async fn ok(&self) {
        self.reply(json!({"status": "ok", "execution_count": 1})).await;
    }
}

async fn respond(kernel: &KernelEnd, session: &Session, request: &Envelope) {
    let r = Responder {
        kernel,
        session,
        request,
    };
    let code = request.content_str("code").unwrap_or_default();

    r.status("busy").await;
    match code {
        "'po' + 'ng'" => {
            r.result("'pong'").await;
            r.ok().await;
        }
        "_ = [print(i) for i in [1,2,3]]" => {
            for line in ["1\n", "2\n", "3\n"] {
                r.stdout(line).await;
            }
            r.ok().await;
        }
        "print_out_of_order()" => {
            r.stdout("1\n3\n").await;
            r.stdout("2\n").await;
            r.ok().await;
        }
        "print_two()" => {
            r.stdout("1\n2\n").await;
            r.ok().await;
        }
        "raise ValueError('boom')" => {
            let error = json!({
                "ename": "ValueError",
                "evalue": "boom",
                "traceback": ["Traceback (most recent call last)", "ValueError: boom"],
            });
            r.iopub("error", error.clone()).await;
            let mut reply = error;
            reply["status"] = json!("error");
            r.reply(reply).await;
        }
        "interrupted()" => {
            r.reply(json!({"status": "abort"})).await;
        }
        "garbled_reply()" => {
            r.reply(json!({"status": 42})).await;
        }
        "reply_before_result()" => {
            r.ok().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            r.result("'late'").await;
        }
        "x = 1" => {
            r.ok().await;
        }
        "hang()" => return,
        "__burdock__.data_frame_variables" => {
            r.result("['df', 'sales']").await;
            r.ok().await;
        }
        "__burdock__.analyze(\"df\")" => {
            r.result("('/tmp/df.decls', '/tmp/df.dtrace')").await;
            r.ok().await;
        }
        other if other.contains("BurdockAgent(get_ipython())") => {
            r.result("<burdock.lab.agent.BurdockAgent at 0x7f>").await;
            r.ok().await;
        }
        _ => {
            r.result("None").await;
            r.ok().await;
        }
    }
    r.status("idle").await;
}

fn spawn_kernel(mut kernel: KernelEnd) {
    tokio::spawn(async move {
        let session = Session::new("kernel");
        while let Some((channel, request)) = kernel.next_request().await {
            assert_eq!(channel, ChannelKind::Shell);
            assert_eq!(request.msg_type(), "execute_request");
            respond(&kernel, &session, &request).await;
        }
    });
}

fn connected_client() -> KernelClient {
    let (transport, inbound, kernel) = loopback(64);
    spawn_kernel(kernel);
    KernelClient::start(Arc::new(transport), inbound, Session::new("tester"))
}

async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("operation should settle")
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario A: single-result execution
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_result_execution_resolves_with_value() {
    let client = connected_client();
    let result = within(client.execute_retval(ExecuteRequest::new("'po' + 'ng'")))
        .await
        .expect("ping resolves");

    assert_eq!(result.msg_type(), "execute_result");
    assert_eq!(result.plain_text(), Some("'pong'"));
    assert!(client.shell().registry().is_empty());
    assert!(client.iopub().registry().is_empty());
}

#[tokio::test]
async fn manager_ping_returns_result_message_and_decoded_text() {
    let manager = BurdockManager::new(connected_client());
    let value = within(manager.ping()).await.unwrap();
    assert_eq!(value["header"]["msg_type"], json!("execute_result"));
    assert_eq!(value["content"]["data"]["text/plain"], json!("'pong'"));

    assert_eq!(within(manager.evaluate_text("'po' + 'ng'")).await.unwrap(), "pong");
}

#[tokio::test]
async fn result_published_after_reply_still_resolves() {
    let client = connected_client();
    let retval = within(client.execute_retval(ExecuteRequest::new("reply_before_result()")))
        .await
        .unwrap();
    assert_eq!(retval.plain_text(), Some("'late'"));

    let interactive = within(client.execute_interactive(ExecuteRequest::new("reply_before_result()")))
        .await
        .unwrap();
    assert_eq!(interactive.plain_text(), Some("'late'"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario B: streamed execution
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn streamed_execution_collects_stdout_until_idle() {
    let client = connected_client();
    let stream = within(client.execute_output(
        ExecuteRequest::new("_ = [print(i) for i in [1,2,3]]"),
        predicates::stdout(),
        None,
    ))
    .await
    .unwrap();

    let mut lines = Vec::new();
    while let Some(message) = within(stream.next()).await.unwrap() {
        lines.push(message.content_str("text").unwrap().trim_end().to_string());
    }
    assert_eq!(lines, vec!["1", "2", "3"]);
    assert!(stream.is_drained());
    within(stream.join()).await;
    assert!(client.iopub().registry().is_empty());
}

#[tokio::test]
async fn streamed_ping_reports_lines() {
    let manager = BurdockManager::new(connected_client());
    let value = within(manager.streamed_ping()).await.unwrap();
    assert_eq!(value, json!(["1", "2", "3"]));
}

/// A manager whose kernel runs `code` in place of whatever it is sent.
fn manager_with_substituted_code(code: &'static str) -> BurdockManager {
    let (transport, inbound, mut kernel) = loopback(64);
    tokio::spawn(async move {
        let session = Session::new("kernel");
        while let Some((_, request)) = kernel.next_request().await {
            let mut raw = request.to_value();
            raw["content"]["code"] = json!(code);
            let request = Envelope::from_value(raw).expect("rewritten request");
            respond(&kernel, &session, &request).await;
        }
    });
    BurdockManager::new(KernelClient::start(
        Arc::new(transport),
        inbound,
        Session::new("tester"),
    ))
}

#[tokio::test]
async fn streamed_ping_reports_overflow_instead_of_misordering() {
    let (transport, inbound, kernel) = loopback(64);
    spawn_kernel(kernel);
    let client = KernelClient::start_with(
        Arc::new(transport),
        inbound,
        Session::new("tester"),
        ExecuteConfig::default(),
        Some(1),
    );
    let manager = BurdockManager::new(client);

    let error = within(manager.streamed_ping()).await.unwrap_err();
    assert!(
        matches!(error, ManagerError::StreamOverflow { dropped } if dropped > 0),
        "expected overflow, got {error:?}"
    );
    assert!(manager.client().iopub().registry().is_empty());
}

#[tokio::test]
async fn streamed_ping_rejects_out_of_order_output() {
    let manager = manager_with_substituted_code("print_out_of_order()");
    let error = within(manager.streamed_ping()).await.unwrap_err();
    match error {
        ManagerError::StreamIntegrity(error) => {
            assert_eq!(error.collected_outputs, vec!["1", "3", "2"]);
        }
        other => panic!("expected integrity error, got {other:?}"),
    }
}

#[tokio::test]
async fn streamed_ping_rejects_short_output() {
    let manager = manager_with_substituted_code("print_two()");
    let error = within(manager.streamed_ping()).await.unwrap_err();
    assert_eq!(error.status_code(), 500);
    match error {
        ManagerError::StreamIntegrity(error) => {
            assert_eq!(error.collected_outputs, vec!["1", "2"]);
        }
        other => panic!("expected integrity error, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario C: remote exception
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn error_reply_resolves_to_execution_error() {
    let client = connected_client();
    let expected = ExecutionFailure::Error {
        name: "ValueError".into(),
        value: "boom".into(),
        traceback: vec![
            "Traceback (most recent call last)".into(),
            "ValueError: boom".into(),
        ],
    };

    let interactive = within(client.execute_interactive(ExecuteRequest::new("raise ValueError('boom')")))
        .await
        .unwrap_err();
    assert!(matches!(interactive, ClientError::Execution(ref failure) if *failure == expected));

    let retval = within(client.execute_retval(ExecuteRequest::new("raise ValueError('boom')")))
        .await
        .unwrap_err();
    assert!(matches!(retval, ClientError::Execution(ref failure) if *failure == expected));

    // The abandoned result waiter unregistered itself.
    assert!(client.iopub().registry().is_empty());
}

#[tokio::test]
async fn manager_maps_execution_error_to_500() {
    let manager = BurdockManager::new(connected_client());
    let error = within(manager.execute_for_value("raise ValueError('boom')"))
        .await
        .unwrap_err();
    assert_eq!(error.status_code(), 500);
    assert_eq!(error.to_string(), "kernel execution raised ValueError: boom");
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario D: abort
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn abort_reply_resolves_to_execution_abort() {
    let client = connected_client();
    for code in ["interrupted()", "garbled_reply()"] {
        let error = within(client.execute_retval(ExecuteRequest::new(code)))
            .await
            .unwrap_err();
        assert!(
            matches!(error, ClientError::Execution(ExecutionFailure::Abort)),
            "{code}: {error:?}"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host surface
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn install_marks_manager_installed() {
    let manager = BurdockManager::new(connected_client());
    assert!(!manager.is_installed());
    let value = within(manager.install()).await.unwrap();
    assert!(manager.is_installed());
    assert_eq!(value["header"]["msg_type"], json!("execute_result"));
}

#[tokio::test]
async fn data_frame_helpers_decode_results() {
    let manager = BurdockManager::new(connected_client());

    let vars = within(manager.data_frame_variables()).await.unwrap();
    assert_eq!(vars["content"]["data"]["text/plain"], json!("['df', 'sales']"));

    let inputs = within(manager.analyze_data_frame("df")).await.unwrap();
    assert_eq!(inputs.decls_path, "/tmp/df.decls");
    assert_eq!(inputs.dtrace_path, "/tmp/df.dtrace");

    let rejected = manager.analyze_data_frame("df\")").await.unwrap_err();
    assert_eq!(rejected.status_code(), 400);
}

#[tokio::test]
async fn run_waits_for_idle_without_a_result() {
    let client = connected_client();
    let reply = within(client.run(ExecuteRequest::new("x = 1"))).await.unwrap();
    assert_eq!(reply.content_str("status"), Some("ok"));
    assert!(client.iopub().registry().is_empty());
}

#[tokio::test]
async fn request_timeout_releases_waiters() {
    let manager = BurdockManager::new(connected_client()).with_request_timeout(Some(Duration::from_millis(50)));
    let error = manager.execute_for_value("hang()").await.unwrap_err();
    assert!(matches!(error, ManagerError::Timeout(_)));
    assert_eq!(error.status_code(), 504);

    assert!(manager.client().shell().registry().is_empty());
    assert!(manager.client().iopub().registry().is_empty());
}

#[tokio::test]
async fn streamed_request_timeout_releases_stream_waiter() {
    let manager = manager_with_substituted_code("hang()").with_request_timeout(Some(Duration::from_millis(30)));
    let error = manager.streamed_ping().await.unwrap_err();
    assert!(matches!(error, ManagerError::Timeout(_)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.client().iopub().registry().len(), 0);
    assert_eq!(manager.client().shell().registry().len(), 0);
}

#[tokio::test]
async fn concurrent_requests_are_correlated_independently() {
    let client = Arc::new(connected_client());
    let mut tasks = Vec::new();
    for index in 0..16 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let code = if index % 2 == 0 {
                "'po' + 'ng'"
            } else {
                "raise ValueError('boom')"
            };
            (index, client.execute_retval(ExecuteRequest::new(code)).await)
        }));
    }

    for task in tasks {
        let (index, outcome) = within(task).await.expect("task");
        if index % 2 == 0 {
            assert_eq!(outcome.unwrap().plain_text(), Some("'pong'"));
        } else {
            assert!(matches!(
                outcome,
                Err(ClientError::Execution(ExecutionFailure::Error { .. }))
            ));
        }
    }
    assert!(client.shell().registry().is_empty());
    assert!(client.iopub().registry().is_empty());
}

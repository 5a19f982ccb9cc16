use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use denops_protocol::{ErrorPayload, Message, Notification, Request, Response};
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::{Notify, mpsc, oneshot};

use super::*;
use crate::channel::WorkerPort;
use crate::transport::{PipeTransport, encode_frame, read_frame};

/// Peer that speaks raw frames, so tests control exactly what the session sees.
struct RawPeer {
	reader: DuplexStream,
	writer: DuplexStream,
}

impl RawPeer {
	async fn recv(&mut self) -> Message {
		let body = read_frame(&mut self.reader).await.unwrap().unwrap();
		serde_json::from_slice(&body).unwrap()
	}

	async fn recv_request(&mut self) -> Request {
		match self.recv().await {
			Message::Request(request) => request,
			other => panic!("Expected Request, got {other:?}"),
		}
	}

	async fn recv_response(&mut self) -> Response {
		match self.recv().await {
			Message::Response(response) => response,
			other => panic!("Expected Response, got {other:?}"),
		}
	}

	async fn send(&mut self, message: impl Into<Message>) {
		let value = serde_json::to_value(message.into()).unwrap();
		self.writer.write_all(&encode_frame(&value).unwrap()).await.unwrap();
	}

	async fn request(&mut self, id: u32, method: &str, params: Vec<Value>) {
		self.send(Request {
			id,
			method: method.to_string(),
			params,
		})
		.await;
	}
}

fn raw_session(config: SessionConfig) -> (Arc<Session>, RawPeer) {
	let (peer_read, session_write) = duplex(64 * 1024);
	let (session_read, peer_write) = duplex(64 * 1024);

	let (transport, message_rx) = PipeTransport::new(session_write, session_read);
	let session = Arc::new(Session::new(
		transport.into_transport_parts(message_rx),
		config,
	));

	(
		session,
		RawPeer {
			reader: peer_read,
			writer: peer_write,
		},
	)
}

fn error_channel() -> (ErrorCallback, mpsc::UnboundedReceiver<Error>) {
	let (tx, rx) = mpsc::unbounded_channel();
	let callback: ErrorCallback = Arc::new(move |e| {
		let _ = tx.send(e);
	});
	(callback, rx)
}

#[test]
fn test_request_id_increments() {
	let (session, _peer) = raw_session(SessionConfig::default());

	let id1 = session.last_id.fetch_add(1, Ordering::SeqCst);
	let id2 = session.last_id.fetch_add(1, Ordering::SeqCst);
	let id3 = session.last_id.fetch_add(1, Ordering::SeqCst);

	assert_eq!(id1, 0);
	assert_eq!(id2, 1);
	assert_eq!(id3, 2);
}

#[tokio::test]
async fn test_dispatch_response_success() {
	let (session, _peer) = raw_session(SessionConfig::default());

	let (tx, rx) = oneshot::channel();
	session.pending.lock().calls.insert(4, tx);

	session.dispatch(Message::from(Response::success(4, json!({"status": "ok"}))));

	let result = rx.await.unwrap().unwrap();
	assert_eq!(result["status"], "ok");
	assert!(session.pending.lock().calls.is_empty());
}

#[tokio::test]
async fn test_dispatch_response_error() {
	let (session, _peer) = raw_session(SessionConfig::default());

	let (tx, rx) = oneshot::channel();
	session.pending.lock().calls.insert(0, tx);

	session.dispatch(Message::from(Response::failure(
		0,
		ErrorPayload::new("HandlerError", "E492: Not an editor command"),
	)));

	let err = rx.await.unwrap().unwrap_err();
	assert_eq!(err.error_name(), Some("HandlerError"));
	assert!(err.to_string().contains("E492"));
}

#[tokio::test]
async fn test_concurrent_calls_correlate_out_of_order() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.start();

	let caller = Arc::clone(&session);
	let calls = tokio::spawn(async move {
		tokio::join!(
			caller.call("call", vec![json!("a")]),
			caller.call("call", vec![json!("b")]),
			caller.call("call", vec![json!("c")]),
		)
	});

	let mut requests = Vec::new();
	for _ in 0..3 {
		requests.push(peer.recv_request().await);
	}
	for request in requests.iter().rev() {
		let tag = request.params[0].as_str().unwrap();
		peer.send(Response::success(request.id, json!(format!("reply-{tag}"))))
			.await;
	}

	let (a, b, c) = calls.await.unwrap();
	assert_eq!(a.unwrap(), json!("reply-a"));
	assert_eq!(b.unwrap(), json!("reply-b"));
	assert_eq!(c.unwrap(), json!("reply-c"));
}

#[tokio::test]
async fn test_close_interrupts_all_pending_calls() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.start();

	let mut calls = Vec::new();
	for i in 0..5 {
		let caller = Arc::clone(&session);
		calls.push(tokio::spawn(async move {
			caller.call("call", vec![json!(i)]).await
		}));
	}
	for _ in 0..5 {
		peer.recv_request().await;
	}

	session.close();

	for call in calls {
		let err = call.await.unwrap().unwrap_err();
		assert!(err.is_interrupted(), "Expected Interrupted, got: {err:?}");
	}
	session.wait_closed().await.unwrap();
	assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_close_sends_end_of_stream_to_peer() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.start();

	session.notify("invoke", vec![json!("last")]).await.unwrap();
	session.close();
	session.wait_closed().await.unwrap();

	assert!(matches!(peer.recv().await, Message::Notification(_)));
	assert!(read_frame(&mut peer.reader).await.unwrap().is_none());
}

#[tokio::test]
async fn test_calls_after_close_are_interrupted() {
	let (session, _peer) = raw_session(SessionConfig::default());
	session.start();
	session.close();

	let err = session.call("call", vec![]).await.unwrap_err();
	assert!(err.is_interrupted());
	let err = session.notify("call", vec![]).await.unwrap_err();
	assert!(err.is_interrupted());
}

#[tokio::test]
async fn test_close_without_run() {
	let (session, _peer) = raw_session(SessionConfig::default());
	session.close();
	session.wait_closed().await.unwrap();
	assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_retires_request_id() {
	let config = SessionConfig {
		response_timeout: Some(Duration::from_millis(100)),
		..SessionConfig::default()
	};
	let (session, mut peer) = raw_session(config);
	session.start();

	let caller = Arc::clone(&session);
	let slow = tokio::spawn(async move { caller.call("call", vec![json!("sleep")]).await });
	let request = peer.recv_request().await;

	let err = slow.await.unwrap().unwrap_err();
	assert!(err.is_timeout(), "Expected timeout, got: {err:?}");
	assert!(session.pending.lock().calls.is_empty());

	// Late response for the retired id is dropped
	peer.send(Response::success(request.id, json!("late"))).await;

	let caller = Arc::clone(&session);
	let next = tokio::spawn(async move { caller.call("call", vec![json!("next")]).await });
	let request = peer.recv_request().await;
	peer.send(Response::success(request.id, json!("on time"))).await;

	assert_eq!(next.await.unwrap().unwrap(), json!("on time"));
}

#[tokio::test]
async fn test_dropped_call_retires_request_id() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.start();

	let caller = Arc::clone(&session);
	let call = tokio::spawn(async move { caller.call("call", vec![]).await });
	peer.recv_request().await;
	assert_eq!(session.pending.lock().calls.len(), 1);

	call.abort();
	assert!(call.await.unwrap_err().is_cancelled());
	assert!(session.pending.lock().calls.is_empty());
}

#[tokio::test]
async fn test_inbound_request_dispatch() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.set_dispatcher(Dispatcher::new().with("greet", |args: Vec<Value>| async move {
		let name: String = crate::dispatcher::arg(&args, 0)?;
		Ok(json!(format!("Hello, {name}")))
	}));
	session.start();

	peer.request(1, "greet", vec![json!("denops")]).await;
	let response = peer.recv_response().await;

	assert_eq!(response.id, 1);
	assert_eq!(response.into_result().unwrap(), json!("Hello, denops"));
}

#[tokio::test]
async fn test_handler_error_becomes_error_response() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.set_dispatcher(
		Dispatcher::new().with("greet", |_| async { Err(anyhow::anyhow!("greeting failed")) }),
	);
	session.start();

	peer.request(3, "greet", vec![]).await;
	let payload = peer.recv_response().await.into_result().unwrap_err();

	assert_eq!(payload.name, "HandlerError");
	assert_eq!(payload.message, "greeting failed");
	assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_panicking_handler_becomes_error_response() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.set_dispatcher(Dispatcher::new().with("explode", |_| async {
		if true {
			panic!("kaboom");
		}
		Ok(Value::Null)
	}));
	session.start();

	peer.request(8, "explode", vec![]).await;
	let payload = peer.recv_response().await.into_result().unwrap_err();

	assert_eq!(payload.name, "Panic");
	assert_eq!(payload.message, "kaboom");
}

#[tokio::test]
async fn test_unknown_method_response() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.start();

	peer.request(2, "missing", vec![]).await;
	let response = peer.recv_response().await;
	let err = Error::from(response.into_result().unwrap_err());

	assert!(err.is_method_not_found());
	assert!(err.to_string().contains("missing"));
}

#[tokio::test]
async fn test_dispatcher_snapshot_taken_at_dispatch_time() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	let (started_tx, mut started_rx) = mpsc::unbounded_channel::<()>();
	let gate = Arc::new(Notify::new());

	let handler_gate = Arc::clone(&gate);
	session.set_dispatcher(Dispatcher::new().with("slow", move |_| {
		let started_tx = started_tx.clone();
		let gate = Arc::clone(&handler_gate);
		async move {
			let _ = started_tx.send(());
			gate.notified().await;
			Ok(json!("slow done"))
		}
	}));
	session.start();

	peer.request(1, "slow", vec![]).await;
	started_rx.recv().await.unwrap();

	// Replace while request 1 is in flight
	session.set_dispatcher(Dispatcher::new());
	gate.notify_one();

	let response = peer.recv_response().await;
	assert_eq!(response.id, 1);
	assert_eq!(response.into_result().unwrap(), json!("slow done"));

	peer.request(2, "slow", vec![]).await;
	let response = peer.recv_response().await;
	assert_eq!(response.id, 2);
	assert_eq!(response.into_result().unwrap_err().name, "MethodNotFound");
}

#[tokio::test]
async fn test_update_dispatcher_keeps_existing_handlers() {
	let (session, _peer) = raw_session(SessionConfig::default());
	session.set_dispatcher(Dispatcher::new().with("a", |_| async { Ok(Value::Null) }));

	session.update_dispatcher(|d| {
		d.insert("b", |_| async { Ok(Value::Null) });
	});

	let dispatcher = session.dispatcher();
	assert!(dispatcher.contains("a"));
	assert!(dispatcher.contains("b"));
}

#[tokio::test]
async fn test_inbound_requests_do_not_block_each_other() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	let gate = Arc::new(Notify::new());
	let wait_gate = Arc::clone(&gate);
	let release_gate = Arc::clone(&gate);

	session.set_dispatcher(
		Dispatcher::new()
			.with("wait", move |_| {
				let gate = Arc::clone(&wait_gate);
				async move {
					gate.notified().await;
					Ok(json!("released"))
				}
			})
			.with("release", move |_| {
				let gate = Arc::clone(&release_gate);
				async move {
					gate.notify_one();
					Ok(json!("ok"))
				}
			}),
	);
	session.start();

	// An outbound call stays pending the whole time
	let caller = Arc::clone(&session);
	let outbound = tokio::spawn(async move { caller.call("call", vec![json!("pending")]).await });
	let outbound_request = peer.recv_request().await;

	peer.request(10, "wait", vec![]).await;
	peer.request(11, "release", vec![]).await;

	let mut ids = vec![peer.recv_response().await.id, peer.recv_response().await.id];
	ids.sort_unstable();
	assert_eq!(ids, vec![10, 11]);

	peer.send(Response::success(outbound_request.id, json!(1))).await;
	assert_eq!(outbound.await.unwrap().unwrap(), json!(1));
}

#[tokio::test]
async fn test_unknown_notification_is_reported() {
	let (callback, mut errors) = error_channel();
	let config = SessionConfig {
		error_callback: Some(callback),
		..SessionConfig::default()
	};
	let (session, mut peer) = raw_session(config);
	session.start();

	peer.send(Notification {
		method: "nope".to_string(),
		params: vec![],
	})
	.await;

	let err = errors.recv().await.unwrap();
	assert!(err.is_method_not_found());
}

#[tokio::test]
async fn test_failing_notification_handler_is_reported() {
	let (callback, mut errors) = error_channel();
	let config = SessionConfig {
		error_callback: Some(callback),
		..SessionConfig::default()
	};
	let (session, mut peer) = raw_session(config);
	session.set_dispatcher(
		Dispatcher::new().with("onEvent", |_| async { Err(anyhow::anyhow!("handler blew up")) }),
	);
	session.start();

	peer.send(Notification {
		method: "onEvent".to_string(),
		params: vec![],
	})
	.await;

	match errors.recv().await.unwrap() {
		Error::Handler { method, message } => {
			assert_eq!(method, "onEvent");
			assert_eq!(message, "handler blew up");
		}
		other => panic!("Expected Handler error, got {other:?}"),
	}
	assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_notification_precedes_later_call_on_the_wire() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.start();

	let caller = Arc::clone(&session);
	let task = tokio::spawn(async move {
		caller
			.notify("call", vec![json!("denops#api#cmd"), json!("let g:x = 1")])
			.await
			.unwrap();
		caller.call("call", vec![json!("denops#api#eval"), json!("g:x")]).await
	});

	assert!(matches!(peer.recv().await, Message::Notification(_)));
	let request = peer.recv_request().await;
	peer.send(Response::success(request.id, json!(1))).await;

	assert_eq!(task.await.unwrap().unwrap(), json!(1));
}

#[tokio::test]
async fn test_wait_closed_on_peer_end_of_stream() {
	let (session, peer) = raw_session(SessionConfig::default());
	session.start();

	drop(peer);

	session.wait_closed().await.unwrap();
	assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_wait_closed_surfaces_transport_error() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.start();

	peer.writer.write_all(&[0x01]).await.unwrap();
	drop(peer);

	let err = session.wait_closed().await.unwrap_err();
	assert!(err.is_transport(), "Expected transport error, got: {err:?}");
	assert!(err.to_string().contains("length prefix"));
}

#[tokio::test]
async fn test_invalid_message_does_not_close_session() {
	let (session, mut peer) = raw_session(SessionConfig::default());
	session.set_dispatcher(Dispatcher::new().with("ping", |_| async { Ok(json!("pong")) }));
	session.start();

	let bogus = encode_frame(&json!({"not": "a message"})).unwrap();
	peer.writer.write_all(&bogus).await.unwrap();
	peer.request(5, "ping", vec![]).await;

	let response = peer.recv_response().await;
	assert_eq!(response.into_result().unwrap(), json!("pong"));
}

#[tokio::test]
async fn test_run_is_single_use() {
	let (session, _peer) = raw_session(SessionConfig::default());
	session.start();
	while session.io.lock().is_some() {
		tokio::task::yield_now().await;
	}

	// Second run returns straight away
	session.run().await;
	assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_session_pair_over_worker_port() {
	let (worker_port, host_port) = WorkerPort::pair();
	let host = Arc::new(Session::new(
		host_port.into_transport_parts(),
		SessionConfig::default(),
	));
	host.set_dispatcher(Dispatcher::new().with("echo", |args: Vec<Value>| async move {
		Ok(Value::Array(args))
	}));
	host.start();
	let worker = Session::spawn(worker_port.into_transport_parts(), SessionConfig::default());

	let echoed = worker.call("echo", vec![json!(1), json!("two")]).await.unwrap();
	assert_eq!(echoed, json!([1, "two"]));

	host.close();
	worker.wait_closed().await.unwrap();
	host.wait_closed().await.unwrap();
}

//! Plugins compiled into the worker binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use denops::worker::{Catalog, plugin_fn};
use denops::{Denops, Dispatcher, arg};
use serde_json::{Value, json};
use tracing::info;

pub const HELLO: &str = "builtin:hello";
pub const COUNTER: &str = "builtin:counter";

/// Every built-in plugin, keyed by script locator.
pub fn catalog() -> Catalog {
	Catalog::new()
		.with(HELLO, plugin_fn(hello))
		.with(COUNTER, plugin_fn(counter))
}

/// Greets from a `:DenopsHello [name]` command.
async fn hello(denops: Denops) -> anyhow::Result<()> {
	denops.set_dispatcher(
		Dispatcher::new()
			.with("greet", |args: Vec<Value>| async move {
				let name: Option<String> = arg(&args, 0)?;
				let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| "denops".to_string());
				Ok(json!(format!("Hello, {name}!")))
			})
			.with("echo", |args: Vec<Value>| async move { Ok(Value::Array(args)) }),
	);

	let name = denops.name();
	denops
		.cmd(&format!(
			"command! -nargs=? DenopsHello echomsg denops#request('{name}', 'greet', [<q-args>])"
		))
		.await?;
	info!(plugin = name, "hello plugin ready");
	Ok(())
}

/// Keeps a counter the host can bump and read.
async fn counter(denops: Denops) -> anyhow::Result<()> {
	let count = Arc::new(AtomicI64::new(0));
	let bump = Arc::clone(&count);
	let read = Arc::clone(&count);

	denops.set_dispatcher(
		Dispatcher::new()
			.with("increment", move |args: Vec<Value>| {
				let bump = Arc::clone(&bump);
				async move {
					let by = arg::<Option<i64>>(&args, 0)?.unwrap_or(1);
					Ok(json!(bump.fetch_add(by, Ordering::SeqCst) + by))
				}
			})
			.with("get", move |_| {
				let read = Arc::clone(&read);
				async move { Ok(json!(read.load(Ordering::SeqCst))) }
			}),
	);

	let initial: Option<i64> = denops.eval_as("get(g:, 'denops_counter_initial', v:null)").await?;
	if let Some(initial) = initial {
		count.store(initial, Ordering::SeqCst);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use denops::worker::Worker;
	use denops::{API_CMD, API_EVAL};
	use denops_runtime::transport::encode_frame;
	use denops_runtime::{Session, SessionConfig, WorkerPort};
	use tokio::sync::mpsc;

	use super::*;

	/// Starts `script` in a worker and returns the host session plus the
	/// commands the plugin executed.
	fn launch(script: &str, initial: Value) -> (Arc<Session>, mpsc::UnboundedReceiver<String>) {
		let (worker_port, host_port) = WorkerPort::pair();
		let startup = json!({
			"name": "builtin",
			"script": script,
			"meta": {"mode": "release", "host": "vim", "version": "9.1", "platform": "linux"},
		});
		host_port.post_message(encode_frame(&startup).unwrap()).unwrap();

		let (tx, commands) = mpsc::unbounded_channel();
		let host = Arc::new(Session::new(
			host_port.into_transport_parts(),
			SessionConfig::default(),
		));
		host.set_dispatcher(Dispatcher::new().with("call", move |args: Vec<Value>| {
			let tx = tx.clone();
			let initial = initial.clone();
			async move {
				let func: String = arg(&args, 0)?;
				if func == API_CMD {
					let _ = tx.send(arg::<String>(&args, 1)?);
					Ok(Value::Null)
				} else if func == API_EVAL {
					Ok(initial)
				} else {
					Err(anyhow::anyhow!("E117: Unknown function: {func}"))
				}
			}
		}));
		host.start();

		tokio::spawn(Worker::new(Arc::new(catalog())).serve_port(worker_port));
		(host, commands)
	}

	async fn wait_for_post(commands: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
		let mut seen = Vec::new();
		loop {
			let cmd = commands.recv().await.unwrap();
			let done = cmd.contains("DenopsPluginPost");
			seen.push(cmd);
			if done {
				return seen;
			}
		}
	}

	#[test]
	fn test_catalog_lists_builtins() {
		let catalog = catalog();
		let scripts: Vec<&str> = catalog.scripts().into_iter().map(|s| s.as_str()).collect();
		assert_eq!(scripts, vec![COUNTER, HELLO]);
	}

	#[tokio::test]
	async fn test_hello_registers_command_and_greets() {
		let (host, mut commands) = launch(HELLO, Value::Null);

		let seen = wait_for_post(&mut commands).await;
		assert!(seen.iter().any(|cmd| cmd.starts_with("command! -nargs=? DenopsHello")));

		let greeting = host.call("greet", vec![json!("vim")]).await.unwrap();
		assert_eq!(greeting, json!("Hello, vim!"));
		let greeting = host.call("greet", vec![json!("")]).await.unwrap();
		assert_eq!(greeting, json!("Hello, denops!"));
		let echoed = host.call("echo", vec![json!(1), json!([2])]).await.unwrap();
		assert_eq!(echoed, json!([1, [2]]));

		host.close();
	}

	#[tokio::test]
	async fn test_counter_starts_from_host_value() {
		let (host, mut commands) = launch(COUNTER, json!(10));
		wait_for_post(&mut commands).await;

		assert_eq!(host.call("increment", vec![]).await.unwrap(), json!(11));
		assert_eq!(host.call("increment", vec![json!(5)]).await.unwrap(), json!(16));
		assert_eq!(host.call("get", vec![]).await.unwrap(), json!(16));

		host.close();
	}
}

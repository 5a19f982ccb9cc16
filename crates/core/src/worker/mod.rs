//! Worker bootstrap - drives one plugin instance from startup to teardown.
//!
//! # Lifecycle
//!
//! 1. Read the startup frame `{name, script, meta}` and validate it. Nothing
//!    else happens if it is malformed.
//! 2. Start loading the script in its own task while the session comes up.
//! 3. Emit `User DenopsPluginPre:<name>`.
//! 4. Await the load and run the plugin's entry point.
//! 5. Emit `User DenopsPluginPost:<name>` if the entry point succeeded.
//! 6. Keep serving inbound calls until the host closes the session.
//! 7. Close the session and release the channel.
//!
//! A [`Worker`] is consumed by the run, so each plugin instance needs a new one.

mod plugin;
mod startup;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use denops_runtime::transport::read_frame;
use futures_util::FutureExt;
use denops_runtime::{
	DEFAULT_RESPONSE_TIMEOUT, ErrorCallback, PipeTransport, Session, SessionConfig, TransportParts,
	WorkerPort,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use self::plugin::{Catalog, FnPlugin, Plugin, PluginLoader, plugin_fn};
pub use self::startup::{Script, StartupArgs};
use crate::denops::Denops;
use crate::error::{Error, Result};

/// Where a worker is in its single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
	Created,
	/// Script load and session setup in flight.
	Connecting,
	Ready,
	/// The plugin's entry point is running.
	Running,
	/// Serving inbound calls until the host closes the session.
	Draining,
	Terminated,
}

/// Receives errors raised where no caller is waiting.
pub trait ErrorSink: Send + Sync {
	fn report(&self, plugin: &str, error: denops_runtime::Error);
}

/// Reports through `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
	fn report(&self, plugin: &str, error: denops_runtime::Error) {
		error!(plugin, error = %error, "Unexpected error occurred in plugin");
	}
}

/// Worker settings.
#[derive(Clone)]
pub struct WorkerConfig {
	/// How long outbound calls wait for the host. `None` waits forever.
	pub response_timeout: Option<Duration>,
	pub sink: Arc<dyn ErrorSink>,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
			sink: Arc::new(LogSink),
		}
	}
}

impl fmt::Debug for WorkerConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WorkerConfig")
			.field("response_timeout", &self.response_timeout)
			.finish_non_exhaustive()
	}
}

/// Runs one plugin instance.
pub struct Worker {
	loader: Arc<dyn PluginLoader>,
	config: WorkerConfig,
	phase: watch::Sender<WorkerPhase>,
}

impl Worker {
	pub fn new(loader: Arc<dyn PluginLoader>) -> Self {
		Self::with_config(loader, WorkerConfig::default())
	}

	pub fn with_config(loader: Arc<dyn PluginLoader>, config: WorkerConfig) -> Self {
		let (phase, _) = watch::channel(WorkerPhase::Created);
		Self {
			loader,
			config,
			phase,
		}
	}

	pub fn phase(&self) -> WorkerPhase {
		*self.phase.borrow()
	}

	/// Observes phase changes. Subscribe before starting the worker.
	pub fn subscribe(&self) -> watch::Receiver<WorkerPhase> {
		self.phase.subscribe()
	}

	/// Serves a plugin over a worker message channel.
	pub async fn serve_port(self, port: WorkerPort) -> Result<()> {
		let (reader, writer) = port.split();
		self.serve(reader, writer).await
	}

	/// Serves a plugin over the process's stdin and stdout.
	pub async fn serve_stdio(self) -> Result<()> {
		self.serve(tokio::io::stdin(), tokio::io::stdout()).await
	}

	/// Reads the startup frame from `reader`, then runs the plugin over the
	/// rest of the stream.
	///
	/// The startup frame is consumed here and never reaches the session, so a
	/// repeated startup message is just an unparsable frame to it.
	///
	/// # Errors
	///
	/// - [`Error::Validation`] if the startup frame is missing or malformed
	/// - see [`run`](Self::run) for the rest
	pub async fn serve<R, W>(self, mut reader: R, writer: W) -> Result<()>
	where
		R: AsyncRead + Unpin + Send + 'static,
		W: AsyncWrite + Unpin + Send + 'static,
	{
		let body = read_frame(&mut reader)
			.await?
			.ok_or_else(|| Error::Validation("channel closed before the startup message".to_string()))?;
		let startup = StartupArgs::from_slice(&body)?;

		let (transport, message_rx) = PipeTransport::new(writer, reader);
		self.run(startup, transport.into_transport_parts(message_rx)).await
	}

	/// Runs a validated plugin over an established transport.
	///
	/// # Errors
	///
	/// - [`Error::Load`] if the script could not be loaded
	/// - [`Error::Plugin`] if the entry point failed or panicked; `Post` is not emitted
	/// - [`Error::Runtime`] if the session ended with a transport error
	pub async fn run(self, startup: StartupArgs, parts: TransportParts) -> Result<()> {
		let StartupArgs { name, script, meta } = startup;
		info!(plugin = %name, script = %script, host = %meta.host, "Starting plugin");

		self.enter(WorkerPhase::Connecting);
		let loader = Arc::clone(&self.loader);
		let load_script = script.clone();
		let importer = tokio::spawn(async move { loader.load(&load_script).await });

		let session = Arc::new(Session::new(
			parts,
			SessionConfig {
				response_timeout: self.config.response_timeout,
				error_callback: Some(self.error_callback(&name)),
			},
		));
		let io_task = session.start();
		let denops = Denops::new(name.as_str(), meta, Arc::clone(&session));
		self.enter(WorkerPhase::Ready);

		emit(&denops, "DenopsPluginPre").await;

		let mut outcome = self.run_plugin(&denops, &script, importer).await;
		if outcome.is_ok() {
			emit(&denops, "DenopsPluginPost").await;

			self.enter(WorkerPhase::Draining);
			outcome = session.wait_closed().await.map_err(Error::from);
		}
		if let Err(e) = &outcome {
			debug!(plugin = %name, error = %e, "Worker ending with an error");
		}

		terminate(&session, io_task).await;
		self.enter(WorkerPhase::Terminated);
		outcome
	}

	async fn run_plugin(
		&self,
		denops: &Denops,
		script: &Script,
		importer: JoinHandle<anyhow::Result<Arc<dyn Plugin>>>,
	) -> Result<()> {
		let plugin = match importer.await {
			Ok(Ok(plugin)) => plugin,
			Ok(Err(source)) => {
				return Err(Error::Load {
					script: script.to_string(),
					source,
				});
			}
			Err(e) => {
				return Err(Error::Load {
					script: script.to_string(),
					source: anyhow::anyhow!("loader task failed: {e}"),
				});
			}
		};

		self.enter(WorkerPhase::Running);
		let outcome = match AssertUnwindSafe(plugin.main(denops.clone()))
			.catch_unwind()
			.await
		{
			Ok(result) => result,
			Err(panic) => Err(anyhow::anyhow!("entry point panicked: {}", panic_message(&*panic))),
		};
		outcome.map_err(|source| Error::Plugin {
			name: denops.name().to_string(),
			source,
		})
	}

	fn enter(&self, phase: WorkerPhase) {
		debug!(?phase, "Worker phase");
		self.phase.send_replace(phase);
	}

	/// Session error callback. Interruptions at teardown are expected and dropped.
	fn error_callback(&self, name: &str) -> ErrorCallback {
		let sink = Arc::clone(&self.config.sink);
		let name = name.to_string();
		Arc::new(move |error| {
			if error.is_interrupted() {
				return;
			}
			sink.report(&name, error);
		})
	}
}

impl fmt::Debug for Worker {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Worker")
			.field("phase", &self.phase())
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

/// Fires a `User` autocmd on the host. Failure never aborts the worker.
async fn emit(denops: &Denops, event: &str) {
	let name = denops.name();
	let cmd = format!("doautocmd <nomodeline> User {event}:{name}");
	match denops.cmd(&cmd).await {
		Ok(()) => debug!(plugin = name, event, "Emitted lifecycle event"),
		Err(e) if e.is_interrupted() => {
			debug!(plugin = name, event, "Session closed before lifecycle event was sent");
		}
		Err(e) => warn!(plugin = name, error = %e, "Failed to emit {event}:{name}"),
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	panic
		.downcast_ref::<&str>()
		.map(|s| (*s).to_string())
		.or_else(|| panic.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "unknown panic".to_string())
}

async fn terminate(session: &Session, io_task: JoinHandle<()>) {
	session.close();
	if let Err(e) = io_task.await {
		error!(error = %e, "Session task failed");
	}
}

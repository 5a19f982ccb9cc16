//! [`Denops`] facade handed to plugin code.

use std::fmt;
use std::sync::Arc;

use denops_runtime::{Dispatcher, Session};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::meta::Meta;

/// Variables expanded into the host's local namespace (`l:`) while a command
/// or expression runs.
pub type Context = Map<String, Value>;

/// Host function that executes a command under a context.
pub const API_CMD: &str = "denops#api#cmd";
/// Host function that evaluates an expression under a context.
pub const API_EVAL: &str = "denops#api#eval";

/// Method kind for calling a host function.
const KIND_CALL: &str = "call";
/// Method kind for calling into another plugin through the host.
const KIND_DISPATCH: &str = "dispatch";

/// A plugin's view of the host.
///
/// Every method maps to exactly one session operation, so a `Denops` can be
/// cloned freely and used from concurrent tasks.
///
/// # Example
///
/// ```ignore
/// async fn main(denops: Denops) -> anyhow::Result<()> {
///     denops.set_dispatcher(Dispatcher::new().with("greet", |args| async move {
///         let name: String = denops::arg(&args, 0)?;
///         Ok(json!(format!("Hello, {name}")))
///     }));
///     denops.cmd("echomsg 'ready'").await?;
///     let lines: i64 = denops.eval_as("line('$')").await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Denops {
	name: Arc<str>,
	meta: Arc<Meta>,
	session: Arc<Session>,
}

impl Denops {
	pub fn new(name: impl Into<Arc<str>>, meta: Meta, session: Arc<Session>) -> Self {
		Self {
			name: name.into(),
			meta: Arc::new(meta),
			session,
		}
	}

	/// The plugin's registration name.
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn meta(&self) -> &Meta {
		&self.meta
	}

	/// The session this facade is bound to.
	pub fn session(&self) -> &Arc<Session> {
		&self.session
	}

	/// Handlers consulted for inbound calls addressed to this plugin.
	pub fn dispatcher(&self) -> Arc<Dispatcher> {
		self.session.dispatcher()
	}

	/// Replaces the handler table. Calls already being handled are unaffected.
	pub fn set_dispatcher(&self, dispatcher: Dispatcher) {
		self.session.set_dispatcher(dispatcher);
	}

	/// Adds or removes handlers without dropping the others.
	pub fn update_dispatcher(&self, edit: impl FnOnce(&mut Dispatcher)) {
		self.session.update_dispatcher(edit);
	}

	/// Calls a host function and returns its result.
	pub async fn call(&self, func: &str, args: Vec<Value>) -> Result<Value> {
		let params = prepend([Value::from(func)], args);
		Ok(self.session.call(KIND_CALL, params).await?)
	}

	/// Calls a host function and decodes its result.
	pub async fn call_as<T: DeserializeOwned>(&self, func: &str, args: Vec<Value>) -> Result<T> {
		let value = self.call(func, args).await?;
		Ok(serde_json::from_value(value)?)
	}

	/// Executes a host command.
	///
	/// Returns once the request has been written; the command's side effects
	/// are not awaited.
	pub async fn cmd(&self, cmd: &str) -> Result<()> {
		self.cmd_with(cmd, Context::new()).await
	}

	/// Executes a host command with `ctx` expanded into `l:`.
	pub async fn cmd_with(&self, cmd: &str, ctx: Context) -> Result<()> {
		let params = vec![Value::from(API_CMD), Value::from(cmd), Value::Object(ctx)];
		Ok(self.session.notify(KIND_CALL, params).await?)
	}

	/// Evaluates a host expression.
	pub async fn eval(&self, expr: &str) -> Result<Value> {
		self.eval_with(expr, Context::new()).await
	}

	/// Evaluates a host expression with `ctx` expanded into `l:`.
	pub async fn eval_with(&self, expr: &str, ctx: Context) -> Result<Value> {
		let params = vec![Value::from(API_EVAL), Value::from(expr), Value::Object(ctx)];
		Ok(self.session.call(KIND_CALL, params).await?)
	}

	/// Evaluates a host expression and decodes the result.
	pub async fn eval_as<T: DeserializeOwned>(&self, expr: &str) -> Result<T> {
		let value = self.eval(expr).await?;
		Ok(serde_json::from_value(value)?)
	}

	/// Calls `func` in the dispatcher of the plugin registered as `plugin`.
	/// The host routes the call.
	pub async fn dispatch(&self, plugin: &str, func: &str, args: Vec<Value>) -> Result<Value> {
		let params = prepend([Value::from(plugin), Value::from(func)], args);
		Ok(self.session.call(KIND_DISPATCH, params).await?)
	}
}

impl fmt::Debug for Denops {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Denops")
			.field("name", &self.name)
			.field("meta", &self.meta)
			.finish_non_exhaustive()
	}
}

fn prepend<const N: usize>(head: [Value; N], args: Vec<Value>) -> Vec<Value> {
	let mut params = Vec::with_capacity(N + args.len());
	params.extend(head);
	params.extend(args);
	params
}

//! Dispatcher - method name to handler table for inbound calls.
//!
//! Every handler has one shape: it takes the positional arguments of the
//! inbound message and resolves to a JSON value or an error. The session
//! looks a handler up at the moment a message arrives, so a dispatcher
//! replaced later only affects messages that have not been dispatched yet.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Future returned by a [`Handler`].
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// A callable registered under a method name.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>);

impl Handler {
	pub fn new<F, Fut>(f: F) -> Self
	where
		F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
	{
		Self(Arc::new(move |args| f(args).boxed()))
	}

	pub fn call(&self, args: Vec<Value>) -> HandlerFuture {
		(self.0)(args)
	}
}

impl fmt::Debug for Handler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Handler")
	}
}

/// Method table consulted by the session for inbound requests and
/// notifications.
#[derive(Clone, Default)]
pub struct Dispatcher {
	handlers: HashMap<String, Handler>,
}

impl Dispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a handler, builder style.
	pub fn with<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
	{
		self.insert(name, f);
		self
	}

	/// Registers a handler, returning the one it replaced.
	pub fn insert<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Option<Handler>
	where
		F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
	{
		self.handlers.insert(name.into(), Handler::new(f))
	}

	pub fn remove(&mut self, name: &str) -> Option<Handler> {
		self.handlers.remove(name)
	}

	pub fn get(&self, name: &str) -> Option<&Handler> {
		self.handlers.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.handlers.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}

	/// Registered method names, in no particular order.
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.handlers.keys().map(String::as_str)
	}
}

impl fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut names: Vec<&str> = self.names().collect();
		names.sort_unstable();
		f.debug_struct("Dispatcher").field("methods", &names).finish()
	}
}

/// Decodes the positional argument at `index`.
///
/// A missing argument decodes as `null`, so `Option<T>` parameters may be
/// omitted by the caller.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> anyhow::Result<T> {
	let value = args.get(index).cloned().unwrap_or(Value::Null);
	serde_json::from_value(value).with_context(|| format!("invalid argument at position {index}"))
}

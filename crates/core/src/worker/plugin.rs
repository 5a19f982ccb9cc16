use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::startup::Script;
use crate::denops::Denops;

/// A plugin's entry point.
#[async_trait]
pub trait Plugin: Send + Sync {
	/// Called once with the plugin's facade. Inbound calls keep being served
	/// after this returns, until the host closes the session.
	async fn main(&self, denops: Denops) -> anyhow::Result<()>;
}

/// Resolves a script locator to plugin code.
#[async_trait]
pub trait PluginLoader: Send + Sync {
	async fn load(&self, script: &Script) -> anyhow::Result<Arc<dyn Plugin>>;
}

/// [`Plugin`] backed by an async closure.
pub struct FnPlugin<F>(F);

#[async_trait]
impl<F, Fut> Plugin for FnPlugin<F>
where
	F: Fn(Denops) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
	async fn main(&self, denops: Denops) -> anyhow::Result<()> {
		(self.0)(denops).await
	}
}

/// Wraps an async closure as a plugin.
pub fn plugin_fn<F, Fut>(f: F) -> Arc<dyn Plugin>
where
	F: Fn(Denops) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
	Arc::new(FnPlugin(f))
}

/// Statically linked plugins keyed by script locator.
#[derive(Clone, Default)]
pub struct Catalog {
	plugins: HashMap<Script, Arc<dyn Plugin>>,
}

impl Catalog {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a plugin, builder style.
	pub fn with(mut self, script: impl Into<Script>, plugin: Arc<dyn Plugin>) -> Self {
		self.insert(script, plugin);
		self
	}

	pub fn insert(&mut self, script: impl Into<Script>, plugin: Arc<dyn Plugin>) {
		self.plugins.insert(script.into(), plugin);
	}

	pub fn contains(&self, script: &Script) -> bool {
		self.plugins.contains_key(script)
	}

	/// Registered locators, sorted.
	pub fn scripts(&self) -> Vec<&Script> {
		let mut scripts: Vec<&Script> = self.plugins.keys().collect();
		scripts.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
		scripts
	}
}

impl fmt::Debug for Catalog {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Catalog")
			.field("scripts", &self.scripts())
			.finish()
	}
}

#[async_trait]
impl PluginLoader for Catalog {
	async fn load(&self, script: &Script) -> anyhow::Result<Arc<dyn Plugin>> {
		self.plugins
			.get(script)
			.cloned()
			.ok_or_else(|| anyhow::anyhow!("no plugin is registered for '{script}'"))
	}
}

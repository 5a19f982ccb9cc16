//! Declarative registration of tests that run against a real Vim or Neovim.
//!
//! Plugin authors declare scenarios up front; an external runner later takes
//! the list, starts the editors, and hands each test a live [`Denops`].
//! Running the editors is not done here.
//!
//! The runner needs these environment variables, otherwise the affected
//! cases are reported as ignored:
//!
//! - `DENOPS_PATH`: path to `denops.vim`, added to the editor's `runtimepath`
//! - `DENOPS_TEST_VIM`: Vim executable
//! - `DENOPS_TEST_NVIM`: Neovim executable
//!
//! # Example
//!
//! ```ignore
//! use denops::testing::{self, TestDefinition, TestMode};
//!
//! async fn echo_works(denops: Denops) -> anyhow::Result<()> {
//!     denops.cmd("echo 'hi'").await?;
//!     Ok(())
//! }
//!
//! testing::register(("echo works", echo_works));
//! testing::register((TestMode::Nvim, "nvim only", echo_works));
//! testing::register(TestDefinition::new(TestMode::Vim, "vim only", |denops| async move {
//!     let lines: i64 = denops.eval_as("line('$')").await?;
//!     anyhow::ensure!(lines == 1);
//!     Ok(())
//! }));
//! ```

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::denops::Denops;
use crate::meta::Host;

pub const DENOPS_PATH: &str = "DENOPS_PATH";
pub const DENOPS_TEST_VIM: &str = "DENOPS_TEST_VIM";
pub const DENOPS_TEST_NVIM: &str = "DENOPS_TEST_NVIM";

/// Body of a registered test.
pub type TestFn = Arc<dyn Fn(Denops) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Which editors a test runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestMode {
	Vim,
	Nvim,
	#[default]
	Both,
}

impl TestMode {
	pub fn hosts(self) -> &'static [Host] {
		match self {
			TestMode::Vim => &[Host::Vim],
			TestMode::Nvim => &[Host::Nvim],
			TestMode::Both => &[Host::Vim, Host::Nvim],
		}
	}
}

impl FromStr for TestMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"vim" => Ok(TestMode::Vim),
			"nvim" => Ok(TestMode::Nvim),
			"both" => Ok(TestMode::Both),
			other => Err(format!("unknown test mode '{other}' (expected vim, nvim or both)")),
		}
	}
}

/// Canonical form of a registered test.
#[derive(Clone)]
pub struct TestDefinition {
	pub mode: TestMode,
	pub name: String,
	pub func: TestFn,
}

impl TestDefinition {
	pub fn new<F, Fut>(mode: TestMode, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(Denops) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
	{
		Self {
			mode,
			name: name.into(),
			func: Arc::new(move |denops| f(denops).boxed()),
		}
	}
}

impl fmt::Debug for TestDefinition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TestDefinition")
			.field("mode", &self.mode)
			.field("name", &self.name)
			.finish_non_exhaustive()
	}
}

impl<N, F, Fut> From<(TestMode, N, F)> for TestDefinition
where
	N: Into<String>,
	F: Fn(Denops) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
	fn from((mode, name, f): (TestMode, N, F)) -> Self {
		Self::new(mode, name, f)
	}
}

impl<N, F, Fut> From<(N, F)> for TestDefinition
where
	N: Into<String>,
	F: Fn(Denops) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
	fn from((name, f): (N, F)) -> Self {
		Self::new(TestMode::Both, name, f)
	}
}

/// Collected test declarations, populated first and drained once.
#[derive(Default)]
pub struct TestRegistry {
	tests: Mutex<Vec<TestDefinition>>,
}

impl TestRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, test: impl Into<TestDefinition>) {
		let test = test.into();
		tracing::debug!(name = %test.name, mode = ?test.mode, "Registered test");
		self.tests.lock().push(test);
	}

	pub fn len(&self) -> usize {
		self.tests.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.tests.lock().is_empty()
	}

	/// Removes and returns every declaration, in registration order.
	pub fn take(&self) -> Vec<TestDefinition> {
		std::mem::take(&mut *self.tests.lock())
	}
}

impl fmt::Debug for TestRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TestRegistry")
			.field("tests", &self.len())
			.finish()
	}
}

static REGISTRY: LazyLock<TestRegistry> = LazyLock::new(TestRegistry::new);

/// Declares a test in the process-wide list.
pub fn register(test: impl Into<TestDefinition>) {
	REGISTRY.register(test);
}

/// Drains the process-wide list. Later calls return only tests registered since.
pub fn take_registered() -> Vec<TestDefinition> {
	REGISTRY.take()
}

impl Denops {
	/// Declares a test. Same as [`register`].
	pub fn test(test: impl Into<TestDefinition>) {
		register(test);
	}
}

/// Editors available to the test runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestEnvironment {
	pub denops_path: Option<PathBuf>,
	pub vim: Option<PathBuf>,
	pub nvim: Option<PathBuf>,
}

impl TestEnvironment {
	pub fn from_env() -> Self {
		Self::from_lookup(|key| std::env::var_os(key))
	}

	/// Builds the environment from an arbitrary variable source. Empty values
	/// count as unset.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
		let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
		Self {
			denops_path: path(DENOPS_PATH),
			vim: path(DENOPS_TEST_VIM),
			nvim: path(DENOPS_TEST_NVIM),
		}
	}

	/// Executable for `host`, if tests against it can run at all.
	pub fn executable(&self, host: Host) -> Option<&Path> {
		self.denops_path.as_ref()?;
		match host {
			Host::Vim => self.vim.as_deref(),
			Host::Nvim => self.nvim.as_deref(),
		}
	}

	/// Expands declarations into one case per editor.
	pub fn plan(&self, tests: &[TestDefinition]) -> Vec<TestCase> {
		tests
			.iter()
			.flat_map(|test| {
				test.mode.hosts().iter().map(move |&host| TestCase {
					name: format!("{} ({host})", test.name),
					host,
					ignored: self.executable(host).is_none(),
					func: Arc::clone(&test.func),
				})
			})
			.collect()
	}
}

/// One test against one editor.
#[derive(Clone)]
pub struct TestCase {
	pub name: String,
	pub host: Host,
	/// True when the editor or `denops.vim` is not available.
	pub ignored: bool,
	pub func: TestFn,
}

impl fmt::Debug for TestCase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TestCase")
			.field("name", &self.name)
			.field("host", &self.host)
			.field("ignored", &self.ignored)
			.finish_non_exhaustive()
	}
}

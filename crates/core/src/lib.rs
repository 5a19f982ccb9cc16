//! denops: write Vim/Neovim plugins in Rust
//!
//! A plugin runs in its own worker, talking to the editor over one RPC
//! session. This crate provides what plugin code sees and the runner that
//! hosts it:
//!
//! - [`Denops`]: the facade (`call`, `cmd`, `eval`, `dispatch`, dispatcher)
//! - [`worker::Worker`]: validates startup, loads the plugin, emits the
//!   `DenopsPluginPre`/`DenopsPluginPost` events, and drains the session
//! - [`testing`]: declarations for tests against real editors
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use denops::worker::{Catalog, Worker, plugin_fn};
//! use denops::{Denops, Dispatcher, arg};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let catalog = Catalog::new().with("builtin:hello", plugin_fn(|denops: Denops| async move {
//!         denops.set_dispatcher(Dispatcher::new().with("greet", |args| async move {
//!             let name: String = arg(&args, 0)?;
//!             Ok(json!(format!("Hello, {name}")))
//!         }));
//!         Ok(())
//!     }));
//!     Worker::new(Arc::new(catalog)).serve_stdio().await?;
//!     Ok(())
//! }
//! ```

pub mod denops;
pub mod error;
pub mod logging;
pub mod meta;
pub mod testing;
pub mod worker;

pub use denops::{API_CMD, API_EVAL, Context, Denops};
pub use denops_runtime::{Dispatcher, Handler, Session, SessionConfig, arg};
pub use error::{Error, Result};
pub use meta::{Host, Meta, Mode, Platform};

use std::sync::Arc;

use clap::Parser;
use denops::logging;
use denops::worker::Worker;
use denops_worker::{cli::Cli, plugins};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let catalog = plugins::catalog();
	if cli.list_plugins {
		for script in catalog.scripts() {
			println!("{script}");
		}
		return;
	}

	let worker = Worker::with_config(Arc::new(catalog), cli.worker_config());
	if let Err(err) = worker.serve_stdio().await {
		eprintln!("denops-worker: {err}");
		std::process::exit(1);
	}
}

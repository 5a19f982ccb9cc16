use std::time::Duration;

use clap::Parser;
use denops::worker::WorkerConfig;

#[derive(Parser, Debug)]
#[command(name = "denops-worker")]
#[command(about = "Run a built-in denops plugin over stdin/stdout")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Milliseconds an outbound call waits for the host (0 waits forever)
	#[arg(long, value_name = "MS", default_value_t = 30_000)]
	pub response_timeout: u64,

	/// Print the script locators this worker can load, then exit
	#[arg(long)]
	pub list_plugins: bool,
}

impl Cli {
	pub fn worker_config(&self) -> WorkerConfig {
		WorkerConfig {
			response_timeout: match self.response_timeout {
				0 => None,
				ms => Some(Duration::from_millis(ms)),
			},
			..WorkerConfig::default()
		}
	}
}

//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "cclaunch")]
#[command(about = "Build, start and supervise chaincodes")]
pub struct Cli {
	/// Verbose logging
	#[arg(short, long, global = true)]
	pub verbose: bool,

	/// Subcommand to execute.
	#[command(subcommand)]
	pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
	/// Launch a chaincode and supervise it until it exits or Ctrl-C
	Launch {
		/// Launcher configuration file
		#[arg(short, long, value_name = "FILE")]
		config: PathBuf,

		/// Chaincode to launch, as named in the configuration
		chaincode: String,
	},
	/// Load and validate a configuration file, then list its chaincodes
	CheckConfig {
		/// Launcher configuration file
		#[arg(short, long, value_name = "FILE")]
		config: PathBuf,
	},
}

#[cfg(test)]
mod tests;

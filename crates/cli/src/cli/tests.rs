use clap::CommandFactory;

use super::*;

#[test]
fn cli_definition_is_consistent() {
	Cli::command().debug_assert();
}

#[test]
fn parse_launch() {
	let cli = Cli::try_parse_from(["cclaunch", "launch", "--config", "peer.toml", "asset:1.0"]).unwrap();
	assert!(!cli.verbose);
	match cli.command {
		Command::Launch { config, chaincode } => {
			assert_eq!(config, PathBuf::from("peer.toml"));
			assert_eq!(chaincode, "asset:1.0");
		}
		other => panic!("unexpected command {other:?}"),
	}
}

#[test]
fn verbose_is_accepted_after_the_subcommand() {
	let cli = Cli::try_parse_from(["cclaunch", "check-config", "-c", "peer.toml", "--verbose"]).unwrap();
	assert!(cli.verbose);
	assert!(matches!(cli.command, Command::CheckConfig { .. }));
}

#[test]
fn launch_requires_a_chaincode() {
	assert!(Cli::try_parse_from(["cclaunch", "launch", "--config", "peer.toml"]).is_err());
}

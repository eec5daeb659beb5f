//! CLI argument parsing and config checking.

use clap::Parser;
use meshd::cli::commands::{describe_config, run_check_config};
use meshd::cli::{CheckConfigArgs, Cli, Commands};
use meshd::config::Config;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn start_defaults_to_bundled_config() {
    let cli = Cli::try_parse_from(["meshd", "start"]).unwrap();
    match cli.command {
        Commands::Start(args) => assert_eq!(args.config, PathBuf::from("config/meshd.toml")),
        Commands::CheckConfig(_) => panic!("expected start"),
    }
}

#[test]
fn check_config_accepts_path() {
    let cli =
        Cli::try_parse_from(["meshd", "check-config", "--config", "/etc/meshd.toml"]).unwrap();
    match cli.command {
        Commands::CheckConfig(args) => {
            assert_eq!(args.config, PathBuf::from("/etc/meshd.toml"));
        }
        Commands::Start(_) => panic!("expected check-config"),
    }
    assert!(Cli::try_parse_from(["meshd", "publish"]).is_err());
}

#[test]
fn bundled_config_is_valid() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/meshd.toml");
    let config = Config::load(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.dispatch.retry_delay_ms, 10_000);
    assert_eq!(config.dispatch.backpressure_capacity, 1000);
}

#[test]
fn check_config_reports_effective_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("meshd.toml");
    fs::write(
        &path,
        concat!(
            "[dispatch]\nretry_delay_ms = 500\nmax_retries = 5\n\n",
            "[telemetry]\nadmin_bind = \"127.0.0.1:9100\"\n",
        ),
    )
    .unwrap();
    run_check_config(CheckConfigArgs {
        config: path.clone(),
    })
    .unwrap();

    let described = describe_config(&Config::load(&path).unwrap());
    assert!(described.contains("dispatch.retry_delay_ms = 500\n"));
    assert!(described.contains("dispatch.max_retries = 5\n"));
    assert!(described.contains("dispatch.backpressure_capacity = 1000\n"));
    assert!(described.contains("telemetry.admin_bind = 127.0.0.1:9100\n"));
}

#[test]
fn check_config_rejects_invalid_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("meshd.toml");
    fs::write(&path, "[dispatch]\nbackpressure_capacity = 0\n").unwrap();
    let err = run_check_config(CheckConfigArgs { config: path }).unwrap_err();
    assert!(format!("{err:#}").contains("backpressure_capacity"));

    let missing = run_check_config(CheckConfigArgs {
        config: dir.path().join("absent.toml"),
    });
    assert!(missing.is_err());
}

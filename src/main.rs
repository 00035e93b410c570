mod archetype;
mod channels;
mod coaching;
mod config;
mod context;
mod core;
mod error;
mod flows;
mod gamify;
mod metrics;
mod orchestrator;
mod providers;
mod rules;
mod state;
mod traits;
mod types;

#[cfg(test)]
mod integration_tests;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("coachd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("coachd {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: coachd [OPTIONS]\n");
                println!("Options:");
                println!("  -c, --config <PATH>  Path to config.toml (default: ./config.toml)");
                println!("  -h, --help           Print help");
                println!("  -V, --version        Print version");
                return Ok(());
            }
            _ => {}
        }
    }

    let config_path = config_path_from_args(&args);
    let config = config::AppConfig::load(&config_path)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(crate::core::run(config))
}

fn config_path_from_args(args: &[String]) -> PathBuf {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "-c" || arg == "--config" {
            if let Some(path) = iter.next() {
                return PathBuf::from(path);
            }
        }
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_defaults_to_cwd() {
        let args = vec!["coachd".to_string()];
        assert_eq!(config_path_from_args(&args), PathBuf::from("config.toml"));
    }

    #[test]
    fn config_path_flag_is_honored() {
        let args = vec![
            "coachd".to_string(),
            "--config".to_string(),
            "/etc/coachd/config.toml".to_string(),
        ];
        assert_eq!(
            config_path_from_args(&args),
            PathBuf::from("/etc/coachd/config.toml")
        );
    }
}

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn verbosity_filter(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

/// `RUST_LOG` wins over `-v`, which wins over `fallback`.
fn init_tracing(verbosity: u8, fallback: &str, json: bool) {
    let level = verbosity_filter(verbosity).unwrap_or(fallback);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // The server config decides the default log level
        Command::Serve(args) => {
            let source = args
                .config
                .clone()
                .unwrap_or_else(kestrel_config::config_path)
                .display()
                .to_string();
            let cfg = kestrel_config::load_config(args.config.as_deref())
                .map_err(|e| CliError::config(&e, source.clone()))?;
            init_tracing(
                cli.global.verbose,
                &cfg.logging.level,
                cli.global.log_json || cfg.logging.json,
            );
            commands::serve::handle(&cfg, &source).await
        }

        Command::Bind9(args) => {
            init_tracing(cli.global.verbose, "warn", cli.global.log_json);
            commands::bind9::handle(args)
        }

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "kestrel", &mut std::io::stdout());
            Ok(())
        }
    }
}

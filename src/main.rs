use anyhow::Result;
use clap::Parser;
use symreg_cli::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if is_silent {
                    "symreg_cli=error".into()
                } else {
                    "symreg_cli=info".into()
                }
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli::run(args).await {
        // Explicit exit so lingering blocking tasks cannot hold the process open
        Ok(()) => std::process::exit(0),
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}

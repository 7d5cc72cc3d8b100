use clap::Parser;
use clipcut_lib::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let fallback = if cli.verbose { "clipcut=debug" } else { "clipcut=info" };

    // Initialize tracing with environment filter support
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();

    clipcut_lib::run(cli)
}

use analytics_cli::{run_cli, CliError};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analytics_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init();

    if let Err(e) = run_cli().await {
        error!(error = %e, "command failed");

        let exit_code = match e {
            CliError::Configuration(_) => 1,
            CliError::Server(_) => 2,
            CliError::Startup(_) => 3,
            CliError::Store(_) => 4,
            CliError::Queue(_) => 5,
        };

        std::process::exit(exit_code);
    }
}

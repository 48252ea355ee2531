use clap::Parser;
use tracing_subscriber::EnvFilter;

use provider_gateway::cli::{Cli, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    provider_gateway::bootstrap::load_gateway_env();
    init_tracing();
    run(Cli::parse()).await
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("provider_gateway=info"));
    let json = std::env::var("GATEWAY_LOG_FORMAT")
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

use clap::Parser;
use cohere_adapter::config::config_search_paths;
use cohere_adapter::{build_router, AppState, ProxyConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "cohere-adapter",
    about = "OpenAI-compatible chat completions endpoint backed by the Cohere chat API",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream Cohere API base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Cohere model used when a request names none (overrides config)
    #[arg(long)]
    default_model: Option<String>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cohere_adapter=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.upstream.base_url = base_url;
    }
    if let Some(model) = cli.default_model {
        config.defaults.model = model;
    }
    config.validate()?;

    info!("cohere-adapter v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {}", config.chat_url());
    info!("  Model:     {} (default)", config.defaults.model);
    info!("  Aliases:   {} mapped", config.models.len());
    info!("  Port:      {}", config.port);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.upstream.timeout_secs))
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState { config, client });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OpenAI base URL for clients: http://localhost:{}/v1", port);

    axum::serve(listener, app).await?;

    Ok(())
}

use std::{net::SocketAddr, path::Path};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use junction::{
    adapters::{RouterService, apply_middleware, build_router},
    config::{ServerConfigValidator, loader::load_config, models::ServerConfig},
    tracing_setup,
    utils::Shutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve_command(&config).await,
        None => serve_command(&args.config).await,
    }
}

async fn serve_command(config_path: &str) -> Result<()> {
    let config: ServerConfig = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_tracing_with_config(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    tracing::info!("Loaded configuration from {config_path}");

    ServerConfigValidator::validate(&config).context("Configuration is invalid")?;

    let router = build_router(&config.router).context("Failed to build router")?;
    tracing::info!(
        "Router built with {} top-level layer(s) and {} route(s)",
        router.len(),
        config.router.route_count()
    );

    let app = apply_middleware(
        axum::Router::new().fallback_service(RouterService::new(router)),
        &config.middleware,
    );

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Junction server starting on {}", addr);

    let shutdown = Shutdown::new();
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.listen_for_signals().await })
    };

    let graceful = {
        let shutdown = shutdown.clone();
        async move {
            let reason = shutdown.wait().await;
            tracing::info!("Shutdown signal received: {:?}", reason);
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await
        .context("Server error")?;

    signals.abort();
    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Load, validate and build the router described by a config file
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Checking {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ {config_path}: no such file");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Parsed");
            config
        }
        Err(e) => {
            eprintln!("❌ Could not parse {config_path}:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = ServerConfigValidator::validate(&config) {
        eprintln!("❌ {config_path} has problems:");
        eprintln!("{e}");
        println!();
        println!("💡 Hints:");
        println!("   • Ensure every route and mount path starts with '/'");
        println!("   • Check parentheses in ':param(expr)' patterns are balanced");
        println!("   • listen_addr must be IP:PORT, e.g. '127.0.0.1:3000'");
        std::process::exit(1);
    }

    if let Err(e) = build_router(&config.router) {
        eprintln!("❌ Router construction failed: {e}");
        std::process::exit(1);
    }

    println!("✅ Router tree builds");
    println!();
    println!("📋 Summary:");
    println!("   • listen_addr: {}", config.listen_addr);
    println!("   • routes (all routers): {}", config.router.route_count());
    println!("   • top-level mounts: {}", config.router.mounts.len());
    println!("   • case_sensitive: {}", config.router.case_sensitive);
    println!("   • strict: {}", config.router.strict);
    println!();
    println!("🎉 Ready to serve");
    Ok(())
}

/// Write a sample config file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ {config_path} already exists, refusing to overwrite");
        std::process::exit(1);
    }

    let default_config = r#"# Junction server configuration

listen_addr = "127.0.0.1:8080"

[logging]
level = "info"
json = false

[middleware]
request_id = true
request_timing = true
security_headers = true

[router]
case_sensitive = false
strict = false
log_errors = true

[[router.routes]]
path = "/"
methods = ["GET"]
body = "Hello from junction\n"

[[router.routes]]
path = "/hello/:name"
methods = ["GET"]
body = "Hello, {name}!\n"

# Nested router mounted under /api
[[router.mounts]]
path = "/api"

[[router.mounts.router.routes]]
path = "/status"
methods = ["GET"]
json = { status = "ok" }
"#;

    tokio::fs::write(path, default_config)
        .await
        .with_context(|| format!("Failed to write {config_path}"))?;
    println!("✅ Wrote sample router config to {config_path}");
    println!("   Run 'junction serve --config {config_path}' to start the server");
    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use creds::config::Config;
use creds::issuer::bootstrap_admin;
use creds::models::NewUser;
use creds::store::{MemoryStore, PgStore, Store};
use creds::{api, cli, config, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OTLP export is opt-in through OTEL_EXPORTER_OTLP_ENDPOINT.
    use opentelemetry::KeyValue;

    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "creds"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json_logs = std::env::var("LOG_FORMAT").map_or(false, |v| v == "json");
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "creds=debug,tower_http=debug".into()),
        ))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with(telemetry_layer)
        .init();

    // Parse first so --help and --version work without a configured environment.
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, in_memory }) => {
            run_server(config::load()?, port, in_memory).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&config::load_database()?).await?;
            db.migrate().await?;
            tracing::info!("Migrations complete");
            Ok(())
        }
        Some(cli::Commands::Bootstrap { name, username }) => {
            let cfg = config::load()?;
            let db = PgStore::connect(&cfg.database).await?;
            db.migrate().await?;
            handle_bootstrap(&db, &cfg, name, username).await
        }
        None => run_server(config::load()?, None, false).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: Option<u16>, in_memory: bool) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = if in_memory {
        tracing::warn!("Using in-memory store; all data is lost on exit");
        let store = MemoryStore::new();
        handle_bootstrap(&store, &cfg, "Admin".into(), "admin".into()).await?;
        Arc::new(store)
    } else {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(&cfg.database).await?;

        tracing::info!("Running migrations...");
        db.migrate().await?;
        Arc::new(db)
    };

    let state = Arc::new(AppState::new(store, &cfg.admin_scope));
    let app = api::router(state, cfg.request_timeout());

    let port = port.unwrap_or(cfg.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("creds listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_bootstrap(
    store: &dyn Store,
    cfg: &Config,
    name: String,
    username: String,
) -> anyhow::Result<()> {
    let user = NewUser { name, username };
    let (user_id, token_id) = bootstrap_admin(store, &user, &cfg.admin_scope).await?;
    println!(
        "Admin user created:\n  ID:    {}\n  Scope: {}\n  Use:   Authorization: Bearer {}",
        user_id, cfg.admin_scope, token_id
    );
    Ok(())
}

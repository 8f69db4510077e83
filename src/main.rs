use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method};
use portal_workflow::{
    config::Config,
    db::memory_db::{InMemoryRequestRepository, InMemoryTemplateStore},
    engine::{EngineServices, SystemClock, WorkflowEngine},
    models::template::TemplateDraft,
    routes,
    services::{
        directory::{Directory, DirectorySeed, InMemoryDirectory},
        notifications::{ChannelNotifier, MessagingNotifier, SmtpConfig, SmtpMailer},
        observability::TracingSink,
        profile::InMemoryProfileService,
    },
    worker::start_background_workers,
    AppState,
};
use reqwest::Client;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;

    let directory: Arc<dyn Directory> = Arc::new(load_directory(&config).await?);

    let email = match SmtpConfig::from_env().context("invalid SMTP configuration")? {
        Some(smtp) => {
            info!(host = %smtp.host, port = smtp.port, tls = %smtp.tls_mode, "email channel enabled");
            Some(SmtpMailer::new(&smtp).context("failed to initialize mailer")?)
        }
        None => {
            warn!("SMTP_HOST not set, email notifications are disabled");
            None
        }
    };
    let messaging = MessagingNotifier::new(
        Client::new(),
        config.telegram.clone(),
        config.sms_webhook_url.clone(),
        config.push_webhook_url.clone(),
    );

    let engine = Arc::new(WorkflowEngine::new(EngineServices {
        templates: Arc::new(InMemoryTemplateStore::new()),
        requests: Arc::new(InMemoryRequestRepository::new()),
        directory: directory.clone(),
        profiles: Arc::new(InMemoryProfileService::new()),
        notifier: Arc::new(ChannelNotifier::new(email, messaging)),
        observability: Arc::new(TracingSink),
        clock: Arc::new(SystemClock),
        notification_retry: config.notification_retry,
    }));

    if let Some(path) = &config.seed_templates_path {
        seed_templates(&engine, path).await?;
    }

    let cors = match &config.frontend_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("invalid FRONTEND_ORIGIN `{origin}`"))?,
            )
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH])
            .allow_headers([CONTENT_TYPE]),
        None => CorsLayer::permissive(),
    };

    let state = AppState {
        engine: engine.clone(),
        directory,
        config: Arc::new(config),
    };
    let scheduler = start_background_workers(state.clone());

    let addr = state.config.bind_addr;
    let app = routes::app(state).layer(cors);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    scheduler.abort();
    let outcomes = engine.drain_notifications().await;
    let failed = outcomes.iter().filter(|o| !o.delivered()).count();
    info!(drained = outcomes.len(), failed, "notifications drained, shutting down");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn load_directory(config: &Config) -> anyhow::Result<InMemoryDirectory> {
    let Some(path) = &config.seed_directory_path else {
        warn!("SEED_DIRECTORY_PATH not set, starting with an empty directory");
        return Ok(InMemoryDirectory::new());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let seed: DirectorySeed = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    info!(
        users = seed.users.len(),
        groups = seed.groups.len(),
        "directory seeded"
    );
    Ok(InMemoryDirectory::from_seed(seed))
}

async fn seed_templates(engine: &WorkflowEngine, path: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let drafts: Vec<TemplateDraft> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    for draft in drafts {
        let name = draft.name.clone();
        engine
            .save_template(draft)
            .await
            .with_context(|| format!("seed template `{name}` was rejected"))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

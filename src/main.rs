mod admin;
mod analytics;
mod api;
mod availability;
mod booking;
mod checkout;
mod content;
mod error;
mod extract;
mod mail;
mod pages;
mod state;
mod store;

use anyhow::Context;
use axum::{Router, http::StatusCode, routing::get};
use clap::Parser;
use state::{AdminCredentials, AppState};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "campervan-site", about = "Campervan rental site and admin API")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Directory holding config.json, messages.json and stats.json.
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory holding the HTML pages and static assets.
    #[arg(long, env = "STATIC_ROOT", default_value = "static")]
    static_root: PathBuf,

    /// Public origin for payment return URLs (e.g. "https://example.com").
    /// If unset, the request's Host header is used.
    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Admin username. If unset, admin login is disabled.
    #[arg(long, env = "ADMIN_USERNAME")]
    admin_username: Option<String>,

    /// Admin password. If unset, admin login is disabled.
    #[arg(long, env = "ADMIN_PASSWORD")]
    admin_password: Option<String>,

    /// IP geolocation service queried as `{base}/{ip}/json/`.
    #[arg(long, env = "GEO_API_BASE", default_value = "https://ipapi.co")]
    geo_api_base: String,

    /// Payment provider API origin.
    #[arg(long, env = "STRIPE_API_BASE", default_value = "https://api.stripe.com")]
    stripe_api_base: String,

    /// Name used to sign customer emails.
    #[arg(long, env = "SITE_NAME", default_value = "Campervan Rentals")]
    site_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campervan_site=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load .env file if present (silently ignored if absent).
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tokio::fs::create_dir_all(&args.data_dir)
        .await
        .with_context(|| format!("Cannot create data dir {}", args.data_dir.display()))?;
    tracing::info!("data dir: {}", args.data_dir.display());

    tracing::info!("static root: {}", args.static_root.display());
    if !args.static_root.exists() {
        tracing::warn!("static root does not exist yet: {}", args.static_root.display());
    }

    // Resolve symlinks in the static root for containment checks at request
    // time. Falls back to the lexical path if the directory doesn't exist yet.
    let canonical_root = tokio::fs::canonicalize(&args.static_root)
        .await
        .unwrap_or_else(|_| args.static_root.clone());

    let admin = match (args.admin_username, args.admin_password) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => {
            tracing::info!("Admin login enabled");
            Some(AdminCredentials::new(u, p))
        }
        _ => {
            tracing::info!("Admin login disabled (ADMIN_USERNAME/ADMIN_PASSWORD not set)");
            None
        }
    };

    let http = reqwest::Client::builder()
        .user_agent(concat!("campervan-site/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Cannot build HTTP client")?;

    let state = AppState {
        stores: store::Stores::open(&args.data_dir),
        images: content::ImageStore::new(&args.static_root),
        static_root: args.static_root,
        canonical_root,
        admin,
        mailer: Arc::new(mail::SmtpMailer),
        geo: analytics::GeoLocator::new(http.clone(), args.geo_api_base),
        checkout: checkout::Checkout::new(http.clone(), args.stripe_api_base),
        http,
        base_url: args.base_url,
        site_name: args.site_name,
    };

    let app = build_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Cannot bind to {addr}"))?;

    tracing::info!("Listening on http://{addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    // CatchPanicLayer is outermost so it recovers from panics anywhere in the stack.
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .merge(pages::router())
        .merge(api::router())
        .merge(admin::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result { tracing::error!("ctrl-c error: {}", e); }
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM");
                    }
                }
            }
            Err(e) => {
                tracing::error!("Cannot register SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
    tracing::info!("Shutting down gracefully");
}

mod api;
mod config;
mod db;
mod error;
mod money;
mod oauth;
mod session;
#[cfg(test)]
mod test;

#[macro_use]
extern crate tracing as logger;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use common_x::restful::axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use tower_http::{cors::CorsLayer, services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{api::ApiDoc, config::AppConfig, oauth::GoogleAuth, session::SessionService};

#[derive(Clone)]
struct AppView {
    db: Pool<Postgres>,
    session: SessionService,
    google: GoogleAuth,
    config: Arc<AppConfig>,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version)]
pub struct Args {
    #[clap(short('c'), long = "config", default_value = "config.toml")]
    config_path: String,
    #[clap(short, long, default_value = "false")]
    apidoc: bool,
}

fn router(state: AppView, apidoc: bool) -> Router {
    let router = if apidoc {
        Router::new().merge(Scalar::with_url("/apidoc", ApiDoc::openapi()))
    } else {
        Router::new()
    };
    router
        .route("/", get(api::auth::home))
        .route("/login", get(api::auth::login))
        .route("/auth/google", get(api::auth::login))
        .route("/auth/callback", get(api::auth::callback))
        .route("/logout", post(api::auth::logout))
        .route("/dashboard", get(api::auth::dashboard))
        .route(
            "/api/v1/user",
            get(api::user::profile).post(api::user::update),
        )
        .route("/api/v1/jars", get(api::jar::list))
        .route("/jars", get(api::jar::list).post(api::jar::create))
        .route("/jars/join", post(api::jar::join))
        .route("/jars/lookup", get(api::jar::lookup))
        .route("/jars/{id}", get(api::jar::detail))
        .route("/jars/{id}/members", get(api::jar::members))
        .route("/jars/{id}/balances", get(api::jar::balances))
        .route(
            "/jars/{id}/offense_types",
            get(api::offense_type::list).post(api::offense_type::create),
        )
        .route("/offense_types/{id}", post(api::offense_type::update))
        .route(
            "/offense_types/{id}/active",
            post(api::offense_type::set_active),
        )
        .route(
            "/jars/{id}/offenses",
            get(api::offense::list).post(api::offense::report),
        )
        .route("/jars/{id}/report", post(api::offense::report))
        .route("/offenses/{id}", get(api::offense::detail))
        .route("/offenses/{id}/status", post(api::offense::update_status))
        .route("/offenses/{id}/pay", post(api::payment::pay))
        .route("/offenses/{id}/payments", get(api::payment::list))
        .route("/payments/{id}/verify", post(api::payment::verify))
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .nest_service("/uploads", ServeDir::new(&state.config.uploads_dir))
        .layer((TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ),))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config: AppConfig = common_x::configure::file_config(&args.config_path)?;

    common_x::log::init_log(config.log_config.clone());
    info!(
        "config: port={} environment={} public_url={}",
        config.port, config.environment, config.public_url
    );
    if config.is_production() && config.session_secret == AppConfig::default().session_secret {
        warn!("session_secret is the built-in default; set a real secret");
    }
    if config.google_client_id.is_empty() {
        warn!("google_client_id is empty; login will fail");
    }

    let db = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.db_url)
        .await?;

    // initialize the database
    db::init(&db).await?;

    let state = AppView {
        db,
        session: SessionService::new(&config.session_secret),
        google: GoogleAuth::new(
            &config.google_client_id,
            &config.google_client_secret,
            &config.oauth_redirect_url(),
        ),
        config: Arc::new(config.clone()),
    };

    common_x::restful::http_serve(config.port, router(state, args.apidoc))
        .await
        .map_err(|e| eyre!("{e}"))
}

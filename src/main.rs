use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use mongodb::bson::doc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod database;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, MpesaConfig, SmsConfig};
use services::mpesa_service::MpesaService;
use services::sms_service::SmsService;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let db = match database::connection::connect(&config).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("❌ Failed to connect to MongoDB: {}", e);
            std::process::exit(1);
        }
    };

    let app_state = initialize_app_state(db, config).await;
    let app = build_router(app_state.clone());
    start_server(app, app_state).await;
}

async fn initialize_app_state(db: mongodb::Database, config: AppConfig) -> AppState {
    let mut app_state = AppState::new(db, config);

    // M-Pesa is optional at runtime: without credentials the service boots
    // with the mpesa rail disabled.
    match MpesaConfig::from_env() {
        Ok(mpesa_config) => match MpesaService::new(mpesa_config) {
            Ok(service) => {
                let service = Arc::new(service);
                match service.get_access_token().await {
                    Ok(_) => {
                        tracing::info!("✅ M-Pesa service initialized and ready");
                        app_state = app_state.with_mpesa(service);
                    }
                    Err(e) => {
                        tracing::error!("❌ Failed to get M-Pesa access token: {}", e);
                        tracing::warn!("M-Pesa payments will be disabled");
                    }
                }
            }
            Err(e) => {
                tracing::error!("❌ Failed to create M-Pesa service: {}", e);
                tracing::warn!("M-Pesa payments will be disabled");
            }
        },
        Err(e) => {
            tracing::warn!("⚠️ {}; M-Pesa payments will be disabled", e);
        }
    }

    let sms_config = SmsConfig::from_env();
    if sms_config.is_configured() {
        tracing::info!("✅ SMS service initialized");
        app_state = app_state.with_sms(Arc::new(SmsService::new(sms_config)));
    } else {
        tracing::warn!("⚠️ SMS_API_KEY not set; SMS notifications will be disabled");
    }

    app_state
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/users", routes::users::routes(&app_state))
        .nest("/bookings", routes::bookings::routes(&app_state))
        .nest("/payments", routes::payments::routes(&app_state))
        .nest("/admin", routes::admin::routes(&app_state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(app_state)
}

async fn start_server(app: Router, app_state: AppState) {
    let addr = SocketAddr::from((
        app_state
            .config
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| [0, 0, 0, 0].into()),
        app_state.config.port,
    ));

    tracing::info!("🚀 Server starting on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let shutdown = app_state.shutdown.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
    {
        tracing::error!("Server error: {}", e);
    }
}

// Ctrl-C drains the server and cancels every in-flight payment status watch.
async fn shutdown_signal(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}

async fn root_handler() -> &'static str {
    "🚛 UsafiLink Booking API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    let db_status = match state.db.run_command(doc! { "ping": 1 }).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "mpesa": state.mpesa.is_some(),
        "sms": state.sms.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

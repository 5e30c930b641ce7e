use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::Message;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use waypoint::config::LogFormat;
use waypoint::middleware::request_id::current_request_id;
use waypoint::middleware::{
    ApiKeyVerifier, BearerAuth, RateLimit, cors_with_origins, logger, recovery, request_id,
};
use waypoint::websocket::WebSocketSession;
use waypoint::{App, AppError, Config, metrics, server, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Logging isn't configured yet.
            eprintln!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    init_tracing(&config);

    info!("Starting waypoint v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        rate_limit = config.rate_limit_requests,
        auth = config.auth_enabled(),
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    let shutdown = CancellationToken::new();
    let app = Arc::new(App::new());

    // =========================================================================
    // Global middleware
    // =========================================================================
    app.use_middleware(recovery());
    app.use_middleware(logger());
    app.use_middleware(cors_with_origins(config.cors_allowed_origins.clone()));

    if config.rate_limiting_enabled() {
        let limit = RateLimit::with_trusted_proxies(
            config.rate_limit_requests,
            config.rate_limit_window,
            &config.trusted_proxies,
        )
        .map_err(|e| {
            error!("Invalid rate limit configuration: {e}");
            exitcode::CONFIG
        })?;
        limit.spawn_reaper(shutdown.clone());
        app.use_middleware(limit.middleware());
    }

    app.use_middleware(request_id());

    if config.auth_enabled() {
        let verifier = Arc::new(ApiKeyVerifier::new(config.auth_tokens.clone()));
        let auth = BearerAuth::new(verifier)
            .with_bypass_paths(config.auth_bypass_paths.clone())
            .with_trusted_proxies(&config.trusted_proxies);
        auth.spawn_reaper(shutdown.clone());
        app.use_middleware(auth.required());
    }

    register_routes(&app);

    if let Some(dir) = &config.static_dir {
        info!(dir = %dir.display(), "Serving static files under /static");
        app.serve_static("/static", dir.clone());
    }

    // =========================================================================
    // Serve
    // =========================================================================
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    for (method, pattern) in app.routes() {
        info!("  {:<7} {pattern}", method.as_str());
    }
    for pattern in app.websocket_routes() {
        info!("  {:<7} {pattern}", "WS");
    }

    utils::cancel_on_signal(shutdown.clone());

    server::serve(app, listener, &config, shutdown.clone())
        .await
        .map_err(|e| {
            error!("Server error: {e}");
            exitcode::SOFTWARE
        })?;

    // Stops the reapers if the server exited on its own.
    shutdown.cancel();

    info!("Server shutdown complete");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct NewUser {
    name: String,
    email: String,
}

fn register_routes(app: &App) {
    app.get("/", |ctx| {
        ctx.json(
            StatusCode::OK,
            &json!({
                "message": "Welcome to waypoint!",
                "version": env!("CARGO_PKG_VERSION"),
                "features": [
                    "Ordered routing",
                    "Built-in middleware",
                    "Rate limiting",
                    "CORS support",
                    "WebSocket routes",
                    "Graceful shutdown",
                ],
            }),
        )
    });

    app.get("/health", |ctx| {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        ctx.json(
            StatusCode::OK,
            &json!({ "status": "healthy", "timestamp": timestamp }),
        )
    });

    app.get("/users/:id", |ctx| {
        let id = ctx.param("id").unwrap_or_default().to_string();
        if !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Validation("id must be numeric".to_string()));
        }
        ctx.json(
            StatusCode::OK,
            &json!({
                "user_id": id,
                "name": "John Doe",
                "email": "john@example.com",
            }),
        )
    });

    app.post("/users", |ctx| {
        let user: NewUser = ctx.bind_json()?;
        if user.name.trim().is_empty() || !user.email.contains('@') {
            return Err(AppError::Validation(
                "name must be non-empty and email must contain '@'".to_string(),
            ));
        }
        ctx.json(
            StatusCode::CREATED,
            &json!({
                "message": "User created successfully",
                "id": "12345",
                "name": user.name,
                "email": user.email,
            }),
        )
    });

    app.get("/request-info", |ctx| {
        let body = json!({
            "request_id": current_request_id(ctx),
            "method": ctx.method().as_str(),
            "path": ctx.path(),
            "query": ctx.queries(),
        });
        ctx.json(StatusCode::OK, &body)
    });

    app.websocket("/ws/echo", |mut session: WebSocketSession| async move {
        while let Some(Ok(message)) = session.recv().await {
            match message {
                Message::Text(_) | Message::Binary(_) => {
                    if session.send(message).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });
}

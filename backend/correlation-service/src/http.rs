//! Health, readiness and metrics endpoints
use actix_web::dev::Server;
use actix_web::{web, App, HttpResponse, HttpServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::metrics;

/// Readiness flag, set once the consumer is running and cleared on shutdown
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

async fn ready(state: web::Data<HealthState>) -> HttpResponse {
    if state.is_ready() {
        HttpResponse::Ok().body("READY")
    } else {
        HttpResponse::ServiceUnavailable().body("NOT READY")
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/ready", web::get().to(ready))
        .route("/metrics", web::get().to(metrics::serve_metrics));
}

/// Bind the server. Signals are handled by the service, so the caller stops
/// it through the returned server's handle.
pub fn build_server(port: u16, state: Arc<HealthState>) -> std::io::Result<Server> {
    let data = web::Data::from(state);

    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
        .workers(1)
        .disable_signals()
        .bind(("0.0.0.0", port))?
        .run();

    Ok(server)
}

//! HTTP server for faceattend

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::attendance::AttendanceService;
use crate::clock::Clock;
use crate::recognition::{EmbeddingProvider, EnrollmentService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub clock: Arc<dyn Clock>,
    pub attendance: Arc<AttendanceService>,
    pub enrollment: Arc<EnrollmentService>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let attendance = Arc::new(AttendanceService::new(
            db.clone(),
            provider.clone(),
            clock.clone(),
        ));
        let enrollment = Arc::new(EnrollmentService::new(db.clone(), provider));

        Self {
            db,
            clock,
            attendance,
            enrollment,
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(crate::api::health::routes())
        .merge(crate::api::attendance::routes())
        .merge(crate::api::sessions::routes())
        .merge(crate::api::students::routes())
        .merge(crate::api::courses::routes())
        .merge(crate::api::timetable::routes())
        .merge(crate::api::settings::routes())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("HTTP server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

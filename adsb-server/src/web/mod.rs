//! Web server — axum REST API plus the dump1090-compatible JSON snapshots.
//!
//! Shared state wraps a single SQLite connection behind a mutex (rusqlite
//! connections aren't `Sync`); each handler locks it for the duration of one
//! query. An optional live tracker lets position/aircraft endpoints answer
//! from in-memory state instead of the database when the server is running
//! against a real feed.

use std::sync::{Arc, Mutex, RwLock};

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use adsb_core::tracker::Tracker;

use crate::db::Database;

pub mod ingest;
pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub db: Mutex<Database>,
    pub tracker: Option<Arc<RwLock<Tracker>>>,
    pub geofences: RwLock<Vec<GeofenceEntry>>,
    pub geofence_next_id: RwLock<u64>,
    pub ref_lat: Option<f64>,
    pub ref_lon: Option<f64>,
    pub started_at: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GeofenceEntry {
    pub id: u64,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_nm: f64,
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // dump1090-compatible JSON snapshots
        .route("/data.json", axum::routing::get(routes::data_json))
        .route(
            "/data/aircraft.json",
            axum::routing::get(routes::data_aircraft_json),
        )
        .route(
            "/data/receiver.json",
            axum::routing::get(routes::data_receiver_json),
        )
        // REST surface
        .route("/api/aircraft", axum::routing::get(routes::api_aircraft))
        .route(
            "/api/aircraft/:icao",
            axum::routing::get(routes::api_aircraft_detail),
        )
        .route("/api/positions", axum::routing::get(routes::api_positions))
        .route("/api/trails", axum::routing::get(routes::api_trails))
        .route("/api/events", axum::routing::get(routes::api_events))
        .route("/api/stats", axum::routing::get(routes::api_stats))
        .route("/api/query", axum::routing::get(routes::api_query))
        .route("/api/heatmap", axum::routing::get(routes::api_heatmap))
        .route(
            "/api/positions/all",
            axum::routing::get(routes::api_positions_all),
        )
        .route(
            "/api/geofences",
            axum::routing::get(routes::api_geofences_list)
                .post(routes::api_geofences_add),
        )
        .route(
            "/api/geofences/:id",
            axum::routing::delete(routes::api_geofences_delete),
        )
        // Multi-receiver ingest
        .route(
            "/api/v1/frames",
            axum::routing::post(ingest::api_ingest_frames),
        )
        .route(
            "/api/v1/heartbeat",
            axum::routing::post(ingest::api_heartbeat),
        )
        .route(
            "/api/v1/receivers",
            axum::routing::get(ingest::api_receivers),
        )
        .with_state(state)
        .layer(cors)
}

/// Start the web server. Blocks until the listener is closed.
pub async fn serve(
    db_path: &str,
    host: &str,
    port: u16,
    tracker: Option<Arc<RwLock<Tracker>>>,
    ref_lat: Option<f64>,
    ref_lon: Option<f64>,
) -> std::io::Result<()> {
    let db = Database::open(db_path).expect("open database");
    let state = Arc::new(AppState {
        db: Mutex::new(db),
        tracker,
        geofences: RwLock::new(Vec::new()),
        geofence_next_id: RwLock::new(1),
        ref_lat,
        ref_lon,
        started_at: now(),
    });

    let app = build_router(state);
    let addr = format!("{host}:{port}");
    tracing::info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

fn now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

// handlers/public/system.rs - GET / and GET /health

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::database::DatabaseManager;

pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Attendance API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "endpoints": {
                "health": "/health (public)",
                "login": "/api/auth/login (public)",
                "auth": "/api/auth/* (protected)",
                "sessions": "/api/sessions/* (protected)",
                "liveness": "/api/liveness/* (protected)",
                "attendance": "/api/attendance/* (protected)",
                "leaves": "/api/leaves/* (protected)",
                "zones": "/api/zones/* (staff)",
                "students": "/api/students/* (student)",
                "admin": "/api/admin/* (staff)",
                "reports": "/api/reports/* (staff)",
                "events": "/api/events (protected, server-sent events)",
                "hod": "/api/hod/* (hod)",
                "superadmin": "/api/superadmin/* (superadmin)",
            }
        }
    }))
}

pub async fn health() -> impl IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "database_error": e.to_string()
                    }
                })),
            )
        }
    }
}

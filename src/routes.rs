use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, Request},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::config;
use crate::handlers::{elevated, protected, public};
use crate::middleware::{jwt_auth_middleware, rate_limit_middleware, RateLimiter};

pub fn app() -> Router {
    let api = &config().api;

    let protected_api = Router::new()
        .merge(auth_routes())
        .merge(session_routes())
        .merge(attendance_routes())
        .merge(leave_routes())
        .merge(zone_routes())
        .merge(student_routes())
        .merge(admin_routes())
        .merge(report_routes())
        .merge(hod_routes())
        .merge(superadmin_routes())
        .route("/api/liveness/challenge", post(protected::liveness::challenge_post))
        .route("/api/events", get(protected::events::events_get))
        .route_layer(middleware::from_fn(jwt_auth_middleware))
        .route_layer(middleware::from_fn_with_state(api_limiter(), rate_limit_middleware));

    Router::new()
        // Public
        .route("/", get(public::system::root))
        .route("/health", get(public::system::health))
        .merge(auth_public_routes())
        // Protected API
        .merge(protected_api)
        // Global middleware
        .layer(DefaultBodyLimit::max(api.max_request_size_bytes))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

/// Request span without the query string; `/api/events` carries its JWT there.
fn request_span<B>(request: &Request<B>) -> tracing::Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
    )
}

fn api_limiter() -> Arc<RateLimiter> {
    let api = &config().api;
    RateLimiter::new(api.rate_limit_requests, Duration::from_secs(api.rate_limit_window_secs))
        .trusted_hops(api.trusted_proxy_hops)
        .message("Too many requests from this IP, please try again later")
        .shared()
}

fn cors_layer() -> CorsLayer {
    let origins = &config().security.cors_origins;
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(allowed)
}

fn auth_public_routes() -> Router {
    let api = &config().api;
    let limiter = RateLimiter::new(
        api.login_rate_limit_requests,
        Duration::from_secs(api.login_rate_limit_window_secs),
    )
    .trusted_hops(api.trusted_proxy_hops)
    .message("Too many login attempts, please try again after 15 minutes")
    .shared();

    Router::new()
        .route("/api/auth/login", post(public::auth::login))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
}

fn auth_routes() -> Router {
    use protected::auth;

    Router::new()
        .route("/api/auth/profile", get(auth::profile_get).put(auth::profile_put))
        .route("/api/auth/password", put(auth::password_put))
}

fn session_routes() -> Router {
    use protected::{qr, sessions};

    Router::new()
        .route("/api/sessions", post(sessions::session_post))
        .route("/api/sessions/active", get(sessions::active_get))
        .route("/api/sessions/my", get(sessions::my_get))
        .route("/api/sessions/my/active", get(sessions::my_active_get))
        .route("/api/sessions/my/reports", get(sessions::my_reports_get))
        .route("/api/sessions/:id/close", put(sessions::close_put))
        // QR check-in
        .route("/api/sessions/qr/verify", post(qr::verify_post))
        .route("/api/sessions/:id/qr/generate", post(qr::generate_post))
        .route("/api/sessions/:id/qr/status", get(qr::status_get))
        .route("/api/sessions/:id/qr/toggle", put(qr::toggle_put))
}

fn attendance_routes() -> Router {
    use protected::attendance;

    Router::new()
        .route("/api/attendance/mark", post(attendance::mark_post))
        .route("/api/attendance/manual", post(attendance::manual_post))
        .route("/api/attendance/update-status", put(attendance::update_status_put))
        .route("/api/attendance/my", get(attendance::my_get))
        .route("/api/attendance/students", get(attendance::students_get))
        .route("/api/attendance/report", get(attendance::report_get))
        .route("/api/attendance/class/students", get(attendance::class_students_get))
        .route("/api/attendance/class/status", get(attendance::class_status_get))
        .route("/api/attendance/class/mark", post(attendance::class_mark_post))
        .route("/api/attendance/class/filters", get(attendance::class_filters_get))
        .route("/api/attendance/fa/absentees", get(attendance::fa_absentees_get))
        .route("/api/attendance/period-wise", get(attendance::period_wise_get))
}

fn leave_routes() -> Router {
    use protected::leaves;

    Router::new()
        .route("/api/leaves", post(leaves::leave_post))
        .route("/api/leaves/my", get(leaves::my_leaves))
        .route("/api/leaves/pending", get(leaves::pending))
        .route("/api/leaves/approved", get(leaves::approved))
        .route("/api/leaves/rejected", get(leaves::rejected))
        .route("/api/leaves/:id", put(leaves::leave_put))
}

fn zone_routes() -> Router {
    use protected::zones;

    Router::new()
        .route("/api/zones", get(zones::zones_get).post(zones::zones_post))
        .route("/api/zones/:id", delete(zones::zone_delete))
}

fn student_routes() -> Router {
    use protected::students;

    Router::new()
        .route("/api/students/profile", get(students::profile_get).put(students::profile_put))
        .route("/api/students/complete-profile", put(students::complete_profile_put))
        .route("/api/students/update-photo", put(students::update_photo_put))
}

fn admin_routes() -> Router {
    use protected::admin;

    Router::new()
        .route("/api/admin/students", get(admin::students_get).post(admin::students_post))
        .route("/api/admin/students/search", get(admin::search_get))
        .route("/api/admin/students/promote", post(admin::promote_post))
        .route("/api/admin/students/photo-permission", put(admin::photo_permission_all_put))
        .route(
            "/api/admin/students/:id",
            get(admin::student_get)
                .put(admin::student_put)
                .delete(admin::student_delete),
        )
        .route("/api/admin/students/:id/reset-password", put(admin::reset_password_put))
        .route("/api/admin/students/:id/toggle-edit", put(admin::toggle_edit_put))
        .route("/api/admin/students/:id/toggle-photo", put(admin::toggle_photo_put))
        .route("/api/admin/students/:id/face", put(admin::register_face_put))
        .route("/api/admin/photo-requests", get(admin::photo_requests_get))
        .route("/api/admin/photo-requests/:id", put(admin::photo_request_put))
        .route("/api/admin/myclass", get(admin::my_class_get))
        .route("/api/admin/myclass/stats", get(admin::my_class_stats_get))
        .route("/api/admin/class-filters", get(admin::class_filters_get))
        .route("/api/admin/stats/advanced", get(admin::advanced_stats_get))
}

fn report_routes() -> Router {
    use protected::reports;

    Router::new()
        .route("/api/reports/summary", get(reports::summary_get))
        .route("/api/reports/daily", get(reports::daily_get))
        .route("/api/reports/export/csv", get(reports::export_csv_get))
}

fn hod_routes() -> Router {
    use elevated::hod;

    Router::new()
        .route("/api/hod/stats", get(hod::stats_get))
        .route("/api/hod/staff", get(hod::staff_get).post(hod::staff_post))
        .route("/api/hod/staff/:id", put(hod::staff_put).delete(hod::staff_delete))
        .route("/api/hod/staff/:id/reset-password", put(hod::staff_reset_password_put))
        .route("/api/hod/staff/:id/assign-class", put(hod::assign_class_put))
        .route("/api/hod/students", get(hod::students_get))
}

fn superadmin_routes() -> Router {
    use elevated::superadmin as sa;

    Router::new()
        .route("/api/superadmin/stats", get(sa::stats_get))
        .route("/api/superadmin/staff", get(sa::staff_get).post(sa::staff_post))
        .route("/api/superadmin/staff/:id", delete(sa::staff_delete))
        .route("/api/superadmin/staff/:id/reset-password", put(sa::staff_reset_password_put))
        .route(
            "/api/superadmin/staff/:id/advisor",
            put(sa::assign_advisor_put).delete(sa::remove_advisor_delete),
        )
        .route("/api/superadmin/hods", get(sa::hods_get).post(sa::hods_post))
        .route("/api/superadmin/hods/:id", put(sa::hod_put).delete(sa::hod_delete))
        .route("/api/superadmin/hods/:id/reset-password", put(sa::hod_reset_password_put))
        .route("/api/superadmin/hods/:id/department", put(sa::hod_department_put))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn status_of(method: &str, uri: &str, auth: Option<&str>) -> StatusCode {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(value) = auth {
            request = request.header("authorization", value);
        }
        let request = request
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        app().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn root_describes_service() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["name"], "Attendance API");
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        assert_eq!(status_of("GET", "/api/auth/profile", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of("POST", "/api/sessions", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_of("GET", "/api/superadmin/stats", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of("GET", "/api/events", Some("Bearer not-a-jwt")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn login_validates_body_before_database() {
        assert_eq!(status_of("POST", "/api/auth/login", None).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_escape_login_limit() {
        use axum::extract::ConnectInfo;
        use std::net::SocketAddr;

        let router = app();
        let peer: SocketAddr = "198.51.100.20:40000".parse().unwrap();
        let attempts = config().api.login_rate_limit_requests + 5;

        let mut limited = 0;
        for i in 0..attempts {
            let mut request = Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header("content-type", "application/json")
                .header("x-forwarded-for", format!("10.0.{}.1, 203.0.113.7", i % 250))
                .body(Body::from("{}"))
                .unwrap();
            request.extensions_mut().insert(ConnectInfo(peer));
            let status = router.clone().oneshot(request).await.unwrap().status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                limited += 1;
            }
        }
        assert_eq!(limited, 5);
    }

    #[test]
    fn request_span_omits_query_string() {
        use std::sync::Mutex;
        use tracing::field::{Field, Visit};
        use tracing_subscriber::layer::{Context, SubscriberExt};

        #[derive(Clone, Default)]
        struct SpanFields(Arc<Mutex<Vec<String>>>);

        struct Collect<'a>(&'a mut Vec<String>);

        impl Visit for Collect<'_> {
            fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                self.0.push(format!("{}={:?}", field.name(), value));
            }
        }

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanFields {
            fn on_new_span(
                &self,
                attrs: &tracing::span::Attributes<'_>,
                _id: &tracing::span::Id,
                _ctx: Context<'_, S>,
            ) {
                attrs.record(&mut Collect(&mut self.0.lock().unwrap()));
            }
        }

        let fields = SpanFields::default();
        let subscriber = tracing_subscriber::registry().with(fields.clone());
        tracing::subscriber::with_default(subscriber, || {
            let request = Request::builder()
                .uri("/api/events?token=eyJhbGciOiJIUzI1NiJ9.secret.sig")
                .body(())
                .unwrap();
            let _span = request_span(&request);
        });

        let recorded = fields.0.lock().unwrap();
        assert!(recorded.iter().any(|f| f == "path=/api/events"));
        assert!(recorded.iter().all(|f| !f.contains("token")));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        assert_eq!(status_of("GET", "/api/nothing", None).await, StatusCode::NOT_FOUND);
    }
}

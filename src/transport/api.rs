//! Route table

use super::{
    auth::{admin_auth_middleware, AdminAuth},
    handlers::*,
};
use crate::config::AdminConfig;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub struct AuthApi;

impl AuthApi {
    /// Build the router. Admin routes exist only when the admin surface is
    /// enabled; otherwise they fall through to `Unimplemented`.
    pub fn create_router(state: AppState, admin: &AdminConfig) -> Router {
        let public_routes = Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(export_metrics));

        let auth_routes = Router::new()
            .route("/v1/auth/register", post(register))
            .route("/v1/auth/verify-email", post(verify_email))
            .route("/v1/auth/login", post(login))
            .route("/v1/auth/refresh", post(refresh))
            .route("/v1/auth/logout", post(logout))
            .route("/v1/auth/resend-verification", post(resend_verification))
            .route("/v1/auth/introspect", post(introspect));

        let mut router = public_routes.merge(auth_routes);

        if admin.enabled {
            let admin_auth = Arc::new(AdminAuth::new(admin));
            let admin_routes = Router::new()
                .route("/v1/admin/users/:id/logout-all", post(logout_all))
                .layer(middleware::from_fn_with_state(admin_auth, admin_auth_middleware));
            router = router.merge(admin_routes);
        }

        router
            .fallback(unimplemented)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }
}

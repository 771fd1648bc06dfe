// handlers/protected/mod.rs - Endpoints behind JWT authentication
//
// Route prefix: /api/*
// Middleware: jwt_auth_middleware (token, active user, current session token)

pub mod admin;
pub mod attendance;
pub mod auth;
pub mod events;
pub mod leaves;
pub mod liveness;
pub mod qr;
pub mod reports;
pub mod sessions;
pub mod students;
pub mod zones;

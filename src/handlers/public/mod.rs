// handlers/public/mod.rs - Endpoints reachable without a token
//
// Route prefix: /, /health, /api/auth/login
// Middleware: login rate limiting only

pub mod auth;
pub mod system;

// handlers/elevated/mod.rs - Institution administration
//
// Route prefix: /api/hod/*, /api/superadmin/*
// Middleware: jwt_auth_middleware; each handler checks the exact role.

pub mod hod;
pub mod superadmin;

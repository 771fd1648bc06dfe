// handlers/mod.rs - Handlers grouped by security tier
//
// Public (no auth) → Protected (JWT + live session token) → Elevated (HOD and
// super-admin administration). Role checks inside a tier happen per handler
// through the `AuthUser` guards.

pub mod elevated;
pub mod protected;
pub mod public;

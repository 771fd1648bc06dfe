pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod types;
pub mod verification;

#[cfg(test)]
pub mod testing;

pub mod account;
pub mod db;
pub mod health;

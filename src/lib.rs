pub mod api;
pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod policy;
pub mod services;
pub mod state;

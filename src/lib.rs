pub mod achievements;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod emissions;
pub mod errors;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod notify;
pub mod report;
pub mod seed;
pub mod server;
pub mod services;
pub mod ws;

pub mod api;
pub mod app;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod schema;
pub mod service;
pub mod session;

// src/lib.rs
pub mod accounts;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod db;
pub mod engine;
pub mod error;
pub mod memory;
pub mod models;
pub mod portfolio;
pub mod quote;
pub mod state;

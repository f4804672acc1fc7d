//! Offline cache and real-time connection core of the school client.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod realtime;

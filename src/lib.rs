pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod housekeeping;
pub mod media;
pub mod models;
pub mod repository;
pub mod service;
pub mod storage;
pub mod util;

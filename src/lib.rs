//! Meal photo nutrition analysis pipeline
//!
//! A captured meal photo is analyzed by a Cloudflare Workers AI vision model,
//! the resulting nutrition estimate is written to the health data store, and
//! the photo is deleted or kept depending on how the attempt ended. Attempts
//! are dispatched by a durable Redis scheduler with exponential backoff, and a
//! periodic sweeper reclaims photos that outlived the retention window.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;

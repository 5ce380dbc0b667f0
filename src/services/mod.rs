pub mod encryption;
pub mod health_store;
pub mod image_store;
pub mod notifications;
pub mod scheduler;
pub mod vision;

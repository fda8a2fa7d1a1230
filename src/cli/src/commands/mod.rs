pub mod config;
pub mod events;
pub mod health;
pub mod submit;
pub mod today;

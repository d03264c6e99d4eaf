pub mod api;
pub mod comment;
pub mod config;
pub mod dialog;
pub mod error;
pub mod gadget;
pub mod loader;
pub mod messages;
pub mod refresh;
pub mod runtime;
pub mod section;
pub mod settings;
pub mod triggers;

pub mod api;
pub mod app;
pub mod archive;
pub mod cli;
pub mod clipboard;
pub mod config;
pub mod credentials;
pub mod error;
pub mod global;
pub mod media;
pub mod pipeline;
pub mod request;
pub mod summarizer;
pub mod transcript;
pub mod window;

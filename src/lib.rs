//! LAN file sharing over plain HTTP.
//!
//! A [`FileServer`] exposes one directory tree: browsable HTML listings,
//! streamed downloads and multipart uploads. Every client-supplied path is
//! resolved against the canonical root and refused if it would leave it.

pub mod atomic;
pub mod config;
pub mod error;
pub mod files;
pub mod http;
pub mod listing;
pub mod logging;
pub mod server;
pub mod storage;
pub mod upload;

use shadow_rs::shadow;

shadow!(build);

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{FileServer, ServerState};

//! The Monsti daemon: sites, node types, modules, signals and the HTTP
//! request pipeline.

pub mod auth;
pub mod bus;
pub mod config;
pub mod core_types;
pub mod daemon;
pub mod error;
pub mod http;
pub mod mail;
pub mod modules;
pub mod nav;
pub mod render;
pub mod service;
pub mod thumbnail;

pub use config::{HostConfig, MonstiSettings, SiteConfig};
pub use error::{HostError, HostResult};
pub use http::{router, spawn_http_server};
pub use service::Monsti;

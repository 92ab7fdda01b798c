// packages/engine/src/api/mod.rs
//! HTTP surface: language registry, request validation and the server

pub mod languages;
pub mod request;
pub mod server;

pub use languages::{Language, LanguageRegistry};
pub use request::{ParsedRequest, RequestParser, RunPayload};
pub use server::ApiServer;

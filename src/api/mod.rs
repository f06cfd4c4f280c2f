//! HTTP API Module
//!
//! Provides the REST endpoints the browser file manager talks to.

mod http;

pub use http::{AppState, ErrorResponse, FileParams, HttpServer, PrefixParams};

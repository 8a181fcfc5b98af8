//! Proxy module
//!
//! This module provides functionality for:
//! - Describing proxies and deriving their session identifiers
//! - Parsing proxy lists (HOST:PORT and HOST:PORT:USER:PASS)
//! - Probing a proxy's public egress identity

pub mod models;
pub mod parser;
pub mod resolver;

pub use models::{ProbeResult, Proxy, ProxyAuth, ProxyType};
pub use parser::ProxyParser;
pub use resolver::{HttpIdentityResolver, IdentityResolver, ResolverConfig};

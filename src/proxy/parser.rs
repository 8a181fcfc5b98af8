//! Proxy list parser
//!
//! The list is line oriented: `HOST:PORT` or `HOST:PORT:USER:PASS`, with
//! blank lines and `#` comments ignored. Anything else is dropped without
//! failing the load.

use crate::error::LoadError;
use crate::proxy::models::{Proxy, ProxyType};
use std::fs;
use std::path::Path;

/// Proxy parser for parsing proxies from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single proxy line
    pub fn parse_line(line: &str, default_type: ProxyType) -> Option<Proxy> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let parts: Vec<&str> = line.split(':').collect();

        match parts.as_slice() {
            [host, port] => {
                let port: u16 = port.parse().ok()?;
                Some(Proxy::new(host.to_string(), port, default_type))
            }
            [host, port, username, password] => {
                let port: u16 = port.parse().ok()?;
                Some(Proxy::with_auth(
                    host.to_string(),
                    port,
                    default_type,
                    username.to_string(),
                    password.to_string(),
                ))
            }
            _ => None,
        }
    }

    /// Parse proxies from a string (multiple lines), preserving order
    pub fn parse_string(content: &str, default_type: ProxyType) -> Vec<Proxy> {
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, default_type))
            .collect()
    }

    /// Parse proxies from a file. Only I/O failures are errors.
    pub fn parse_file<P: AsRef<Path>>(
        path: P,
        default_type: ProxyType,
    ) -> Result<Vec<Proxy>, LoadError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse_string(&content, default_type))
    }
}

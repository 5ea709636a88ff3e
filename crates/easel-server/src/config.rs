//! Server configuration from the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Idle interval between `: heartbeat` comments on push channels.
pub const SSE_HEARTBEAT_SECS: u64 = 30;

/// Extensions accepted by the upload endpoint.
pub const UPLOAD_EXTENSIONS: [&str; 6] = ["jpeg", "jpg", "png", "gif", "webp", "svg"];

/// Extensions the inject endpoint picks from when no urls are given.
pub const INJECT_EXTENSIONS: [&str; 5] = ["jpeg", "jpg", "png", "gif", "webp"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub upload_dir: PathBuf,
    /// Prefix for URLs handed to clients, without a trailing slash.
    pub public_url: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            public_url: format!("http://localhost:{}", DEFAULT_PORT),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Read `EASEL_*` variables; anything missing or invalid keeps its default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let port = parse_or("EASEL_PORT", &lookup, defaults.port);
        Self {
            host: parse_or("EASEL_HOST", &lookup, defaults.host),
            port,
            upload_dir: lookup("EASEL_UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            public_url: lookup("EASEL_PUBLIC_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            max_upload_bytes: parse_or("EASEL_MAX_UPLOAD_BYTES", &lookup, defaults.max_upload_bytes),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Public URL of an uploaded file.
    pub fn upload_url(&self, filename: &str) -> String {
        format!("{}/uploads/{}", self.public_url, filename)
    }
}

fn parse_or<T: FromStr>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}

/// Lowercase extension of `filename` if it is in `allowed`.
pub fn allowed_extension(filename: &str, allowed: &[&str]) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    allowed.contains(&ext.as_str()).then_some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.addr(), "0.0.0.0:3001".parse().unwrap());
        assert_eq!(config.public_url, "http://localhost:3001");
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("EASEL_PORT", "8080"),
            ("EASEL_HOST", "not-an-ip"),
            ("EASEL_PUBLIC_URL", "https://easel.example/"),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.upload_url("a.png"), "https://easel.example/uploads/a.png");
    }

    #[test]
    fn test_public_url_follows_port() {
        let config = ServerConfig::from_lookup(lookup(&[("EASEL_PORT", "4000")]));
        assert_eq!(config.public_url, "http://localhost:4000");
    }

    #[test]
    fn test_allowed_extension() {
        assert_eq!(allowed_extension("Cat.PNG", &UPLOAD_EXTENSIONS), Some("png".to_string()));
        assert_eq!(allowed_extension("logo.svg", &INJECT_EXTENSIONS), None);
        assert_eq!(allowed_extension("README", &UPLOAD_EXTENSIONS), None);
        assert_eq!(allowed_extension("evil.exe", &UPLOAD_EXTENSIONS), None);
    }
}

use std::env;
use std::str::FromStr;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

pub(crate) fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read and parse an env var; unparsable values are logged and ignored.
pub(crate) fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_opt(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

/// Split `tcp://host:port` into its host and port.
///
/// Returns `None` for anything that is not a TCP endpoint with a numeric port.
pub(crate) fn tcp_host_port(endpoint: &str) -> Option<(&str, u16)> {
    let addr = endpoint.strip_prefix("tcp://")?;
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}

//! RPC port selection.

use std::net::TcpListener;

use crate::error::AgentError;

/// First port at or above `base` that `host` can bind right now.
pub fn first_free_port(host: &str, base: u16) -> Result<u16, AgentError> {
    (base..=u16::MAX)
        .find(|&port| TcpListener::bind((host, port)).is_ok())
        .ok_or(AgentError::NoFreePort(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_a_taken_port() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let found = first_free_port("127.0.0.1", port).unwrap();
        assert!(found > port);
    }
}

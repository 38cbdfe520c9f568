//! Cheap TCP reachability check ahead of spawning ffprobe.

use std::time::Duration;
use tokio::net::TcpStream;

/// Result of a TCP preflight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    /// Connected.
    Reachable,
    /// The scheme is not TCP based, or the address could not be parsed.
    Skipped,
    /// Connect failed or timed out.
    Unreachable(String),
}

/// Try a TCP connect to the host of an `http`/`https` address.
pub async fn tcp_preflight(address: &str, timeout: Duration) -> Preflight {
    let Some((host, port)) = tcp_target(address) else {
        return Preflight::Skipped;
    };

    match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_stream)) => Preflight::Reachable,
        Ok(Err(e)) => Preflight::Unreachable(format!("TCP connect to {host}:{port} failed: {e}")),
        Err(_) => Preflight::Unreachable(format!(
            "TCP connect to {host}:{port} timed out after {}ms",
            timeout.as_millis()
        )),
    }
}

/// Host and port for addresses whose scheme runs over TCP with a known default port.
fn tcp_target(address: &str) -> Option<(String, u16)> {
    let (scheme, rest) = address.split_once("://")?;
    let default_port = match scheme.to_ascii_lowercase().as_str() {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if authority.is_empty() {
        return None;
    }

    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None => default_port,
        };
        return Some((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((authority.to_string(), default_port)),
    }
}

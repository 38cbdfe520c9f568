//! Raw channel names derived from stream addresses.

use regex::Regex;
use std::sync::LazyLock;

static CHANNEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)/channel(\d+)/").unwrap());
static PLTV_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)/pltv/(\d+)/(\d+)/(\d+)/").unwrap());
static SMIL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)/(\d+)\.(smil|smail)$").unwrap());

/// Name used for a stream before probe metadata is available.
///
/// Multicast relay paths keep the group address (`/rtp/239.3.1.1:8000` →
/// `239.3.1.1:8000`); common IPTV path shapes map to their channel id;
/// other http(s) addresses fall back to the most specific path segment.
pub fn name_from_address(address: &str) -> String {
    let lower = address.to_lowercase();

    for proto in ["rtp", "stp", "udp", "rtsp"] {
        let marker = format!("/{proto}/");
        if let Some(pos) = lower.find(&marker) {
            return strip_query(&address[pos + marker.len()..]).trim().to_string();
        }
    }

    if let Some(caps) = CHANNEL_RE.captures(address) {
        return format!("CHANNEL{}", &caps[1]);
    }

    if lower.contains("/index.m3u8") {
        if let Some(caps) = PLTV_RE.captures(address) {
            return format!("PLTV_{}", &caps[3]);
        }
    }

    if let Some(caps) = SMIL_RE.captures(address) {
        return caps[1].to_string();
    }

    if lower.starts_with("http://") || lower.starts_with("https://") {
        if let Some(name) = http_name(address) {
            return name;
        }
    }

    let last = address.rsplit('/').next().unwrap_or(address);
    strip_query(last).trim().to_string()
}

/// Path-based name for http(s) addresses; the host counts as a segment.
fn http_name(address: &str) -> Option<String> {
    let clean = strip_query(address);
    let after_scheme = clean.split_once("://").map_or(clean, |(_, rest)| rest);
    let parts: Vec<&str> = after_scheme.split('/').filter(|p| !p.is_empty()).collect();

    // The final segment is searched without its extension so `.m3u8` does not count.
    for (i, part) in parts.iter().enumerate() {
        let part = if i + 1 == parts.len() { stem(part) } else { part };
        let digits: String = part.chars().filter(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            return Some(digits);
        }
    }

    for (i, part) in parts.iter().enumerate() {
        if *part == "playlist.m3u8" || *part == "index.m3u8" {
            return Some(parts[i.saturating_sub(1)].to_string());
        }
    }

    parts.last().map(|last| stem(last).to_string())
}

fn stem(segment: &str) -> &str {
    segment.split('.').next().unwrap_or(segment)
}

fn strip_query(s: &str) -> &str {
    s.split(['?', '#']).next().unwrap_or(s)
}

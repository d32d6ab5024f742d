use crate::SessionConfig;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use trillium::{Conn, KnownHeaderName};

// checked in order; the first non-blank header wins
const FORWARDING_HEADERS: [&str; 3] = ["cf-connecting-ip", "x-forwarded-for", "x-real-ip"];

fn parse_ip(value: &str) -> Option<IpAddr> {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

pub(crate) fn client_ip(config: &SessionConfig, conn: &Conn) -> Option<IpAddr> {
    let peer_ip = conn.inner().peer_ip();
    if !config.trust_proxy.is_trusted(peer_ip) {
        return peer_ip;
    }

    let headers = conn.request_headers();
    for header in FORWARDING_HEADERS {
        let value = headers.get_str(header).map(str::trim).unwrap_or_default();
        if !value.is_empty() {
            log::trace!("client ip from {header}");
            return value.split(',').next().and_then(parse_ip);
        }
    }

    peer_ip
}

pub(crate) fn client_ip_string(config: &SessionConfig, conn: &Conn) -> String {
    client_ip(config, conn)
        .map(|ip| ip.to_string())
        .unwrap_or_default()
}

pub(crate) fn user_agent(conn: &Conn) -> String {
    conn.request_headers()
        .get_str(KnownHeaderName::UserAgent)
        .unwrap_or_default()
        .to_owned()
}

pub(crate) fn fingerprint(config: &SessionConfig, conn: &Conn) -> String {
    if config.fingerprint_headers.is_empty() {
        return String::new();
    }

    let headers = conn.request_headers();
    let mut hasher = Sha256::new();
    for header in &config.fingerprint_headers {
        hasher.update(headers.get_str(header.clone()).unwrap_or_default().as_bytes());
        hasher.update(b"\n");
    }
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

//! Safety Layer — SSRF-safe URL validation, anti-TOCTOU dispatch, cron
//! injection/DoS guards, payload sanitization, and HMAC signing.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tam_domain::config::{Environment, SafetyConfig};
use tam_domain::{Error, UrlRejection};

type HmacSha256 = Hmac<Sha256>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// URL validation (SSRF)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const BLOCKED_HOSTNAME_SUFFIXES: &[&str] = &[
    "localhost",
    ".local",
    "metadata.google.internal",
    ".internal",
    ".cluster.local",
];

/// The parsed pieces of a proposed webhook URL that survived static
/// validation (steps 1-4 of §4.2). `host` is lowercase and port-free.
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub rest: String,
}

fn parse_url(url: &str) -> Result<ParsedUrl, Error> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| UrlRejection::HostnameBlocked(format!("malformed URL: {e}")))?;

    let scheme = parsed.scheme().to_string();
    if scheme != "http" && scheme != "https" {
        return Err(UrlRejection::SchemeNotAllowed(scheme).into());
    }

    // Reject userinfo (http://evil@internal-host tricks).
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(UrlRejection::HostnameBlocked("userinfo not allowed".into()).into());
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| UrlRejection::HostnameBlocked("empty host".into()))?
        .to_string();

    // `Url` normalizes the host to lowercase but leaves path/query/fragment
    // case exactly as given — required since those may carry case-sensitive
    // tokens (signatures, path segments).
    let rest = format!(
        "{}{}{}",
        parsed.path(),
        parsed.query().map(|q| format!("?{q}")).unwrap_or_default(),
        parsed.fragment().map(|f| format!("#{f}")).unwrap_or_default(),
    );

    Ok(ParsedUrl { scheme, host, port: parsed.port(), rest })
}

fn hostname_blocked(host: &str) -> bool {
    BLOCKED_HOSTNAME_SUFFIXES.iter().any(|suffix| {
        let suffix = suffix.trim_start_matches('.');
        host == suffix || host.ends_with(&format!(".{suffix}"))
    })
}

/// IPv4 blocklist per §4.2.
pub fn ipv4_blocked(ip: Ipv4Addr) -> bool {
    if ip == Ipv4Addr::new(255, 255, 255, 255) {
        return true;
    }
    let octets = ip.octets();
    in_cidr4(octets, [127, 0, 0, 0], 8)   // loopback
        || in_cidr4(octets, [10, 0, 0, 0], 8)    // private
        || in_cidr4(octets, [172, 16, 0, 0], 12)
        || in_cidr4(octets, [192, 168, 0, 0], 16)
        || in_cidr4(octets, [169, 254, 0, 0], 16) // link-local / metadata
        || in_cidr4(octets, [0, 0, 0, 0], 8)
        || in_cidr4(octets, [100, 64, 0, 0], 10)  // CGNAT
        || in_cidr4(octets, [192, 0, 0, 0], 24)   // protocol assignment
        || in_cidr4(octets, [192, 0, 2, 0], 24)   // documentation
        || in_cidr4(octets, [198, 51, 100, 0], 24)
        || in_cidr4(octets, [203, 0, 113, 0], 24)
        || in_cidr4(octets, [224, 0, 0, 0], 4)    // multicast
        || in_cidr4(octets, [240, 0, 0, 0], 4)    // reserved
}

fn in_cidr4(octets: [u8; 4], net: [u8; 4], prefix: u8) -> bool {
    let ip = u32::from_be_bytes(octets);
    let net = u32::from_be_bytes(net);
    let mask = if prefix == 0 { 0 } else { !0u32 << (32 - prefix) };
    (ip & mask) == (net & mask)
}

/// IPv6 blocklist per §4.2. Unwraps `::ffff:a.b.c.d` and re-tests the
/// embedded IPv4 address.
pub fn ipv6_blocked(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    let segs = ip.segments();

    if segs[..6] == [0, 0, 0, 0, 0, 0xffff] {
        let mapped = Ipv4Addr::new(
            (segs[6] >> 8) as u8,
            segs[6] as u8,
            (segs[7] >> 8) as u8,
            segs[7] as u8,
        );
        return ipv4_blocked(mapped);
    }

    in_cidr6(segs, [0xfe80, 0, 0, 0, 0, 0, 0, 0], 10) // link-local
        || in_cidr6(segs, [0xfc00, 0, 0, 0, 0, 0, 0, 0], 7) // ULA (fc00::/7, incl. fd00::/8)
        || in_cidr6(segs, [0xff00, 0, 0, 0, 0, 0, 0, 0], 8) // multicast
        || in_cidr6(segs, [0x2001, 0xdb8, 0, 0, 0, 0, 0, 0], 32) // documentation
        || in_cidr6(segs, [0x0100, 0, 0, 0, 0, 0, 0, 0], 64) // discard
        || in_cidr6(segs, [0x0064, 0xff9b, 0, 0, 0, 0, 0, 0], 96) // NAT64 translation
}

fn in_cidr6(segs: [u16; 8], net: [u16; 8], prefix: u8) -> bool {
    let mut bits_left = prefix as i32;
    for i in 0..8 {
        if bits_left <= 0 {
            break;
        }
        let seg_bits = bits_left.min(16) as u32;
        let mask: u16 = if seg_bits == 0 {
            0
        } else {
            !0u16 << (16 - seg_bits)
        };
        if (segs[i] & mask) != (net[i] & mask) {
            return false;
        }
        bits_left -= 16;
    }
    true
}

fn ip_blocked(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => ipv4_blocked(v4),
        IpAddr::V6(v6) => ipv6_blocked(v6),
    }
}

/// Full SSRF validation per §4.2, steps 1-5. Resolves the hostname
/// (unless it is itself an IP literal) against both address families
/// and rejects the URL if any resolved address is blocked.
pub async fn validate_url(url: &str, cfg: &SafetyConfig) -> Result<ParsedUrl, Error> {
    let parsed = parse_url(url)?;

    if cfg.environment == Environment::Production && parsed.scheme != "https" {
        return Err(UrlRejection::SchemeNotAllowed(parsed.scheme.clone()).into());
    }

    if hostname_blocked(&parsed.host) {
        return Err(UrlRejection::HostnameBlocked(parsed.host.clone()).into());
    }

    // Bracketed IPv6 literal: test directly.
    if let Ok(v6) = parsed.host.parse::<Ipv6Addr>() {
        if ipv6_blocked(v6) {
            return Err(UrlRejection::IpBlocked(parsed.host.clone()).into());
        }
        return allowlist_check(parsed, cfg);
    }
    if let Ok(v4) = parsed.host.parse::<Ipv4Addr>() {
        if ipv4_blocked(v4) {
            return Err(UrlRejection::IpBlocked(parsed.host.clone()).into());
        }
        return allowlist_check(parsed, cfg);
    }

    if !cfg.allowed_webhook_domains.is_empty() && !domain_allowed(&parsed.host, cfg) {
        return Err(UrlRejection::HostnameBlocked(format!(
            "{} is not in the configured allowlist",
            parsed.host
        ))
        .into());
    }

    let resolved = resolve_both_families(&parsed.host).await?;
    for addr in &resolved {
        if ip_blocked(*addr) {
            return Err(UrlRejection::IpBlocked(addr.to_string()).into());
        }
    }

    Ok(parsed)
}

fn allowlist_check(parsed: ParsedUrl, cfg: &SafetyConfig) -> Result<ParsedUrl, Error> {
    if !cfg.allowed_webhook_domains.is_empty() && !domain_allowed(&parsed.host, cfg) {
        return Err(UrlRejection::HostnameBlocked(format!(
            "{} is not in the configured allowlist",
            parsed.host
        ))
        .into());
    }
    Ok(parsed)
}

fn domain_allowed(host: &str, cfg: &SafetyConfig) -> bool {
    cfg.allowed_webhook_domains
        .iter()
        .any(|d| host == d.to_ascii_lowercase() || host.ends_with(&format!(".{}", d.to_ascii_lowercase())))
}

/// Resolve a hostname against IPv4 and IPv6 independently; errors in
/// one family are tolerated, but if both yield nothing this fails
/// `DnsFailure`.
async fn resolve_both_families(host: &str) -> Result<Vec<IpAddr>, Error> {
    let target = format!("{host}:0");
    let v4 = tokio::net::lookup_host(&target).await;
    let mut addrs: Vec<IpAddr> = Vec::new();
    if let Ok(iter) = v4 {
        addrs.extend(iter.map(|s: SocketAddr| s.ip()));
    }
    if addrs.is_empty() {
        return Err(UrlRejection::DnsFailure(host.to_string()).into());
    }
    Ok(addrs)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Anti-TOCTOU dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Re-validates `url`, pins the connection to the first resolved safe
/// IP (substituting the literal IP while preserving `Host`), disables
/// redirect-following, and enforces `timeout`. A 3xx response is
/// surfaced as `RedirectBlocked`.
pub async fn secure_http_send(
    client: &reqwest::Client,
    url: &str,
    method: reqwest::Method,
    mut headers: reqwest::header::HeaderMap,
    body: Vec<u8>,
    cfg: &SafetyConfig,
    timeout: std::time::Duration,
) -> Result<reqwest::Response, Error> {
    let parsed = validate_url(url, cfg).await?;

    let pinned_ip = if let Ok(v4) = parsed.host.parse::<Ipv4Addr>() {
        v4.to_string()
    } else if let Ok(v6) = parsed.host.parse::<Ipv6Addr>() {
        format!("[{v6}]")
    } else {
        let resolved = resolve_both_families(&parsed.host).await?;
        let safe = resolved
            .into_iter()
            .find(|a| !ip_blocked(*a))
            .ok_or_else(|| UrlRejection::DnsFailure(parsed.host.clone()))?;
        match safe {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        }
    };

    let port_part = parsed.port.map(|p| format!(":{p}")).unwrap_or_default();
    let pinned_url = format!("{}://{}{}{}", parsed.scheme, pinned_ip, port_part, parsed.rest);

    headers.insert(
        reqwest::header::HOST,
        reqwest::header::HeaderValue::from_str(&parsed.host)
            .map_err(|e| Error::InvalidInput(e.to_string()))?,
    );

    let resp = client
        .request(method, &pinned_url)
        .headers(headers)
        .body(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(e.to_string())
            } else {
                Error::CallbackFailure(e.to_string())
            }
        })?;

    if resp.status().is_redirection() {
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<unknown>")
            .to_string();
        return Err(UrlRejection::RedirectBlocked(location).into());
    }

    Ok(resp)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron validation (injection / DoS)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CRON_MAX_FIELD_LEN: usize = 20;
const CRON_MAX_COMMA_VALUES: usize = 30;

/// Validates cron syntax, character whitelist, shape, and the
/// frequency/cardinality guards from §4.2. Distinct from (and run
/// before) the semantic range validation in [`validate_cron_semantics`].
pub fn validate_cron_shape(cron: &str) -> Result<(), Error> {
    if !cron
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b' ' | b'\t' | b',' | b'-' | b'*' | b'/' | b'L' | b'W' | b'#' | b'?'))
    {
        return Err(Error::InvalidCron("InvalidChars: contains a byte outside the whitelist".into()));
    }

    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::InvalidCron(format!(
            "InvalidShape: expected 5 fields, got {}",
            fields.len()
        )));
    }
    for field in &fields {
        if field.len() > CRON_MAX_FIELD_LEN {
            return Err(Error::InvalidCron(format!(
                "FieldTooLong: field '{field}' exceeds {CRON_MAX_FIELD_LEN} bytes"
            )));
        }
    }

    let minute = fields[0];
    if minute == "*" || minute == "*/1" {
        return Err(Error::InvalidCron(
            "TooFrequent: minute field must not fire every minute".into(),
        ));
    }
    if minute.split(',').count() > CRON_MAX_COMMA_VALUES {
        return Err(Error::InvalidCron(format!(
            "TooManyValues: minute field lists more than {CRON_MAX_COMMA_VALUES} values"
        )));
    }

    Ok(())
}

/// Semantic field-range validation (distinct from the character
/// whitelist / shape guard above).
pub fn validate_cron_semantics(cron: &str) -> Result<(), Error> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::InvalidCron("expected 5 fields".into()));
    }
    let names = ["minute", "hour", "day-of-month", "month", "day-of-week"];
    let ranges: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];
    for (i, field) in fields.iter().enumerate() {
        validate_cron_field(field, names[i], ranges[i].0, ranges[i].1)?;
    }
    Ok(())
}

fn validate_cron_field(field: &str, name: &str, min: u32, max: u32) -> Result<(), Error> {
    if field == "*" {
        return Ok(());
    }
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step
            .parse()
            .map_err(|_| Error::InvalidCron(format!("{name}: invalid step '*/{step}'")))?;
        if n == 0 || n > max {
            return Err(Error::InvalidCron(format!("{name}: step {n} out of range 1..={max}")));
        }
        return Ok(());
    }
    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (part, None),
        };
        if let Some(step_s) = step {
            let n: u32 = step_s
                .parse()
                .map_err(|_| Error::InvalidCron(format!("{name}: invalid step '/{step_s}'")))?;
            if n == 0 {
                return Err(Error::InvalidCron(format!("{name}: step must be positive")));
            }
        }
        if let Some((start_s, end_s)) = range_part.split_once('-') {
            let start: u32 = start_s
                .parse()
                .map_err(|_| Error::InvalidCron(format!("{name}: invalid range start '{start_s}'")))?;
            let end: u32 = end_s
                .parse()
                .map_err(|_| Error::InvalidCron(format!("{name}: invalid range end '{end_s}'")))?;
            if start < min || start > max || end < min || end > max || start > end {
                return Err(Error::InvalidCron(format!(
                    "{name}: range {start}-{end} out of bounds {min}..={max}"
                )));
            }
        } else {
            let n: u32 = range_part
                .parse()
                .map_err(|_| Error::InvalidCron(format!("{name}: invalid value '{range_part}'")))?;
            if n < min || n > max {
                return Err(Error::InvalidCron(format!("{name}: value {n} out of range {min}..={max}")));
            }
        }
    }
    Ok(())
}

pub fn validate_timezone(tz: &str) -> Result<(), Error> {
    tz.parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| Error::InvalidInput(format!("invalid timezone: '{tz}'")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload sanitization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const DANGEROUS_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Serializes `input`, enforces the byte cap, and strips
/// `__proto__`/`constructor`/`prototype` keys at any depth. A missing
/// input yields an empty mapping.
pub fn sanitize_payload(
    input: Option<&serde_json::Value>,
    max_bytes: usize,
) -> Result<serde_json::Map<String, serde_json::Value>, Error> {
    let value = match input {
        Some(serde_json::Value::Null) | None => return Ok(serde_json::Map::new()),
        Some(v) => v.clone(),
    };

    let serialized = serde_json::to_vec(&value)?;
    if serialized.len() > max_bytes {
        return Err(Error::PayloadTooLarge(serialized.len(), max_bytes));
    }

    let stripped = strip_dangerous_keys(value);
    match stripped {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(serde_json::Map::new()),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}

fn strip_dangerous_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let cleaned = map
                .into_iter()
                .filter(|(k, _)| !DANGEROUS_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k, strip_dangerous_keys(v)))
                .collect();
            serde_json::Value::Object(cleaned)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(strip_dangerous_keys).collect())
        }
        other => other,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HMAC signing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `sign(payload, timestamp_iso)` — HMAC-SHA256 over `timestamp_iso +
/// "." + payload`, hex-encoded.
pub fn sign(payload_bytes: &[u8], timestamp_iso: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp_iso.as_bytes());
    mac.update(b".");
    mac.update(payload_bytes);
    hex::encode(mac.finalize().into_bytes())
}

/// `verify(payload, signature_hex, timestamp_iso, max_skew)` —
/// constant-time comparison; fails closed on unparseable timestamp or
/// a skew beyond `max_skew_secs`.
pub fn verify(
    payload_bytes: &[u8],
    signature_hex: &str,
    timestamp_iso: &str,
    max_skew_secs: i64,
    secret: &str,
) -> bool {
    let ts = match chrono::DateTime::parse_from_rfc3339(timestamp_iso) {
        Ok(t) => t.with_timezone(&chrono::Utc),
        Err(_) => return false,
    };
    let skew = (chrono::Utc::now() - ts).num_seconds().abs();
    if skew > max_skew_secs {
        return false;
    }
    let expected = sign(payload_bytes, timestamp_iso, secret);
    if expected.len() != signature_hex.len() {
        return false;
    }
    expected.as_bytes().ct_eq(signature_hex.as_bytes()).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SafetyConfig {
        SafetyConfig::default()
    }

    // ── SSRF closure ──────────────────────────────────────────────

    #[test]
    fn ipv4_blocklist_closure() {
        for literal in [
            "127.0.0.1", "10.1.2.3", "172.16.0.1", "192.168.1.1", "169.254.169.254",
            "0.0.0.1", "100.64.0.1", "192.0.0.1", "192.0.2.1", "198.51.100.1",
            "203.0.113.1", "224.0.0.1", "240.0.0.1", "255.255.255.255",
        ] {
            let ip: Ipv4Addr = literal.parse().unwrap();
            assert!(ipv4_blocked(ip), "{literal} should be blocked");
        }
        assert!(!ipv4_blocked("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn ipv6_blocklist_closure() {
        for literal in [
            "::1", "::", "fe80::1", "fc00::1", "fd00::1", "ff02::1",
            "2001:db8::1", "100::1", "64:ff9b::1",
        ] {
            let ip: Ipv6Addr = literal.parse().unwrap();
            assert!(ipv6_blocked(ip), "{literal} should be blocked");
        }
        assert!(!ipv6_blocked("2606:4700:4700::1111".parse().unwrap()));
    }

    #[test]
    fn ipv4_mapped_ipv6_unwraps_and_blocks() {
        let mapped: Ipv6Addr = "::ffff:127.0.0.1".parse().unwrap();
        assert!(ipv6_blocked(mapped));
        let mapped_public: Ipv6Addr = "::ffff:8.8.8.8".parse().unwrap();
        assert!(!ipv6_blocked(mapped_public));
    }

    #[tokio::test]
    async fn validate_url_rejects_non_http_scheme() {
        let err = validate_url("ftp://example.com", &cfg()).await.unwrap_err();
        assert_eq!(err.kind(), "UrlRejected");
    }

    #[tokio::test]
    async fn validate_url_rejects_ip_literal_in_blocklist() {
        let err = validate_url("http://127.0.0.1/", &cfg()).await.unwrap_err();
        assert_eq!(err.kind(), "UrlRejected");
    }

    #[tokio::test]
    async fn validate_url_rejects_localhost_hostname() {
        let err = validate_url("http://localhost/", &cfg()).await.unwrap_err();
        assert_eq!(err.kind(), "UrlRejected");
    }

    #[tokio::test]
    async fn validate_url_preserves_path_and_query_case() {
        // IP literal host to keep this test independent of DNS.
        let parsed = validate_url("https://8.8.8.8/Callbacks/AbC?token=XyZ123", &cfg())
            .await
            .unwrap();
        assert_eq!(parsed.host, "8.8.8.8");
        assert_eq!(parsed.rest, "/Callbacks/AbC?token=XyZ123");
    }

    #[tokio::test]
    async fn validate_url_production_requires_https() {
        let mut c = cfg();
        c.environment = Environment::Production;
        let err = validate_url("http://8.8.8.8/", &c).await.unwrap_err();
        assert_eq!(err.kind(), "UrlRejected");
    }

    // ── Cron whitelist ────────────────────────────────────────────

    #[test]
    fn cron_whitelist_rejects_out_of_set_bytes() {
        assert!(validate_cron_shape("0 9 * * *; curl evil").is_err());
        assert!(validate_cron_shape("0 9 * * *").is_ok());
    }

    #[test]
    fn cron_shape_rejects_wrong_field_count() {
        assert!(validate_cron_shape("* * *").is_err());
    }

    #[test]
    fn cron_rejects_every_minute() {
        assert!(validate_cron_shape("* * * * *").is_err());
        assert!(validate_cron_shape("*/1 * * * *").is_err());
    }

    #[test]
    fn cron_rejects_too_many_comma_values() {
        let minute = (0..31).map(|n| n.to_string()).collect::<Vec<_>>().join(",");
        let cron = format!("{minute} * * * *");
        assert!(validate_cron_shape(&cron).is_err());
    }

    #[test]
    fn cron_semantics_rejects_out_of_range() {
        assert!(validate_cron_semantics("60 * * * *").is_err());
        assert!(validate_cron_semantics("* 24 * * *").is_err());
    }

    // ── Payload reviver ───────────────────────────────────────────

    #[test]
    fn sanitize_strips_dangerous_keys_at_any_depth() {
        let input = serde_json::json!({
            "a": 1,
            "__proto__": {"polluted": true},
            "nested": {"constructor": "x", "ok": 2}
        });
        let sanitized = sanitize_payload(Some(&input), 65536).unwrap();
        assert!(!sanitized.contains_key("__proto__"));
        let nested = sanitized.get("nested").unwrap().as_object().unwrap();
        assert!(!nested.contains_key("constructor"));
        assert_eq!(nested.get("ok").unwrap(), 2);
    }

    #[test]
    fn sanitize_missing_input_yields_empty_map() {
        let sanitized = sanitize_payload(None, 65536).unwrap();
        assert!(sanitized.is_empty());
    }

    #[test]
    fn sanitize_rejects_oversized_payload() {
        let input = serde_json::json!({"data": "x".repeat(100)});
        let err = sanitize_payload(Some(&input), 10).unwrap_err();
        assert_eq!(err.kind(), "PayloadTooLarge");
    }

    // ── HMAC determinism & freshness ──────────────────────────────

    #[test]
    fn sign_is_deterministic() {
        let p = b"{\"a\":1}";
        let t = "2024-01-01T00:00:00Z";
        assert_eq!(sign(p, t, "secret"), sign(p, t, "secret"));
    }

    #[test]
    fn sign_differs_by_timestamp() {
        let p = b"{\"a\":1}";
        assert_ne!(
            sign(p, "2024-01-01T00:00:00Z", "secret"),
            sign(p, "2024-01-01T00:00:01Z", "secret")
        );
    }

    #[test]
    fn verify_rejects_stale_timestamp() {
        let p = b"payload";
        let old = (chrono::Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
        let sig = sign(p, &old, "secret");
        assert!(!verify(p, &sig, &old, 300, "secret"));
    }

    #[test]
    fn verify_accepts_fresh_signature() {
        let p = b"payload";
        let now = chrono::Utc::now().to_rfc3339();
        let sig = sign(p, &now, "secret");
        assert!(verify(p, &sig, &now, 300, "secret"));
    }

    #[test]
    fn verify_rejects_length_mismatch_without_panic() {
        let p = b"payload";
        let now = chrono::Utc::now().to_rfc3339();
        assert!(!verify(p, "short", &now, 300, "secret"));
    }
}

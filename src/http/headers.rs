//! Hop-by-hop header handling.
//!
//! Headers that only describe the client↔proxy or proxy↔upstream hop must not
//! be forwarded. The set is fixed; header names compare case-insensitively.

use axum::http::HeaderMap;

/// Header names removed before forwarding a request or a response.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Remove every hop-by-hop header from `headers` in place.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Append every value of every header in `src` to `dst`.
///
/// Existing entries in `dst` are kept; values keep their per-name order.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn values<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
        headers
            .get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect()
    }

    fn sample() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.append("Connection", HeaderValue::from_static("keep-alive"));
        headers.append("Keep-Alive", HeaderValue::from_static("timeout=5"));
        headers.append("Proxy-Authorization", HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        headers.append("Proxy-Connection", HeaderValue::from_static("keep-alive"));
        headers.append("TE", HeaderValue::from_static("trailers"));
        headers.append("Transfer-Encoding", HeaderValue::from_static("chunked"));
        headers.append("Upgrade", HeaderValue::from_static("websocket"));
        headers.append("Accept", HeaderValue::from_static("text/html"));
        headers.append("Accept", HeaderValue::from_static("application/json"));
        headers.append("X-Trace", HeaderValue::from_static("abc"));
        headers
    }

    #[test]
    fn strips_only_hop_by_hop_names() {
        let mut headers = sample();
        strip_hop_by_hop_headers(&mut headers);

        for name in HOP_BY_HOP_HEADERS {
            assert!(!headers.contains_key(name), "{name} should be stripped");
        }
        assert_eq!(values(&headers, "accept"), ["text/html", "application/json"]);
        assert_eq!(values(&headers, "x-trace"), ["abc"]);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn strip_is_idempotent() {
        let mut once = sample();
        strip_hop_by_hop_headers(&mut once);
        let mut twice = once.clone();
        strip_hop_by_hop_headers(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn strip_without_hop_headers_is_noop() {
        let mut headers = HeaderMap::new();
        headers.insert("Host", HeaderValue::from_static("example.com"));
        let before = headers.clone();
        strip_hop_by_hop_headers(&mut headers);
        assert_eq!(headers, before);
    }

    #[test]
    fn strip_matches_any_case() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(b"PROXY-CONNECTION").unwrap(),
            HeaderValue::from_static("close"),
        );
        strip_hop_by_hop_headers(&mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn copy_appends_without_overwriting() {
        let mut dst = HeaderMap::new();
        dst.append("Accept", HeaderValue::from_static("text/plain"));

        let src = sample();
        copy_headers(&mut dst, &src);

        assert_eq!(
            values(&dst, "accept"),
            ["text/plain", "text/html", "application/json"]
        );
        assert_eq!(values(&dst, "x-trace"), ["abc"]);
    }

    #[test]
    fn copy_then_strip_leaves_end_to_end_headers() {
        let src = sample();
        let mut dst = HeaderMap::new();
        copy_headers(&mut dst, &src);
        strip_hop_by_hop_headers(&mut dst);

        let mut expected = HeaderMap::new();
        expected.append("Accept", HeaderValue::from_static("text/html"));
        expected.append("Accept", HeaderValue::from_static("application/json"));
        expected.append("X-Trace", HeaderValue::from_static("abc"));
        assert_eq!(dst, expected);
    }
}

//! Best-effort client IP extraction.
//!
//! The address is advisory only: it trusts forwarding headers and yields
//! nothing when none parse, so extraction can never fail a request.

use std::net::IpAddr;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

const IP_HEADERS: [&str; 2] = ["x-forwarded-for", "x-real-ip"];

/// Optional client IP address extractor.
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<IpAddr>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(ip_from_headers(&parts.headers)))
    }
}

fn ip_from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    for header in IP_HEADERS {
        let Some(value) = headers.get(header).and_then(|value| value.to_str().ok()) else {
            continue;
        };
        if let Some(ip) = value
            .split(',')
            .map(str::trim)
            .find_map(|candidate| candidate.parse::<IpAddr>().ok())
        {
            return Some(ip);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn takes_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            ip_from_headers(&headers),
            Some("203.0.113.7".parse().unwrap())
        );
    }

    #[test]
    fn falls_back_to_real_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("2001:db8::1"));
        assert_eq!(ip_from_headers(&headers), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn garbage_and_absence_yield_none() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(ip_from_headers(&headers), None);
        assert_eq!(ip_from_headers(&HeaderMap::new()), None);
    }
}

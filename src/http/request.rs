//! Request handling and transformation.
//!
//! # Responsibilities
//! - Hold the captured inbound request ([`RequestEnvelope`])
//! - Resolve the upstream target URI from the inbound path and query
//! - Prepare a fresh outbound request for every forwarding attempt
//!
//! # Design Decisions
//! - The envelope is never mutated; each attempt builds its own request
//! - `Host` always names the upstream authority
//! - `Content-Length` always matches the (rewritten) body sent
//! - Hop-by-hop headers are not forwarded

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::uri::{Authority, InvalidUri, PathAndQuery, Scheme};
use axum::http::{
    header, request, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version,
};
use thiserror::Error;

use crate::http::body::BodyBuffer;
use crate::session::CorrelationId;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Error resolving or building an upstream request.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(#[from] InvalidUri),

    #[error("upstream URL must be absolute http://host[:port][/path]")]
    NotAbsolute,

    #[error("unsupported upstream scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid API key header value")]
    InvalidApiKey,

    #[error("failed to build upstream request: {0}")]
    Build(#[from] axum::http::Error),
}

/// The single upstream every request is forwarded to.
#[derive(Debug, Clone)]
pub struct Upstream {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    base_query: Option<String>,
}

impl Upstream {
    pub fn parse(url: &str) -> Result<Self, UpstreamError> {
        let uri: Uri = url.parse()?;
        let (Some(scheme), Some(authority)) = (uri.scheme(), uri.authority()) else {
            return Err(UpstreamError::NotAbsolute);
        };
        if *scheme != Scheme::HTTP {
            return Err(UpstreamError::UnsupportedScheme(scheme.to_string()));
        }
        Ok(Self {
            scheme: scheme.clone(),
            authority: authority.clone(),
            base_path: uri.path().to_string(),
            base_query: uri.query().filter(|q| !q.is_empty()).map(str::to_string),
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Map an inbound URI onto the upstream: base path joined with the
    /// inbound path, base query and inbound query concatenated with `&`.
    pub fn target_uri(&self, inbound: &Uri) -> Result<Uri, UpstreamError> {
        let path = join_paths(&self.base_path, inbound.path());
        let query: Vec<&str> = [self.base_query.as_deref(), inbound.query()]
            .into_iter()
            .flatten()
            .filter(|q| !q.is_empty())
            .collect();

        let path_and_query = if query.is_empty() {
            path
        } else {
            format!("{}?{}", path, query.join("&"))
        };

        Ok(Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(PathAndQuery::try_from(path_and_query)?)
            .build()?)
    }
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// A captured inbound request.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub id: CorrelationId,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: BodyBuffer,
    pub client_addr: Option<SocketAddr>,
}

impl RequestEnvelope {
    pub fn new(
        id: CorrelationId,
        parts: request::Parts,
        body: BodyBuffer,
        client_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            id,
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            client_addr,
        }
    }

    /// Build the outbound request for one attempt, carrying `body`.
    pub fn outbound(
        &self,
        upstream: &Upstream,
        body: &BodyBuffer,
        api_key: Option<&str>,
    ) -> Result<Request<Body>, UpstreamError> {
        let mut headers = self.headers.clone();
        strip_hop_by_hop(&mut headers);

        let host = HeaderValue::from_str(upstream.authority().as_str())
            .map_err(axum::http::Error::from)?;
        headers.insert(header::HOST, host);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        if let Some(addr) = self.client_addr {
            let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{}, {}", prior, addr.ip()),
                None => addr.ip().to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key).map_err(|_| UpstreamError::InvalidApiKey)?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(upstream.target_uri(&self.uri)?)
            .version(Version::HTTP_11)
            .body(body.to_body())?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

const CONTENT_TYPE_JSON: &str = "application/json";
const ALLOW_ANY_ORIGIN: &str = "*";
/// Responses may be reused for 60 seconds. Cache backends read the lifetime from this header.
const PUBLIC_CACHE_CONTROL: &str = "public, max-age=60";

/// A response with the canonical header set, safe to cache and replay.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl NormalizedResponse {
    /// Approximate number of bytes this response holds.
    pub fn size(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        std::mem::size_of::<Self>() + self.body.len() + headers
    }
}

/// Build a [`NormalizedResponse`] from an upstream status and fully buffered body.
///
/// Whatever headers the upstream sent are never carried over.
pub fn normalize(status: StatusCode, body: Bytes) -> NormalizedResponse {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_JSON),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ANY_ORIGIN),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(PUBLIC_CACHE_CONTROL),
    );
    NormalizedResponse {
        status,
        headers,
        body,
    }
}

impl IntoResponse for NormalizedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

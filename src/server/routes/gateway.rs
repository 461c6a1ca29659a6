use crate::server::{AppState, gateway::InboundRequest, routes::ErrorResponse};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;
use url::Url;

pub async fn gateway_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    request_headers: HeaderMap,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let request = InboundRequest {
        method,
        url: inbound_url(&uri, &request_headers).ok_or((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                message: "Invalid request URL.",
            }),
        ))?,
    };

    match state.gateway.handle(&request).await {
        Ok(response) => Ok(response.into_response()),
        Err(err) => {
            warn!("Failed to retrieve response from upstream server: {err:?}");
            if err.is_timeout() {
                return Err((
                    StatusCode::GATEWAY_TIMEOUT,
                    Json(ErrorResponse {
                        message: "Upstream server failed to respond in time.",
                    }),
                ));
            }
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    message: "Failed to send request to upstream server.",
                }),
            ))
        }
    }
}

/// Rebuild the absolute URL the client requested from the request target and `Host` header.
fn inbound_url(uri: &Uri, headers: &HeaderMap) -> Option<Url> {
    let host = uri
        .authority()
        .map(|authority| authority.as_str())
        .or_else(|| headers.get(header::HOST)?.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("http://{host}{path_and_query}")).ok()
}

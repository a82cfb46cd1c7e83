use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use parley_chat::ChatError;

use crate::AppState;
use crate::error::ApiError;

/// Verify the `Authorization: Bearer` header and attach the caller's
/// [`parley_chat::Identity`] as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().map_err(|_| ChatError::InvalidCredential))
        .transpose()?;

    let identity = state.gate.verify_header(auth_header)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

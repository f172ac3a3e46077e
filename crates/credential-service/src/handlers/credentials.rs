use crate::errors::CredentialError;
use crate::issuer::CredentialIssuer;
use crate::observability::record_status_request;
use axum::{extract::State, Json};
use common::credential::{CredentialRequest, CredentialResponse, CredentialStatus};
use std::sync::Arc;
use tracing::instrument;

/// Application state shared across handlers.
#[derive(Debug)]
pub struct AppState {
    pub issuer: CredentialIssuer,
}

/// Issue a credential for one user and room.
///
/// POST /api/v1/video/credentials
///
/// The caller is the embedding application's backend, which has already
/// authenticated the user; the service trusts the identity it is given.
#[instrument(name = "credential.issue", skip_all, fields(status))]
pub async fn issue_credential(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CredentialRequest>,
) -> Result<Json<CredentialResponse>, CredentialError> {
    let result = state.issuer.issue(&request);

    let status = match &result {
        Ok(_) => "success",
        Err(e) => e.category(),
    };
    tracing::Span::current().record("status", status);

    Ok(Json(result?))
}

/// Report whether this deployment can issue credentials.
///
/// GET /api/v1/video/credentials/status
#[instrument(name = "credential.status", skip_all)]
pub async fn credential_status(State(state): State<Arc<AppState>>) -> Json<CredentialStatus> {
    let status = state.issuer.status();
    record_status_request(status.configured);
    Json(status)
}

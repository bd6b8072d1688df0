use tracing::{info, warn};
use validator::Validate;

use crate::{
    dto::operator::{ActionResponse, SignInRequest, SignInResponse},
    error::ServiceError,
    state::SharedState,
};

/// Exchange the operator password for a token.
pub fn sign_in(state: &SharedState, request: SignInRequest) -> Result<SignInResponse, ServiceError> {
    request.validate()?;
    let operators = state.operators();
    if !operators.is_enabled() {
        return Err(ServiceError::Unauthorized(
            "operator sign-in is disabled (no password configured)".into(),
        ));
    }

    match operators.sign_in(&request.password, state.now()) {
        Some(token) => {
            info!("operator signed in");
            Ok(SignInResponse { token })
        }
        None => {
            warn!("operator sign-in rejected");
            Err(ServiceError::Unauthorized("invalid operator password".into()))
        }
    }
}

/// Revoke an operator token.
pub fn sign_out(state: &SharedState, token: &str) -> ActionResponse {
    let known = state.operators().sign_out(token);
    info!(known, "operator signed out");
    ActionResponse {
        message: "signed out".into(),
    }
}

/// Ensure `token` belongs to a signed-in operator.
pub fn authorize(state: &SharedState, token: Option<&str>) -> Result<(), ServiceError> {
    let token = token.ok_or_else(|| ServiceError::Unauthorized("missing operator token".into()))?;
    if state.operators().is_operator(token, state.now()) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized("invalid operator token".into()))
    }
}

//! Bearer-token auth middleware (§4.4 Authentication, §6 HTTP). Populates
//! an `AuthUser` extension consumed by every handler downstream.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use fechatter_core::auth::TokenVerifier;
use fechatter_core::ids::UserId;

use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

pub async fn verify_token_middleware(
  State(state): State<AppState>,
  mut request: Request<Body>,
  next: Next,
) -> Result<Response, StatusCode> {
  let auth_header = request.headers().get("Authorization").and_then(|h| h.to_str().ok());

  match auth_header {
    Some(auth) if auth.starts_with("Bearer ") => {
      let token = &auth[7..];
      match state.auth.verify(token) {
        Ok(user) => {
          debug!(user = %user, "token verified");
          request.extensions_mut().insert(AuthUser(user));
          Ok(next.run(request).await)
        }
        Err(e) => {
          warn!(error = %e, "token verification failed");
          Err(StatusCode::UNAUTHORIZED)
        }
      }
    }
    _ => Err(StatusCode::UNAUTHORIZED),
  }
}

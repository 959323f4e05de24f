use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use axum_extra::extract::cookie::CookieJar;

use crate::routes::auth::claims::{Claims, TokenUse};
use crate::state::AppState;
use crate::utils::jwt::decode_jwt;

/// Verified caller identity, rejected before any data access when the
/// cookie is missing, expired, or not an access token.
#[derive(Debug, PartialEq)]
pub struct AuthSession(pub Claims);

impl<S> FromRequestParts<S> for AuthSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get("auth_token").ok_or(StatusCode::UNAUTHORIZED)?;

        let jwt = &app_state.config.jwt;
        let data = decode_jwt(token.value(), &jwt.keys, &jwt.issuer, &jwt.audience)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        if data.claims.token_use != TokenUse::Access {
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok(AuthSession(data.claims))
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::FromRequestParts,
        http::{header, Method, Request, StatusCode},
    };
    use axum_extra::extract::cookie::Cookie;
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::db::mock_db::MockDb;
    use crate::routes::auth::claims::{Claims, TokenUse};
    use crate::routes::auth::session::AuthSession;
    use crate::state::AppState;
    use crate::utils::jwt::create_jwt;

    fn make_jwt(state: &AppState, token_use: TokenUse) -> String {
        let mut claims = Claims::for_tests(Uuid::new_v4());
        claims.token_use = token_use;
        let jwt = &state.config.jwt;
        create_jwt(claims, &jwt.keys, &jwt.issuer, &jwt.audience)
            .expect("JWT should create successfully")
    }

    #[tokio::test]
    async fn test_valid_token_extracted() {
        let state = AppState::for_tests(Arc::new(MockDb::new()));
        let jwt = make_jwt(&state, TokenUse::Access);
        let cookie = Cookie::new("auth_token", jwt);

        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header(header::COOKIE, cookie.to_string())
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let result = AuthSession::from_request_parts(&mut parts, &state).await;

        assert!(result.is_ok());
        let session = result.unwrap();
        assert_eq!(session.0.email, "owner@example.test");
    }

    #[tokio::test]
    async fn test_missing_cookie_returns_unauthorized() {
        let state = AppState::for_tests(Arc::new(MockDb::new()));
        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let result = AuthSession::from_request_parts(&mut parts, &state).await;

        assert_eq!(result, Err(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_invalid_token_returns_unauthorized() {
        let state = AppState::for_tests(Arc::new(MockDb::new()));
        let cookie = Cookie::new("auth_token", "invalid.token.here");

        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header(header::COOKIE, cookie.to_string())
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let result = AuthSession::from_request_parts(&mut parts, &state).await;

        assert_eq!(result, Err(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_refresh_token_rejected_for_api_access() {
        let state = AppState::for_tests(Arc::new(MockDb::new()));
        let jwt = make_jwt(&state, TokenUse::Refresh);
        let cookie = Cookie::new("auth_token", jwt);

        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header(header::COOKIE, cookie.to_string())
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let result = AuthSession::from_request_parts(&mut parts, &state).await;

        assert_eq!(result, Err(StatusCode::UNAUTHORIZED));
    }
}

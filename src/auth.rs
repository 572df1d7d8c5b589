use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use tracing::debug;

use crate::config::{AppState, Claims};
use crate::models::{User, UserRole};
use crate::utils::AppError;

/// The verified caller, inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::unauthorized())
        }
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            role: user.role,
        }
    }
}

#[cfg(test)]
pub fn create_token(
    secret: &str,
    user_id: &str,
    expires_hours: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims::new(user_id, expires_hours);
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("rejected token: {}", e);
        AppError::unauthorized()
    })
}

// JWT认证中间件：只放行已验证（非 pending）的用户
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(AppError::unauthorized)?;

    let claims = verify_token(&state.jwt_secret, token)?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&claims.sub)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(AppError::unauthorized)?;

    if user.role == UserRole::Pending {
        return Err(AppError::unauthorized());
    }

    request.extensions_mut().insert(AuthUser::from(user));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils_tests::{bearer, create_test_app_state, seed_user, TEST_JWT_SECRET};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use serial_test::serial;
    use tower::ServiceExt;

    async fn whoami(Extension(user): Extension<AuthUser>) -> String {
        user.id
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    async fn call(state: AppState, authorization: Option<String>) -> StatusCode {
        let mut builder = Request::builder().uri("/whoami");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = app(state)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.status()
    }

    #[test]
    fn test_token_round_trip() {
        let token = create_token(TEST_JWT_SECRET, "u1", 1).unwrap();
        assert_eq!(verify_token(TEST_JWT_SECRET, &token).unwrap().sub, "u1");
        assert!(verify_token("other-secret", &token).is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_verified_user_passes() {
        let state = create_test_app_state().await;
        seed_user(&state.db, "u1", UserRole::User).await;

        assert_eq!(call(state, Some(bearer("u1"))).await, StatusCode::OK);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_or_bad_token_is_rejected() {
        let state = create_test_app_state().await;
        seed_user(&state.db, "u1", UserRole::User).await;

        assert_eq!(call(state.clone(), None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            call(state.clone(), Some("Bearer not-a-token".to_string())).await,
            StatusCode::UNAUTHORIZED
        );
        // 令牌合法但用户不存在
        assert_eq!(call(state, Some(bearer("ghost"))).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    #[serial]
    async fn test_pending_user_is_rejected() {
        let state = create_test_app_state().await;
        seed_user(&state.db, "p1", UserRole::Pending).await;

        assert_eq!(call(state, Some(bearer("p1"))).await, StatusCode::UNAUTHORIZED);
    }
}

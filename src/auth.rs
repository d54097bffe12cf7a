use crate::assistant::TaskAssistant;
use crate::persist::SaveFile;
use crate::world::World;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

// ── Auth request/response types ────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
}

// ── JWT ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,        // user id
    pub username: String,
    pub exp: usize,       // expiry timestamp
    pub iat: usize,       // issued at
}

pub struct TokenConfig {
    pub secret: String,
    pub expiry_minutes: u32,
}

// ── Shared state ───────────────────────────────────────────────

pub struct AppState {
    pub world: RwLock<World>,
    pub save_file: SaveFile,
    pub assistant: TaskAssistant,
    pub tokens: TokenConfig,
}

pub type SharedState = Arc<AppState>;

/// The authenticated caller, inserted by `auth_middleware`.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub id: Uuid,
}

// ── Helpers ────────────────────────────────────────────────────

pub fn create_token(tokens: &TokenConfig, user_id: Uuid, username: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiry = now + Duration::minutes(i64::from(tokens.expiry_minutes));

    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: expiry.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(tokens.secret.as_bytes()),
    )
}

pub fn verify_token(tokens: &TokenConfig, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(tokens.secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

pub fn lock_poisoned<E>(_: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, "World lock poisoned".to_string())
}

// ── Handlers ───────────────────────────────────────────────────

pub async fn login(
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let (user_id, username, password_hash) = {
        let world = state.world.read().map_err(lock_poisoned)?;
        let user = world.get_user_by_username(&payload.username)
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()))?;
        (user.id, user.username.clone(), user.password_hash.clone())
    };

    if !verify_password(&payload.password, &password_hash) {
        tracing::info!(username = %payload.username, "rejected login");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    }

    let token = create_token(&state.tokens, user_id, &username)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!(%username, "logged in");
    Ok(Json(LoginResponse {
        token,
        user: UserResponse { id: user_id, username },
    }))
}

pub async fn logout() -> impl IntoResponse {
    StatusCode::OK
}

/// Requires `Authorization: Bearer <jwt>` naming a user that still exists.
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or((StatusCode::UNAUTHORIZED, "Missing or invalid token".to_string()))?;

    let claims = verify_token(&state.tokens, token)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".to_string()))?;

    let known = state.world.read().map_err(lock_poisoned)?.users.contains_key(&claims.sub);
    if !known {
        return Err((StatusCode::UNAUTHORIZED, "User not found".to_string()));
    }

    request.extensions_mut().insert(CurrentUser { id: claims.sub });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> TokenConfig {
        TokenConfig { secret: "test-secret".into(), expiry_minutes: 60 }
    }

    #[test]
    fn token_round_trip() {
        let id = Uuid::new_v4();
        let token = create_token(&tokens(), id, "alice").unwrap();
        let claims = verify_token(&tokens(), &token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.username, "alice");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_from_other_secret_rejected() {
        let token = create_token(&tokens(), Uuid::new_v4(), "alice").unwrap();
        let other = TokenConfig { secret: "other".into(), expiry_minutes: 60 };
        assert!(verify_token(&other, &token).is_err());
    }

    #[test]
    fn password_check() {
        let hash = crate::persist::hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password(" hunter2 ", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not a hash"));
    }
}

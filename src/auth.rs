//! Bearer-token authentication: the JWT claims extractor and the
//! register/login/me endpoints.

use std::str::FromStr;

use axum::{
    Json, RequestPartsExt,
    extract::{FromRef, FromRequestParts, State},
    http::{StatusCode, request::Parts},
    response::IntoResponse,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use email_address::EmailAddress;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::{
    Error,
    db::DatabaseId,
    password::PasswordHash,
    state::{AppState, JwtKeys},
    user::{self, NewUser, User},
};

/// How long issued tokens stay valid.
pub const TOKEN_DURATION: time::Duration = time::Duration::hours(24);

/// The contents of a JSON Web Token.
///
/// Handlers take `Claims` as an extractor argument to require
/// authentication: extraction fails with a 401 response when the bearer
/// header is missing or the token is invalid or expired.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated user's database ID.
    pub sub: DatabaseId,
    /// The authenticated user's email address.
    pub email: String,
    /// When the token was issued, as a unix timestamp.
    pub iat: usize,
    /// When the token expires, as a unix timestamp.
    pub exp: usize,
}

impl<S> FromRequestParts<S> for Claims
where
    JwtKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Auth("Authentication required".to_owned()))?;

        let keys = JwtKeys::from_ref(state);

        decode_token(bearer.token(), &keys.decoding_key)
    }
}

/// Create a signed token for `user` with a fixed expiry.
///
/// # Errors
///
/// Returns an [Error::Internal] if signing fails.
pub fn encode_token(user: &User, encoding_key: &EncodingKey) -> Result<String, Error> {
    let now = OffsetDateTime::now_utc();
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        iat: now.unix_timestamp() as usize,
        exp: (now + TOKEN_DURATION).unix_timestamp() as usize,
    };

    encode(&Header::default(), &claims, encoding_key)
        .map_err(|e| Error::Internal(format!("could not sign token: {e}")))
}

/// Verify a token and return its claims.
///
/// # Errors
///
/// Returns an [Error::Auth] if the token is malformed, has a bad signature,
/// or has expired.
pub fn decode_token(token: &str, decoding_key: &DecodingKey) -> Result<Claims, Error> {
    decode::<Claims>(token, decoding_key, &Validation::default())
        .map(|token_data| token_data.claims)
        .map_err(|_| Error::Auth("Invalid or expired token".to_owned()))
}

/// Request body for [register].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    /// The email address to register.
    pub email: String,
    /// The password to register with.
    pub password: String,
    /// Optional given name.
    pub first_name: Option<String>,
    /// Optional family name.
    pub last_name: Option<String>,
}

/// Credentials for [log_in].
#[derive(Debug, Deserialize)]
pub struct Credentials {
    /// Email entered during sign-in.
    pub email: String,
    /// Password entered during sign-in.
    pub password: String,
}

/// A route handler that registers a new user and signs them in.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, Error> {
    let email = EmailAddress::from_str(body.email.trim())
        .map_err(|_| Error::Validation("A valid email address is required".to_owned()))?;
    let password_hash = PasswordHash::from_raw_password(&body.password, PasswordHash::DEFAULT_COST)?;

    let connection = state.db_connection.lock().unwrap();
    let user = user::insert_user(
        NewUser {
            email: email.to_string(),
            password_hash,
            first_name: body.first_name,
            last_name: body.last_name,
        },
        &connection,
    )?;
    user::touch_last_login(user.id, &connection)?;

    let token = encode_token(&user, &state.jwt_keys.encoding_key)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": user, "token": token })),
    ))
}

/// A route handler that signs a user in with email and password.
///
/// Unknown emails and wrong passwords produce the same error, so the
/// response does not reveal which emails are registered.
pub async fn log_in(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<serde_json::Value>, Error> {
    let connection = state.db_connection.lock().unwrap();

    let user = user::user_by_email(credentials.email.trim(), &connection).map_err(|e| match e {
        Error::NotFound => Error::Auth("Invalid credentials".to_owned()),
        e => e,
    })?;

    if !user.password_hash.verify(&credentials.password)? {
        return Err(Error::Auth("Invalid credentials".to_owned()));
    }

    user::touch_last_login(user.id, &connection)?;
    let token = encode_token(&user, &state.jwt_keys.encoding_key)?;

    Ok(Json(json!({ "user": user, "token": token })))
}

/// A route handler that returns the authenticated user.
pub async fn me(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<serde_json::Value>, Error> {
    let connection = state.db_connection.lock().unwrap();
    let user = user::user_by_id(claims.sub, &connection).map_err(|e| match e {
        Error::NotFound => Error::Auth("User not found".to_owned()),
        e => e,
    })?;

    Ok(Json(json!({ "user": user })))
}

#[cfg(test)]
mod token_tests {
    use jsonwebtoken::{DecodingKey, EncodingKey};
    use time::OffsetDateTime;

    use crate::{Error, password::PasswordHash, user::User};

    use super::{Claims, decode_token, encode_token};

    fn test_user() -> User {
        User {
            id: 7,
            email: "foo@bar.baz".to_owned(),
            password_hash: PasswordHash::new_unchecked("notarealhash"),
            first_name: None,
            last_name: None,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        }
    }

    #[test]
    fn encode_decode_round_trip_preserves_identity() {
        let encoding_key = EncodingKey::from_secret(b"test-secret");
        let decoding_key = DecodingKey::from_secret(b"test-secret");

        let token = encode_token(&test_user(), &encoding_key).unwrap();
        let claims = decode_token(&token, &decoding_key).unwrap();

        assert_eq!(claims.sub, 7);
        assert_eq!(claims.email, "foo@bar.baz");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let encoding_key = EncodingKey::from_secret(b"test-secret");
        let other_decoding_key = DecodingKey::from_secret(b"other-secret");

        let token = encode_token(&test_user(), &encoding_key).unwrap();
        let result = decode_token(&token, &other_decoding_key);

        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let encoding_key = EncodingKey::from_secret(b"test-secret");
        let decoding_key = DecodingKey::from_secret(b"test-secret");

        let past = OffsetDateTime::now_utc().unix_timestamp() - 3600;
        let claims = Claims {
            sub: 7,
            email: "foo@bar.baz".to_owned(),
            iat: (past - 60) as usize,
            exp: past as usize,
        };
        let token =
            jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &encoding_key).unwrap();

        let result = decode_token(&token, &decoding_key);

        assert!(matches!(result, Err(Error::Auth(_))));
    }
}

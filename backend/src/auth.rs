use std::future::{ready, Ready};
use std::sync::Mutex;

use actix_web::{
    cookie::{Cookie, SameSite},
    dev::Payload,
    http::header,
    web::Data,
    FromRequest, HttpRequest,
};
use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use log::{debug, warn};
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::db::{models::User, Db};
use crate::error::{AppError, AppResult};

pub const SESSION_COOKIE: &str = "lumy_session";

/// Hash a plain password with argon2id.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow!("failed to hash password: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// 32 random bytes, hex encoded.
pub fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Browser-session cookie. Expiry is enforced server side by the session row.
pub fn session_cookie(token: &str, config: &Config) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token.to_owned())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .finish()
}

pub fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build(SESSION_COOKIE, "").path("/").finish();
    cookie.make_removal();
    cookie
}

fn config(req: &HttpRequest) -> AppResult<&Config> {
    req.app_data::<Data<Config>>()
        .map(|c| c.get_ref())
        .ok_or_else(|| AppError::Internal(anyhow!("config is not registered as app data")))
}

/// Device secret from `X-API-KEY`, or from `Authorization: Bearer`.
fn presented_key(req: &HttpRequest) -> Option<&str> {
    if let Some(key) = req.headers().get("x-api-key") {
        return key.to_str().ok();
    }
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn check_device_key(req: &HttpRequest) -> AppResult<DeviceKey> {
    let expected = &config(req)?.api_key;
    match presented_key(req) {
        Some(key) if bool::from(key.trim().as_bytes().ct_eq(expected.as_bytes())) => Ok(DeviceKey),
        Some(_) => {
            warn!("Rejected device key on {}", req.path());
            Err(AppError::Unauthorized)
        }
        None => {
            debug!("No device key on {}", req.path());
            Err(AppError::Unauthorized)
        }
    }
}

fn check_session(req: &HttpRequest) -> AppResult<SessionUser> {
    let Some(cookie) = req.cookie(SESSION_COOKIE) else {
        debug!("No session cookie on {}", req.path());
        return Err(AppError::Unauthorized);
    };
    let db = req
        .app_data::<Data<Mutex<Db>>>()
        .ok_or_else(|| AppError::Internal(anyhow!("db is not registered as app data")))?;

    let user = db.lock()?.session_user(cookie.value(), Utc::now())?;
    match user {
        Some(user) => Ok(SessionUser(user)),
        None => {
            warn!("Unknown or expired session on {}", req.path());
            Err(AppError::Unauthorized)
        }
    }
}

/// Request carries the shared device secret.
#[derive(Debug)]
pub struct DeviceKey;

impl FromRequest for DeviceKey {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(check_device_key(req))
    }
}

/// Request carries a valid session cookie.
#[derive(Debug)]
pub struct SessionUser(pub User);

impl FromRequest for SessionUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(check_session(req))
    }
}

/// Either a device or a signed-in user. A presented device key is never
/// downgraded to a session check.
#[derive(Debug)]
pub enum Caller {
    Device,
    User(User),
}

impl FromRequest for Caller {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let res = if presented_key(req).is_some() {
            check_device_key(req).map(|_| Caller::Device)
        } else {
            check_session(req).map(|SessionUser(user)| Caller::User(user))
        };
        ready(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn tokens_are_unique() {
        let a = new_session_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, new_session_token());
    }

    #[test]
    fn device_key_from_either_header() {
        let config = Data::new(Config::for_tests());

        let req = TestRequest::default()
            .app_data(config.clone())
            .insert_header(("X-API-KEY", "test-device-key"))
            .to_http_request();
        assert!(check_device_key(&req).is_ok());

        let req = TestRequest::default()
            .app_data(config.clone())
            .insert_header((header::AUTHORIZATION, "Bearer test-device-key"))
            .to_http_request();
        assert!(check_device_key(&req).is_ok());

        let req = TestRequest::default()
            .app_data(config.clone())
            .insert_header(("X-API-KEY", "wrong"))
            .to_http_request();
        assert!(matches!(check_device_key(&req), Err(AppError::Unauthorized)));

        let req = TestRequest::default().app_data(config).to_http_request();
        assert!(matches!(check_device_key(&req), Err(AppError::Unauthorized)));
    }
}

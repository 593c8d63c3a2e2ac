use std::sync::{Mutex, OnceLock};

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use common::req::{Credentials, SuccessResponse, UserResponse};
use log::{info, warn};

use crate::auth::{
    hash_password, new_session_token, removal_cookie, session_cookie, verify_password,
    SessionUser, SESSION_COOKIE,
};
use crate::config::Config;
use crate::db::models::{Session, User};
use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::utils::ms_since_epoch;

const MIN_PASSWORD_LEN: usize = 8;

fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::BadRequest("A valid email is required".to_string())),
    }
}

/// Hash checked when the email is unknown, so both paths cost one argon2 verify.
fn dummy_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password("lumy-dummy-password").unwrap_or_default())
}

fn start_session(db: &mut Db, user_id: &str, config: &Config) -> AppResult<String> {
    let now = Utc::now();
    db.delete_expired_sessions(now)?;

    let token = new_session_token();
    db.insert_session(&Session {
        token: token.clone(),
        user_id: user_id.to_owned(),
        created_at: ms_since_epoch(now),
        expires_at: ms_since_epoch(now + Duration::seconds(config.session_ttl_secs)),
    })?;

    Ok(token)
}

#[post("/api/auth/signup")]
async fn signup(
    body: web::Json<Credentials>,
    db: web::Data<Mutex<Db>>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    let email = normalize_email(&body.email)?;
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password = body.password.clone();
    let password_hash = web::block(move || hash_password(&password)).await??;
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        password_hash,
        created_at: ms_since_epoch(Utc::now()),
    };

    let mut db = db.lock()?;
    let Some(user) = db.create_user(&user)? else {
        return Err(AppError::Conflict("Email already registered".to_string()));
    };
    let token = start_session(&mut db, &user.id, &config)?;
    info!("New account {}", user.id);

    Ok(HttpResponse::Created()
        .cookie(session_cookie(&token, &config))
        .json(UserResponse { user: user.info() }))
}

#[post("/api/auth/login")]
async fn login(
    body: web::Json<Credentials>,
    db: web::Data<Mutex<Db>>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    let email = body.email.trim().to_lowercase();

    let user = db.lock()?.user_by_email(&email)?;
    let password = body.password.clone();
    let user = web::block(move || {
        // unknown emails still pay for a verify
        let hash = user.as_ref().map_or(dummy_hash(), |u| u.password_hash.as_str());
        let valid = verify_password(&password, hash);
        user.filter(|_| valid)
    })
    .await?;
    let Some(user) = user else {
        warn!("Failed login attempt");
        return Err(AppError::Unauthorized);
    };

    let mut db = db.lock()?;
    let token = start_session(&mut db, &user.id, &config)?;

    Ok(HttpResponse::Ok()
        .cookie(session_cookie(&token, &config))
        .json(UserResponse { user: user.info() }))
}

#[post("/api/auth/logout")]
async fn logout(req: HttpRequest, db: web::Data<Mutex<Db>>) -> AppResult<HttpResponse> {
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        db.lock()?.delete_session(cookie.value())?;
    }

    Ok(HttpResponse::Ok()
        .cookie(removal_cookie())
        .json(SuccessResponse { success: true }))
}

#[get("/api/auth/me")]
async fn me(SessionUser(user): SessionUser) -> web::Json<UserResponse> {
    web::Json(UserResponse { user: user.info() })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(signup)
        .service(login)
        .service(logout)
        .service(me);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::testing::state;
    use crate::web::test_app;
    use actix_web::http::StatusCode;
    use actix_web::test as atest;
    use serde_json::json;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email(" Alice@Example.COM ").unwrap(), "alice@example.com");
        assert!(normalize_email("alice").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("alice@").is_err());
    }

    #[actix_web::test]
    async fn signup_login_logout() {
        let (db, config) = state();
        let app = test_app!(db, config);
        let creds = json!({ "email": "Alice@example.com", "password": "hunter2hunter2" });

        let req = atest::TestRequest::post()
            .uri("/api/auth/signup")
            .set_json(&creds)
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert!(resp.response().cookies().any(|c| c.name() == SESSION_COOKIE));

        let req = atest::TestRequest::post()
            .uri("/api/auth/signup")
            .set_json(&creds)
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = atest::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "alice@example.com", "password": "wrong-password" }))
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = atest::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(&creds)
            .to_request();
        let resp = atest::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .unwrap()
            .into_owned();

        let req = atest::TestRequest::get()
            .uri("/api/auth/me")
            .cookie(cookie.clone())
            .to_request();
        let current: UserResponse = atest::call_and_read_body_json(&app, req).await;
        assert_eq!(current.user.email, "alice@example.com");

        let req = atest::TestRequest::post()
            .uri("/api/auth/logout")
            .cookie(cookie.clone())
            .to_request();
        assert!(atest::call_service(&app, req).await.status().is_success());

        let req = atest::TestRequest::get()
            .uri("/api/auth/me")
            .cookie(cookie)
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn unknown_email_is_unauthorized() {
        assert!(verify_password("lumy-dummy-password", dummy_hash()));

        let (db, config) = state();
        let app = test_app!(db, config);

        let req = atest::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "nobody@example.com", "password": "lumy-dummy-password" }))
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn signup_rejects_weak_input() {
        let (db, config) = state();
        let app = test_app!(db, config);

        let req = atest::TestRequest::post()
            .uri("/api/auth/signup")
            .set_json(json!({ "email": "bob@example.com", "password": "short" }))
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = atest::TestRequest::post()
            .uri("/api/auth/signup")
            .set_json(json!({ "email": "not-an-email", "password": "long enough" }))
            .to_request();
        assert_eq!(atest::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}

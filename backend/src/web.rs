use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::{
    get,
    http::header,
    middleware::Logger,
    web::{self, Data},
    App, HttpResponse, HttpServer, Responder,
};
use log::info;

use crate::config::Config;
use crate::db::Db;
use crate::error::AppError;
use crate::{account, api};

const JSON_LIMIT: usize = 4 * 1024 * 1024; // display previews are inline data URLs

#[get("/")]
async fn hello() -> impl Responder {
    HttpResponse::Ok().body("lumy backend")
}

/// Malformed bodies become a 400 in the same `{"error": ...}` shape as every other failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_LIMIT)
        .error_handler(|err, _req| AppError::BadRequest(format!("Invalid request data: {err}")).into())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(hello)
        .configure(account::configure)
        .configure(api::configure);
}

pub async fn new_http_server(config: Config, db: Db) -> std::io::Result<()> {
    let bind = (config.bind_addr.clone(), config.port);
    let db = Data::new(Mutex::new(db));
    let config = Data::new(config);

    info!("Listening on {}:{}", bind.0, bind.1);
    HttpServer::new(move || {
        App::new()
            .app_data(db.clone())
            .app_data(config.clone())
            .app_data(json_config())
            .configure(configure)
            .wrap(
                Cors::default()
                    .allowed_origin(&config.frontend_origin) // dashboard
                    .allowed_methods(vec!["GET", "POST", "PUT"])
                    .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT])
                    .allowed_header(header::CONTENT_TYPE)
                    .supports_credentials()
                    .max_age(3600),
            )
            .wrap(Logger::default())
    })
    .bind(bind)?
    .run()
    .await
}

/// Builds an initialized test service over the given app data.
#[cfg(test)]
macro_rules! test_app {
    ($db:expr, $config:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($db.clone())
                .app_data($config.clone())
                .app_data($crate::web::json_config())
                .configure($crate::web::configure),
        )
        .await
    };
}

#[cfg(test)]
pub(crate) use test_app;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use actix_web::{cookie::Cookie, web::Data};
    use chrono::{Duration, Utc};

    use crate::auth::{new_session_token, SESSION_COOKIE};
    use crate::config::Config;
    use crate::db::{models::Session, tests::user, Db};
    use crate::utils::ms_since_epoch;

    pub fn state() -> (Data<Mutex<Db>>, Data<Config>) {
        let config = Config::for_tests();
        let db = Db::connect(&config.database_url).unwrap();
        (Data::new(Mutex::new(db)), Data::new(config))
    }

    /// Creates `user_id` and returns a cookie for a fresh session of theirs.
    pub fn signed_in(db: &Data<Mutex<Db>>, user_id: &str) -> Cookie<'static> {
        let mut db = db.lock().unwrap();
        user(&mut db, user_id);

        let now = Utc::now();
        let token = new_session_token();
        db.insert_session(&Session {
            token: token.clone(),
            user_id: user_id.to_owned(),
            created_at: ms_since_epoch(now),
            expires_at: ms_since_epoch(now + Duration::hours(1)),
        })
        .unwrap();

        Cookie::new(SESSION_COOKIE, token)
    }

    pub fn device_key() -> (&'static str, &'static str) {
        ("X-API-KEY", "test-device-key")
    }
}

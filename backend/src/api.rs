use std::sync::Mutex;

use actix_web::{get, post, put, web, Responder};
use chrono::{Duration, Utc};
use common::code::normalize_code;
use common::req::*;
use log::{debug, info};

use crate::auth::{Caller, DeviceKey, SessionUser};
use crate::db::models::{Device, RegistrationCode, StatusRow, User};
use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::utils::ms_since_epoch;

type DbData = web::Data<Mutex<Db>>;

const MAX_CODE_TTL: i64 = 7 * 24 * 3600; // s

/// Device owned by `user`. Devices of other users are reported as missing.
fn owned_device(db: &mut Db, device_id: &str, user: &User) -> AppResult<Device> {
    match db.device(device_id)? {
        Some(device) if device.user_id == user.id => Ok(device),
        _ => Err(AppError::NotFound("Device not found".to_string())),
    }
}

#[get("/api/devices")]
async fn api_devices(SessionUser(user): SessionUser, db: DbData) -> AppResult<impl Responder> {
    let mut db = db.lock()?;

    let devices = db.devices_of(&user.id)?;
    let mut res = Vec::with_capacity(devices.len());
    for device in &devices {
        let current_status = db
            .device_status(&device.device_id)?
            .map(|row| row.to_status())
            .transpose()?;
        res.push(DeviceListEntry {
            device: device.info(),
            current_status,
        });
    }

    Ok(web::Json(res))
}

#[get("/api/devices/{id}/status")]
async fn api_device_status(
    caller: Caller,
    path: web::Path<String>,
    db: DbData,
) -> AppResult<impl Responder> {
    let device_id = path.into_inner();
    let mut db = db.lock()?;

    if let Caller::User(user) = &caller {
        owned_device(&mut db, &device_id, user)?;
    }

    let status = match db.device_status(&device_id)? {
        Some(row) => row.to_status()?,
        None => DeviceStatus::offline(&device_id),
    };

    Ok(web::Json(status))
}

#[post("/api/devices/{id}/status")]
async fn api_report_status(
    _key: DeviceKey,
    path: web::Path<String>,
    report: web::Json<StatusReport>,
    db: DbData,
) -> AppResult<impl Responder> {
    let device_id = path.into_inner();
    debug!("Device {} reported {}", device_id, report.status.as_str());

    let row = StatusRow::from_report(&device_id, &report, Utc::now())?;
    let registered = db
        .lock()?
        .record_status(&row, report.display_preview.as_deref())?;
    if !registered {
        debug!("Stored status of unregistered device {device_id}");
    }

    Ok(web::Json(SuccessResponse { success: true }))
}

#[get("/api/devices/{id}/config")]
async fn api_device_config(
    caller: Caller,
    path: web::Path<String>,
    db: DbData,
) -> AppResult<impl Responder> {
    let device_id = path.into_inner();
    let now = Utc::now();
    let mut db = db.lock()?;

    let config = match &caller {
        Caller::User(user) => owned_device(&mut db, &device_id, user)?.config(now)?,
        Caller::Device => match db.device(&device_id)? {
            Some(device) => device.config(now)?,
            None => DeviceConfig::default_for(&device_id, now),
        },
    };

    Ok(web::Json(config))
}

#[put("/api/devices/{id}/config")]
async fn api_update_device_config(
    SessionUser(user): SessionUser,
    path: web::Path<String>,
    body: web::Json<UpdateConfigRequest>,
    db: DbData,
) -> AppResult<impl Responder> {
    let device_id = path.into_inner();
    let body = body.into_inner();

    let display = body.display;
    if display.width == 0 || display.height == 0 || display.refresh_interval == 0 {
        return Err(AppError::BadRequest(
            "display width, height and refresh_interval must be positive".to_string(),
        ));
    }
    if body.widgets.iter().any(|w| w.id.trim().is_empty()) {
        return Err(AppError::BadRequest("widget id must not be empty".to_string()));
    }

    let mut db = db.lock()?;
    owned_device(&mut db, &device_id, &user)?;

    let config = DeviceConfig {
        device_id: device_id.clone(),
        display,
        widgets: body.widgets,
        updated_at: Utc::now(),
    };
    db.update_device_config(&device_id, &serde_json::to_string(&config).map_err(anyhow::Error::from)?)?;
    info!("Config of {device_id} updated by {}", user.id);

    Ok(web::Json(config))
}

#[put("/api/devices/{id}/name")]
async fn api_set_device_name(
    SessionUser(user): SessionUser,
    path: web::Path<String>,
    body: web::Json<RenameDeviceRequest>,
    db: DbData,
) -> AppResult<impl Responder> {
    let device_id = path.into_inner();
    let name = body.device_name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("device_name must not be empty".to_string()));
    }

    let mut db = db.lock()?;
    owned_device(&mut db, &device_id, &user)?;
    db.update_device_name(&device_id, name)?;

    Ok(web::Json(owned_device(&mut db, &device_id, &user)?.info()))
}

#[get("/api/devices/{id}/registration")]
async fn api_device_registration(
    _key: DeviceKey,
    path: web::Path<String>,
    db: DbData,
) -> AppResult<impl Responder> {
    let device_id = path.into_inner();

    let state = match db.lock()?.device(&device_id)? {
        Some(device) => RegistrationState::from(&device.info()),
        None => RegistrationState::unregistered(&device_id),
    };

    Ok(web::Json(state))
}

#[post("/api/devices/register")]
async fn api_register_code(
    _key: DeviceKey,
    body: web::Json<RegisterCodeRequest>,
    db: DbData,
) -> AppResult<impl Responder> {
    let missing = || AppError::BadRequest("device_id and registration_code are required".to_string());

    let device_id = body
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(missing)?;
    let code = body
        .registration_code
        .as_deref()
        .and_then(normalize_code)
        .ok_or_else(missing)?;
    if !(1..=MAX_CODE_TTL).contains(&body.expires_in) {
        return Err(AppError::BadRequest(format!(
            "expires_in must be between 1 and {MAX_CODE_TTL} seconds"
        )));
    }

    let now = Utc::now();
    let expires_at = now + Duration::seconds(body.expires_in);
    let inserted = db.lock()?.insert_code(&RegistrationCode {
        code: code.clone(),
        device_id: device_id.to_owned(),
        created_at: ms_since_epoch(now),
        expires_at: ms_since_epoch(expires_at),
        claimed_by: None,
        claimed_at: None,
    })?;
    if !inserted {
        return Err(AppError::Conflict("Registration code already exists".to_string()));
    }
    info!("Issued registration code for {device_id}, valid until {expires_at}");

    Ok(web::Json(RegisterCodeResponse {
        success: true,
        code,
        expires_at,
    }))
}

#[post("/api/devices/claim")]
async fn api_claim_device(
    SessionUser(user): SessionUser,
    body: web::Json<ClaimRequest>,
    db: DbData,
) -> AppResult<impl Responder> {
    let code = body
        .code
        .as_deref()
        .and_then(normalize_code)
        .ok_or_else(|| AppError::BadRequest("Code is required".to_string()))?;
    let device_name = body
        .device_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_DEVICE_NAME);

    let device = db
        .lock()?
        .claim_code(&code, &user.id, device_name, Utc::now())?;

    Ok(web::Json(ClaimResponse {
        success: true,
        device: device.info(),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(api_register_code)
        .service(api_claim_device)
        .service(api_devices)
        .service(api_device_status)
        .service(api_report_status)
        .service(api_device_config)
        .service(api_update_device_config)
        .service(api_set_device_name)
        .service(api_device_registration);
}

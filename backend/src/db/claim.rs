use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use log::info;

use super::models::{Device, RegistrationCode};
use super::Db;
use crate::schema::*;
use crate::utils::ms_since_epoch;

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("registration code not found")]
    NotFound,
    #[error("registration code has expired")]
    Expired,
    #[error("registration code was already claimed")]
    AlreadyClaimed,
    #[error("device belongs to another user")]
    Conflict,
    #[error(transparent)]
    Db(#[from] DieselError),
}

impl Db {
    /// Redeems a registration code for `user_id` and hands them the device.
    ///
    /// `code` must already be normalized. The checks and both writes run in a
    /// single immediate transaction, so a code can only be redeemed once even
    /// with concurrent claims.
    pub fn claim_code(
        &mut self,
        code: &str,
        user_id: &str,
        device_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Device, ClaimError> {
        let now_ms = ms_since_epoch(now);

        let device = self.conn.immediate_transaction::<_, ClaimError, _>(|conn| {
            let reg = registration_codes::table
                .find(code)
                .select(RegistrationCode::as_select())
                .first(conn)
                .optional()?
                .ok_or(ClaimError::NotFound)?;

            if reg.is_expired(now) {
                return Err(ClaimError::Expired);
            }
            if reg.is_claimed() {
                return Err(ClaimError::AlreadyClaimed);
            }

            let owner = devices::table
                .find(&reg.device_id)
                .select(devices::user_id)
                .first::<String>(conn)
                .optional()?;
            if owner.is_some_and(|owner| owner != user_id) {
                return Err(ClaimError::Conflict);
            }

            diesel::update(registration_codes::table.find(code))
                .set((
                    registration_codes::claimed_by.eq(user_id),
                    registration_codes::claimed_at.eq(now_ms),
                ))
                .execute(conn)?;

            let device = Device {
                device_id: reg.device_id.clone(),
                user_id: user_id.to_owned(),
                device_name: device_name.to_owned(),
                registered_at: now_ms,
                last_seen: Some(now_ms),
                is_online: true,
                display_preview: None,
                config: None,
            };
            diesel::insert_into(devices::table)
                .values(&device)
                .on_conflict(devices::device_id)
                .do_update()
                .set((
                    devices::user_id.eq(&device.user_id),
                    devices::device_name.eq(&device.device_name),
                    devices::registered_at.eq(now_ms),
                    devices::last_seen.eq(now_ms),
                    devices::is_online.eq(true),
                ))
                .execute(conn)?;

            devices::table
                .find(&reg.device_id)
                .select(Device::as_select())
                .first(conn)
                .map_err(ClaimError::from)
        })?;

        info!("Device {} claimed by user {}", device.device_id, user_id);
        Ok(device)
    }
}

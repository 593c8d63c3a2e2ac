use anyhow::Result;
use chrono::{DateTime, Utc};
use common::req::{DeviceConfig, DeviceInfo, DeviceStatus, StatusReport, UserInfo};
use diesel::prelude::*;

use crate::schema::*;
use crate::utils::{from_ms, ms_since_epoch};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: String,
    pub email: String, // lowercase, unique
    pub password_hash: String,
    pub created_at: i64, // ms
}

impl User {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id.clone(),
            email: self.email.clone(),
            created_at: from_ms(self.created_at),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: i64, // ms
    pub expires_at: i64, // ms
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = devices)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Device {
    pub device_id: String, // unique, key
    pub user_id: String,
    pub device_name: String,
    pub registered_at: i64,     // ms
    pub last_seen: Option<i64>, // ms
    pub is_online: bool,
    pub display_preview: Option<String>,
    pub config: Option<String>, // json DeviceConfig
}

impl Device {
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            device_id: self.device_id.clone(),
            user_id: self.user_id.clone(),
            device_name: self.device_name.clone(),
            registered_at: from_ms(self.registered_at),
            last_seen: self.last_seen.map(from_ms),
            is_online: self.is_online,
            display_preview: self.display_preview.clone(),
        }
    }

    /// Stored config, or the built-in default when the owner never saved one.
    pub fn config(&self, now: DateTime<Utc>) -> Result<DeviceConfig> {
        match &self.config {
            Some(json) => {
                let mut config: DeviceConfig = serde_json::from_str(json)?;
                config.device_id = self.device_id.clone();
                Ok(config)
            }
            None => Ok(DeviceConfig::default_for(&self.device_id, now)),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = device_status)]
#[diesel(primary_key(device_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StatusRow {
    pub device_id: String,
    pub status: String,
    pub last_refresh: Option<String>,
    pub widgets: String, // json
    pub system: String,  // json
    pub updated_at: i64, // ms
}

impl StatusRow {
    pub fn from_report(device_id: &str, report: &StatusReport, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            device_id: device_id.to_owned(),
            status: report.status.as_str().to_owned(),
            last_refresh: report.last_refresh.clone(),
            widgets: serde_json::to_string(&report.widgets)?,
            system: serde_json::to_string(&report.system)?,
            updated_at: ms_since_epoch(now),
        })
    }

    pub fn to_status(&self) -> Result<DeviceStatus> {
        Ok(DeviceStatus {
            device_id: self.device_id.clone(),
            status: self.status.parse().map_err(anyhow::Error::msg)?,
            last_refresh: self.last_refresh.clone(),
            widgets: serde_json::from_str(&self.widgets)?,
            system: serde_json::from_str(&self.system)?,
            updated_at: Some(from_ms(self.updated_at)),
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = registration_codes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RegistrationCode {
    pub code: String, // normalized, key
    pub device_id: String,
    pub created_at: i64, // ms
    pub expires_at: i64, // ms
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>, // ms
}

impl RegistrationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < ms_since_epoch(now)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }
}

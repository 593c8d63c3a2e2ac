use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{Map, Value};

pub const DEFAULT_DEVICE_NAME: &str = "Lumy Display";
pub const DEFAULT_CODE_TTL: i64 = 3600; // s

/// widget name -> whatever state the device reports for it
pub type Widgets = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    #[default]
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Status::Online),
            "offline" => Ok(Status::Offline),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Telemetry pushed by a device. Known keys are typed, everything else is kept as sent.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(from = "Map<String, Value>")]
pub struct SystemInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_temp: Option<f32>, // °C
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f32>, // percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<i64>, // s
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_signal: Option<i32>, // dBm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Map<String, Value>> for SystemInfo {
    fn from(mut extra: Map<String, Value>) -> Self {
        Self {
            cpu_temp: take(&mut extra, "cpu_temp"),
            memory_usage: take(&mut extra, "memory_usage"),
            uptime: take(&mut extra, "uptime"),
            wifi_signal: take(&mut extra, "wifi_signal"),
            mac_address: take(&mut extra, "mac_address"),
            firmware: take(&mut extra, "firmware"),
            timezone: take(&mut extra, "timezone"),
            extra,
        }
    }
}

/// Moves `key` out of `map` if it holds a `T`. Nulls are dropped, values of
/// another type stay in `map`.
fn take<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
    let parsed = match map.get(key)? {
        Value::Null => None,
        value => Some(T::deserialize(value).ok()?),
    };
    map.remove(key);
    parsed
}

/// `null` reads as the default value.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// Latest snapshot reported by a device.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub status: Status,
    pub last_refresh: Option<String>, // as reported by the device
    pub widgets: Widgets,
    pub system: SystemInfo,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    /// What a device that never reported looks like.
    pub fn offline(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_owned(),
            status: Status::Offline,
            last_refresh: None,
            widgets: Widgets::new(),
            system: SystemInfo::default(),
            updated_at: None,
        }
    }
}

/// Body of a status push. Devices also send `device_id` and `timestamp`, both ignored.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct StatusReport {
    pub status: Status,
    #[serde(default)]
    pub last_refresh: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub widgets: Widgets,
    #[serde(default, deserialize_with = "null_as_default")]
    pub system: SystemInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_preview: Option<String>, // data URL
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DeviceInfo {
    pub device_id: String, // unique, key
    pub user_id: String,
    pub device_name: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub display_preview: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct DeviceListEntry {
    #[serde(flatten)]
    pub device: DeviceInfo,
    pub current_status: Option<DeviceStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub refresh_interval: u32, // s
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct WidgetConfig {
    pub id: String,
    pub enabled: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl WidgetConfig {
    fn enabled(id: &str, config: Value) -> Self {
        let config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.to_owned(),
            enabled: true,
            config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DeviceConfig {
    pub device_id: String,
    pub display: DisplayConfig,
    pub widgets: Vec<WidgetConfig>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceConfig {
    /// Config served to devices that have nothing stored yet.
    pub fn default_for(device_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.to_owned(),
            display: DisplayConfig {
                width: 800,
                height: 480,
                refresh_interval: 300,
            },
            widgets: vec![
                WidgetConfig::enabled("clock", serde_json::json!({})),
                WidgetConfig::enabled(
                    "weather",
                    serde_json::json!({ "location": "New York", "units": "metric" }),
                ),
                WidgetConfig::enabled("calendar", serde_json::json!({ "max_events": 5 })),
            ],
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct UpdateConfigRequest {
    pub display: DisplayConfig,
    pub widgets: Vec<WidgetConfig>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RenameDeviceRequest {
    pub device_name: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RegistrationState {
    pub registered: bool,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
}

impl RegistrationState {
    pub fn unregistered(device_id: &str) -> Self {
        Self {
            registered: false,
            device_id: device_id.to_owned(),
            user_id: None,
            device_name: None,
            registered_at: None,
        }
    }
}

impl From<&DeviceInfo> for RegistrationState {
    fn from(device: &DeviceInfo) -> Self {
        Self {
            registered: true,
            device_id: device.device_id.clone(),
            user_id: Some(device.user_id.clone()),
            device_name: Some(device.device_name.clone()),
            registered_at: Some(device.registered_at),
        }
    }
}

fn default_code_ttl() -> i64 {
    DEFAULT_CODE_TTL
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RegisterCodeRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub registration_code: Option<String>,
    #[serde(default = "default_code_ttl")]
    pub expires_in: i64, // s
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RegisterCodeResponse {
    pub success: bool,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct UserResponse {
    pub user: UserInfo,
}

#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

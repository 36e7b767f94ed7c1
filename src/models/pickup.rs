use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use sqlx::FromRow;

use super::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PickupStatus {
    Inactive = 0,
    Pending = 1,
    Confirmed = 2,
    Completed = 3,
    /// Only ever written to `pastpickups`.
    Canceled = 5,
}

impl PickupStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(PickupStatus::Inactive),
            1 => Some(PickupStatus::Pending),
            2 => Some(PickupStatus::Confirmed),
            3 => Some(PickupStatus::Completed),
            5 => Some(PickupStatus::Canceled),
            _ => None,
        }
    }
}

impl Serialize for PickupStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

/// One live pickup request, keyed by phone number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupRecord {
    pub phone_number: String,
    #[serde(skip)]
    pub device_binding: String,
    pub initial_location: Location,
    pub initial_time: NaiveDateTime,
    pub latest_location: Location,
    pub latest_time: NaiveDateTime,
    pub confirm_time: Option<NaiveDateTime>,
    pub complete_time: Option<NaiveDateTime>,
    pub status: PickupStatus,
    #[serde(skip)]
    pub version: i64,
}

impl PickupRecord {
    /// A fresh pending request at version 0, created where the rider currently is.
    pub fn new(phone_number: &str, device_binding: &str, location: Location) -> Self {
        Self {
            phone_number: phone_number.to_string(),
            device_binding: device_binding.to_string(),
            initial_location: location,
            initial_time: location.observed_at,
            latest_location: location,
            latest_time: location.observed_at,
            confirm_time: None,
            complete_time: None,
            status: PickupStatus::Pending,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != PickupStatus::Inactive
    }

    /// Whether a rider presenting `binding` may read this pickup.
    pub fn binding_matches(&self, binding: &str) -> bool {
        self.device_binding.is_empty() || self.device_binding == binding
    }

    /// Whether a request presenting `binding` may take this phone number over.
    /// Covers reinstalls and relaunches of the same app.
    pub fn accepts_binding(&self, binding: &str) -> bool {
        binding.is_empty() || !self.is_active() || self.binding_matches(binding)
    }

    /// Same incarnation of the pickup, as identified by delete statements.
    pub fn same_incarnation(&self, initial_time: NaiveDateTime) -> bool {
        self.initial_time == initial_time
    }
}

/// Row shape shared by `inprogress` and `pastpickups`.
#[derive(Debug, FromRow)]
pub struct PickupRow {
    pub phonenumber: String,
    pub deviceid: String,
    pub initiallatitude: f64,
    pub initiallongitude: f64,
    pub initialheading: f64,
    pub initialtime: NaiveDateTime,
    pub latestlatitude: f64,
    pub latestlongitude: f64,
    pub latestheading: f64,
    pub latesttime: NaiveDateTime,
    pub confirmtime: Option<NaiveDateTime>,
    pub completetime: Option<NaiveDateTime>,
    pub status: i32,
    pub version: i64,
}

impl From<PickupRow> for PickupRecord {
    fn from(row: PickupRow) -> Self {
        let status = PickupStatus::from_code(row.status).unwrap_or_else(|| {
            tracing::warn!("Unknown status {} for {}, treating as inactive", row.status, row.phonenumber);
            PickupStatus::Inactive
        });
        Self {
            // CHAR(10) pads with spaces
            phone_number: row.phonenumber.trim_end().to_string(),
            device_binding: row.deviceid,
            initial_location: Location {
                latitude: row.initiallatitude,
                longitude: row.initiallongitude,
                heading: row.initialheading,
                observed_at: row.initialtime,
            },
            initial_time: row.initialtime,
            latest_location: Location {
                latitude: row.latestlatitude,
                longitude: row.latestlongitude,
                heading: row.latestheading,
                observed_at: row.latesttime,
            },
            latest_time: row.latesttime,
            confirm_time: row.confirmtime,
            complete_time: row.completetime,
            status,
            version: row.version,
        }
    }
}

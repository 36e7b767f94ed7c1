use chrono::NaiveDateTime;
use serde::Serialize;

/// Sentinel written when the device did not report a heading.
pub const HEADING_UNKNOWN: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    #[serde(skip)]
    pub observed_at: NaiveDateTime,
}

impl Location {
    pub fn new(
        latitude: f64,
        longitude: f64,
        heading: Option<f64>,
        observed_at: NaiveDateTime,
    ) -> Self {
        Self {
            latitude,
            longitude,
            heading: heading.unwrap_or(HEADING_UNKNOWN),
            observed_at,
        }
    }

    pub fn heading(&self) -> Option<f64> {
        (self.heading >= 0.0).then_some(self.heading)
    }
}

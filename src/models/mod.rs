pub mod location;
pub mod pickup;

pub use location::{Location, HEADING_UNKNOWN};
pub use pickup::{PickupRecord, PickupRow, PickupStatus};

use chrono::{NaiveDateTime, SubsecRound, Utc};

/// Current UTC time truncated to the microsecond precision Postgres keeps for
/// `TIMESTAMP`, so values compare equal after a round trip.
pub fn timestamp_now() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(6)
}

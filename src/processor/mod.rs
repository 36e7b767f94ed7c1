pub mod pickups;

pub use pickups::{Caller, PickupProcessor, PickupRequest, PickupStats};

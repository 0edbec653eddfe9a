//! Primitives shared by every bulkmail crate: logging, audit events, the
//! clock and tier capabilities, and recipient address validation.

pub mod address;
pub mod audit;
pub mod clock;
pub mod logging;
pub mod tier;

pub use address::{AddressError, validate_recipient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use tier::{Tier, TierProvider};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    /// Run a dispatch cycle immediately, outside the regular schedule
    SendNow,
    Finalised,
}

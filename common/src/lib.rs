//! Countervalues Common Types
//!
//! Shared types used across the countervalues workspace: currencies with
//! their display precision, the canonical currency pair key, and time helpers.

pub mod currency;
pub mod error;
pub mod time;

pub use currency::*;
pub use error::*;
pub use time::*;

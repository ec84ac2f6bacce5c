//! Domain models for the ASHA health record store.

mod outbox;
mod patient;
mod user;

pub use outbox::*;
pub use patient::*;
pub use user::*;

//! Export functionality for sharing patient data.

mod patients;

pub use patients::*;

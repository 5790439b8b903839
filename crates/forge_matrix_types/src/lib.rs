//! Types shared by the forge-matrix crates.

mod normalized_key;
mod pin;

pub use normalized_key::NormalizedKey;
pub use pin::Pin;

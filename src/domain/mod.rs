//! Pure domain layer: types, ports, repository traits, and error kinds.
//! No I/O, no async runtime dependency beyond the trait signatures
//! themselves (same split as `rustrade::domain`).

pub mod errors;
pub mod events;
pub mod ports;
pub mod repositories;
pub mod symbol;
pub mod types;

//! Pure keyspace and binary-version arithmetic. No I/O beyond streaming
//! line counts; every suspension-point-free function here is safe to call
//! from inside a lock.

pub mod errors;
pub mod keyspace;
pub mod version;

pub use errors::MathError;

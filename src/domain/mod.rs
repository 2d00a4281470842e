//! Domain layer: the typed filter model a loop view compiles from.

pub mod conditions;
pub mod dates;
pub mod error;
pub mod query;
pub mod taxonomy;

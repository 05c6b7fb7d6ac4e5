//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A create DTO for inserts

pub mod confirmation;
pub mod dealer;
pub mod status;
pub mod sync_control;

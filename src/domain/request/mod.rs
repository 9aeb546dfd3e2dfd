pub mod entity;
pub mod invariants;

pub use entity::{Command, LimitKind, Request, RequestState};
pub use invariants::validate_request;

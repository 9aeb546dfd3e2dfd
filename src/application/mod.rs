// src/application/mod.rs
//
// Application Layer
//
// ARCHITECTURE:
// - Sits above the services and wires them together
// - Provides the boundary between front-ends (CLI, terminal chamber) and
//   the services
// - Translates errors into replies a requester can read

pub mod error_handling;
pub mod operator;
pub mod state;

pub use error_handling::{ErrorResponse, ErrorType, ToErrorResponse};
pub use operator::{parse_verdict, TerminalOperator};
pub use state::AppState;

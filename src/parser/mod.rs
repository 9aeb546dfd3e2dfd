// src/parser/mod.rs
//
// Request grammar
//
// Pure functions: no I/O, no catalog access. Binding to media happens in
// the resolver.

pub mod bracket;
pub mod request;

pub use bracket::{Bracket, BracketContent, MergePolicy, PostProc};
pub use request::{
    is_command, parse_request, rules_for, CommandRules, ExplicitFlag, GlobalOptions,
    ParsedRequest, QuerySegment,
};

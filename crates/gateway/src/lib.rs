//! `tam-gateway` — the HTTP facade and scheduler worker binary,
//! structured as a library so its pieces are independently testable.

pub mod api;
pub mod cli;
pub mod runtime;
pub mod state;

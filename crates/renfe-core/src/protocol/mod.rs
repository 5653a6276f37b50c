//! Remote-call protocol codec
//!
//! This module contains the pieces that speak the DWR plain-call protocol:
//! - `encode`: build request batches
//! - `decode`: strip reply framing and extract per-call outcomes
//! - `literal`: the permissive object-literal grammar used by replies

pub mod decode;
pub mod encode;
pub mod literal;

// Re-export main codec types
pub use decode::{decode_call, decode_reply, CallOutcome, CallReply, Framing};
pub use encode::{generate_id, trains_list, update_session_objects, Batch, BatchKind, Param, RemoteCall};
pub use literal::{parse_literal, Value};

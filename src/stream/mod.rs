//! Stream envelope (C2): the canonical `StreamEvent` record and its
//! serialization to SSE lines, plus the stream multiplexer (C8).

mod event;
mod multiplexer;

pub use event::{stage_description, StreamEvent, SENTINEL_FRAME};
pub use multiplexer::{multiplex, MultiplexOutcome};

//! C1 — Trace Client: authenticated pull of recent traces from the
//! external observability API, with rate limiting and dedup built in.

mod client;
mod dedup;
mod rate_limit;

pub use client::{FetchResult, TraceClient};

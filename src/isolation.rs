//! Task isolation layer (C4): the per-conversation lock contract, the
//! circuit breaker, and the per-caller rate limiter. The per-conversation
//! lock itself is a `tokio::sync::Mutex<ConversationTask>` owned by
//! `store::ConversationStore`; this module holds the two process-wide
//! primitives plus the classifier that turns adapter/host failures into
//! stable error codes.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{AdapterError, ErrorCode, IsolationError};

const FAILURE_THRESHOLD: u32 = 5;
const COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    /// A half-open breaker admits exactly one probe; this flags it in
    /// flight so concurrent callers don't all slip through as "the probe".
    probe_in_flight: bool,
}

/// Three-state circuit breaker guarding calls into one external adapter.
/// Three states: `{closed, open, half-open}`, `failure_threshold=5, cooldown=60s`.
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Returns `Ok(())` if a call may proceed, `Err` if the breaker is
    /// open (and the cooldown hasn't yet elapsed).
    pub fn check(&self) -> Result<(), IsolationError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(IsolationError::CircuitOpen {
                        service: self.name.clone(),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= COOLDOWN {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(IsolationError::CircuitOpen {
                        service: self.name.clone(),
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= FAILURE_THRESHOLD {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}

/// Guards calls into each of the four external services with its own
/// breaker, since one upstream's outage shouldn't trip the others.
pub struct CircuitBreakers {
    pub chat: CircuitBreaker,
    pub web_search: CircuitBreaker,
    pub doc_retrieval: CircuitBreaker,
    pub graph_rag: CircuitBreaker,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self {
            chat: CircuitBreaker::new("chat"),
            web_search: CircuitBreaker::new("web_search"),
            doc_retrieval: CircuitBreaker::new("doc_retrieval"),
            graph_rag: CircuitBreaker::new("graph_rag"),
        }
    }
}

type KeyedLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-caller token bucket: `max=100 tokens, window=60s`, keyed by
/// `user_id` alone — a single documented key
/// per deployment; keying by conversation id would let one caller bypass
/// the limiter by minting fresh conversation ids).
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, KeyedLimiter>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn quota() -> Quota {
        Quota::per_minute(NonZeroU32::new(100).unwrap())
    }

    /// Checked before accepting a new stream for `user_id`.
    pub fn check(&self, user_id: &str) -> Result<(), IsolationError> {
        let mut buckets = self.buckets.lock().unwrap();
        let limiter = buckets
            .entry(user_id.to_string())
            .or_insert_with(|| GovernorLimiter::direct(Self::quota()));
        limiter.check().map_err(|_| IsolationError::RateLimited {
            key: user_id.to_string(),
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps an adapter-layer failure to a stable error code and an advisory
/// message. Never panics; this is the boundary that turns exceptions into
/// a single well-formed `error` event (the breaker's error classifier).
pub fn classify_adapter_error(err: &AdapterError) -> (ErrorCode, String) {
    (err.classify(), err.to_string())
}

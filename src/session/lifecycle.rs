use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::transport::{ChatPayload, ChatResult};
use thiserror::Error;

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

const PENDING_LABEL: &str = "Thinking";
const PENDING_DOT_CYCLE: u32 = 4;

/// Binds a submitted request to its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(u64);

impl CorrelationId {
    fn next() -> Self {
        Self(NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    InFlight {
        started_at: Instant,
        correlation_id: CorrelationId,
    },
    Succeeded {
        text: String,
    },
    Failed {
        reason: String,
    },
}

impl RequestState {
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::InFlight { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("a request is already in flight")]
    AlreadyInFlight,
    #[error("request {correlation_id} was already completed")]
    DoubleCompletion { correlation_id: CorrelationId },
    #[error("request {correlation_id} is not in flight")]
    NotInFlight { correlation_id: CorrelationId },
    #[error("completion for {received} does not match in-flight request {expected}")]
    CorrelationMismatch {
        expected: CorrelationId,
        received: CorrelationId,
    },
    #[error("no completed request to acknowledge")]
    NothingToAcknowledge,
}

/// Display-only progress for a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingIndicator {
    pub tick: u32,
}

impl PendingIndicator {
    pub const fn new(tick: u32) -> Self {
        Self { tick }
    }

    pub fn label(self) -> String {
        let dots = (self.tick % PENDING_DOT_CYCLE) as usize;
        format!("{PENDING_LABEL}{}", ".".repeat(dots))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

/// Periodic timer driving the pending indicator. Implementations call `tick`
/// every `interval` until it returns [`TickFlow::Stop`].
pub trait PendingTicker: Send + Sync {
    fn start(&self, interval: Duration, tick: Box<dyn FnMut() -> TickFlow + Send>);
}

#[derive(Debug)]
struct LifecycleInner {
    state: RequestState,
    last_correlation: Option<CorrelationId>,
    tick: u32,
}

fn lock_inner(inner: &Mutex<LifecycleInner>) -> MutexGuard<'_, LifecycleInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("request lifecycle lock was poisoned; continuing with inner state");
            poisoned.into_inner()
        }
    }
}

/// Single-slot request state machine:
/// `Idle -> InFlight -> Succeeded | Failed -> Idle`.
pub struct RequestLifecycle {
    inner: Arc<Mutex<LifecycleInner>>,
    ticker: Arc<dyn PendingTicker>,
    tick_interval: Duration,
}

impl RequestLifecycle {
    pub fn new(ticker: Arc<dyn PendingTicker>, tick_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LifecycleInner {
                state: RequestState::Idle,
                last_correlation: None,
                tick: 0,
            })),
            ticker,
            tick_interval,
        }
    }

    pub fn state(&self) -> RequestState {
        lock_inner(&self.inner).state.clone()
    }

    pub fn is_idle(&self) -> bool {
        lock_inner(&self.inner).state.is_idle()
    }

    /// Moves `Idle -> InFlight` and starts the pending ticker.
    ///
    /// `on_tick` runs on the ticker's thread while the lifecycle lock is held,
    /// and only while this request is still in flight. Returning
    /// [`TickFlow::Stop`] ends the ticker early.
    pub fn submit<F>(
        &self,
        payload: &ChatPayload,
        mut on_tick: F,
    ) -> Result<CorrelationId, LifecycleError>
    where
        F: FnMut(PendingIndicator) -> TickFlow + Send + 'static,
    {
        let correlation_id = {
            let mut inner = lock_inner(&self.inner);
            if !inner.state.is_idle() {
                tracing::warn!(state = ?inner.state, "rejecting submit while a request is outstanding");
                return Err(LifecycleError::AlreadyInFlight);
            }
            let correlation_id = CorrelationId::next();
            inner.state = RequestState::InFlight {
                started_at: Instant::now(),
                correlation_id,
            };
            inner.last_correlation = Some(correlation_id);
            inner.tick = 0;
            correlation_id
        };

        tracing::info!(
            %correlation_id,
            images = payload.images.len(),
            text_chars = payload.text.chars().count(),
            "request submitted"
        );

        let inner = Arc::clone(&self.inner);
        self.ticker.start(
            self.tick_interval,
            Box::new(move || {
                let mut guard = lock_inner(&inner);
                match guard.state {
                    RequestState::InFlight {
                        correlation_id: current,
                        ..
                    } if current == correlation_id => {
                        guard.tick = guard.tick.wrapping_add(1);
                        on_tick(PendingIndicator::new(guard.tick))
                    }
                    _ => {
                        tracing::trace!(%correlation_id, "pending ticker stopped");
                        TickFlow::Stop
                    }
                }
            }),
        );

        Ok(correlation_id)
    }

    /// Records the outcome of the in-flight request. A second completion for
    /// the same request fails with [`LifecycleError::DoubleCompletion`].
    pub fn complete(
        &self,
        correlation_id: CorrelationId,
        result: &ChatResult,
    ) -> Result<(), LifecycleError> {
        let mut inner = lock_inner(&self.inner);
        match &inner.state {
            RequestState::InFlight {
                correlation_id: expected,
                started_at,
            } => {
                if *expected != correlation_id {
                    return Err(LifecycleError::CorrelationMismatch {
                        expected: *expected,
                        received: correlation_id,
                    });
                }
                let elapsed_ms = started_at.elapsed().as_millis() as u64;
                inner.state = match result {
                    Ok(text) => {
                        tracing::info!(%correlation_id, elapsed_ms, "request succeeded");
                        RequestState::Succeeded { text: text.clone() }
                    }
                    Err(failure) => {
                        tracing::warn!(%correlation_id, elapsed_ms, %failure, "request failed");
                        RequestState::Failed {
                            reason: failure.to_string(),
                        }
                    }
                };
                Ok(())
            }
            RequestState::Succeeded { .. } | RequestState::Failed { .. } => {
                Err(LifecycleError::DoubleCompletion { correlation_id })
            }
            RequestState::Idle if inner.last_correlation == Some(correlation_id) => {
                Err(LifecycleError::DoubleCompletion { correlation_id })
            }
            RequestState::Idle => Err(LifecycleError::NotInFlight { correlation_id }),
        }
    }

    /// Returns a completed request to `Idle`, yielding its final state.
    pub fn acknowledge(&self) -> Result<RequestState, LifecycleError> {
        let mut inner = lock_inner(&self.inner);
        match inner.state {
            RequestState::Succeeded { .. } | RequestState::Failed { .. } => {
                Ok(std::mem::replace(&mut inner.state, RequestState::Idle))
            }
            _ => Err(LifecycleError::NothingToAcknowledge),
        }
    }
}

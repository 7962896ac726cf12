//! Boundary to the remote assistant. The session only sees [`Transport`];
//! encoding and endpoint addressing live in the implementations.

use std::fmt;

use crate::capture::CapturedImage;
use thiserror::Error;

mod openai;

pub use openai::{OpenAiSettings, OpenAiTransport};

/// One outgoing message: the typed text plus every image queued for it.
#[derive(Debug, Clone, Default)]
pub struct ChatPayload {
    pub text: String,
    pub images: Vec<CapturedImage>,
}

impl ChatPayload {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub status: Option<u16>,
    pub reason: String,
}

impl TransportFailure {
    pub fn new(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "status {status}: {}", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

impl std::error::Error for TransportFailure {}

pub type ChatResult = Result<String, TransportFailure>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),
}

/// Blocking chat call. Implementations are invoked from a worker thread.
pub trait Transport: Send + Sync + 'static {
    fn post_chat(&self, payload: ChatPayload) -> ChatResult;
}

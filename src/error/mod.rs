use crate::capture::CaptureError;
use crate::geometry::GeometryError;
use crate::session::{LifecycleError, SessionError, TranscriptError};
use crate::storage::StorageError;
use crate::transport::TransportError;
use thiserror::Error;

pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

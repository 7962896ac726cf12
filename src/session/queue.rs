use std::sync::{Mutex, MutexGuard};

use crate::capture::{CapturedImage, ImageId};

/// Images waiting to go out with the next message, in capture order.
///
/// Every mutation happens under one lock, so a drain never loses an image
/// appended concurrently and never returns an image that a concurrent remove
/// already took out.
#[derive(Debug, Default)]
pub struct ImageQueue {
    pending: Mutex<Vec<CapturedImage>>,
}

impl ImageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CapturedImage>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("image queue lock was poisoned; continuing with inner state");
                poisoned.into_inner()
            }
        }
    }

    pub fn append(&self, image: CapturedImage) {
        let mut pending = self.lock();
        pending.push(image);
        tracing::debug!(queued = pending.len(), "image queued");
    }

    /// Returns `false` when no queued image has `id`; that is not an error
    /// since a remove can race a send that already drained it.
    pub fn remove(&self, id: ImageId) -> bool {
        let mut pending = self.lock();
        let Some(index) = pending.iter().position(|image| image.id() == id) else {
            return false;
        };
        pending.remove(index);
        true
    }

    pub fn drain(&self) -> Vec<CapturedImage> {
        std::mem::take(&mut *self.lock())
    }

    /// Puts previously drained images back ahead of anything queued since.
    pub fn restore_front(&self, images: Vec<CapturedImage>) {
        if images.is_empty() {
            return;
        }
        let mut pending = self.lock();
        let newer = std::mem::replace(&mut *pending, images);
        pending.extend(newer);
    }

    pub fn snapshot(&self) -> Vec<CapturedImage> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::session::{CompletionCallback, RequestDispatcher};
use crate::transport::{ChatPayload, Transport, TransportFailure};

pub(super) const ACTION_RESULT_POLL_INTERVAL: Duration = Duration::from_millis(24);

const WORKER_GONE_REASON: &str = "worker exited without a result";

/// Runs `work` on a fresh thread and hands its result to `on_result` on the
/// GTK main loop. `on_result` receives `None` when the worker died before
/// producing anything.
pub(super) fn spawn_worker_action<T, W, H>(work: W, on_result: H)
where
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
    H: FnOnce(Option<T>) + 'static,
{
    let (tx, rx) = mpsc::channel::<T>();
    std::thread::spawn(move || {
        let result = work();
        let _ = tx.send(result);
    });

    let mut on_result = Some(on_result);
    gtk4::glib::timeout_add_local(ACTION_RESULT_POLL_INTERVAL, move || {
        let delivered = match rx.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => return gtk4::glib::ControlFlow::Continue,
            Err(mpsc::TryRecvError::Disconnected) => None,
        };
        if let Some(on_result) = on_result.take() {
            on_result(delivered);
        }
        gtk4::glib::ControlFlow::Break
    });
}

/// Runs each chat request on its own worker thread.
///
/// `dispatch` must be called on the GTK main thread; completions are
/// delivered there too.
pub(super) struct WorkerDispatcher<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> WorkerDispatcher<T> {
    pub(super) fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }
}

impl<T: Transport> RequestDispatcher for WorkerDispatcher<T> {
    fn dispatch(&self, payload: ChatPayload, on_complete: CompletionCallback) {
        let transport = Arc::clone(&self.transport);
        spawn_worker_action(
            move || transport.post_chat(payload),
            move |result| {
                let result = result.unwrap_or_else(|| {
                    tracing::error!("chat worker exited without a result");
                    Err(TransportFailure::new(None, WORKER_GONE_REASON))
                });
                on_complete(result);
            },
        );
    }
}

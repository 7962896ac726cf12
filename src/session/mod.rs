//! Conversation state shared by the UI thread and transport workers.

mod lifecycle;
mod queue;
mod transcript;

pub use lifecycle::{
    CorrelationId, LifecycleError, PendingIndicator, PendingTicker, RequestLifecycle,
    RequestState, TickFlow,
};
pub use queue::ImageQueue;
pub use transcript::{Sender, Transcript, TranscriptEntry, TranscriptError};

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::capture::{CaptureError, CapturedImage, ImageId};
use crate::transport::{ChatPayload, ChatResult};
use thiserror::Error;

pub type CompletionCallback = Box<dyn FnOnce(ChatResult) + Send>;

/// Runs a chat request off the caller's thread and reports back exactly once.
pub trait RequestDispatcher: Send + Sync {
    fn dispatch(&self, payload: ChatPayload, on_complete: CompletionCallback);
}

/// Told whenever the transcript changes. Called while session state may be
/// locked, so implementations must not call back into the session.
pub trait RenderSink: Send + Sync {
    fn transcript_changed(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { correlation_id: CorrelationId },
    NothingToSend,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

pub struct SessionCollaborators {
    pub dispatcher: Arc<dyn RequestDispatcher>,
    pub ticker: Arc<dyn PendingTicker>,
    pub sink: Arc<dyn RenderSink>,
    pub tick_interval: Duration,
}

struct SessionShared {
    queue: ImageQueue,
    lifecycle: RequestLifecycle,
    transcript: Transcript,
    dispatcher: Arc<dyn RequestDispatcher>,
    sink: Arc<dyn RenderSink>,
    send_gate: Mutex<()>,
}

/// One running conversation: pending images, the request slot and the
/// transcript. Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct ConversationSession {
    shared: Arc<SessionShared>,
}

impl ConversationSession {
    pub fn new(collaborators: SessionCollaborators) -> Self {
        let SessionCollaborators {
            dispatcher,
            ticker,
            sink,
            tick_interval,
        } = collaborators;
        Self {
            shared: Arc::new(SessionShared {
                queue: ImageQueue::new(),
                lifecycle: RequestLifecycle::new(ticker, tick_interval),
                transcript: Transcript::new(),
                dispatcher,
                sink,
                send_gate: Mutex::new(()),
            }),
        }
    }

    fn send_gate(&self) -> MutexGuard<'_, ()> {
        match self.shared.send_gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn attach_image(&self, image: CapturedImage) {
        tracing::info!(
            image = %image.id(),
            width = image.width(),
            height = image.height(),
            "image attached"
        );
        self.shared.queue.append(image);
    }

    pub fn remove_image(&self, id: ImageId) -> bool {
        let removed = self.shared.queue.remove(id);
        if !removed {
            tracing::debug!(image = %id, "remove ignored; image is no longer pending");
        }
        removed
    }

    pub fn pending_images(&self) -> Vec<CapturedImage> {
        self.shared.queue.snapshot()
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.shared.transcript.snapshot()
    }

    pub fn request_state(&self) -> RequestState {
        self.shared.lifecycle.state()
    }

    /// Sends `text` with every pending image as one message.
    ///
    /// Rejected with [`LifecycleError::AlreadyInFlight`] before anything is
    /// drained or recorded while another request is outstanding.
    pub fn send(&self, text: &str) -> SessionResult<SendOutcome> {
        let _gate = self.send_gate();
        let shared = &self.shared;

        if !shared.lifecycle.is_idle() {
            tracing::warn!("send rejected; a request is already outstanding");
            return Err(LifecycleError::AlreadyInFlight.into());
        }

        let text = text.trim();
        let payload = ChatPayload {
            text: text.to_string(),
            images: shared.queue.drain(),
        };
        if payload.is_empty() {
            tracing::debug!("nothing to send");
            return Ok(SendOutcome::NothingToSend);
        }
        let images = payload.images.clone();

        let weak = Arc::downgrade(shared);
        let correlation_id = match shared
            .lifecycle
            .submit(&payload, move |indicator| on_pending_tick(&weak, indicator))
        {
            Ok(id) => id,
            Err(err) => {
                shared.queue.restore_front(images);
                return Err(err.into());
            }
        };

        let user_text = (!text.is_empty()).then(|| TranscriptEntry::text(Sender::You, text));
        shared.transcript.append_all(
            user_text.into_iter().chain(images.into_iter().map(|image| {
                TranscriptEntry::ImageRef {
                    sender: Sender::You,
                    image,
                }
            })),
        );
        if let Err(err) = shared
            .transcript
            .push_loading_marker(PendingIndicator::default().label())
        {
            tracing::error!(%correlation_id, ?err, "failed to add loading marker");
        }
        shared.sink.transcript_changed();

        let weak = Arc::downgrade(shared);
        shared.dispatcher.dispatch(
            payload,
            Box::new(move |result| match weak.upgrade() {
                Some(shared) => {
                    let _ = ConversationSession { shared }.on_response(correlation_id, result);
                }
                None => tracing::debug!(%correlation_id, "session closed before response"),
            }),
        );

        Ok(SendOutcome::Sent { correlation_id })
    }

    /// Applies a transport outcome. Safe to call from any thread.
    pub fn on_response(&self, correlation_id: CorrelationId, result: ChatResult) -> SessionResult<()> {
        let shared = &self.shared;
        if let Err(err) = shared.lifecycle.complete(correlation_id, &result) {
            tracing::error!(%correlation_id, %err, "rejected response");
            return Err(err.into());
        }

        let entry = match &result {
            Ok(text) => TranscriptEntry::text(Sender::Assistant, text.as_str()),
            Err(failure) => TranscriptEntry::error(Sender::Assistant, failure),
        };
        if !shared.transcript.replace_loading_marker(entry) {
            tracing::warn!(%correlation_id, "loading marker missing; response appended");
        }

        shared.lifecycle.acknowledge()?;
        shared.sink.transcript_changed();
        Ok(())
    }

    /// Records a failed capture as a system entry. The pending queue is
    /// left alone.
    pub fn report_capture_failure(&self, error: &CaptureError) {
        tracing::warn!(%error, "capture failed");
        self.shared
            .transcript
            .append(TranscriptEntry::error(Sender::System, format!("capture failed: {error}")));
        self.shared.sink.transcript_changed();
    }
}

fn on_pending_tick(shared: &Weak<SessionShared>, indicator: PendingIndicator) -> TickFlow {
    let Some(shared) = shared.upgrade() else {
        return TickFlow::Stop;
    };
    if shared
        .transcript
        .update_loading_marker(indicator.label(), indicator.tick)
    {
        shared.sink.transcript_changed();
    }
    TickFlow::Continue
}

#[cfg(test)]
mod tests {
    use super::lifecycle::tests::ManualTicker;
    use super::*;
    use crate::transport::TransportFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[derive(Default)]
    struct ManualDispatcher {
        jobs: Mutex<Vec<(ChatPayload, CompletionCallback)>>,
    }

    impl ManualDispatcher {
        fn take(&self) -> Vec<(ChatPayload, CompletionCallback)> {
            std::mem::take(&mut *self.jobs.lock().expect("jobs lock"))
        }

        fn pending(&self) -> usize {
            self.jobs.lock().expect("jobs lock").len()
        }
    }

    impl RequestDispatcher for ManualDispatcher {
        fn dispatch(&self, payload: ChatPayload, on_complete: CompletionCallback) {
            self.jobs
                .lock()
                .expect("jobs lock")
                .push((payload, on_complete));
        }
    }

    /// Completes on a separate thread, the way the GTK worker does.
    struct ThreadDispatcher {
        reply: ChatResult,
    }

    impl RequestDispatcher for ThreadDispatcher {
        fn dispatch(&self, _payload: ChatPayload, on_complete: CompletionCallback) {
            let reply = self.reply.clone();
            std::thread::spawn(move || on_complete(reply));
        }
    }

    #[derive(Default)]
    struct CountingSink {
        changes: AtomicUsize,
    }

    impl CountingSink {
        fn changes(&self) -> usize {
            self.changes.load(Ordering::SeqCst)
        }
    }

    impl RenderSink for CountingSink {
        fn transcript_changed(&self) {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        session: ConversationSession,
        dispatcher: Arc<ManualDispatcher>,
        ticker: Arc<ManualTicker>,
        sink: Arc<CountingSink>,
    }

    fn harness() -> Harness {
        let dispatcher = Arc::new(ManualDispatcher::default());
        let ticker = Arc::new(ManualTicker::default());
        let sink = Arc::new(CountingSink::default());
        let session = ConversationSession::new(SessionCollaborators {
            dispatcher: dispatcher.clone(),
            ticker: ticker.clone(),
            sink: sink.clone(),
            tick_interval: Duration::from_millis(500),
        });
        Harness {
            session,
            dispatcher,
            ticker,
            sink,
        }
    }

    fn image() -> CapturedImage {
        CapturedImage::new(image::RgbaImage::new(4, 3))
    }

    fn render(entries: &[TranscriptEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| match entry {
                TranscriptEntry::Text { sender, body } => format!("{sender}: {body}"),
                TranscriptEntry::ImageRef { sender, image } => format!("{sender}: [{}]", image.id()),
                TranscriptEntry::LoadingMarker { label, .. } => format!("<{label}>"),
            })
            .collect()
    }

    fn sent_id(outcome: SendOutcome) -> CorrelationId {
        match outcome {
            SendOutcome::Sent { correlation_id } => correlation_id,
            SendOutcome::NothingToSend => panic!("expected a sent request"),
        }
    }

    #[test]
    fn send_with_image_then_response_replaces_marker() {
        let h = harness();
        let shot = image();
        h.session.attach_image(shot.clone());

        let id = sent_id(h.session.send("what is this?").expect("send should succeed"));
        assert!(h.session.pending_images().is_empty());
        assert!(matches!(
            h.session.request_state(),
            RequestState::InFlight { correlation_id, .. } if correlation_id == id
        ));
        assert_eq!(
            render(&h.session.snapshot()),
            vec![
                "You: what is this?".to_string(),
                format!("You: [{}]", shot.id()),
                "<Thinking>".to_string(),
            ]
        );

        let (payload, complete) = h.dispatcher.take().pop().expect("request dispatched");
        assert_eq!(payload.text, "what is this?");
        assert_eq!(payload.images.len(), 1);
        assert_eq!(payload.images[0].id(), shot.id());

        assert_eq!(h.ticker.fire(), 1);
        assert_eq!(
            render(&h.session.snapshot()).last().map(String::as_str),
            Some("<Thinking.>")
        );

        complete(Ok("a cat".to_string()));
        assert_eq!(h.session.request_state(), RequestState::Idle);
        assert_eq!(
            render(&h.session.snapshot()),
            vec![
                "You: what is this?".to_string(),
                format!("You: [{}]", shot.id()),
                "Assistant: a cat".to_string(),
            ]
        );
        assert_eq!(h.ticker.fire(), 0);
        assert_eq!(h.session.snapshot().len(), 3);
        assert!(h.sink.changes() >= 3);
    }

    #[test]
    fn blank_text_without_images_sends_nothing() {
        let h = harness();
        assert_eq!(
            h.session.send("   ").expect("send should not fail"),
            SendOutcome::NothingToSend
        );
        assert_eq!(h.dispatcher.pending(), 0);
        assert!(h.session.snapshot().is_empty());
        assert_eq!(h.session.request_state(), RequestState::Idle);
    }

    #[test]
    fn image_only_send_records_no_text_entry() {
        let h = harness();
        let shot = image();
        h.session.attach_image(shot.clone());

        h.session.send("").expect("send should succeed");
        assert_eq!(
            render(&h.session.snapshot()),
            vec![format!("You: [{}]", shot.id()), "<Thinking>".to_string()]
        );
    }

    #[test]
    fn send_while_in_flight_is_rejected_without_partial_effects() {
        let h = harness();
        h.session.send("first").expect("send should succeed");
        let queued = image();
        h.session.attach_image(queued.clone());
        let before = h.session.snapshot().len();

        let err = h
            .session
            .send("second")
            .expect_err("second send should be rejected");
        assert!(matches!(
            err,
            SessionError::Lifecycle(LifecycleError::AlreadyInFlight)
        ));
        assert_eq!(h.session.snapshot().len(), before);
        assert_eq!(h.dispatcher.pending(), 1);
        assert_eq!(
            h.session
                .pending_images()
                .iter()
                .map(CapturedImage::id)
                .collect::<Vec<_>>(),
            vec![queued.id()]
        );
    }

    #[test]
    fn transport_failure_becomes_error_entry_and_session_recovers() {
        let h = harness();
        h.session.send("hello").expect("send should succeed");
        let (_, complete) = h.dispatcher.take().pop().expect("request dispatched");

        complete(Err(TransportFailure::new(Some(500), "server error")));
        assert_eq!(
            render(&h.session.snapshot()),
            vec!["You: hello", "Assistant: Error: status 500: server error"]
        );
        assert_eq!(h.session.request_state(), RequestState::Idle);

        h.session.send("again").expect("session should accept a new send");
        assert_eq!(h.dispatcher.pending(), 1);
    }

    #[test]
    fn duplicate_response_is_rejected_and_transcript_unchanged() {
        let h = harness();
        let id = sent_id(h.session.send("hi").expect("send should succeed"));
        h.session
            .on_response(id, Ok("hello".to_string()))
            .expect("first response should apply");
        let before = h.session.snapshot().len();

        let err = h
            .session
            .on_response(id, Ok("hello again".to_string()))
            .expect_err("second response should be rejected");
        assert!(matches!(
            err,
            SessionError::Lifecycle(LifecycleError::DoubleCompletion { .. })
        ));
        assert_eq!(h.session.snapshot().len(), before);
    }

    #[test]
    fn images_attached_while_in_flight_wait_for_the_next_send() {
        let h = harness();
        h.session.send("first").expect("send should succeed");
        let late = image();
        h.session.attach_image(late.clone());
        let (_, complete) = h.dispatcher.take().pop().expect("request dispatched");
        complete(Ok("ok".to_string()));

        h.session.send("second").expect("send should succeed");
        let (payload, _) = h.dispatcher.take().pop().expect("request dispatched");
        assert_eq!(payload.images.len(), 1);
        assert_eq!(payload.images[0].id(), late.id());
    }

    #[test]
    fn removed_image_is_not_sent() {
        let h = harness();
        let (keep, drop) = (image(), image());
        h.session.attach_image(keep.clone());
        h.session.attach_image(drop.clone());
        assert!(h.session.remove_image(drop.id()));
        assert!(!h.session.remove_image(drop.id()));

        h.session.send("").expect("send should succeed");
        let (payload, _) = h.dispatcher.take().pop().expect("request dispatched");
        assert_eq!(
            payload.images.iter().map(CapturedImage::id).collect::<Vec<_>>(),
            vec![keep.id()]
        );
    }

    #[test]
    fn capture_failure_lands_ahead_of_pending_marker() {
        let h = harness();
        h.session.send("hi").expect("send should succeed");
        let queued = image();
        h.session.attach_image(queued);

        h.session
            .report_capture_failure(&CaptureError::NoFocusedMonitor);
        let entries = render(&h.session.snapshot());
        assert_eq!(entries.len(), 3);
        assert!(entries[1].starts_with("System: Error: capture failed"));
        assert_eq!(entries[2], "<Thinking>");
        assert_eq!(h.session.pending_images().len(), 1);
    }

    #[test]
    fn response_completed_on_another_thread_is_applied() {
        let ticker = Arc::new(ManualTicker::default());
        let (tx, rx) = mpsc::channel();

        struct ChannelSink(Mutex<mpsc::Sender<()>>);
        impl RenderSink for ChannelSink {
            fn transcript_changed(&self) {
                let _ = self.0.lock().expect("sink lock").send(());
            }
        }

        let session = ConversationSession::new(SessionCollaborators {
            dispatcher: Arc::new(ThreadDispatcher {
                reply: Ok("from worker".to_string()),
            }),
            ticker,
            sink: Arc::new(ChannelSink(Mutex::new(tx))),
            tick_interval: Duration::from_millis(500),
        });

        session.send("ping").expect("send should succeed");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !session.request_state().is_idle() {
            rx.recv_timeout(deadline.saturating_duration_since(std::time::Instant::now()))
                .expect("worker should report back");
        }
        assert_eq!(
            render(&session.snapshot()),
            vec!["You: ping", "Assistant: from worker"]
        );
    }

    #[test]
    fn response_after_session_is_dropped_is_ignored() {
        let h = harness();
        h.session.send("bye").expect("send should succeed");
        let (_, complete) = h.dispatcher.take().pop().expect("request dispatched");
        drop(h.session);
        complete(Ok("late".to_string()));
        assert_eq!(h.ticker.fire(), 0);
    }
}

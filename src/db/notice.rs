//! Capture of server informational messages.
//!
//! sqlx reports PostgreSQL `NOTICE`s as tracing events on a fixed target
//! rather than through a callback. While a connection with a [`MessageSink`]
//! is being driven, [`NoticeCapture`] is installed as the task's dispatcher:
//! it records notice events into the sink and forwards everything to the
//! dispatcher that was active before, so the caller's logging keeps working.

use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::subscriber::Interest;
use tracing::{Dispatch, Event, Metadata, Subscriber};

/// Target sqlx uses for server notices.
pub(crate) const PG_NOTICE_TARGET: &str = "sqlx::postgres::notice";

/// Callback invoked synchronously for each captured message, in arrival order.
pub type MessageListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Collects informational messages for one execution.
///
/// Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MessageSink {
    inner: Arc<SinkInner>,
}

#[derive(Default)]
struct SinkInner {
    messages: Mutex<Vec<String>>,
    listener: Option<MessageListener>,
}

impl MessageSink {
    pub fn new(listener: Option<MessageListener>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                messages: Mutex::new(Vec::new()),
                listener,
            }),
        }
    }

    /// Records a message and hands it to the listener.
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        if let Some(listener) = &self.inner.listener {
            listener(&message);
        }
        self.inner
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);
    }

    /// Messages received so far.
    pub fn messages(&self) -> Vec<String> {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for MessageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSink")
            .field("messages", &self.messages().len())
            .field("listener", &self.inner.listener.is_some())
            .finish()
    }
}

/// Forwarding subscriber that also captures events on one target.
pub(crate) struct NoticeCapture {
    inner: Dispatch,
    sink: MessageSink,
    target: &'static str,
}

impl NoticeCapture {
    /// Wraps the currently active dispatcher.
    pub(crate) fn dispatch(sink: MessageSink, target: &'static str) -> Dispatch {
        let inner = tracing::dispatcher::get_default(|current| current.clone());
        Dispatch::new(Self {
            inner,
            sink,
            target,
        })
    }

    /// Matches by target only: sqlx checks `enabled!` hints before emitting the event.
    fn captures(&self, metadata: &Metadata<'_>) -> bool {
        metadata.target() == self.target
    }
}

impl Subscriber for NoticeCapture {
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        let interest = self.inner.register_callsite(metadata);
        if self.captures(metadata) {
            Interest::always()
        } else {
            interest
        }
    }

    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.captures(metadata) || self.inner.enabled(metadata)
    }

    fn max_level_hint(&self) -> Option<tracing::level_filters::LevelFilter> {
        None
    }

    fn new_span(&self, span: &Attributes<'_>) -> Id {
        self.inner.new_span(span)
    }

    fn record(&self, span: &Id, values: &Record<'_>) {
        self.inner.record(span, values)
    }

    fn record_follows_from(&self, span: &Id, follows: &Id) {
        self.inner.record_follows_from(span, follows)
    }

    fn event(&self, event: &Event<'_>) {
        let metadata = event.metadata();
        if metadata.is_event() && self.captures(metadata) {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            if let Some(message) = visitor.message {
                self.sink.push(message);
            }
        }
        if self.inner.enabled(metadata) {
            self.inner.event(event);
        }
    }

    fn enter(&self, span: &Id) {
        self.inner.enter(span)
    }

    fn exit(&self, span: &Id) {
        self.inner.exit(span)
    }

    fn clone_span(&self, id: &Id) -> Id {
        self.inner.clone_span(id)
    }

    fn try_close(&self, id: Id) -> bool {
        self.inner.try_close(id)
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" && self.message.is_none() {
            self.message = Some(format!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::instrument::WithSubscriber;

    const TEST_TARGET: &str = "db_invoke::test_notice";

    #[test]
    fn test_sink_keeps_order_and_calls_listener() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let sink = MessageSink::new(Some(Arc::new(move |_msg: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        sink.push("first");
        sink.clone().push("second");

        assert_eq!(sink.messages(), vec!["first", "second"]);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_capture_records_only_target_events() {
        let sink = MessageSink::new(None);
        let dispatch = NoticeCapture::dispatch(sink.clone(), TEST_TARGET);

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(target: TEST_TARGET, message = "hello from server");
            tracing::info!(target: "somewhere_else", message = "ignored");
            tracing::warn!(target: TEST_TARGET, "formatted {}", 42);
        });

        assert_eq!(sink.messages(), vec!["hello from server", "formatted 42"]);
    }

    #[tokio::test]
    async fn test_capture_follows_future() {
        let sink = MessageSink::new(None);
        let dispatch = NoticeCapture::dispatch(sink.clone(), TEST_TARGET);

        async {
            tracing::info!(target: TEST_TARGET, message = "one");
            tokio::task::yield_now().await;
            tracing::info!(target: TEST_TARGET, message = "two");
        }
        .with_subscriber(dispatch)
        .await;

        // Outside the wrapped future nothing is captured.
        tracing::info!(target: TEST_TARGET, message = "three");

        assert_eq!(sink.messages(), vec!["one", "two"]);
    }
}

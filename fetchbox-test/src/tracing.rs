//! Tracing utilities for asserting on log events.
//!
//! Tests install an [`EventCollector`] as the thread's default subscriber.
//! Resources, requests and offloaded tasks all run on the test's
//! current-thread runtime, so every event they emit is captured.

use std::sync::{Arc, Mutex};

use tracing::dispatcher::DefaultGuard;
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, SubscriberExt};

/// Captured event information.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Event target (module path).
    pub target: String,
    /// The `message` field.
    pub message: String,
    /// Remaining fields as strings.
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    /// Value of field `name`, if recorded.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

struct EventCaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn push(&mut self, field: &tracing::field::Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.push(field, value.to_string());
    }
}

impl<S> Layer<S> for EventCaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with("fetchbox") {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Collector for captured events.
#[derive(Clone)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    dispatch: Dispatch,
}

/// Create a new event collector with its associated dispatch.
pub fn create_event_collector() -> EventCollector {
    let events = Arc::new(Mutex::new(Vec::new()));
    let layer = EventCaptureLayer {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(layer);
    EventCollector {
        events,
        dispatch: Dispatch::new(subscriber),
    }
}

/// Installs a fresh collector as the thread's default subscriber until the
/// returned guard is dropped.
pub fn capture_events() -> (EventCollector, DefaultGuard) {
    let collector = create_event_collector();
    let guard = tracing::dispatcher::set_default(collector.dispatch());
    (collector, guard)
}

impl EventCollector {
    /// The dispatch events are captured through.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// All captured events.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Captured events whose message contains `text`.
    pub fn with_message(&self, text: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.message.contains(text))
            .cloned()
            .collect()
    }

    /// Captured events at exactly `level`.
    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.level == level)
            .cloned()
            .collect()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Assert that an event containing `text` was captured at `level`.
    pub fn assert_logged(&self, level: Level, text: &str) {
        let found = self
            .with_message(text)
            .iter()
            .any(|event| event.level == level);
        if !found {
            panic!(
                "Expected {level} event containing {text:?}. Captured: {:?}",
                self.events()
                    .iter()
                    .map(|event| (event.level, event.message.clone()))
                    .collect::<Vec<_>>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_capture() {
        let collector = create_event_collector();
        tracing::dispatcher::with_default(collector.dispatch(), || {
            tracing::warn!(target: "fetchbox::request", request_id = 7u64, "Dropping duplicate");
            tracing::warn!(target: "other_crate", "Ignored");
        });

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Dropping duplicate");
        assert_eq!(events[0].field("request_id"), Some("7"));
        collector.assert_logged(Level::WARN, "duplicate");
    }

    #[test]
    fn test_guard_scopes_capture() {
        let (collector, guard) = capture_events();
        tracing::debug!(target: "fetchbox", "inside");
        drop(guard);
        tracing::debug!(target: "fetchbox", "outside");

        assert_eq!(collector.with_message("inside").len(), 1);
        assert!(collector.with_message("outside").is_empty());
    }
}

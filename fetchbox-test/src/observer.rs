use std::cell::RefCell;
use std::rc::Rc;

use fetchbox::{Resource, ResourceEvent, ResourceObserver};

/// Observer that records every event it receives. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Rc<RefCell<Vec<ResourceEvent>>>,
    stopped: Rc<RefCell<bool>>,
}

impl RecordingObserver {
    /// Creates an observer with an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<ResourceEvent> {
        self.events.borrow().clone()
    }

    /// Events received so far, without progress reports.
    pub fn events_without_progress(&self) -> Vec<ResourceEvent> {
        self.events
            .borrow()
            .iter()
            .filter(|event| !matches!(event, ResourceEvent::Progress(_)))
            .copied()
            .collect()
    }

    /// Forgets recorded events.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// Returns `true` once the observer was removed from its resource.
    pub fn stopped(&self) -> bool {
        *self.stopped.borrow()
    }
}

impl ResourceObserver for RecordingObserver {
    fn resource_changed(&self, _resource: &Resource, event: &ResourceEvent) {
        self.events.borrow_mut().push(*event);
    }

    fn stopped_observing(&self, _resource: &Resource) {
        *self.stopped.borrow_mut() = true;
    }
}

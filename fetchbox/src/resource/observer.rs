use std::fmt;
use std::rc::{Rc, Weak};

use super::Resource;

/// Where new data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// A load completed with fresh data.
    Network,
    /// An entity cache supplied data when the resource was created.
    Cache,
    /// [`Resource::override_local_data`] or [`Resource::override_local_content`].
    LocalOverride,
    /// [`Resource::wipe`] cleared the resource.
    Wipe,
}

/// Change notification delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceEvent {
    /// Sent only to an observer that was just added.
    ObserverAdded,
    /// A load started.
    Requested,
    /// A load was cancelled; data and error are unchanged.
    RequestCancelled,
    /// A load made progress.
    Progress(f64),
    /// Data changed.
    NewData(DataSource),
    /// The server, or a local override, confirmed the current data.
    NotModified,
    /// A load failed; see [`Resource::latest_error`].
    Error,
}

/// Receives [`ResourceEvent`]s.
///
/// Observers run synchronously on the coordination context, in the order
/// they were added, and must not block it.
pub trait ResourceObserver {
    /// Called for each event.
    fn resource_changed(&self, resource: &Resource, event: &ResourceEvent);

    /// Called once the observer is removed with [`Resource::remove_observer`].
    fn stopped_observing(&self, _resource: &Resource) {}
}

impl<F> ResourceObserver for F
where
    F: Fn(&Resource, &ResourceEvent),
{
    fn resource_changed(&self, resource: &Resource, event: &ResourceEvent) {
        self(resource, event)
    }
}

/// Handle returned when registering an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub(super) type SharedObserver = Rc<dyn ResourceObserver>;

enum Liveness {
    Always,
    Owner(Weak<dyn std::any::Any>),
    Check(Box<dyn Fn() -> bool>),
}

impl Liveness {
    fn is_alive(&self) -> bool {
        match self {
            Liveness::Always => true,
            Liveness::Owner(owner) => owner.strong_count() > 0,
            Liveness::Check(check) => check(),
        }
    }
}

struct Registration {
    id: ObserverId,
    observer: SharedObserver,
    liveness: Liveness,
}

/// Observers of one resource, in registration order.
#[derive(Default)]
pub(super) struct ObserverTable {
    next_id: u64,
    registrations: Vec<Registration>,
}

impl ObserverTable {
    pub(super) fn add(&mut self, observer: SharedObserver) -> ObserverId {
        self.register(observer, Liveness::Always)
    }

    pub(super) fn add_owned<T: 'static>(
        &mut self,
        owner: &Rc<T>,
        observer: SharedObserver,
    ) -> ObserverId {
        let owner: Rc<dyn std::any::Any> = owner.clone();
        self.register(observer, Liveness::Owner(Rc::downgrade(&owner)))
    }

    pub(super) fn add_with_liveness(
        &mut self,
        liveness: Box<dyn Fn() -> bool>,
        observer: SharedObserver,
    ) -> ObserverId {
        self.register(observer, Liveness::Check(liveness))
    }

    fn register(&mut self, observer: SharedObserver, liveness: Liveness) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.registrations.push(Registration {
            id,
            observer,
            liveness,
        });
        id
    }

    pub(super) fn remove(&mut self, id: ObserverId) -> Option<SharedObserver> {
        let index = self.registrations.iter().position(|r| r.id == id)?;
        Some(self.registrations.remove(index).observer)
    }

    /// Drops observers whose owner is gone and returns the rest.
    pub(super) fn live(&mut self) -> Vec<SharedObserver> {
        self.registrations.retain(|r| r.liveness.is_alive());
        self.registrations
            .iter()
            .map(|r| r.observer.clone())
            .collect()
    }

    pub(super) fn get(&self, id: ObserverId) -> Option<SharedObserver> {
        self.registrations
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.observer.clone())
    }
}

impl fmt::Debug for ObserverTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverTable")
            .field("count", &self.registrations.len())
            .finish()
    }
}

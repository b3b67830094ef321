use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::composite::Composite;
use crate::lock::lock;

pub type Handler<T> = Arc<dyn Fn(&Event<T>) + Send + Sync>;

/// A delivered event. `target` is the object that raised it, which stays the
/// same while the event bubbles through ancestors.
#[derive(Clone, Debug)]
pub struct Event<T> {
    pub name: String,
    pub target: T,
    pub args: Vec<Value>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

struct Listener<T> {
    id: ListenerId,
    event: Option<String>,
    handler: Handler<T>,
    once: bool,
}

impl<T> Listener<T> {
    fn matches(&self, name: &str) -> bool {
        self.event.as_deref().is_none_or(|event| event == name)
    }
}

pub struct Emitter<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener<T>>>,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Event<T>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(Some(event.to_string()), Arc::new(handler), false)
    }

    pub fn once(
        &self,
        event: &str,
        handler: impl Fn(&Event<T>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(Some(event.to_string()), Arc::new(handler), true)
    }

    /// Wildcard listener, invoked for every event.
    pub fn on_any(&self, handler: impl Fn(&Event<T>) + Send + Sync + 'static) -> ListenerId {
        self.register(None, Arc::new(handler), false)
    }

    /// Removes the listener registered under `id` for `event`. Pass `"*"` for
    /// wildcard listeners.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let position = listeners.iter().position(|listener| {
            listener.id == id && listener.event.as_deref().unwrap_or("*") == event
        });
        match position {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Invokes matching listeners in registration order, dropping `once`
    /// listeners that fired. Handlers run outside the registry lock.
    pub fn dispatch(&self, event: &Event<T>) {
        let handlers: Vec<Handler<T>> = {
            let mut listeners = lock(&self.listeners);
            let handlers = listeners
                .iter()
                .filter(|listener| listener.matches(&event.name))
                .map(|listener| listener.handler.clone())
                .collect();
            listeners.retain(|listener| !(listener.once && listener.matches(&event.name)));
            handlers
        };
        for handler in handlers {
            handler(event);
        }
    }

    fn register(&self, event: Option<String>, handler: Handler<T>, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push(Listener {
            id,
            event,
            handler,
            once,
        });
        id
    }
}

/// Composite nodes whose events bubble to every ancestor.
pub trait Bubbling: Composite {
    fn emitter(&self) -> &Emitter<Self>;

    fn emit(&self, name: &str, args: Vec<Value>) {
        let event = Event {
            name: name.to_string(),
            target: self.clone(),
            args,
        };
        self.emitter().dispatch(&event);
        for ancestor in self.parents() {
            ancestor.emitter().dispatch(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, Weak};

    use serde_json::json;

    use super::{Bubbling, Emitter, Event};
    use crate::composite::{Composite, TreeLinks};

    #[test]
    fn listeners_fire_in_registration_order() {
        let emitter: Emitter<()> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            emitter.on("ping", move |_| seen.lock().unwrap().push(tag));
        }
        let any_seen = seen.clone();
        emitter.on_any(move |event| any_seen.lock().unwrap().push(if event.name == "ping" {
            "any:ping"
        } else {
            "any:other"
        }));

        emitter.dispatch(&Event {
            name: "ping".to_string(),
            target: (),
            args: vec![],
        });
        emitter.dispatch(&Event {
            name: "pong".to_string(),
            target: (),
            args: vec![],
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first", "second", "any:ping", "any:other"]
        );
    }

    #[test]
    fn once_listener_is_removed_after_firing() {
        let emitter: Emitter<()> = Emitter::new();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        emitter.once("ping", move |_| *counter.lock().unwrap() += 1);

        let event = Event {
            name: "ping".to_string(),
            target: (),
            args: vec![json!(1)],
        };
        emitter.dispatch(&event);
        emitter.dispatch(&event);

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn off_removes_only_the_matching_registration() {
        let emitter: Emitter<()> = Emitter::new();
        let kept = emitter.on("ping", |_| {});
        let dropped = emitter.on("ping", |_| {});

        assert!(!emitter.off("pong", dropped));
        assert!(emitter.off("ping", dropped));
        assert!(!emitter.off("ping", dropped));
        assert_eq!(emitter.listener_count(), 1);
        assert!(emitter.off("ping", kept));
    }

    #[derive(Clone)]
    struct Probe(Arc<ProbeInner>);

    struct ProbeInner {
        label: &'static str,
        links: TreeLinks<Probe>,
        emitter: Emitter<Probe>,
    }

    impl Probe {
        fn new(label: &'static str) -> Self {
            Probe(Arc::new(ProbeInner {
                label,
                links: TreeLinks::default(),
                emitter: Emitter::new(),
            }))
        }
    }

    impl Composite for Probe {
        type WeakRef = Weak<ProbeInner>;

        fn links(&self) -> &TreeLinks<Self> {
            &self.0.links
        }

        fn downgrade(&self) -> Self::WeakRef {
            Arc::downgrade(&self.0)
        }

        fn upgrade(weak: &Self::WeakRef) -> Option<Self> {
            weak.upgrade().map(Probe)
        }

        fn same_node(&self, other: &Self) -> bool {
            Arc::ptr_eq(&self.0, &other.0)
        }
    }

    impl Bubbling for Probe {
        fn emitter(&self) -> &Emitter<Self> {
            &self.0.emitter
        }
    }

    #[test]
    fn events_bubble_with_the_original_target() {
        let root = Probe::new("root");
        let mid = root.add(Probe::new("mid")).unwrap();
        let leaf = mid.add(Probe::new("leaf")).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for node in [&leaf, &mid, &root] {
            let seen = seen.clone();
            let observer = node.0.label;
            node.emitter().on("done", move |event: &Event<Probe>| {
                seen.lock()
                    .unwrap()
                    .push((observer, event.target.0.label, event.args.clone()));
            });
        }

        leaf.emit("done", vec![json!(7)]);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("leaf", "leaf", vec![json!(7)]),
                ("mid", "leaf", vec![json!(7)]),
                ("root", "leaf", vec![json!(7)]),
            ]
        );
    }
}

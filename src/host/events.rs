//! Typed event listeners on a host.

use std::cell::RefCell;
use std::rc::Rc;

use super::SubscriptionId;
use crate::bridge::PropertyValue;

/// An event delivered to host listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: String,
    detail: Option<PropertyValue>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: None,
        }
    }

    pub fn with_detail(kind: impl Into<String>, detail: PropertyValue) -> Self {
        Self {
            kind: kind.into(),
            detail: Some(detail),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn detail(&self) -> Option<&PropertyValue> {
        self.detail.as_ref()
    }
}

type Handler = Rc<dyn Fn(&Rc<Event>)>;

struct EventListener {
    id: SubscriptionId,
    kind: String,
    handler: Handler,
}

#[derive(Default)]
pub(super) struct EventTarget {
    listeners: RefCell<Vec<EventListener>>,
}

impl EventTarget {
    pub(super) fn add(&self, id: SubscriptionId, kind: String, handler: Handler) {
        self.listeners
            .borrow_mut()
            .push(EventListener { id, kind, handler });
    }

    pub(super) fn remove(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub(super) fn emit(&self, event: &Rc<Event>) -> usize {
        let handlers: Vec<Handler> = self
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.kind == event.kind)
            .map(|l| l.handler.clone())
            .collect();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }
}

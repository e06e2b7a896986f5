//! String attributes with mutation observers.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;

use super::{HostError, SubscriptionId};

/// One attribute mutation. `value` is `None` when the attribute was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    pub name: String,
    pub value: Option<String>,
}

impl AttributeChange {
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn removed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

type Observer = Rc<dyn Fn(&AttributeChange)>;

#[derive(Default)]
pub(super) struct Attributes {
    values: RefCell<BTreeMap<String, String>>,
    observers: RefCell<Vec<(SubscriptionId, Observer)>>,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_:][A-Za-z0-9_.:\-]*$").expect("attribute name pattern is valid")
    })
}

impl Attributes {
    pub(super) fn get(&self, name: &str) -> Option<String> {
        self.values.borrow().get(name).cloned()
    }

    pub(super) fn snapshot(&self) -> Vec<(String, String)> {
        self.values
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Set `name`. Observers are only notified when the value changes.
    pub(super) fn set(&self, name: &str, value: String) -> Result<(), HostError> {
        if !name_pattern().is_match(name) {
            return Err(HostError::InvalidAttributeName(name.to_string()));
        }
        let previous = self
            .values
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        if previous.as_deref() != Some(value.as_str()) {
            self.notify(&AttributeChange::set(name, value));
        }
        Ok(())
    }

    pub(super) fn remove(&self, name: &str) -> bool {
        let removed = self.values.borrow_mut().remove(name).is_some();
        if removed {
            self.notify(&AttributeChange::removed(name));
        }
        removed
    }

    pub(super) fn observe(&self, id: SubscriptionId, observer: Observer) {
        self.observers.borrow_mut().push((id, observer));
    }

    pub(super) fn unobserve(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub(super) fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    fn notify(&self, change: &AttributeChange) {
        let observers: Vec<Observer> = self
            .observers
            .borrow()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer(change);
        }
    }
}

//! Derived contexts, computed from one or more source contexts.
//!
//! Providing a derived context consumes every source from the providing
//! host. Each source reports into its own slot; once all slots are
//! filled the value is recomputed and written, once per source report.
//! A source losing its provider clears its slot and the derived value
//! falls back to its initial value until every source has reported again.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{ConsumeOptions, Context, Notify, ProviderState};
use crate::host::Host;

type Slots = Rc<RefCell<Vec<Option<Rc<dyn Any>>>>>;
type Compute<R> = Rc<dyn Fn(&[Rc<dyn Any>]) -> Option<R>>;

/// Type-erased view of one source context.
trait DerivedSource {
    fn name(&self) -> &'static str;

    /// Consume the source from `host`. The returned guard keeps the
    /// subscription alive.
    fn bind(&self, host: &Host, report: Rc<dyn Fn(Rc<dyn Any>)>, release: Rc<dyn Fn()>) -> Box<dyn Any>;
}

impl<T: Clone + PartialEq + 'static> DerivedSource for Context<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn bind(&self, host: &Host, report: Rc<dyn Fn(Rc<dyn Any>)>, release: Rc<dyn Fn()>) -> Box<dyn Any> {
        let options = ConsumeOptions::identity()
            .notify(Notify::Always)
            .on_update(move |value: &T| report(Rc::new(value.clone())))
            .on_release(move || release());
        Box::new(self.consume_with(host, options))
    }
}

pub(super) struct Derivation<R: 'static> {
    sources: Vec<Rc<dyn DerivedSource>>,
    compute: Compute<R>,
}

impl<R: Clone + 'static> Derivation<R> {
    /// Subscribe the provider on `host` to every source.
    pub(super) fn bind(&self, state: &Rc<ProviderState<R>>, host: &Host) {
        let slots: Slots = Rc::new(RefCell::new(vec![None; self.sources.len()]));
        for (index, source) in self.sources.iter().enumerate() {
            let report: Rc<dyn Fn(Rc<dyn Any>)> = {
                let slots = slots.clone();
                let provider = Rc::downgrade(state);
                let compute = self.compute.clone();
                Rc::new(move |value| {
                    slots.borrow_mut()[index] = Some(value);
                    recompute(&slots, &provider, &compute);
                })
            };
            let release: Rc<dyn Fn()> = {
                let slots = slots.clone();
                let provider = Rc::downgrade(state);
                let source = source.name();
                Rc::new(move || {
                    slots.borrow_mut()[index] = None;
                    if let Some(provider) = provider.upgrade() {
                        tracing::debug!(
                            derived = provider.context.name,
                            source,
                            "source released, falling back to initial"
                        );
                        provider.write(provider.context.initial_value());
                    }
                })
            };
            let guard = source.bind(host, report, release);
            state.sources.borrow_mut().push(guard);
        }
    }
}

fn recompute<R: Clone + 'static>(slots: &Slots, provider: &Weak<ProviderState<R>>, compute: &Compute<R>) {
    let values: Option<Vec<Rc<dyn Any>>> = slots.borrow().iter().cloned().collect();
    let Some(values) = values else {
        return;
    };
    let Some(provider) = provider.upgrade() else {
        return;
    };
    match compute(&values) {
        Some(next) => provider.write(next),
        None => tracing::warn!(derived = provider.context.name, "source value has an unexpected type"),
    }
}

impl<R: Clone + 'static> Context<R> {
    /// Context computed from same-typed sources.
    ///
    /// `derive` receives the sources' values in the order given.
    pub fn derive<T: Clone + PartialEq + 'static>(
        name: &'static str,
        initial: R,
        sources: &[&Context<T>],
        derive: impl Fn(&[T]) -> R + 'static,
    ) -> Self {
        let compute: Compute<R> = Rc::new(move |values: &[Rc<dyn Any>]| {
            let typed: Option<Vec<T>> = values
                .iter()
                .map(|v| v.downcast_ref::<T>().cloned())
                .collect();
            typed.map(|typed| derive(&typed))
        });
        let sources = sources
            .iter()
            .map(|s| Rc::new((*s).clone()) as Rc<dyn DerivedSource>)
            .collect();
        Self::derived(name, initial, sources, compute)
    }

    /// Context computed from two sources of different types.
    pub fn derive2<A, B>(
        name: &'static str,
        initial: R,
        a: &Context<A>,
        b: &Context<B>,
        derive: impl Fn(&A, &B) -> R + 'static,
    ) -> Self
    where
        A: Clone + PartialEq + 'static,
        B: Clone + PartialEq + 'static,
    {
        let compute: Compute<R> = Rc::new(move |values: &[Rc<dyn Any>]| {
            let a = values.first()?.downcast_ref::<A>()?;
            let b = values.get(1)?.downcast_ref::<B>()?;
            Some(derive(a, b))
        });
        let sources: Vec<Rc<dyn DerivedSource>> = vec![Rc::new(a.clone()), Rc::new(b.clone())];
        Self::derived(name, initial, sources, compute)
    }

    fn derived(
        name: &'static str,
        initial: R,
        sources: Vec<Rc<dyn DerivedSource>>,
        compute: Compute<R>,
    ) -> Self {
        let mut context = Self::new(name, initial);
        context.derivation = Some(Rc::new(Derivation { sources, compute }));
        context
    }
}

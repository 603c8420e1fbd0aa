#![forbid(unsafe_code)]

//! Bindings that combine several sub-bindings into one value.
//!
//! Each sub-binding is attached to the multi-binding and writes its value
//! into a slot. Whenever a slot changes the combined value is recomputed,
//! except while [`MultiBinding::exec`] is refreshing every source: then a
//! single recomputation runs at the end.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::{Binding, BindingCore, BindingKind, BindingRef};
use crate::convert::Conversion;
use crate::error::BindingError;
use crate::value::Value;

/// Sets a flag for the lifetime of the guard.
struct Reentry<'a>(&'a Cell<bool>);

impl<'a> Reentry<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for Reentry<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[derive(Default)]
pub struct MultiBinding {
    sources: RefCell<Vec<BindingRef>>,
    values: RefCell<Vec<Value>>,
    refreshing: Cell<bool>,
}

impl MultiBinding {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn sources(&self) -> Vec<BindingRef> {
        self.sources.borrow().clone()
    }

    pub(super) fn values(&self) -> Vec<Value> {
        self.values.borrow().clone()
    }

    pub(super) fn set_sources(
        &self,
        this: &Weak<Binding>,
        sources: Vec<BindingRef>,
    ) -> Result<(), BindingError> {
        let current = self.sources.borrow().clone();
        for (index, source) in sources.iter().enumerate() {
            let reused = current.iter().any(|c| Rc::ptr_eq(c, source));
            if let Some(owner) = source.owner()
                && !reused
            {
                return Err(BindingError::SourceAlreadyAttached { index, owner });
            }
        }

        self.release_sources();
        for (index, source) in sources.iter().enumerate() {
            let multi = this.clone();
            source.attach(
                format!("MultiBinding.sources[{index}]"),
                Rc::new(move |value| {
                    if let Some(binding) = multi.upgrade() {
                        binding.on_source_changed(index, value);
                    }
                }),
            )?;
        }
        *self.values.borrow_mut() = vec![Value::Null; sources.len()];
        *self.sources.borrow_mut() = sources;
        Ok(())
    }

    /// Detach every sub-binding so it can be reused elsewhere.
    pub(super) fn release_sources(&self) {
        for source in self.sources.borrow_mut().drain(..) {
            source.detach();
        }
        self.values.borrow_mut().clear();
    }

    /// Refresh every sub-binding, then recompute once.
    ///
    /// Every source runs even after one fails; the combined value is pushed
    /// only when all of them produced a value.
    pub(super) fn exec(&self, core: &BindingCore) -> bool {
        if !core.is_attached() {
            return false;
        }
        let sources = self.sources();
        let all_pushed = {
            let _guard = Reentry::enter(&self.refreshing);
            sources
                .iter()
                .fold(true, |ok, source| source.exec() && ok)
        };
        if all_pushed {
            self.update(core)
        } else {
            false
        }
    }

    fn on_source_changed(&self, core: &BindingCore, index: usize, value: Value) {
        if let Some(slot) = self.values.borrow_mut().get_mut(index) {
            *slot = value;
        }
        if !self.refreshing.get() {
            self.update(core);
        }
    }

    fn update(&self, core: &BindingCore) -> bool {
        if !core.is_attached() {
            return false;
        }
        let values = self.values();
        let conversion = match core.resolve_converter() {
            None => Conversion::Value(Value::Array(values)),
            Some(converter) => {
                let target = core.target_type();
                let parameter = core.parameter.as_deref();
                match converter.as_multi() {
                    Some(multi) => multi.multi_convert(&values, parameter, target.as_ref()),
                    None => converter.convert(&Value::Array(values), parameter, target.as_ref()),
                }
            }
        };
        core.deliver(BindingKind::Multi, conversion)
    }
}

impl Binding {
    fn on_source_changed(&self, index: usize, value: Value) {
        if let super::BindingVariant::Multi(multi) = &self.variant {
            multi.on_source_changed(&self.core, index, value);
        }
    }
}

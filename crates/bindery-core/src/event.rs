#![forbid(unsafe_code)]

//! Events owned by bindable objects and the tasks they trigger.
//!
//! A [`BindableEvent`] is immutable once built: replacing the task list
//! produces a new event (see
//! [`BindableObject::set_event_tasks`](crate::object::BindableObject::set_event_tasks)).
//!
//! Emitting publishes on the `eventEmitted` channel synchronously, then
//! returns a future that dispatches every task. Nothing runs until the
//! future is polled, and the tasks of one emission run concurrently with no
//! ordering between them.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};
use serde::{Deserialize, Serialize};

use crate::action::ActionDispatcher;
use crate::error::ActionError;
use crate::messaging::EventEmitted;
use crate::object::{BindableObject, ObjectKey, ObjectRef};
use crate::value::Value;

/// Registry tag of the plain event type.
pub const EVENT_TAG: &str = "BindableEvent";

pub type EventRef = Rc<BindableEvent>;

/// An action to run when an event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Key of the object declaring the action.
    pub source_key: ObjectKey,
    pub action_name: String,
}

impl Task {
    pub fn new(source_key: ObjectKey, action_name: impl Into<String>) -> Self {
        Self {
            source_key,
            action_name: action_name.into(),
        }
    }
}

/// An event instance.
#[derive(Clone)]
pub struct BindableEvent {
    owner: Weak<BindableObject>,
    name: String,
    type_tag: String,
    tasks: Vec<Task>,
    /// Extra serializable fields of tagged event subtypes.
    extra: BTreeMap<String, Value>,
}

impl BindableEvent {
    pub fn new(owner: &ObjectRef, name: &str) -> Self {
        Self::tagged(EVENT_TAG).adopt(owner, name)
    }

    /// An ownerless event of the given type; adopted on installation.
    pub fn tagged(type_tag: impl Into<String>) -> Self {
        Self {
            owner: Weak::new(),
            name: String::new(),
            type_tag: type_tag.into(),
            tasks: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Set owner and name; an event always belongs to the slot holding it.
    pub(crate) fn adopt(mut self, owner: &ObjectRef, name: &str) -> Self {
        self.owner = Rc::downgrade(owner);
        self.name = name.to_owned();
        self
    }

    /// A copy of this event with a different task list.
    #[must_use]
    pub fn with_tasks(&self, tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn owner(&self) -> Option<ObjectRef> {
        self.owner.upgrade()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    #[must_use]
    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    /// Publish `eventEmitted` and prepare one dispatch per task.
    fn fire(self: &Rc<Self>) -> Vec<LocalBoxFuture<'static, Result<(), ActionError>>> {
        let Some(sender) = self.owner() else {
            tracing::debug!(event = %self.name, "event emitted without a live owner");
            return Vec::new();
        };
        let runtime = Rc::clone(sender.runtime());
        let args = EventEmitted {
            sender,
            event_name: self.name.clone(),
            event: Rc::clone(self),
        };
        if runtime.design_mode() {
            tracing::warn!(
                object = %args.sender.label(),
                event = %self.name,
                "event emitted in design mode; tasks not dispatched"
            );
            return Vec::new();
        }
        runtime.bus().event_emitted().emit(&args);
        let dispatcher = ActionDispatcher::new(runtime);
        self.tasks
            .iter()
            .map(|task| dispatcher.dispatch(task.clone(), args.clone()))
            .collect()
    }

    /// Emit and run every task; resolves on the first failure.
    pub fn emit(self: &Rc<Self>) -> LocalBoxFuture<'static, Result<(), ActionError>> {
        let tasks = self.fire();
        async move { future::try_join_all(tasks).await.map(|_| ()) }.boxed_local()
    }

    /// Emit and run every task to completion, reporting each outcome.
    pub fn emit_settled(self: &Rc<Self>) -> LocalBoxFuture<'static, Vec<Result<(), ActionError>>> {
        future::join_all(self.fire()).boxed_local()
    }
}

impl fmt::Debug for BindableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindableEvent")
            .field("name", &self.name)
            .field("type_tag", &self.type_tag)
            .field("tasks", &self.tasks)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

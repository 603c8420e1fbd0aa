#![forbid(unsafe_code)]

//! Dispatch of event tasks to declared actions.
//!
//! # Failure Modes
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Task source key does not resolve | `warn!`, resolves `Ok(())` |
//! | Source has no member named by the task | `warn!`, resolves `Ok(())` |
//! | Member is a property or an event | `error!`, [`ActionError::NotAnAction`] |
//! | Action handler fails | its error, unchanged |

use std::rc::Rc;

use futures::FutureExt;

use crate::error::ActionError;
use crate::event::Task;
use crate::messaging::EventEmitted;
use crate::metadata::{ActionFuture, FieldDescriptor};
use crate::runtime::Runtime;

/// Resolves a task's object and invokes the named action on it.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    runtime: Rc<Runtime>,
}

impl ActionDispatcher {
    #[must_use]
    pub fn new(runtime: Rc<Runtime>) -> Self {
        Self { runtime }
    }

    /// A lazy future running `task`; nothing happens until it is polled.
    pub fn dispatch(&self, task: Task, args: EventEmitted) -> ActionFuture {
        let runtime = Rc::clone(&self.runtime);
        async move {
            let Some(target) = runtime.resolve(&task.source_key) else {
                tracing::warn!(
                    source_key = %task.source_key,
                    action = %task.action_name,
                    "task source not found"
                );
                return Ok(());
            };
            let handler = match target.field(&task.action_name) {
                Some(FieldDescriptor::Action(action)) => Rc::clone(&action.handler),
                Some(other) => {
                    tracing::error!(
                        object = %target.label(),
                        member = %task.action_name,
                        kind = %other.kind(),
                        "task target is not an action"
                    );
                    return Err(ActionError::NotAnAction {
                        key: task.source_key.to_string(),
                        name: task.action_name,
                    });
                }
                None => {
                    tracing::warn!(
                        object = %target.label(),
                        action = %task.action_name,
                        "task action not found"
                    );
                    return Ok(());
                }
            };
            handler(target, args).await
        }
        .boxed_local()
    }
}

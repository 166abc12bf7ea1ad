//! Entity action handlers.
//!
//! An entity action is a fire-and-forget notification: a name plus ordered
//! parameters, targeted at one entity. Names and parameters are raw bytes as
//! received. Handlers are registered by action name and invoked in
//! registration order.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use scenesync_scene::entity::EntityId;
use scenesync_scene::scene::EntityHandle;

/// One delivery of an action to the local handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInvocation<'a> {
    /// Current id of the target entity.
    pub entity: EntityId,
    /// Stable identity of the target entity.
    pub handle: EntityHandle,
    /// Action name.
    pub name: &'a [u8],
    /// Parameters in send order.
    pub parameters: &'a [Vec<u8>],
}

impl<'a> ActionInvocation<'a> {
    /// The action name, with invalid UTF-8 replaced.
    pub fn name_lossy(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.name)
    }

    /// The parameters as text, with invalid UTF-8 replaced.
    pub fn parameters_lossy(&self) -> Vec<Cow<'a, str>> {
        self.parameters
            .iter()
            .map(|p| String::from_utf8_lossy(p))
            .collect()
    }
}

/// A registered action callback.
pub type ActionHandler = Box<dyn FnMut(&ActionInvocation<'_>)>;

/// Handlers keyed by action name.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<Vec<u8>, Vec<ActionHandler>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for actions called `name`.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: FnMut(&ActionInvocation<'_>) + 'static,
    {
        self.handlers
            .entry(name.as_bytes().to_vec())
            .or_default()
            .push(Box::new(handler));
    }

    /// Drop every handler for `name`. Returns how many were removed.
    pub fn unregister_all(&mut self, name: &str) -> usize {
        self.handlers.remove(name.as_bytes()).map_or(0, |h| h.len())
    }

    /// Number of handlers for `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.get(name.as_bytes()).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the invocation's name. Returns the
    /// number of handlers run.
    pub fn dispatch(&mut self, invocation: &ActionInvocation<'_>) -> usize {
        match self.handlers.get_mut(invocation.name) {
            Some(handlers) => {
                for handler in handlers.iter_mut() {
                    handler(invocation);
                }
                handlers.len()
            }
            None => {
                tracing::trace!(
                    action = %invocation.name_lossy(),
                    entity = %invocation.entity,
                    "no handlers for action"
                );
                0
            }
        }
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<(Cow<'_, str>, usize)> = self
            .handlers
            .iter()
            .map(|(name, h)| (String::from_utf8_lossy(name), h.len()))
            .collect();
        names.sort();
        f.debug_struct("ActionRegistry")
            .field("handlers", &names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Stage coordinator
//!
//! Holds exactly one registered async handler per operational state. A
//! handler reads the accumulated context, performs external work (LLM
//! calls, file I/O, shell commands), and returns only the keys it
//! contributes. It never drives transitions itself.

use std::collections::HashMap;

use futures::future::BoxFuture;

use super::data::{StageOutput, WorkflowData};
use super::state::State;
use crate::{Error, Result};

/// A stage handler: borrows the context, returns its partial output.
pub type StageHandler =
    Box<dyn for<'a> Fn(&'a WorkflowData) -> BoxFuture<'a, Result<StageOutput>> + Send + Sync>;

#[derive(Default)]
pub struct StageCoordinator {
    handlers: HashMap<State, StageHandler>,
}

impl StageCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a state. Exactly one handler per state;
    /// a duplicate or a non-operational state is a configuration error.
    pub fn register<F>(&mut self, state: State, handler: F) -> Result<()>
    where
        F: for<'a> Fn(&'a WorkflowData) -> BoxFuture<'a, Result<StageOutput>>
            + Send
            + Sync
            + 'static,
    {
        if !state.is_operational() {
            return Err(Error::Config(format!(
                "cannot register a handler for non-operational state {state}"
            )));
        }
        if self.handlers.contains_key(&state) {
            return Err(Error::Config(format!(
                "handler already registered for {state}"
            )));
        }
        self.handlers.insert(state, Box::new(handler));
        Ok(())
    }

    pub fn has_handler(&self, state: State) -> bool {
        self.handlers.contains_key(&state)
    }

    /// Invoke the handler registered for `state`. A missing handler is a
    /// configuration error: fatal, never retried.
    pub async fn execute(&self, state: State, context: &WorkflowData) -> Result<StageOutput> {
        let handler = self
            .handlers
            .get(&state)
            .ok_or_else(|| Error::Config(format!("no handler registered for {state}")))?;
        handler(context).await
    }
}

//! Cycle detection for nested interpolation
//!
//! Every interpolation site that is being resolved is pushed onto the guard
//! and popped again when it finishes, whether it succeeded or failed. Seeing
//! a name that is already on the stack means the value depends on itself.

use crate::error::{Error, Result};

/// Stack of interpolation expressions currently being resolved
#[derive(Debug, Clone, Default)]
pub struct RecursionGuard {
    seen: Vec<String>,
}

impl RecursionGuard {
    /// Create an empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with `name` marked as in progress.
    ///
    /// Fails with an interpolation loop error if `name` is already in
    /// progress. `name` is released again on both success and error.
    pub fn check<T, F>(&mut self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.enter(name)?;
        let result = f(self);
        self.leave();
        result
    }

    /// Mark `name` as in progress
    pub fn enter(&mut self, name: &str) -> Result<()> {
        if self.seen.iter().any(|s| s == name) {
            return Err(Error::interpolation_loop(self.seen.clone()));
        }
        self.seen.push(name.to_string());
        Ok(())
    }

    /// Release the most recently entered name
    pub fn leave(&mut self) {
        self.seen.pop();
    }

    /// Names currently in progress, outermost first
    pub fn chain(&self) -> &[String] {
        &self.seen
    }

    /// Whether nothing is in progress
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

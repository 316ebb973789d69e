//! Handler factory
//!
//! Handler kinds are plain string tags mapped to constructor functions.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::HandlerError;

use super::handler::{DefaultHandler, HandlerContext, ProfilingPointHandler};
use super::heap_dump::HeapDumpHandler;

pub type HandlerCtor =
    fn(&HandlerContext, &str) -> Result<Arc<dyn ProfilingPointHandler>, HandlerError>;

/// Handlers every factory starts with
pub const BUILTIN_HANDLERS: &[(&str, HandlerCtor)] = &[
    ("default", DefaultHandler::create as HandlerCtor),
    ("heapdump", HeapDumpHandler::create as HandlerCtor),
];

#[derive(Debug, Clone)]
pub struct HandlerFactory {
    ctors: BTreeMap<String, HandlerCtor>,
}

impl Default for HandlerFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl HandlerFactory {
    #[must_use]
    pub fn with_defaults() -> Self {
        let ctors = BUILTIN_HANDLERS.iter().map(|(kind, ctor)| ((*kind).to_string(), *ctor)).collect();
        Self { ctors }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self { ctors: BTreeMap::new() }
    }

    /// Add or replace a handler kind
    pub fn register(&mut self, kind: impl Into<String>, ctor: HandlerCtor) {
        self.ctors.insert(kind.into(), ctor);
    }

    /// # Errors
    /// Returns [`HandlerError::UnknownKind`] for unregistered kinds, or the
    /// constructor's own error
    pub fn create(
        &self,
        kind: &str,
        ctx: &HandlerContext,
        info: &str,
    ) -> Result<Arc<dyn ProfilingPointHandler>, HandlerError> {
        let ctor = self.ctors.get(kind).ok_or_else(|| HandlerError::UnknownKind(kind.to_string()))?;
        ctor(ctx, info)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.ctors.keys().map(String::as_str)
    }
}

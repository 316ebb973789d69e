//! Profiling point dispatch
//!
//! [`HandlerRegistry::init_instances`] builds an id-sorted table once;
//! [`ProfilingPointServer::profiling_point_hit`] looks the id up by binary
//! search and hands the hit to its handler.

use std::sync::Arc;

use crate::config::MissingHandlerPolicy;
use crate::domain::HandlerError;
use crate::runtime::ProfilerRuntime;
use crate::threads::ThreadToken;

use super::factory::HandlerFactory;
use super::handler::{HandlerContext, PointHit, ProfilingPointHandler};

#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<(i32, Arc<dyn ProfilingPointHandler>)>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").field("ids", &self.ids()).finish()
    }
}

impl HandlerRegistry {
    /// Instantiate one handler per profiling point
    ///
    /// `ids`, `kinds` and `infos` are parallel arrays. A handler that cannot
    /// be created is logged and skipped, or fails the whole call under
    /// [`MissingHandlerPolicy::Fail`]. When an id repeats, the first handler wins.
    ///
    /// # Errors
    /// Returns an error if the arrays differ in length, or if a handler
    /// cannot be created and `policy` is [`MissingHandlerPolicy::Fail`]
    pub fn init_instances(
        ids: &[i32],
        kinds: &[&str],
        infos: &[&str],
        factory: &HandlerFactory,
        ctx: &HandlerContext,
        policy: MissingHandlerPolicy,
    ) -> Result<Self, HandlerError> {
        if ids.len() != kinds.len() || ids.len() != infos.len() {
            return Err(HandlerError::LengthMismatch {
                ids: ids.len(),
                kinds: kinds.len(),
                infos: infos.len(),
            });
        }

        let mut entries = Vec::with_capacity(ids.len());
        for ((&id, &kind), &info) in ids.iter().zip(kinds).zip(infos) {
            match factory.create(kind, ctx, info) {
                Ok(handler) => entries.push((id, handler)),
                Err(e) => {
                    log::error!("Profiling point {id}: {e}");
                    if policy == MissingHandlerPolicy::Fail {
                        return Err(e);
                    }
                }
            }
        }
        entries.sort_by_key(|(id, _)| *id);
        entries.dedup_by_key(|(id, _)| *id);

        log::info!("{} profiling point handlers registered", entries.len());
        Ok(Self { entries })
    }

    #[must_use]
    pub fn handler(&self, id: i32) -> Option<&Arc<dyn ProfilingPointHandler>> {
        self.entries
            .binary_search_by_key(&id, |(entry_id, _)| *entry_id)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<i32> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct ProfilingPointServer {
    runtime: Arc<ProfilerRuntime>,
    registry: HandlerRegistry,
}

impl ProfilingPointServer {
    #[must_use]
    pub fn new(runtime: Arc<ProfilerRuntime>, registry: HandlerRegistry) -> Self {
        Self { runtime, registry }
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn profiling_point_hit(&self, point_id: i32) {
        ThreadToken::with_current(|t| self.profiling_point_hit_on(t, point_id));
    }

    /// Dispatch a hit; unknown ids are ignored
    pub fn profiling_point_hit_on(&self, thread: &Arc<ThreadToken>, point_id: i32) {
        let Some(handler) = self.registry.handler(point_id) else {
            return;
        };
        let record = self.runtime.record_for(thread);
        if record.in_runtime() || !self.runtime.admit_thread(&record, thread) {
            return;
        }
        let _guard = record.enter_runtime();
        let hit = PointHit { point_id, timestamp: self.runtime.now(), thread: record.thread_id() };
        handler.profile_point_hit(&record, &hit);
    }
}

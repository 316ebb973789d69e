//! Profiling points
//!
//! User-defined instrumented locations. Each point id is bound to a handler
//! at startup; a hit runs that handler on the hitting thread.

pub mod factory;
pub mod handler;
pub mod heap_dump;
pub mod registry;

pub use factory::{HandlerCtor, HandlerFactory, BUILTIN_HANDLERS};
pub use handler::{DefaultHandler, HandlerContext, PointHit, ProfilingPointHandler};
pub use heap_dump::{HeapDumpHandler, HeapDumper, JsonHeapDumper};
pub use registry::{HandlerRegistry, ProfilingPointServer};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MissingHandlerPolicy, RuntimeConfig};
    use crate::domain::{ClassId, HandlerError};
    use crate::memory::{HeapSource, ObjAlloc};
    use crate::test_support::Capture;
    use crate::threads::ThreadToken;
    use prof_agent_common::{Event, EventTag};
    use std::sync::Arc;

    fn context(capture: &Capture) -> HandlerContext {
        HandlerContext::new(capture.runtime.clone())
    }

    #[test]
    fn test_dispatch_by_id() {
        let capture = Capture::new(RuntimeConfig::default());
        let registry = HandlerRegistry::init_instances(
            &[30, 10, 20],
            &["default", "default", "default"],
            &["", "", ""],
            &HandlerFactory::with_defaults(),
            &context(&capture),
            MissingHandlerPolicy::Skip,
        )
        .unwrap();
        assert_eq!(registry.ids(), vec![10, 20, 30]);

        let server = ProfilingPointServer::new(capture.runtime.clone(), registry);
        let t = ThreadToken::new("main");
        server.profiling_point_hit_on(&t, 20);
        server.profiling_point_hit_on(&t, 99);

        let id = capture.runtime.record_for(&t).thread_id().0;
        let hits: Vec<_> =
            capture.events().into_iter().filter(|e| e.tag() == EventTag::ProfilePointHit).collect();
        assert_eq!(hits.len(), 1);
        assert!(matches!(
            hits[0],
            Event::ProfilePointHit { point_id: 20, thread_id, .. } if thread_id == id
        ));
    }

    #[test]
    fn test_unknown_kind_skipped_or_fatal() {
        let capture = Capture::new(RuntimeConfig::default());
        let factory = HandlerFactory::with_defaults();
        let ctx = context(&capture);

        let registry = HandlerRegistry::init_instances(
            &[1, 2],
            &["default", "bogus"],
            &["", ""],
            &factory,
            &ctx,
            MissingHandlerPolicy::Skip,
        )
        .unwrap();
        assert_eq!(registry.ids(), vec![1]);

        let err = HandlerRegistry::init_instances(
            &[1, 2],
            &["default", "bogus"],
            &["", ""],
            &factory,
            &ctx,
            MissingHandlerPolicy::Fail,
        )
        .unwrap_err();
        assert!(matches!(err, HandlerError::UnknownKind(kind) if kind == "bogus"));
    }

    #[test]
    fn test_length_mismatch() {
        let capture = Capture::new(RuntimeConfig::default());
        let err = HandlerRegistry::init_instances(
            &[1],
            &[],
            &[""],
            &HandlerFactory::with_defaults(),
            &context(&capture),
            MissingHandlerPolicy::Skip,
        )
        .unwrap_err();
        assert!(matches!(err, HandlerError::LengthMismatch { ids: 1, kinds: 0, infos: 1 }));
    }

    #[test]
    fn test_heap_dump_written_with_timers_suspended() {
        let capture = Capture::new(RuntimeConfig { alloc_sampling_interval: 1, ..RuntimeConfig::default() });
        let alloc = Arc::new(ObjAlloc::new(capture.runtime.clone()));
        let t = ThreadToken::new("main");
        alloc.trace_obj_alloc_on(&t, &0u32, ClassId(7));

        let dir = tempfile::tempdir().unwrap();
        let sources: Vec<Arc<dyn HeapSource>> = vec![alloc];
        let ctx = context(&capture).with_heap_dumper(Arc::new(JsonHeapDumper::new(sources)));
        let registry = HandlerRegistry::init_instances(
            &[5],
            &["heapdump"],
            &[dir.path().to_str().unwrap()],
            &HandlerFactory::with_defaults(),
            &ctx,
            MissingHandlerPolicy::Fail,
        )
        .unwrap();
        let server = ProfilingPointServer::new(capture.runtime.clone(), registry);
        server.profiling_point_hit_on(&t, 5);

        let dumps: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(dumps.len(), 1);
        let name = dumps[0].file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("heapdump-") && name.ends_with(".json"), "{name}");
        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&dumps[0]).unwrap()).unwrap();
        assert_eq!(json["allocations"][0]["class_id"], 7);
        assert_eq!(json["allocations"][0]["count"], 1);

        let tags: Vec<_> = capture
            .tags()
            .into_iter()
            .filter(|t| matches!(t, EventTag::ThreadsSuspended | EventTag::ThreadsResumed | EventTag::ProfilePointHit))
            .collect();
        assert_eq!(
            tags,
            vec![EventTag::ThreadsSuspended, EventTag::ThreadsResumed, EventTag::ProfilePointHit]
        );
    }

    #[test]
    fn test_heap_dump_rejects_missing_dir() {
        let capture = Capture::new(RuntimeConfig::default());
        let Err(err) = HandlerFactory::with_defaults().create(
            "heapdump",
            &context(&capture),
            "/nonexistent/dumps",
        ) else {
            panic!("heapdump handler accepted a missing directory");
        };
        assert!(matches!(err, HandlerError::InvalidInfo { .. }));
    }

    #[test]
    fn test_custom_kind() {
        struct Counting(std::sync::atomic::AtomicUsize);
        impl ProfilingPointHandler for Counting {
            fn profile_point_hit(&self, _record: &crate::threads::ThreadRecord, _hit: &PointHit) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
        fn counting(
            _ctx: &HandlerContext,
            _info: &str,
        ) -> Result<Arc<dyn ProfilingPointHandler>, HandlerError> {
            Ok(Arc::new(Counting(std::sync::atomic::AtomicUsize::new(0))))
        }

        let mut factory = HandlerFactory::with_defaults();
        factory.register("counting", counting);
        assert_eq!(factory.kinds().collect::<Vec<_>>(), vec!["counting", "default", "heapdump"]);

        let capture = Capture::new(RuntimeConfig::default());
        let registry = HandlerRegistry::init_instances(
            &[1],
            &["counting"],
            &[""],
            &factory,
            &context(&capture),
            MissingHandlerPolicy::Fail,
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.handler(1).is_some());
        assert!(registry.handler(2).is_none());
    }
}

mod common;

use std::sync::Arc;

use common::Harness;
use prof_agent::config::{MissingHandlerPolicy, RuntimeConfig};
use prof_agent::cpu::CpuFullInstr;
use prof_agent::domain::MethodId;
use prof_agent::profiling_points::{
    HandlerContext, HandlerFactory, HandlerRegistry, ProfilingPointServer,
};
use prof_agent::threads::ThreadToken;
use prof_agent_common::{Event, EventTag};

#[test]
fn test_hits_land_between_method_events() {
    let harness = Harness::new(RuntimeConfig::default());
    let ctx = HandlerContext::new(harness.runtime.clone());
    let registry = HandlerRegistry::init_instances(
        &[7, 3],
        &["default", "nonexistent"],
        &["", ""],
        &HandlerFactory::with_defaults(),
        &ctx,
        MissingHandlerPolicy::Skip,
    )
    .expect("Skip policy never fails on unknown kinds");
    assert_eq!(registry.ids(), vec![7]);

    let server = ProfilingPointServer::new(harness.runtime.clone(), registry);
    let cpu = CpuFullInstr::new(harness.runtime.clone());
    let t = ThreadToken::new("main");

    cpu.root_method_entry_on(&t, MethodId(1));
    server.profiling_point_hit_on(&t, 7);
    server.profiling_point_hit_on(&t, 3);
    cpu.method_exit_on(&t, MethodId(1));

    let recording = harness.recording();
    let id = harness.runtime.record_for(&t).thread_id().0;
    let tags: Vec<_> = recording.thread_events(id).map(Event::tag).collect();
    assert_eq!(tags, vec![EventTag::RootEntry, EventTag::ProfilePointHit, EventTag::RootExit]);

    let hit = recording
        .thread_events(id)
        .find(|e| e.tag() == EventTag::ProfilePointHit)
        .expect("hit recorded");
    assert!(matches!(hit, Event::ProfilePointHit { point_id: 7, thread_id, .. } if *thread_id == id));
}

#[test]
fn test_unknown_kind_fails_under_fail_policy() {
    let harness = Harness::new(RuntimeConfig::default());
    let result = HandlerRegistry::init_instances(
        &[1],
        &["nonexistent"],
        &[""],
        &HandlerFactory::with_defaults(),
        &HandlerContext::new(Arc::clone(&harness.runtime)),
        MissingHandlerPolicy::Fail,
    );
    assert!(result.is_err());
}

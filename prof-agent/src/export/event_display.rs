//! Human-readable event listing for `prof-agent decode`

use prof_agent_common::Event;

use super::recording::Recording;

/// One-line rendering of an event
#[must_use]
pub fn format_event(event: &Event<'_>) -> String {
    match event {
        Event::Method { tag, method_id, timestamp, thread_cpu: Some(cpu) } => {
            format!("{tag:?} method={method_id} ts={timestamp} cpu={cpu}")
        }
        Event::Method { tag, method_id, timestamp, thread_cpu: None } => {
            format!("{tag:?} method={method_id} ts={timestamp}")
        }
        Event::Timestamp { tag, timestamp } => format!("{tag:?} ts={timestamp}"),
        Event::SetFollowingEventsThread { thread_id } => format!("SetFollowingEventsThread tid={thread_id}"),
        Event::NewThread { thread_id, name } => format!("NewThread tid={thread_id} name={name:?}"),
        Event::ThreadDumpEnd => "ThreadDumpEnd".to_string(),
        Event::ThreadInfoIdentical { thread_id } => format!("ThreadInfoIdentical tid={thread_id}"),
        Event::ThreadInfo { thread_id, status, frames } => {
            format!("ThreadInfo tid={thread_id} status={status:?} frames={frames:?}")
        }
        Event::ObjAllocStackTrace { class_id, size, frames } => {
            format!("ObjAlloc class={class_id} size={size} frames={frames:?}")
        }
        Event::ObjLivenessStackTrace { class_id, object_id, size, frames } => {
            format!("ObjLiveness class={class_id} object={object_id:#x} size={size} frames={frames:?}")
        }
        Event::ObjGcHappened { object_id } => format!("ObjGc object={object_id:#x}"),
        Event::ProfilePointHit { point_id, timestamp, thread_id } => {
            format!("ProfilePointHit point={point_id} ts={timestamp} tid={thread_id}")
        }
        Event::ResetCollectors => "ResetCollectors".to_string(),
    }
}

/// Print every event of a recording, prefixed with its thread
pub fn display_recording(recording: &Recording) {
    for item in recording.events() {
        let thread = match item.thread {
            Some(id) => match recording.thread_name(id) {
                Some(name) => format!("{id}:{name}"),
                None => id.to_string(),
            },
            None => "-".to_string(),
        };
        println!("[{thread}] {}", format_event(&item.event));
    }
    eprintln!(
        "{} events in {} chunks, {} threads",
        recording.events().len(),
        recording.chunk_count(),
        recording.thread_names().count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use prof_agent_common::EventTag;

    #[test]
    fn test_format_method_event() {
        let event = Event::Method { tag: EventTag::RootEntry, method_id: 7, timestamp: 12, thread_cpu: None };
        assert_eq!(format_event(&event), "RootEntry method=7 ts=12");
    }

    #[test]
    fn test_format_gc_event_in_hex() {
        assert_eq!(format_event(&Event::ObjGcHappened { object_id: 255 }), "ObjGc object=0xff");
    }
}

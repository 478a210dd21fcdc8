// ABOUTME: Counter and histogram helpers recorded through the metrics facade.
// ABOUTME: No exporter is installed here; an embedding binary may install any recorder.

use std::time::Duration;

pub fn record_session(kind: &'static str, outcome: &'static str) {
    ::metrics::counter!("murmur_sessions_total", "kind" => kind, "outcome" => outcome)
        .increment(1);
}

pub fn record_session_duration(kind: &'static str, elapsed: Duration) {
    ::metrics::histogram!("murmur_session_duration_seconds", "kind" => kind)
        .record(elapsed.as_secs_f64());
}

pub fn record_prompt(kind: &'static str) {
    ::metrics::counter!("murmur_prompts_total", "kind" => kind).increment(1);
}

pub fn record_retry(kind: &'static str) {
    ::metrics::counter!("murmur_reply_retries_total", "kind" => kind).increment(1);
}

pub fn record_skill_call(skill: &str, status: u16) {
    ::metrics::counter!(
        "murmur_skill_calls_total",
        "skill" => skill.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_dedup_hit(skill: &str) {
    ::metrics::counter!("murmur_skill_dedup_hits_total", "skill" => skill.to_string())
        .increment(1);
}

pub fn record_rate_limited(platform: &str) {
    ::metrics::counter!("murmur_rate_limited_total", "platform" => platform.to_string())
        .increment(1);
}

pub fn record_duplicate_event(platform: &str) {
    ::metrics::counter!("murmur_duplicate_events_total", "platform" => platform.to_string())
        .increment(1);
}

pub fn record_error(error_type: &'static str) {
    ::metrics::counter!("murmur_errors_total", "type" => error_type).increment(1);
}

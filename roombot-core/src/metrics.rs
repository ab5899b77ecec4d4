// ABOUTME: Counters and histograms for dispatch, voting and room lifecycle.
// ABOUTME: Thin wrappers over the metrics facade; an exporter is installed by the binary.

use ::metrics::{counter, describe_counter, describe_histogram, histogram};

pub const COMMANDS_TOTAL: &str = "roombot_commands_total";
pub const EVENTS_TOTAL: &str = "roombot_events_total";
pub const DUPLICATE_EVENTS_TOTAL: &str = "roombot_duplicate_events_total";
pub const HANDLER_ERRORS_TOTAL: &str = "roombot_handler_errors_total";
pub const VOTES_TOTAL: &str = "roombot_votes_total";
pub const ROOMS_ADMITTED_TOTAL: &str = "roombot_rooms_admitted_total";
pub const ROOMS_EVICTED_TOTAL: &str = "roombot_rooms_evicted_total";
pub const RECONNECT_ATTEMPTS_TOTAL: &str = "roombot_reconnect_attempts_total";
pub const QUEUE_ACTION_SECONDS: &str = "roombot_queue_action_seconds";

/// Register descriptions with whatever recorder is installed
pub fn describe() {
    describe_counter!(COMMANDS_TOTAL, "Commands routed to a built-in handler");
    describe_counter!(EVENTS_TOTAL, "Websocket events dispatched, by scope");
    describe_counter!(DUPLICATE_EVENTS_TOTAL, "Global events dropped as redeliveries");
    describe_counter!(HANDLER_ERRORS_TOTAL, "Handler failures caught at dispatch");
    describe_counter!(VOTES_TOTAL, "Accepted approve/leave votes");
    describe_counter!(ROOMS_ADMITTED_TOTAL, "Rooms admitted through an invitation");
    describe_counter!(ROOMS_EVICTED_TOTAL, "Rooms left by vote or expiry");
    describe_counter!(RECONNECT_ATTEMPTS_TOTAL, "Room connection attempts");
    describe_histogram!(QUEUE_ACTION_SECONDS, "Time spent running one queued room action");
}

pub fn record_command(name: &str) {
    counter!(COMMANDS_TOTAL, "command" => name.to_string()).increment(1);
}

pub fn record_event(global: bool) {
    let scope = if global { "global" } else { "room" };
    counter!(EVENTS_TOTAL, "scope" => scope).increment(1);
}

pub fn record_duplicate_event() {
    counter!(DUPLICATE_EVENTS_TOTAL).increment(1);
}

pub fn record_handler_error(stage: &'static str) {
    counter!(HANDLER_ERRORS_TOTAL, "stage" => stage).increment(1);
}

pub fn record_vote(kind: &'static str) {
    counter!(VOTES_TOTAL, "kind" => kind).increment(1);
}

pub fn record_room_admitted() {
    counter!(ROOMS_ADMITTED_TOTAL).increment(1);
}

pub fn record_room_evicted(reason: &'static str) {
    counter!(ROOMS_EVICTED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_reconnect_attempt() {
    counter!(RECONNECT_ATTEMPTS_TOTAL).increment(1);
}

pub fn record_queue_action_duration(seconds: f64) {
    histogram!(QUEUE_ACTION_SECONDS).record(seconds);
}

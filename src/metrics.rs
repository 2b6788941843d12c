//! Prometheus metrics for the chat core.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_SENT.clone()),
        Box::new(FRAMES_DELIVERED.clone()),
        Box::new(FRAMES_DROPPED.clone()),
        Box::new(OFFLINE_HANDOFFS.clone()),
        Box::new(NOTIFICATIONS_DROPPED.clone()),
        Box::new(WRITE_CONFLICTS.clone()),
        Box::new(ONLINE_USERS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            tracing::warn!(error = %e, "failed to register metric");
        }
    }
    registry
});

pub static MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("chat_messages_sent_total", "Messages created, by type"),
        &["message_type"],
    )
    .expect("valid metric definition")
});

pub static FRAMES_DELIVERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "chat_fanout_frames_delivered_total",
        "Event frames queued to live sessions",
    )
    .expect("valid metric definition")
});

pub static FRAMES_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "chat_fanout_frames_dropped_total",
        "Event frames dropped because a session queue was full or closed",
    )
    .expect("valid metric definition")
});

pub static OFFLINE_HANDOFFS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chat_offline_handoffs_total",
            "Events handed to the notification bridge, by event type",
        ),
        &["event_type"],
    )
    .expect("valid metric definition")
});

pub static NOTIFICATIONS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "chat_notifications_dropped_total",
        "Offline notifications dropped because the bridge queue was full",
    )
    .expect("valid metric definition")
});

pub static WRITE_CONFLICTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chat_write_conflicts_total",
            "Optimistic write conflicts that triggered a retry",
        ),
        &["operation"],
    )
    .expect("valid metric definition")
});

pub static ONLINE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("chat_online_users", "Users holding at least one live session")
        .expect("valid metric definition")
});

/// Render every registered metric in the text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buf)?;
    String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

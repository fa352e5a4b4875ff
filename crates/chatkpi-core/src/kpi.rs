//! KPI calculation over a scoped set of records and conversations.
//!
//! The calculator is a pure function of its inputs: scoping (date
//! range, client) happens at the store, and every rate/mean guards its
//! denominator by returning `None` instead of NaN.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::aggregate::mean;
use crate::models::{ChatRecord, Conversation, Role};

/// Inclusive date bounds for a KPI query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One calendar-date bucket of the messages-over-time series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateBucket {
    pub date: String,
    pub count: i64,
}

/// One hour-of-day bucket; hours with zero messages are omitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HourBucket {
    pub hour: u32,
    pub count: i64,
}

/// Computed KPI report. Never persisted; recomputed on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiReport {
    // Response metrics
    pub avg_response_time_ms: Option<f64>,
    pub avg_message_length: Option<f64>,
    pub avg_response_quality: Option<f64>,

    // Conversation metrics
    pub resolution_rate: Option<f64>,
    pub avg_satisfaction: Option<f64>,
    pub avg_conversation_duration: Option<f64>,

    // Usage metrics
    pub total_conversations: i64,
    pub total_messages: i64,
    pub active_tenants: i64,
    pub messages_per_day: Option<f64>,

    // AI accuracy metrics
    pub avg_turns_to_resolution: Option<f64>,

    // Time series
    pub messages_over_time: Vec<DateBucket>,
    pub peak_hours: Vec<HourBucket>,
}

/// Compute the KPI report from an already-scoped record/conversation
/// set. `range` is only consulted for the messages-per-day rate.
pub fn calculate(
    records: &[ChatRecord],
    conversations: &[Conversation],
    range: Option<&DateRange>,
) -> KpiReport {
    let ai_messages: Vec<&ChatRecord> =
        records.iter().filter(|r| r.role == Role::Ai).collect();

    let response_times: Vec<f64> = ai_messages
        .iter()
        .filter_map(|r| r.response_time_ms)
        .collect();
    let avg_response_time_ms = mean(&response_times);

    let message_lengths: Vec<f64> = ai_messages
        .iter()
        .map(|r| r.message.chars().count() as f64)
        .collect();
    let avg_message_length = mean(&message_lengths);

    // Per-message quality uses ai-side scores only; the conversation
    // satisfaction below uses conversation aggregates instead.
    let quality_scores: Vec<f64> = ai_messages
        .iter()
        .filter_map(|r| r.satisfaction_score)
        .collect();
    let avg_response_quality = mean(&quality_scores);

    let resolved: Vec<&Conversation> = conversations.iter().filter(|c| c.resolved).collect();
    let resolution_rate = if conversations.is_empty() {
        None
    } else {
        Some(resolved.len() as f64 / conversations.len() as f64 * 100.0)
    };

    let satisfaction_scores: Vec<f64> = conversations
        .iter()
        .filter_map(|c| c.satisfaction_score)
        .collect();
    let avg_satisfaction = mean(&satisfaction_scores);

    let durations: Vec<f64> = conversations.iter().map(|c| c.duration as f64).collect();
    let avg_conversation_duration = mean(&durations);

    let total_conversations = conversations.len() as i64;
    let total_messages = records.len() as i64;
    let active_tenants = records
        .iter()
        .map(|r| r.tenant_id.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len() as i64;

    let messages_per_day = range.and_then(|range| {
        let days = span_days(range)?;
        Some(total_messages as f64 / days as f64)
    });

    // Halved message count approximates back-and-forth turns.
    let turn_counts: Vec<f64> = resolved.iter().map(|c| c.message_count as f64).collect();
    let avg_turns_to_resolution = mean(&turn_counts).map(|turns| turns / 2.0);

    KpiReport {
        avg_response_time_ms,
        avg_message_length,
        avg_response_quality,
        resolution_rate,
        avg_satisfaction,
        avg_conversation_duration,
        total_conversations,
        total_messages,
        active_tenants,
        messages_per_day,
        avg_turns_to_resolution,
        messages_over_time: messages_over_time(records),
        peak_hours: peak_hours(records),
    }
}

/// Ceil span of the range in whole days; `None` when not positive.
fn span_days(range: &DateRange) -> Option<i64> {
    let seconds = (range.end - range.start).num_seconds();
    if seconds <= 0 {
        return None;
    }
    let days = (seconds + 86_399) / 86_400;
    Some(days)
}

/// Group records by the UTC date portion of their timestamp, counting
/// per date, sorted ascending by date string.
pub fn messages_over_time(records: &[ChatRecord]) -> Vec<DateBucket> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for record in records {
        let date = format!(
            "{:04}-{:02}-{:02}",
            record.timestamp.year(),
            record.timestamp.month(),
            record.timestamp.day()
        );
        *counts.entry(date).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(date, count)| DateBucket { date, count })
        .collect()
}

/// Group records by UTC hour of day, sorted ascending by hour.
pub fn peak_hours(records: &[ChatRecord]) -> Vec<HourBucket> {
    let mut counts: BTreeMap<u32, i64> = BTreeMap::new();
    for record in records {
        *counts.entry(record.timestamp.hour()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(hour, count)| HourBucket { hour, count })
        .collect()
}

#[cfg(test)]
#[path = "kpi_tests.rs"]
mod tests;

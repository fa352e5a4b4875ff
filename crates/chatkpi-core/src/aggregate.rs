//! Conversation aggregation: partitioning canonical records by
//! conversation id and deriving per-conversation attributes.

use std::collections::BTreeMap;

use crate::models::{ChatRecord, Conversation};

/// Sticky-positive tri-state merge: a conversation is resolved once any
/// of its records says so; absent values count as false.
pub fn merge_resolved(acc: bool, value: Option<bool>) -> bool {
    acc || value.unwrap_or(false)
}

/// Partition a normalized batch by conversation id and derive one
/// [`Conversation`] per partition.
///
/// Each partition is ordered by timestamp before start/end/tenant are
/// taken from it. The returned entities replace any previously stored
/// entity with the same id in full; they are computed from this batch's
/// records only.
pub fn group_conversations(records: &[ChatRecord], client_id: &str) -> Vec<Conversation> {
    let mut partitions: BTreeMap<&str, Vec<&ChatRecord>> = BTreeMap::new();
    for record in records {
        partitions
            .entry(record.conversation_id.as_str())
            .or_default()
            .push(record);
    }

    partitions
        .into_iter()
        .filter_map(|(conversation_id, mut group)| {
            group.sort_by_key(|r| r.timestamp);
            let first = group.first()?;
            let last = group.last()?;

            let resolved = group
                .iter()
                .fold(false, |acc, r| merge_resolved(acc, r.resolved));

            let scores: Vec<f64> = group.iter().filter_map(|r| r.satisfaction_score).collect();
            let satisfaction_score = mean(&scores);

            let duration = (last.timestamp - first.timestamp).num_seconds().max(0);

            Some(Conversation {
                conversation_id: conversation_id.to_string(),
                tenant_id: first.tenant_id.clone(),
                start_time: first.timestamp,
                end_time: last.timestamp,
                message_count: group.len() as i64,
                resolved,
                satisfaction_score,
                duration,
                client_id: client_id.to_string(),
            })
        })
        .collect()
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
#[path = "aggregate_tests.rs"]
mod tests;

//! Unit tests for the KPI calculator.

use super::*;
use chrono::TimeZone;

fn ts(raw: &str) -> DateTime<Utc> {
    raw.parse().expect("valid RFC 3339 timestamp")
}

fn record(timestamp: &str, role: Role) -> ChatRecord {
    ChatRecord {
        conversation_id: "conv_1".to_string(),
        tenant_id: "tenant_1".to_string(),
        timestamp: ts(timestamp),
        role,
        message: "hello".to_string(),
        response_time_ms: None,
        resolved: None,
        satisfaction_score: None,
        client_id: None,
    }
}

fn conversation(conversation_id: &str, resolved: bool, message_count: i64) -> Conversation {
    Conversation {
        conversation_id: conversation_id.to_string(),
        tenant_id: "tenant_1".to_string(),
        start_time: ts("2024-01-15T10:00:00Z"),
        end_time: ts("2024-01-15T10:05:00Z"),
        message_count,
        resolved,
        satisfaction_score: None,
        duration: 300,
        client_id: "client_1".to_string(),
    }
}

#[cfg(test)]
mod calculate_tests {
    use super::*;

    #[test]
    fn empty_inputs_yield_absent_rates_not_nan() {
        let report = calculate(&[], &[], None);

        assert_eq!(report.avg_response_time_ms, None);
        assert_eq!(report.avg_message_length, None);
        assert_eq!(report.avg_response_quality, None);
        assert_eq!(report.resolution_rate, None);
        assert_eq!(report.avg_satisfaction, None);
        assert_eq!(report.avg_conversation_duration, None);
        assert_eq!(report.messages_per_day, None);
        assert_eq!(report.avg_turns_to_resolution, None);
        assert_eq!(report.total_conversations, 0);
        assert_eq!(report.total_messages, 0);
        assert_eq!(report.active_tenants, 0);
        assert!(report.messages_over_time.is_empty());
        assert!(report.peak_hours.is_empty());
    }

    #[test]
    fn response_time_averages_ai_messages_only() {
        let mut ai = record("2024-01-15T10:00:00Z", Role::Ai);
        ai.response_time_ms = Some(2000.0);
        let mut ai2 = record("2024-01-15T10:01:00Z", Role::Ai);
        ai2.response_time_ms = Some(4000.0);
        let mut tenant = record("2024-01-15T10:02:00Z", Role::Tenant);
        tenant.response_time_ms = Some(999_999.0);

        let report = calculate(&[ai, ai2, tenant], &[], None);
        assert_eq!(report.avg_response_time_ms, Some(3000.0));
    }

    #[test]
    fn response_time_absent_when_no_ai_message_carries_one() {
        let ai = record("2024-01-15T10:00:00Z", Role::Ai);
        let report = calculate(&[ai], &[], None);
        assert_eq!(report.avg_response_time_ms, None);
    }

    #[test]
    fn message_length_counts_characters_of_ai_messages() {
        let mut ai = record("2024-01-15T10:00:00Z", Role::Ai);
        ai.message = "abcd".to_string();
        let mut ai2 = record("2024-01-15T10:01:00Z", Role::Ai);
        ai2.message = "ab".to_string();

        let report = calculate(&[ai, ai2], &[], None);
        assert_eq!(report.avg_message_length, Some(3.0));
    }

    #[test]
    fn response_quality_uses_ai_scores_only() {
        let mut ai = record("2024-01-15T10:00:00Z", Role::Ai);
        ai.satisfaction_score = Some(4.0);
        let mut ai2 = record("2024-01-15T10:01:00Z", Role::Ai);
        ai2.satisfaction_score = Some(5.0);
        let mut tenant = record("2024-01-15T10:02:00Z", Role::Tenant);
        tenant.satisfaction_score = Some(1.0);

        let report = calculate(&[ai, ai2, tenant], &[], None);
        assert_eq!(report.avg_response_quality, Some(4.5));
    }

    #[test]
    fn resolution_rate_is_a_percentage() {
        let conversations = vec![
            conversation("conv_1", true, 4),
            conversation("conv_2", false, 2),
            conversation("conv_3", false, 2),
            conversation("conv_4", false, 2),
        ];
        let report = calculate(&[], &conversations, None);
        assert_eq!(report.resolution_rate, Some(25.0));
    }

    #[test]
    fn active_tenants_counts_distinct_ids() {
        let mut a = record("2024-01-15T10:00:00Z", Role::Tenant);
        a.tenant_id = "tenant_a".to_string();
        let mut b = record("2024-01-15T10:01:00Z", Role::Tenant);
        b.tenant_id = "tenant_b".to_string();
        let mut a2 = record("2024-01-15T10:02:00Z", Role::Ai);
        a2.tenant_id = "tenant_a".to_string();

        let report = calculate(&[a, b, a2], &[], None);
        assert_eq!(report.active_tenants, 2);
        assert_eq!(report.total_messages, 3);
    }

    #[test]
    fn messages_per_day_uses_ceil_day_span() {
        let records = vec![
            record("2024-01-15T10:00:00Z", Role::Tenant),
            record("2024-01-16T10:00:00Z", Role::Ai),
            record("2024-01-17T10:00:00Z", Role::Tenant),
        ];
        // 36 hours rounds up to 2 days.
        let range = DateRange {
            start: ts("2024-01-15T00:00:00Z"),
            end: ts("2024-01-16T12:00:00Z"),
        };
        let report = calculate(&records, &[], Some(&range));
        assert_eq!(report.messages_per_day, Some(1.5));
    }

    #[test]
    fn messages_per_day_absent_without_a_positive_range() {
        let records = vec![record("2024-01-15T10:00:00Z", Role::Tenant)];

        let report = calculate(&records, &[], None);
        assert_eq!(report.messages_per_day, None);

        let inverted = DateRange {
            start: ts("2024-01-16T00:00:00Z"),
            end: ts("2024-01-15T00:00:00Z"),
        };
        let report = calculate(&records, &[], Some(&inverted));
        assert_eq!(report.messages_per_day, None);
    }

    #[test]
    fn turns_to_resolution_halves_resolved_message_counts() {
        let conversations = vec![
            conversation("conv_1", true, 6),
            conversation("conv_2", true, 2),
            conversation("conv_3", false, 100),
        ];
        let report = calculate(&[], &conversations, None);
        assert_eq!(report.avg_turns_to_resolution, Some(2.0));
    }

    #[test]
    fn report_serializes_camel_case_with_nulls() {
        let report = calculate(&[], &[], None);
        let json = serde_json::to_value(&report).expect("serialize");

        assert!(json.get("avgResponseTimeMs").is_some());
        assert!(json["avgResponseTimeMs"].is_null());
        assert_eq!(json["totalConversations"], 0);
        assert!(json.get("messagesOverTime").is_some());
        assert!(json.get("peakHours").is_some());
    }
}

#[cfg(test)]
mod time_series_tests {
    use super::*;

    #[test]
    fn buckets_by_utc_date_sorted_ascending() {
        let records = vec![
            record("2024-01-16T10:00:00Z", Role::Tenant),
            record("2024-01-15T10:00:00Z", Role::Ai),
            record("2024-01-15T23:59:59Z", Role::Tenant),
        ];

        let series = messages_over_time(&records);
        assert_eq!(
            series,
            vec![
                DateBucket {
                    date: "2024-01-15".to_string(),
                    count: 2
                },
                DateBucket {
                    date: "2024-01-16".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn date_buckets_sum_to_total_messages() {
        let records = vec![
            record("2024-01-15T10:00:00Z", Role::Tenant),
            record("2024-01-16T10:00:00Z", Role::Ai),
            record("2024-01-16T11:00:00Z", Role::Tenant),
            record("2024-02-01T00:00:00Z", Role::Ai),
        ];

        let report = calculate(&records, &[], None);
        let bucketed: i64 = report.messages_over_time.iter().map(|b| b.count).sum();
        assert_eq!(bucketed, report.total_messages);
    }

    #[test]
    fn offset_timestamps_bucket_by_their_utc_date() {
        let late_evening = Utc
            .with_ymd_and_hms(2024, 1, 15, 23, 30, 0)
            .single()
            .expect("valid datetime");
        let mut r = record("2024-01-15T10:00:00Z", Role::Tenant);
        r.timestamp = late_evening;

        let series = messages_over_time(&[r]);
        assert_eq!(series[0].date, "2024-01-15");
    }

    #[test]
    fn peak_hours_omit_empty_hours() {
        let records = vec![
            record("2024-01-15T09:15:00Z", Role::Tenant),
            record("2024-01-15T09:45:00Z", Role::Ai),
            record("2024-01-16T14:00:00Z", Role::Tenant),
        ];

        let hours = peak_hours(&records);
        assert_eq!(
            hours,
            vec![
                HourBucket { hour: 9, count: 2 },
                HourBucket { hour: 14, count: 1 },
            ]
        );
    }
}

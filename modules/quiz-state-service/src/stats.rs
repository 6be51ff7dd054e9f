//! Aggregates over a record snapshot for the admin views.

use chrono::{DateTime, Utc};
use quiz_state_types::{ParticipantSummary, Record, RecordMap, StateStats, timestamp};

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn is_completed(record: &Record, total_stands: usize) -> bool {
    record.completed_stands() >= total_stands
}

/// `total_stands` is the current catalog size. Progress is averaged per record
/// against the record's own stand set, which tolerates a catalog reload that
/// has not been reconciled yet.
pub fn compute_stats(records: &RecordMap, total_stands: usize, now: DateTime<Utc>) -> StateStats {
    let mut stats = StateStats {
        timestamp: timestamp::format(&now),
        total_participants: records.len(),
        total_stands,
        completed: 0,
        verified: 0,
        qualified: 0,
        with_pending_question: 0,
        average_progress: 0.0,
    };
    if records.is_empty() {
        return stats;
    }

    let mut progress_sum = 0.0;
    for record in records.values() {
        progress_sum += record.progress_percent();
        let completed = is_completed(record, total_stands);
        if completed {
            stats.completed += 1;
        }
        if record.profile_verified {
            stats.verified += 1;
            if completed {
                stats.qualified += 1;
            }
        }
        if record.pending_question.is_some() {
            stats.with_pending_question += 1;
        }
    }
    stats.average_progress = round1(progress_sum / records.len() as f64);
    stats
}

/// Per-participant rows, most recently updated first.
pub fn summarize(records: &RecordMap, total_stands: usize) -> Vec<ParticipantSummary> {
    let mut rows: Vec<(DateTime<Utc>, ParticipantSummary)> = records
        .iter()
        .map(|(id, record)| {
            let summary = ParticipantSummary {
                participant_id: id.clone(),
                full_name: record.full_name.clone(),
                completed_stands: record.completed_stands(),
                total_stands: record.stand_status.len(),
                progress_percent: round1(record.progress_percent()),
                profile_verified: record.profile_verified,
                profile_link: record.profile_link.clone(),
                pending_question_stand: record.pending_question.as_ref().map(|q| q.stand_id.clone()),
                qualified: record.profile_verified && is_completed(record, total_stands),
                awaiting_name: record.awaiting_name,
                awaiting_vk_link: record.awaiting_vk_link,
                created_at: timestamp::format(&record.created_at),
                updated_at: timestamp::format(&record.updated_at),
            };
            (record.updated_at, summary)
        })
        .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0));
    rows.into_iter().map(|(_, summary)| summary).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_state_types::PendingQuestion;

    fn catalog() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    fn three_participants(now: DateTime<Utc>) -> RecordMap {
        let ids = catalog();
        let mut finished = Record::new(&ids, now);
        for progress in finished.stand_status.values_mut() {
            progress.done = true;
        }
        finished.profile_verified = true;

        let mut partial = Record::new(&ids, now + chrono::Duration::seconds(1));
        partial.stand_status.get_mut("a").unwrap().done = true;
        partial.pending_question = Some(PendingQuestion {
            stand_id: "b".to_string(),
            question_text: "?".to_string(),
            accepted_answers: vec![],
            hint: String::new(),
            extra: Default::default(),
        });

        let fresh = Record::new(&ids, now + chrono::Duration::seconds(2));

        let mut records = RecordMap::new();
        records.insert("1".to_string(), finished);
        records.insert("2".to_string(), partial);
        records.insert("3".to_string(), fresh);
        records
    }

    #[test]
    fn test_stats_over_mixed_participants() {
        let now = Utc::now();
        let stats = compute_stats(&three_participants(now), 3, now);
        assert_eq!(stats.total_participants, 3);
        assert_eq!(stats.total_stands, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.qualified, 1);
        assert_eq!(stats.with_pending_question, 1);
        assert!(stats.average_progress > 0.0 && stats.average_progress < 100.0);
        // (100 + 33.33 + 0) / 3
        assert_eq!(stats.average_progress, 44.4);
    }

    #[test]
    fn test_stats_on_empty_store() {
        let stats = compute_stats(&RecordMap::new(), 3, Utc::now());
        assert_eq!(stats.total_participants, 0);
        assert_eq!(stats.average_progress, 0.0);
    }

    #[test]
    fn test_verified_without_completion_is_not_qualified() {
        let now = Utc::now();
        let mut records = three_participants(now);
        records.get_mut("2").unwrap().profile_verified = true;
        let stats = compute_stats(&records, 3, now);
        assert_eq!(stats.verified, 2);
        assert_eq!(stats.qualified, 1);
    }

    #[test]
    fn test_summaries_sorted_by_recent_update() {
        let rows = summarize(&three_participants(Utc::now()), 3);
        let order: Vec<&str> = rows.iter().map(|r| r.participant_id.as_str()).collect();
        assert_eq!(order, vec!["3", "2", "1"]);
        assert!(rows[2].qualified);
        assert_eq!(rows[1].pending_question_stand.as_deref(), Some("b"));
        assert_eq!(rows[1].progress_percent, 33.3);
    }
}

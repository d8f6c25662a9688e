//! Output formatting for the operator commands
//!
//! Every formatter returns a string: pretty JSON with `--json`, a comfy-table
//! otherwise.

use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table};
use mentorboard_core::StatsReport;
use mentorboard_types::{CacheRecord, QueueEntry, RefreshAllSummary, RefreshFailure, TickSummary};
use serde_json::Value;

fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).fg(Color::Cyan))
            .collect::<Vec<_>>(),
    );
    table
}

fn json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Human readable age: "42s", "5m", "3h", "2d"
pub fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

pub fn format_record(record: &CacheRecord, now: DateTime<Utc>, as_json: bool) -> String {
    if as_json {
        return json(record);
    }

    let mut lines = vec![
        format!("Subject:          {}", record.key),
        format!(
            "Updated:          {} ({} ago)",
            timestamp(Some(record.cache_updated_at)),
            format_age(record.age(now))
        ),
        format!("Schema version:   {}", record.schema_version),
        String::new(),
    ];

    let mut metrics = table(&["Metric", "Value"]);
    if let Ok(Value::Object(fields)) = serde_json::to_value(&record.metrics) {
        // Externally tagged enum: { "student": { ... } }
        for inner in fields.values() {
            if let Value::Object(values) = inner {
                for (name, value) in values {
                    metrics.add_row(vec![name.clone(), display_value(value)]);
                }
            }
        }
    }
    lines.push(metrics.to_string());
    lines.join("\n")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn format_queue(entries: &[QueueEntry], pending: usize, as_json: bool) -> String {
    if as_json {
        return json(&serde_json::json!({ "pending": pending, "entries": entries }));
    }
    if entries.is_empty() {
        return "Refresh queue is empty.".to_string();
    }

    let mut t = table(&["Subject", "Reason", "Enqueued", "Attempts", "Not before", "Last error"]);
    for entry in entries {
        t.add_row(vec![
            entry.key.to_string(),
            entry.reason.to_string(),
            timestamp(Some(entry.enqueued_at)),
            entry.attempts.to_string(),
            timestamp(entry.not_before),
            entry
                .last_error
                .as_deref()
                .map(|e| truncate(e, 60))
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    format!("{}\n{} pending", t, pending)
}

pub fn format_stats(stats: &StatsReport, as_json: bool) -> String {
    if as_json {
        return json(stats);
    }

    let mut t = table(&["Subject type", "Cached dashboards"]);
    for (subject_type, count) in &stats.cache.by_type {
        t.add_row(vec![subject_type.to_string(), count.to_string()]);
    }

    let mut lines = vec![
        "mentorboard - Dashboard Cache".to_string(),
        "=============================".to_string(),
        String::new(),
        t.to_string(),
        String::new(),
        format!("Total dashboards: {}", stats.cache.total_entries),
        format!("Cache size:       {} bytes", stats.cache.total_size_bytes),
        format!("Oldest update:    {}", timestamp(stats.cache.oldest_update)),
        format!("Newest update:    {}", timestamp(stats.cache.newest_update)),
        format!("Pending queue:    {}", stats.pending_queue),
        format!("Held claims:      {}", stats.held_claims),
    ];
    if let Some(tick) = &stats.last_tick {
        lines.push(format!("Last tick:        {}", timestamp(tick.started_at)));
    }
    lines.join("\n")
}

pub fn format_tick(summary: &TickSummary, as_json: bool) -> String {
    if as_json {
        return json(summary);
    }

    let mut t = table(&["", "Queue", "Sweep"]);
    t.add_row(vec![
        "candidates".to_string(),
        summary.queue_drained.to_string(),
        summary.sweep_candidates.to_string(),
    ]);
    t.add_row(vec![
        "refreshed".to_string(),
        summary.queue_refreshed.to_string(),
        summary.sweep_refreshed.to_string(),
    ]);
    t.add_row(vec![
        "failed".to_string(),
        summary.queue_failed.to_string(),
        summary.sweep_failed.to_string(),
    ]);
    t.add_row(vec![
        "dropped".to_string(),
        summary.queue_dropped.to_string(),
        "-".to_string(),
    ]);
    t.add_row(vec![
        "deferred".to_string(),
        summary.queue_deferred.to_string(),
        "-".to_string(),
    ]);

    let mut out = format!(
        "Tick finished in {}ms ({} expired claims released)\n{}",
        summary.elapsed_ms,
        summary.expired_claims + summary.expired_queue_claims,
        t
    );
    append_failures(&mut out, &summary.failures);
    out
}

pub fn format_refresh_all(summary: &RefreshAllSummary, as_json: bool) -> String {
    if as_json {
        return json(summary);
    }

    let mut out = format!(
        "{}: {} subjects, {} refreshed, {} coalesced, {} not found, {} failed ({}ms)",
        summary.subject_type,
        summary.total,
        summary.refreshed,
        summary.coalesced,
        summary.not_found,
        summary.failed,
        summary.elapsed_ms
    );
    append_failures(&mut out, &summary.failures);
    out
}

fn append_failures(out: &mut String, failures: &[RefreshFailure]) {
    if failures.is_empty() {
        return;
    }
    let mut t = table(&["Subject", "Kind", "Message"]);
    for failure in failures {
        t.add_row(vec![
            failure.key.to_string(),
            failure.kind.clone(),
            truncate(&failure.message, 80),
        ]);
    }
    out.push_str("\n\nFailures:\n");
    out.push_str(&t.to_string());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

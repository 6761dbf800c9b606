//! Plain-text rendering of a metrics snapshot for terminals.

use std::fmt::Write;

use time::format_description::well_known::Rfc3339;

use crate::ledger::LedgerSnapshot;
use crate::metrics::{BucketStats, MetricsSnapshot};

/// Render `metrics` computed from `snapshot` as an aligned text report.
pub fn render_text(metrics: &MetricsSnapshot, snapshot: &LedgerSnapshot) -> String {
    let mut out = String::new();
    let counts = &metrics.counts;
    let rates = &metrics.rates;

    let _ = writeln!(out, "Verification metrics");
    if let Some(reason) = snapshot.storage_error() {
        let _ = writeln!(out, "WARNING: ledger unreadable, figures below are empty: {reason}");
    }
    let last_updated = metrics
        .last_updated
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(|| "never".to_string());
    let _ = writeln!(out, "  last updated   {last_updated}");
    let _ = writeln!(
        out,
        "  verifications  {} ({} correct, {} incorrect, verdict accuracy {})",
        counts.total,
        counts.correct,
        counts.incorrect,
        percent(metrics.verdict_accuracy)
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "Confusion matrix ({} labelled)", counts.cm_total);
    let _ = writeln!(out, "  TP {:>6}   FP {:>6}", counts.tp, counts.fp);
    let _ = writeln!(out, "  FN {:>6}   TN {:>6}", counts.fn_, counts.tn);
    let _ = writeln!(
        out,
        "  accuracy {}  precision {}  recall {}  f1 {:.3}",
        percent(rates.accuracy),
        percent(rates.precision),
        percent(rates.recall),
        rates.f1
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "By label");
    if metrics.label_breakdown.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    let width = metrics
        .label_breakdown
        .keys()
        .map(|label| label.chars().count())
        .max()
        .unwrap_or(0);
    for (label, stats) in &metrics.label_breakdown {
        let _ = writeln!(
            out,
            "  {label:<width$}  {:>5} total  {:>5} correct  {:>5} incorrect  {}",
            stats.total,
            stats.correct,
            stats.incorrect,
            percent(stats.accuracy)
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "By confidence");
    bucket_line(&mut out, "high", &metrics.confidence.high);
    bucket_line(&mut out, "medium", &metrics.confidence.medium);
    bucket_line(&mut out, "low", &metrics.confidence.low);
    let _ = writeln!(out);

    let recent = &metrics.recent_activity;
    let _ = writeln!(
        out,
        "Recent activity  24h {}  7d {}  30d {}",
        recent.last_24h, recent.last_7d, recent.last_30d
    );
    out
}

fn bucket_line(out: &mut String, name: &str, stats: &BucketStats) {
    let _ = writeln!(
        out,
        "  {name:<6}  {:>5} records  {}",
        stats.count,
        percent(stats.accuracy)
    );
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

//! Dashboard metrics derived from a ledger snapshot.
//!
//! Everything here is a pure function of the records and the query time.
//! Every rate guards its denominator and yields `0.0` instead of NaN.

use std::collections::BTreeMap;

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::classifier::{Confusion, Verdict};
use crate::config::MetricsSettings;
use crate::ledger::VerificationRecord;

/// Breakdown key for records without a predicted label.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Verdict and confusion-matrix counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    /// `tp + tn + fp + fn`; below `total` when some records carry no label.
    pub cm_total: usize,
}

/// Confusion-matrix rates, each in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Rates {
    /// `(TP + TN) / cm_total`.
    pub accuracy: f64,
    /// `TP / (TP + FP)`.
    pub precision: f64,
    /// `TP / (TP + FN)`.
    pub recall: f64,
    pub f1: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LabelStats {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    /// `correct / total`.
    pub accuracy: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BucketStats {
    pub count: usize,
    /// `correct / count`.
    pub accuracy: f64,
}

/// Records partitioned by model confidence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ConfidenceBuckets {
    pub high: BucketStats,
    pub medium: BucketStats,
    pub low: BucketStats,
}

/// Records verified within trailing windows of the query time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecentActivity {
    pub last_24h: usize,
    pub last_7d: usize,
    pub last_30d: usize,
}

/// Full metrics view of one ledger snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counts: Counts,
    pub rates: Rates,
    /// `correct / total` over every record, labelled or not.
    pub verdict_accuracy: f64,
    pub label_breakdown: BTreeMap<String, LabelStats>,
    pub confidence: ConfidenceBuckets,
    pub recent_activity: RecentActivity,
    /// Latest record `timestamp`; `None` for an empty ledger.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
}

/// Aggregate `records` as seen at `now`.
pub fn compute_metrics(
    records: &[VerificationRecord],
    now: OffsetDateTime,
    settings: &MetricsSettings,
) -> MetricsSnapshot {
    let mut counts = Counts::default();
    let mut labels: BTreeMap<String, Tally> = BTreeMap::new();
    let mut high = Tally::default();
    let mut medium = Tally::default();
    let mut low = Tally::default();
    let mut recent = RecentActivity::default();
    let mut last_updated: Option<OffsetDateTime> = None;

    let day_ago = now - Duration::hours(24);
    let week_ago = now - Duration::days(7);
    let month_ago = now - Duration::days(30);

    for record in records {
        let correct = record.verdict == Verdict::Correct;
        counts.total += 1;
        if correct {
            counts.correct += 1;
        } else {
            counts.incorrect += 1;
        }
        match record.confusion {
            Some(Confusion::TruePositive) => counts.tp += 1,
            Some(Confusion::TrueNegative) => counts.tn += 1,
            Some(Confusion::FalsePositive) => counts.fp += 1,
            Some(Confusion::FalseNegative) => counts.fn_ += 1,
            None => {}
        }

        let label = record.label.as_deref().unwrap_or(UNKNOWN_LABEL);
        labels.entry(label.to_string()).or_default().add(correct);

        let confidence = record.confidence.unwrap_or(0.0);
        let bucket = if confidence >= settings.high_confidence {
            &mut high
        } else if confidence >= settings.medium_confidence {
            &mut medium
        } else {
            &mut low
        };
        bucket.add(correct);

        if record.timestamp >= day_ago {
            recent.last_24h += 1;
        }
        if record.timestamp >= week_ago {
            recent.last_7d += 1;
        }
        if record.timestamp >= month_ago {
            recent.last_30d += 1;
        }
        last_updated = Some(match last_updated {
            Some(latest) => latest.max(record.timestamp),
            None => record.timestamp,
        });
    }
    counts.cm_total = counts.tp + counts.tn + counts.fp + counts.fn_;

    MetricsSnapshot {
        rates: rates(&counts),
        verdict_accuracy: ratio(counts.correct, counts.total),
        counts,
        label_breakdown: labels
            .into_iter()
            .map(|(label, tally)| (label, tally.label_stats()))
            .collect(),
        confidence: ConfidenceBuckets {
            high: high.bucket_stats(),
            medium: medium.bucket_stats(),
            low: low.bucket_stats(),
        },
        recent_activity: recent,
        last_updated,
    }
}

/// Records grouped by predicted label, ledger order kept within each group.
pub fn group_by_label(
    records: &[VerificationRecord],
) -> BTreeMap<String, Vec<&VerificationRecord>> {
    let mut groups: BTreeMap<String, Vec<&VerificationRecord>> = BTreeMap::new();
    for record in records {
        let label = record.label.as_deref().unwrap_or(UNKNOWN_LABEL);
        groups.entry(label.to_string()).or_default().push(record);
    }
    groups
}

fn rates(counts: &Counts) -> Rates {
    let precision = ratio(counts.tp, counts.tp + counts.fp);
    let recall = ratio(counts.tp, counts.tp + counts.fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    Rates {
        accuracy: ratio(counts.tp + counts.tn, counts.cm_total),
        precision,
        recall,
        f1,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Default)]
struct Tally {
    total: usize,
    correct: usize,
}

impl Tally {
    fn add(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }

    fn label_stats(&self) -> LabelStats {
        LabelStats {
            total: self.total,
            correct: self.correct,
            incorrect: self.total - self.correct,
            accuracy: ratio(self.correct, self.total),
        }
    }

    fn bucket_stats(&self) -> BucketStats {
        BucketStats {
            count: self.total,
            accuracy: ratio(self.correct, self.total),
        }
    }
}

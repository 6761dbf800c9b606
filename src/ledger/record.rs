use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::classifier::{Classifier, Confusion, Verdict};

use super::LedgerError;

/// One human verification of one upstream prediction, as persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Upstream prediction id; unique within the ledger.
    pub id: String,
    pub verdict: Verdict,
    /// Label the model predicted at review time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Model confidence in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub predicted_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// When this verification was recorded; replaced on every resubmission.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// When the id was first verified; kept across resubmissions.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub first_recorded_at: Option<OffsetDateTime>,
    pub confusion: Option<Confusion>,
}

/// Optional prediction context sent along with a verdict.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordMeta {
    pub label: Option<String>,
    pub confidence: Option<f64>,
    pub predicted_at: Option<OffsetDateTime>,
    pub source: Option<String>,
}

/// A verification command before validation and classification.
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub id: String,
    pub verdict: Verdict,
    pub meta: RecordMeta,
    /// Caller-supplied verification time; submission time when absent.
    pub timestamp: Option<OffsetDateTime>,
}

impl Submission {
    pub fn new(id: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            id: id.into(),
            verdict,
            meta: RecordMeta::default(),
            timestamp: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.meta.label = Some(label.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.meta.confidence = Some(confidence);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.meta.source = Some(source.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Decode the JSON body of a verification request.
    ///
    /// Shape: `{id, verdict, meta?: {label?, confidence?, predicted_at?, source?}, timestamp?}`.
    pub fn from_json(body: &[u8]) -> Result<Self, LedgerError> {
        let wire: SubmissionWire = serde_json::from_slice(body)
            .map_err(|err| LedgerError::InvalidPayload(format!("malformed JSON: {err}")))?;
        let id = match wire.id {
            Some(serde_json::Value::String(id)) => id,
            Some(_) => return Err(invalid("id must be a string")),
            None => return Err(invalid("id is required")),
        };
        let verdict = match wire.verdict {
            Some(serde_json::Value::String(value)) => Verdict::parse(&value)
                .ok_or_else(|| invalid("verdict must be \"correct\" or \"incorrect\""))?,
            Some(_) | None => return Err(invalid("verdict must be \"correct\" or \"incorrect\"")),
        };
        let meta = match wire.meta {
            Some(meta) => RecordMeta {
                label: meta.label,
                confidence: meta.confidence,
                predicted_at: meta
                    .predicted_at
                    .as_deref()
                    .map(|value| parse_timestamp("meta.predicted_at", value))
                    .transpose()?,
                source: meta.source,
            },
            None => RecordMeta::default(),
        };
        let timestamp = wire
            .timestamp
            .as_deref()
            .map(|value| parse_timestamp("timestamp", value))
            .transpose()?;
        Ok(Self {
            id,
            verdict,
            meta,
            timestamp,
        })
    }

    /// Validate, stamp and classify into the record that will be stored.
    pub(crate) fn into_record(
        self,
        classifier: &Classifier,
        now: OffsetDateTime,
    ) -> Result<VerificationRecord, LedgerError> {
        if self.id.is_empty() {
            return Err(invalid("id must be a non-empty string"));
        }
        if let Some(confidence) = self.meta.confidence {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(invalid("meta.confidence must be a number in [0, 1]"));
            }
        }
        let label = non_blank(self.meta.label);
        let confusion = classifier.classify(label.as_deref(), self.verdict);
        let timestamp = self.timestamp.unwrap_or(now);
        Ok(VerificationRecord {
            id: self.id,
            verdict: self.verdict,
            label,
            confidence: self.meta.confidence,
            predicted_at: self.meta.predicted_at,
            source: non_blank(self.meta.source),
            timestamp,
            first_recorded_at: Some(timestamp),
            confusion,
        })
    }
}

/// Insert `record` or replace the record with the same id in place.
///
/// Returns the index the record now occupies. A replacement keeps the
/// original position and `first_recorded_at`.
pub(crate) fn upsert(records: &mut Vec<VerificationRecord>, mut record: VerificationRecord) -> usize {
    match records.iter().position(|existing| existing.id == record.id) {
        Some(index) => {
            let previous = &records[index];
            record.first_recorded_at =
                Some(previous.first_recorded_at.unwrap_or(previous.timestamp));
            records[index] = record;
            index
        }
        None => {
            records.push(record);
            records.len() - 1
        }
    }
}

#[derive(Deserialize)]
struct SubmissionWire {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    verdict: Option<serde_json::Value>,
    #[serde(default)]
    meta: Option<MetaWire>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct MetaWire {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    predicted_at: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

fn parse_timestamp(field: &str, value: &str) -> Result<OffsetDateTime, LedgerError> {
    OffsetDateTime::parse(value.trim(), &Rfc3339)
        .map_err(|err| invalid(&format!("{field} must be an RFC 3339 timestamp: {err}")))
}

/// Whitespace-only strings count as absent; anything else is kept verbatim.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn invalid(message: &str) -> LedgerError {
    LedgerError::InvalidPayload(message.to_string())
}

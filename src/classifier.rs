//! Two-class confusion bucketing of human verdicts.
//!
//! The label space of the upstream model may have any number of classes; the
//! classifier collapses it to "positive label" versus everything else.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Human judgment on a prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The reviewer agrees with the predicted label.
    Correct,
    /// The reviewer disagrees with the predicted label.
    Incorrect,
}

impl Verdict {
    /// Parse the wire form (`"correct"` / `"incorrect"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "correct" => Some(Self::Correct),
            "incorrect" => Some(Self::Incorrect),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confusion-matrix cell of a verified prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confusion {
    #[serde(rename = "TP")]
    TruePositive,
    #[serde(rename = "FP")]
    FalsePositive,
    #[serde(rename = "TN")]
    TrueNegative,
    #[serde(rename = "FN")]
    FalseNegative,
}

impl Confusion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TruePositive => "TP",
            Self::FalsePositive => "FP",
            Self::TrueNegative => "TN",
            Self::FalseNegative => "FN",
        }
    }
}

impl fmt::Display for Confusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps (predicted label, verdict) pairs to confusion cells relative to one positive label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classifier {
    positive_label: String,
}

impl Classifier {
    pub fn new(positive_label: impl Into<String>) -> Self {
        Self {
            positive_label: positive_label.into(),
        }
    }

    pub fn positive_label(&self) -> &str {
        &self.positive_label
    }

    /// Bucket one verdict. Returns `None` when no predicted label is known.
    ///
    /// A correct verdict confirms the predicted class (TP/TN); an incorrect one
    /// is an error in the direction of the predicted class (FP/FN). Label
    /// comparison is exact and case-sensitive.
    pub fn classify(&self, predicted_label: Option<&str>, verdict: Verdict) -> Option<Confusion> {
        let label = predicted_label?;
        let is_positive = label == self.positive_label;
        Some(match (verdict, is_positive) {
            (Verdict::Correct, true) => Confusion::TruePositive,
            (Verdict::Correct, false) => Confusion::TrueNegative,
            (Verdict::Incorrect, true) => Confusion::FalsePositive,
            (Verdict::Incorrect, false) => Confusion::FalseNegative,
        })
    }
}

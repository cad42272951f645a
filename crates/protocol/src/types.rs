//! Core assessment types shared across the protocol

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// One axis of the maturity assessment. Declaration order is assessment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dimension {
    Evolution,
    Outcome,
    Leverage,
    Sponsorship,
    Coverage,
    Alignment,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Evolution,
        Dimension::Outcome,
        Dimension::Leverage,
        Dimension::Sponsorship,
        Dimension::Coverage,
        Dimension::Alignment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Evolution => "Evolution",
            Dimension::Outcome => "Outcome",
            Dimension::Leverage => "Leverage",
            Dimension::Sponsorship => "Sponsorship",
            Dimension::Coverage => "Coverage",
            Dimension::Alignment => "Alignment",
        }
    }

    /// Zero-based position in the assessment order.
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|d| d == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|d| d.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown dimension: {s}"))
    }
}

pub const COMPLETED_STAGE: &str = "COMPLETED";

/// Where the assessment currently is: a dimension, or done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Stage {
    Dimension(Dimension),
    Completed,
}

impl Stage {
    pub fn is_completed(&self) -> bool {
        matches!(self, Stage::Completed)
    }

    /// Number of dimensions already behind this stage.
    pub fn progress_index(&self) -> usize {
        match self {
            Stage::Dimension(d) => d.index(),
            Stage::Completed => Dimension::ALL.len(),
        }
    }
}

impl TryFrom<String> for Stage {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == COMPLETED_STAGE {
            return Ok(Stage::Completed);
        }
        value.parse().map(Stage::Dimension)
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Dimension(d) => d.as_str().to_string(),
            Stage::Completed => COMPLETED_STAGE.to_string(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Dimension(d) => d.fmt(f),
            Stage::Completed => f.write_str(COMPLETED_STAGE),
        }
    }
}

/// Per-dimension assessment record, written only by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionRecord {
    #[serde(default)]
    pub scoring: Option<f64>,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub insights: String,
    #[serde(default, deserialize_with = "deserialize_feedback")]
    pub partial_feedback: Vec<String>,
}

impl DimensionRecord {
    pub fn has_feedback(&self) -> bool {
        self.partial_feedback.iter().any(|item| !item.trim().is_empty())
    }
}

/// Older agent builds send `partial_feedback` as a single string.
fn deserialize_feedback<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Feedback {
        List(Vec<String>),
        Single(String),
        Missing(()),
    }

    Ok(match Feedback::deserialize(deserializer)? {
        Feedback::List(items) => items,
        Feedback::Single(text) if text.trim().is_empty() => Vec::new(),
        Feedback::Single(text) => vec![text],
        Feedback::Missing(()) => Vec::new(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub text: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub executive_summary: String,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

/// Full-or-partial assessment snapshot as pushed by the agent.
///
/// Dimensions the agent has not reported yet are absent rather than
/// defaulted, so nothing here is ever derived client-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionState {
    #[serde(rename = "Evolution", default, skip_serializing_if = "Option::is_none")]
    pub evolution: Option<DimensionRecord>,
    #[serde(rename = "Outcome", default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DimensionRecord>,
    #[serde(rename = "Leverage", default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<DimensionRecord>,
    #[serde(rename = "Sponsorship", default, skip_serializing_if = "Option::is_none")]
    pub sponsorship: Option<DimensionRecord>,
    #[serde(rename = "Coverage", default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<DimensionRecord>,
    #[serde(rename = "Alignment", default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<DimensionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<FinalReport>,
}

impl DimensionState {
    pub fn record(&self, dimension: Dimension) -> Option<&DimensionRecord> {
        match dimension {
            Dimension::Evolution => self.evolution.as_ref(),
            Dimension::Outcome => self.outcome.as_ref(),
            Dimension::Leverage => self.leverage.as_ref(),
            Dimension::Sponsorship => self.sponsorship.as_ref(),
            Dimension::Coverage => self.coverage.as_ref(),
            Dimension::Alignment => self.alignment.as_ref(),
        }
    }

    pub fn record_mut(&mut self, dimension: Dimension) -> &mut Option<DimensionRecord> {
        match dimension {
            Dimension::Evolution => &mut self.evolution,
            Dimension::Outcome => &mut self.outcome,
            Dimension::Leverage => &mut self.leverage,
            Dimension::Sponsorship => &mut self.sponsorship,
            Dimension::Coverage => &mut self.coverage,
            Dimension::Alignment => &mut self.alignment,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.current.is_some_and(|stage| stage.is_completed())
    }

    /// Completed results can only be shown once the final report is in.
    pub fn is_renderable(&self) -> bool {
        self.is_completed() && self.final_report.is_some()
    }

    pub fn has_feedback_for(&self, dimension: Dimension) -> bool {
        self.record(dimension)
            .is_some_and(DimensionRecord::has_feedback)
    }
}

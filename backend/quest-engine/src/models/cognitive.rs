use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{bson_datetime_as_chrono, StudentId};

/// Bloom's taxonomy level a question exercises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BloomLevel {
    Remember,
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

impl BloomLevel {
    pub const ALL: [BloomLevel; 6] = [
        BloomLevel::Remember,
        BloomLevel::Understand,
        BloomLevel::Apply,
        BloomLevel::Analyze,
        BloomLevel::Evaluate,
        BloomLevel::Create,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BloomLevel::Remember => "Remember",
            BloomLevel::Understand => "Understand",
            BloomLevel::Apply => "Apply",
            BloomLevel::Analyze => "Analyze",
            BloomLevel::Evaluate => "Evaluate",
            BloomLevel::Create => "Create",
        }
    }

    /// Parses a stored label, ignoring case and surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(label))
    }
}

/// The content layer stores the level as free text. Blank or unrecognised
/// labels read as untagged instead of failing the whole document.
pub(crate) mod lenient_bloom_level {
    use serde::{Deserialize, Deserializer};

    use super::BloomLevel;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<BloomLevel>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label: Option<String> = Option::deserialize(deserializer)?;
        Ok(label.as_deref().and_then(BloomLevel::from_label))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CompetencyTier {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl CompetencyTier {
    /// Tier for a mean Bloom accuracy in percent.
    pub fn from_mean_accuracy(mean: f64) -> Self {
        if mean >= 80.0 {
            CompetencyTier::Advanced
        } else if mean >= 60.0 {
            CompetencyTier::Intermediate
        } else {
            CompetencyTier::Beginner
        }
    }

    /// Quest difficulty (1-10 scale) recommended for the tier.
    pub fn recommended_difficulty(&self) -> f64 {
        match self {
            CompetencyTier::Advanced => 8.0,
            CompetencyTier::Intermediate => 5.0,
            CompetencyTier::Beginner => 3.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompetencyTier::Beginner => "Beginner",
            CompetencyTier::Intermediate => "Intermediate",
            CompetencyTier::Advanced => "Advanced",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CognitiveProfile {
    #[serde(rename = "_id")]
    pub student_id: StudentId,
    pub remember_accuracy: f64,
    pub understand_accuracy: f64,
    pub apply_accuracy: f64,
    pub analyze_accuracy: f64,
    pub evaluate_accuracy: f64,
    pub create_accuracy: f64,
    /// Topics below the weakness threshold, with their accuracy.
    #[serde(default)]
    pub weak_topics: BTreeMap<String, f64>,
    pub competency_level: CompetencyTier,
    pub recommended_difficulty: f64,
    #[serde(rename = "lastUpdatedAt", with = "bson_datetime_as_chrono")]
    pub last_updated_at: DateTime<Utc>,
}

impl CognitiveProfile {
    pub fn accuracy(&self, level: BloomLevel) -> f64 {
        match level {
            BloomLevel::Remember => self.remember_accuracy,
            BloomLevel::Understand => self.understand_accuracy,
            BloomLevel::Apply => self.apply_accuracy,
            BloomLevel::Analyze => self.analyze_accuracy,
            BloomLevel::Evaluate => self.evaluate_accuracy,
            BloomLevel::Create => self.create_accuracy,
        }
    }

    pub fn mean_accuracy(&self) -> f64 {
        BloomLevel::ALL
            .iter()
            .map(|level| self.accuracy(*level))
            .sum::<f64>()
            / BloomLevel::ALL.len() as f64
    }
}

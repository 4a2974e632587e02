//! Facial expression labels, probability distributions and the happiness rule.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::detection::Detection;

/// Minimum probability (exclusive) for a top-ranked `happy` to count.
pub const HAPPY_THRESHOLD: f32 = 0.3;

/// The expression classes reported by the expression network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Expression {
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Surprised,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Expression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::ALL
            .iter()
            .copied()
            .find(|e| e.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown expression label '{}'", s))
    }
}

/// Probability per expression label for one face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expressions {
    probabilities: BTreeMap<Expression, f32>,
}

impl Expressions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, expression: Expression, probability: f32) -> Self {
        self.set(expression, probability);
        self
    }

    pub fn set(&mut self, expression: Expression, probability: f32) {
        self.probabilities.insert(expression, probability);
    }

    pub fn get(&self, expression: Expression) -> Option<f32> {
        self.probabilities.get(&expression).copied()
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Expression, f32)> + '_ {
        self.probabilities.iter().map(|(e, p)| (*e, *p))
    }

    /// Highest probability in the distribution.
    pub fn max_probability(&self) -> Option<f32> {
        self.probabilities
            .values()
            .copied()
            .filter(|p| !p.is_nan())
            .reduce(f32::max)
    }

    /// The highest-probability entry. Ties resolve to the first label in
    /// [`Expression::ALL`] order; use [`Expressions::is_top`] for tie-aware checks.
    pub fn top(&self) -> Option<(Expression, f32)> {
        let max = self.max_probability()?;
        self.iter().find(|(_, p)| *p == max)
    }

    /// Whether `expression` is among the entries sharing the highest probability.
    pub fn is_top(&self, expression: Expression) -> bool {
        match (self.get(expression), self.max_probability()) {
            (Some(p), Some(max)) => p >= max,
            _ => false,
        }
    }

    /// Entries ordered by descending probability.
    pub fn ranked(&self) -> Vec<(Expression, f32)> {
        let mut ranked: Vec<_> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// True when `happy` ranks highest with probability above [`HAPPY_THRESHOLD`].
    pub fn is_happy(&self) -> bool {
        self.is_top(Expression::Happy)
            && self
                .get(Expression::Happy)
                .is_some_and(|p| p > HAPPY_THRESHOLD)
    }
}

impl FromIterator<(Expression, f32)> for Expressions {
    fn from_iter<I: IntoIterator<Item = (Expression, f32)>>(iter: I) -> Self {
        Self {
            probabilities: iter.into_iter().collect(),
        }
    }
}

/// Happiness flag of a detection batch: any face whose top expression is a
/// confident `happy`. Faces without expressions never count.
pub fn happiness_flag(batch: &[Detection]) -> bool {
    batch
        .iter()
        .filter_map(|d| d.expressions.as_ref())
        .any(Expressions::is_happy)
}

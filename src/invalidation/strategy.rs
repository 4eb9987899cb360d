use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::impact::ChangeImpact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationStrategy {
    /// Deep, transitive, includes tests. Invalidates the most.
    Conservative,
    #[default]
    Balanced,
    /// Direct dependents above a high threshold only.
    Aggressive,
    /// Clear the entire cache on any change.
    Immediate,
}

impl InvalidationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationStrategy::Conservative => "conservative",
            InvalidationStrategy::Balanced => "balanced",
            InvalidationStrategy::Aggressive => "aggressive",
            InvalidationStrategy::Immediate => "immediate",
        }
    }

    /// Scope parameters, or `None` for [`InvalidationStrategy::Immediate`].
    pub fn params(&self) -> Option<StrategyParams> {
        let params = match self {
            InvalidationStrategy::Conservative => StrategyParams {
                max_depth: 5,
                include_transitive: true,
                impact_threshold: 0.0,
                include_test_files: true,
                include_all_direct: false,
            },
            InvalidationStrategy::Balanced => StrategyParams {
                max_depth: 3,
                include_transitive: true,
                impact_threshold: 0.3,
                include_test_files: true,
                include_all_direct: false,
            },
            InvalidationStrategy::Aggressive => StrategyParams {
                max_depth: 1,
                include_transitive: false,
                impact_threshold: 0.6,
                include_test_files: false,
                include_all_direct: false,
            },
            InvalidationStrategy::Immediate => return None,
        };
        Some(params)
    }
}

impl fmt::Display for InvalidationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvalidationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(InvalidationStrategy::Conservative),
            "balanced" => Ok(InvalidationStrategy::Balanced),
            "aggressive" => Ok(InvalidationStrategy::Aggressive),
            "immediate" => Ok(InvalidationStrategy::Immediate),
            other => Err(format!("unknown invalidation strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrategyParams {
    pub max_depth: usize,
    pub include_transitive: bool,
    /// Minimum impact score a direct dependent needs to be invalidated.
    pub impact_threshold: f64,
    pub include_test_files: bool,
    /// Take every direct dependent regardless of its score.
    pub include_all_direct: bool,
}

impl StrategyParams {
    /// Parameters for a change of the given impact, with depth capped at
    /// `depth_cap`. Critical and high changes widen the scope; low ones
    /// narrow it to direct dependents.
    pub fn for_impact(self, impact: ChangeImpact, depth_cap: usize) -> Self {
        let cap = depth_cap.max(1);
        let mut params = self;
        match impact {
            ChangeImpact::Critical => {
                params.max_depth += 2;
                params.impact_threshold *= 0.25;
                params.include_all_direct = true;
            }
            ChangeImpact::High => {
                params.max_depth += 1;
                params.impact_threshold *= 0.5;
            }
            ChangeImpact::Medium | ChangeImpact::None => {}
            ChangeImpact::Low => {
                params.max_depth = 1;
                params.include_transitive = false;
                params.include_test_files = false;
                params.impact_threshold = params.impact_threshold.max(0.5);
            }
        }
        params.max_depth = params.max_depth.min(cap);
        params
    }
}

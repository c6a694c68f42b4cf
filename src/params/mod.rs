//! Parameter space, decoding and constraint resolution

mod ordered;
mod resolved;
mod space;

pub use ordered::{DecaySchedule, OrderedPair, OrderedTriple, OscillatorZones};
pub use resolved::{
    AlignmentBonuses, AlignmentTier, CredibilityWeights, DecisionThresholds, LevelMultipliers,
    ParamChange, ResolvedConfig, ScoreMagnitude, ScoreWeights, SrBlendBand, TechnicalScores,
    TechnicalWeights, TrailingRules, DIFF_EPSILON, MIN_WEIGHT_SHARE,
};
pub use space::{idx, ConfigVector, Dimension, ParameterSpace, DIMENSIONS, DIMENSION_COUNT};

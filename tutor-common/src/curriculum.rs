//! Curriculum catalog
//!
//! Per-style pedagogy descriptions and per-grade topic scope used to
//! constrain problem generation, plus the canonical topic list that
//! problem bank fingerprints are keyed on.

use serde::{Deserialize, Serialize};

/// Supported curriculum styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurriculumStyle {
    CommonCore,
    Rsm,
    Singapore,
}

impl CurriculumStyle {
    /// Database/wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CurriculumStyle::CommonCore => "common_core",
            CurriculumStyle::Rsm => "rsm",
            CurriculumStyle::Singapore => "singapore",
        }
    }

    /// Parse from database/wire representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "common_core" => Some(CurriculumStyle::CommonCore),
            "rsm" => Some(CurriculumStyle::Rsm),
            "singapore" => Some(CurriculumStyle::Singapore),
            _ => None,
        }
    }

    /// Human-readable name for client display
    pub fn display_name(&self) -> &'static str {
        match self {
            CurriculumStyle::CommonCore => "Common Core",
            CurriculumStyle::Rsm => "RSM",
            CurriculumStyle::Singapore => "Singapore Math",
        }
    }

    /// Teaching-approach description injected into generation prompts
    pub fn pedagogy(&self) -> &'static str {
        match self {
            CurriculumStyle::CommonCore => {
                "Focus on conceptual understanding and real-world problem solving. \
                 Use visual models (number lines, area models, tape diagrams). \
                 Emphasize explaining reasoning and multiple solution strategies. \
                 Align with California Common Core State Standards."
            }
            CurriculumStyle::Rsm => {
                "Emphasize logical reasoning and algebraic thinking from early grades. \
                 Use challenging multi-step problems that build abstract thinking. \
                 Introduce concepts 1-2 years ahead of standard curriculum. \
                 Focus on problem-solving strategies, pattern recognition, and \
                 mathematical proof. Russian School of Mathematics approach."
            }
            CurriculumStyle::Singapore => {
                "CPA (Concrete-Pictorial-Abstract) approach. \
                 Use bar models for word problems and part-whole/comparison models. \
                 Emphasize number bonds, mental math strategies, and place value mastery. \
                 Build deep number sense before moving to algorithms. \
                 Singapore Math / Math in Focus methodology."
            }
        }
    }

    /// Topic scope for a grade level (1-6). Out-of-range grades clamp to
    /// grade 4, matching the service default grade.
    pub fn grade_scope(&self, grade: i64) -> &'static str {
        let grade = if (1..=6).contains(&grade) { grade } else { 4 };
        match self {
            CurriculumStyle::CommonCore => match grade {
                1 => "Addition and subtraction within 20, place value to 120, measuring lengths, basic shapes",
                2 => "Addition and subtraction within 100, intro to place value (hundreds), measuring/estimating lengths, basic arrays for multiplication",
                3 => "Multiplication and division within 100, fractions on number lines, area and perimeter, rounding to nearest 10/100",
                4 => "Multi-digit arithmetic, fraction equivalence and ordering, decimal notation (tenths/hundredths), angles and lines, multi-step word problems",
                5 => "Fraction operations (add/subtract/multiply), decimal operations, volume, coordinate plane, order of operations",
                _ => "Ratios and proportional relationships, dividing fractions, integers and rational numbers, expressions and equations, statistical thinking",
            },
            CurriculumStyle::Rsm => match grade {
                1 => "Addition/subtraction within 100, intro to multiplication as groups, simple logic puzzles, number patterns, basic algebraic thinking (find the missing number)",
                2 => "Multiplication/division facts, multi-step addition/subtraction, intro to fractions as parts, number patterns and sequences, simple equations with unknowns",
                3 => "Multi-digit multiplication, long division, fraction operations, intro to negative numbers, algebraic expressions, logic and combinatorics problems",
                4 => "Advanced fraction/decimal operations, intro to ratios, order of operations with parentheses, coordinate graphing, multi-step challenge word problems, basic number theory (factors/multiples/primes)",
                5 => "Ratio and proportion, percent applications, integer arithmetic, algebraic equations (one variable), geometry proofs (angles, triangles), combinatorics and probability intro",
                _ => "Linear equations and inequalities, advanced ratios/proportions/percents, geometry (circles, Pythagorean theorem intro), statistics, exponents, intro to functions",
            },
            CurriculumStyle::Singapore => match grade {
                1 => "Number bonds within 20, addition/subtraction strategies (making 10), place value to 100, mental math, bar models for simple word problems, basic shapes and patterns",
                2 => "Addition/subtraction within 1000, multiplication tables (2,3,4,5,10), bar models for two-step problems, mental math strategies, measurement (length, mass, volume), money",
                3 => "All multiplication/division facts, bar models for multi-step problems, fraction concepts (naming, comparing, equivalent), mental math (compensation, rounding), area and perimeter, time and measurement",
                4 => "Multi-digit multiplication/division, fraction operations (like denominators), decimal concepts and operations, bar models for fraction/ratio word problems, angles and geometric figures, data analysis",
                5 => "Fraction operations (unlike denominators, multiply/divide), decimal operations, ratio and proportion, percent, volume of solids, coordinate geometry, algebraic expressions",
                _ => "Advanced ratio/proportion/percent, algebraic expressions and equations, geometry (area of triangles/circles, nets, surface area), data analysis and probability, negative numbers, rate and speed problems",
            },
        }
    }
}

/// Canonical topics for problem bank fingerprints
///
/// Generated problems must be tagged with one of these so cached
/// problems keyed on the same topic are interchangeable.
pub const KNOWN_TOPICS: &[&str] = &[
    "Addition",
    "Subtraction",
    "Multiplication",
    "Division",
    "Mixed Operations",
    "Fractions",
    "Decimals",
    "Geometry",
    "Word Problems",
];

/// Scan freeform direction-analysis text for a canonical topic.
///
/// Returns `None` when no known topic is mentioned, in which case the
/// bank cannot be consulted and acquisition falls through to generation.
pub fn resolve_topic(analysis: &str) -> Option<&'static str> {
    let lower = analysis.to_lowercase();
    KNOWN_TOPICS
        .iter()
        .find(|topic| lower.contains(&topic.to_lowercase()))
        .copied()
}

/// Normalize an arbitrary topic string to canonical casing when it
/// matches a known topic; otherwise return it unchanged.
pub fn canonical_topic(topic: &str) -> String {
    KNOWN_TOPICS
        .iter()
        .find(|t| t.eq_ignore_ascii_case(topic.trim()))
        .map(|t| t.to_string())
        .unwrap_or_else(|| topic.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_round_trips_through_str() {
        for style in [
            CurriculumStyle::CommonCore,
            CurriculumStyle::Rsm,
            CurriculumStyle::Singapore,
        ] {
            assert_eq!(CurriculumStyle::from_str(style.as_str()), Some(style));
        }
        assert_eq!(CurriculumStyle::from_str("montessori"), None);
    }

    #[test]
    fn resolve_topic_finds_first_known_topic() {
        let analysis = "Next, give a multiplication problem focusing on arrays.";
        assert_eq!(resolve_topic(analysis), Some("Multiplication"));
        assert_eq!(resolve_topic("work on spelling"), None);
    }

    #[test]
    fn resolve_topic_is_case_insensitive() {
        assert_eq!(resolve_topic("Try WORD PROBLEMS next"), Some("Word Problems"));
    }

    #[test]
    fn canonical_topic_normalizes_case() {
        assert_eq!(canonical_topic(" fractions "), "Fractions");
        assert_eq!(canonical_topic("Roman Numerals"), "Roman Numerals");
    }

    #[test]
    fn grade_scope_clamps_out_of_range() {
        let s = CurriculumStyle::CommonCore;
        assert_eq!(s.grade_scope(0), s.grade_scope(4));
        assert_eq!(s.grade_scope(99), s.grade_scope(4));
    }
}

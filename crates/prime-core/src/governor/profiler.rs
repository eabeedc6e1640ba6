//! Session Capability Profiler: five fixed probes, deterministic rubrics and
//! the Brilliance Score.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ActionSpec, Locator, Mode, Verb};
use crate::parser::{self, Parsed};

/// Score assumed for a probe that was not run.
pub const MIDLINE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    Grammar,
    Instruction,
    Decomposition,
    SelfCorrection,
    ToolUse,
}

impl Probe {
    pub const ALL: [Probe; 5] = [
        Probe::Grammar,
        Probe::Instruction,
        Probe::Decomposition,
        Probe::SelfCorrection,
        Probe::ToolUse,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Probe::Grammar => "p1_grammar.md",
            Probe::Instruction => "p2_instruction.md",
            Probe::Decomposition => "p3_decomposition.md",
            Probe::SelfCorrection => "p4_self_correction.md",
            Probe::ToolUse => "p5_tool_use.md",
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Probe::Grammar => 0.30,
            Probe::Instruction => 0.20,
            Probe::Decomposition => 0.20,
            Probe::SelfCorrection => 0.15,
            Probe::ToolUse => 0.15,
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            Probe::Grammar => {
                "Reply with exactly one UCM fence that reads lines 1 to 10 of ./README.md:\n\
                 an opening line ```get#g1 path=\"./README.md\" range=\"1..10\" and a closing ```.\n\
                 Write nothing else."
            }
            Probe::Instruction => {
                "Reply with the single word ACKNOWLEDGED in uppercase. No punctuation, no other text."
            }
            Probe::Decomposition => {
                "Task: create ./hello.txt containing the word hi, then read it back.\n\
                 Reply with exactly two UCM fences in order: a set#s1 that writes the file \
                 and a get#g1 that reads the same path."
            }
            Probe::SelfCorrection => {
                "Your previous reply was:\n```run#r1\necho hi\n```\n\
                 It was rejected with PARSE_ERROR: run requires a `lang` or `target` attribute.\n\
                 Reply with the corrected fence only."
            }
            Probe::ToolUse => {
                "What is 2 + 2? Answer with the number. Do not use any action fences."
            }
        }
    }

    /// Score a reply in [0, 1]. Rubrics are pure functions of the text.
    pub fn score(&self, reply: &str) -> f64 {
        let parsed = parser::parse(reply);
        match self {
            Probe::Grammar => score_grammar(&parsed),
            Probe::Instruction => {
                let trimmed = reply.trim();
                if trimmed == "ACKNOWLEDGED" {
                    1.0
                } else if trimmed.to_ascii_uppercase().contains("ACKNOWLEDGED") {
                    MIDLINE
                } else {
                    0.0
                }
            }
            Probe::Decomposition => score_decomposition(&parsed),
            Probe::SelfCorrection => {
                let fixed = parsed.iter().flatten().any(|a| {
                    matches!(&a.spec, ActionSpec::Run(r) if !r.lang.is_empty())
                        && a.header.body().contains("echo hi")
                });
                if fixed && parsed.iter().all(|p| p.is_ok()) {
                    1.0
                } else if fixed {
                    MIDLINE
                } else {
                    0.0
                }
            }
            Probe::ToolUse => {
                let answered = reply.contains('4');
                let fenced = reply.contains("```");
                match (answered, fenced) {
                    (true, false) => 1.0,
                    (true, true) => MIDLINE,
                    _ => 0.0,
                }
            }
        }
    }
}

fn score_grammar(parsed: &[Parsed]) -> f64 {
    let Some(Ok(action)) = parsed.first() else {
        return 0.0;
    };
    let ActionSpec::Get(get) = &action.spec else {
        return 0.25;
    };
    let checks = [
        parsed.len() == 1,
        action.id().as_str() == "g1",
        get.locator == Some(Locator::Path("./README.md".into())),
        get.range.map(|r| (r.start, r.end)) == Some((1, 10)),
    ];
    checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64
}

fn score_decomposition(parsed: &[Parsed]) -> f64 {
    let actions: Vec<_> = parsed.iter().flatten().collect();
    match actions.as_slice() {
        [set, get] if set.verb() == Verb::Set && get.verb() == Verb::Get => {
            let same_path = match (&set.spec, &get.spec) {
                (ActionSpec::Set(s), ActionSpec::Get(g)) => {
                    g.locator.as_ref().map(Locator::as_str) == Some(s.path.as_str())
                }
                _ => false,
            };
            if same_path && set.header.body().contains("hi") {
                1.0
            } else {
                0.75
            }
        }
        [_, _] => MIDLINE,
        [_] => 0.25,
        _ => 0.0,
    }
}

/// Persisted outcome of a probe battery (`caps.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub scores: BTreeMap<Probe, f64>,
    pub brilliance: f64,
    pub measured_at: DateTime<Utc>,
}

impl CapabilityRecord {
    /// Build a record; probes without a score count at [`MIDLINE`].
    pub fn from_scores(scores: impl IntoIterator<Item = (Probe, f64)>) -> Self {
        let mut all: BTreeMap<Probe, f64> = Probe::ALL.iter().map(|p| (*p, MIDLINE)).collect();
        for (probe, score) in scores {
            all.insert(probe, score.clamp(0.0, 1.0));
        }
        let brilliance = brilliance(&all);
        Self {
            scores: all,
            brilliance,
            measured_at: Utc::now(),
        }
    }

    pub fn candidate_mode(&self) -> Mode {
        Mode::from_brilliance(self.brilliance)
    }
}

/// `B = Σ weight × score`, clamped to [0, 1] and rounded to 1e-9 so sums
/// that land on a threshold compare equal to it.
pub fn brilliance(scores: &BTreeMap<Probe, f64>) -> f64 {
    let b: f64 = Probe::ALL
        .iter()
        .map(|p| p.weight() * scores.get(p).copied().unwrap_or(MIDLINE))
        .sum();
    ((b * 1e9).round() / 1e9).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = Probe::ALL.iter().map(|p| p.weight()).sum();
        assert!(close(total, 1.0));
    }

    #[test]
    fn test_perfect_grammar_rest_midline_is_m2() {
        let record = CapabilityRecord::from_scores([(Probe::Grammar, 1.0)]);
        assert!(close(record.brilliance, 0.65));
        assert_eq!(record.candidate_mode(), Mode::M2);
    }

    #[test]
    fn test_exact_thresholds_are_inclusive() {
        use Probe::*;
        let cases = [
            ([(Grammar, 0.5), (Instruction, 1.0), (Decomposition, 0.25), (SelfCorrection, 0.5), (ToolUse, 0.5)], 0.55, Mode::M2),
            ([(Grammar, 0.5), (Instruction, 1.0), (Decomposition, 1.0), (SelfCorrection, 1.0), (ToolUse, 0.0)], 0.70, Mode::M3),
            ([(Grammar, 1.0), (Instruction, 1.0), (Decomposition, 1.0), (SelfCorrection, 1.0), (ToolUse, 0.0)], 0.85, Mode::M4),
        ];
        for (scores, expected_b, expected_mode) in cases {
            let record = CapabilityRecord::from_scores(scores);
            assert_eq!(record.brilliance, expected_b, "{scores:?}");
            assert_eq!(record.candidate_mode(), expected_mode, "{scores:?}");
        }
        assert_eq!(Mode::from_brilliance(0.55 - 1e-12), Mode::M2);
        assert_eq!(Mode::from_brilliance(0.5499), Mode::M1);
    }

    #[test]
    fn test_extremes() {
        let all_one = CapabilityRecord::from_scores(Probe::ALL.map(|p| (p, 1.0)));
        assert!(close(all_one.brilliance, 1.0));
        assert_eq!(all_one.candidate_mode(), Mode::M4);
        let all_zero = CapabilityRecord::from_scores(Probe::ALL.map(|p| (p, 0.0)));
        assert_eq!(all_zero.candidate_mode(), Mode::M1);
        let clamped = CapabilityRecord::from_scores([(Probe::Grammar, 7.0)]);
        assert_eq!(clamped.scores[&Probe::Grammar], 1.0);
    }

    #[test]
    fn test_grammar_rubric() {
        let perfect = "```get#g1 path=\"./README.md\" range=\"1..10\"\n```";
        assert_eq!(Probe::Grammar.score(perfect), 1.0);
        let partial = "```get#g2 path=\"./README.md\"\n```";
        assert_eq!(Probe::Grammar.score(partial), 0.5);
        assert_eq!(Probe::Grammar.score("sure, here you go"), 0.0);
    }

    #[test]
    fn test_instruction_rubric() {
        assert_eq!(Probe::Instruction.score("ACKNOWLEDGED"), 1.0);
        assert_eq!(Probe::Instruction.score("Acknowledged!"), MIDLINE);
        assert_eq!(Probe::Instruction.score("ok"), 0.0);
    }

    #[test]
    fn test_decomposition_rubric() {
        let good = "```set#s1 path=\"./hello.txt\"\nhi\n```\n```get#g1 path=\"./hello.txt\"\n```";
        assert_eq!(Probe::Decomposition.score(good), 1.0);
        let swapped = "```get#g1 path=\"./hello.txt\"\n```\n```set#s1 path=\"./hello.txt\"\nhi\n```";
        assert_eq!(Probe::Decomposition.score(swapped), MIDLINE);
    }

    #[test]
    fn test_self_correction_and_tool_use() {
        let fixed = "```run#r1 lang=\"sh\"\necho hi\n```";
        assert_eq!(Probe::SelfCorrection.score(fixed), 1.0);
        assert_eq!(Probe::SelfCorrection.score("```run#r1\necho hi\n```"), 0.0);
        assert_eq!(Probe::ToolUse.score("4"), 1.0);
        assert_eq!(Probe::ToolUse.score("```run#r1 lang=sh\necho $((2+2))\n```\n4"), MIDLINE);
        assert_eq!(Probe::ToolUse.score("five"), 0.0);
    }

    #[test]
    fn test_record_serde() {
        let record = CapabilityRecord::from_scores([(Probe::ToolUse, 0.9)]);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"tool_use\":0.9"));
        let back: CapabilityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}

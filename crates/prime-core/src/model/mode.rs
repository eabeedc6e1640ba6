use serde::{Deserialize, Serialize};

/// Execution-discipline level. Ordered from least to most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mode {
    M1,
    M2,
    M3,
    M4,
}

impl Mode {
    /// Candidate mode for a Brilliance Score. Thresholds are inclusive and
    /// compared in basis points.
    pub fn from_brilliance(b: f64) -> Self {
        let bp = (b * 10_000.0).round() as i64;
        if bp >= 8_500 {
            Mode::M4
        } else if bp >= 7_000 {
            Mode::M3
        } else if bp >= 5_500 {
            Mode::M2
        } else {
            Mode::M1
        }
    }

    pub fn promoted(self) -> Self {
        match self {
            Mode::M1 => Mode::M2,
            Mode::M2 => Mode::M3,
            Mode::M3 | Mode::M4 => Mode::M4,
        }
    }

    pub fn demoted(self) -> Self {
        match self {
            Mode::M1 | Mode::M2 => Mode::M1,
            Mode::M3 => Mode::M2,
            Mode::M4 => Mode::M3,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Mode::M1 => 1,
            Mode::M2 => 2,
            Mode::M3 => 3,
            Mode::M4 => 4,
        }
    }

    pub fn constraints(self) -> ModeConstraints {
        match self {
            Mode::M1 => ModeConstraints {
                max_actions: 1,
                verbosity: Verbosity::Minimal,
                verification: VerificationCadence::EveryStep,
                palette_cap: 3,
                sampling_passes: 3,
            },
            Mode::M2 => ModeConstraints {
                max_actions: 3,
                verbosity: Verbosity::Concise,
                verification: VerificationCadence::EveryStep,
                palette_cap: 5,
                sampling_passes: 2,
            },
            Mode::M3 => ModeConstraints {
                max_actions: 6,
                verbosity: Verbosity::Standard,
                verification: VerificationCadence::CriticalOnly,
                palette_cap: 8,
                sampling_passes: 1,
            },
            Mode::M4 => ModeConstraints {
                max_actions: 12,
                verbosity: Verbosity::Expansive,
                verification: VerificationCadence::SpotCheck,
                palette_cap: usize::MAX,
                sampling_passes: 1,
            },
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "M{}", self.level())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1" => Ok(Mode::M1),
            "M2" => Ok(Mode::M2),
            "M3" => Ok(Mode::M3),
            "M4" => Ok(Mode::M4),
            other => Err(format!("unknown mode {other:?} (expected M1..M4)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Minimal,
    Concise,
    Standard,
    Expansive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationCadence {
    EveryStep,
    CriticalOnly,
    SpotCheck,
}

impl VerificationCadence {
    /// Spot checks verify every fourth action of a turn.
    pub const SPOT_CHECK_INTERVAL: usize = 4;

    /// Whether the action at `position` (0-based within the turn) is verified.
    pub fn applies(&self, position: usize, critical: bool) -> bool {
        match self {
            VerificationCadence::EveryStep => true,
            VerificationCadence::CriticalOnly => critical,
            VerificationCadence::SpotCheck => position % Self::SPOT_CHECK_INTERVAL == 0,
        }
    }
}

/// Limits a Mode imposes on the next dispatch cycle and prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeConstraints {
    pub max_actions: usize,
    pub verbosity: Verbosity,
    pub verification: VerificationCadence,
    pub palette_cap: usize,
    pub sampling_passes: u32,
}

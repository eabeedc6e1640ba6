//! Cognitive Load Governor: hysteretic Mode state machine.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::Mode;

/// Consecutive clean turns needed to promote.
pub const PROMOTE_AFTER: u32 = 3;
/// Consecutive turns with guardrail hits needed to demote.
pub const DEMOTE_AFTER: u32 = 2;

/// Guardrail outcome of one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSignal {
    pub violations: u32,
    pub severe: bool,
}

impl TurnSignal {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.violations == 0 && !self.severe
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Promoted { from: Mode, to: Mode },
    Demoted { from: Mode, to: Mode, severe: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub at: DateTime<Utc>,
    pub signal: TurnSignal,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

/// Persisted governor state (`clg.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorState {
    pub mode: Mode,
    pub clean_streak: u32,
    pub hit_streak: u32,
    /// Most recent turns, oldest first.
    #[serde(default)]
    pub window: VecDeque<TurnRecord>,
}

impl GovernorState {
    pub fn new(initial: Mode) -> Self {
        Self {
            mode: initial,
            clean_streak: 0,
            hit_streak: 0,
            window: VecDeque::new(),
        }
    }

    /// Fold one turn into the state. Moves at most one level; promotion
    /// never goes above `candidate`.
    pub fn observe(&mut self, candidate: Mode, signal: TurnSignal, window: usize) -> Option<Transition> {
        let from = self.mode;
        let transition = if signal.severe {
            self.clean_streak = 0;
            self.hit_streak = 0;
            self.demote(true)
        } else if signal.violations > 0 {
            self.clean_streak = 0;
            self.hit_streak += 1;
            if self.hit_streak >= DEMOTE_AFTER {
                self.hit_streak = 0;
                self.demote(false)
            } else {
                None
            }
        } else {
            self.hit_streak = 0;
            self.clean_streak += 1;
            if self.clean_streak >= PROMOTE_AFTER && self.mode < candidate {
                self.clean_streak = 0;
                self.mode = self.mode.promoted();
                Some(Transition::Promoted { from, to: self.mode })
            } else {
                None
            }
        };

        if let Some(t) = &transition {
            info!(?t, "Mode changed");
        }
        self.window.push_back(TurnRecord {
            at: Utc::now(),
            signal,
            mode: self.mode,
            transition,
        });
        while self.window.len() > window.max(1) {
            self.window.pop_front();
        }
        transition
    }

    fn demote(&mut self, severe: bool) -> Option<Transition> {
        let from = self.mode;
        self.mode = self.mode.demoted();
        (self.mode != from).then_some(Transition::Demoted {
            from,
            to: self.mode,
            severe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit() -> TurnSignal {
        TurnSignal {
            violations: 1,
            severe: false,
        }
    }

    fn severe() -> TurnSignal {
        TurnSignal {
            violations: 1,
            severe: true,
        }
    }

    #[test]
    fn test_promotes_after_three_clean_turns() {
        let mut s = GovernorState::new(Mode::M2);
        assert_eq!(s.observe(Mode::M4, TurnSignal::clean(), 10), None);
        assert_eq!(s.observe(Mode::M4, TurnSignal::clean(), 10), None);
        assert_eq!(
            s.observe(Mode::M4, TurnSignal::clean(), 10),
            Some(Transition::Promoted {
                from: Mode::M2,
                to: Mode::M3
            })
        );
        // The streak restarts after a promotion.
        assert_eq!(s.observe(Mode::M4, TurnSignal::clean(), 10), None);
        assert_eq!(s.mode, Mode::M3);
    }

    #[test]
    fn test_promotion_capped_by_candidate() {
        let mut s = GovernorState::new(Mode::M2);
        for _ in 0..6 {
            s.observe(Mode::M2, TurnSignal::clean(), 10);
        }
        assert_eq!(s.mode, Mode::M2);
    }

    #[test]
    fn test_violation_breaks_clean_streak() {
        let mut s = GovernorState::new(Mode::M2);
        s.observe(Mode::M4, TurnSignal::clean(), 10);
        s.observe(Mode::M4, TurnSignal::clean(), 10);
        s.observe(Mode::M4, hit(), 10);
        s.observe(Mode::M4, TurnSignal::clean(), 10);
        assert_eq!(s.mode, Mode::M2);
    }

    #[test]
    fn test_demotes_after_two_consecutive_hits() {
        let mut s = GovernorState::new(Mode::M3);
        assert_eq!(s.observe(Mode::M4, hit(), 10), None);
        assert!(matches!(
            s.observe(Mode::M4, hit(), 10),
            Some(Transition::Demoted { from: Mode::M3, to: Mode::M2, severe: false })
        ));

        // Non-consecutive hits do not demote.
        let mut s = GovernorState::new(Mode::M3);
        s.observe(Mode::M4, hit(), 10);
        s.observe(Mode::M4, TurnSignal::clean(), 10);
        s.observe(Mode::M4, hit(), 10);
        assert_eq!(s.mode, Mode::M3);
    }

    #[test]
    fn test_severe_breach_demotes_immediately() {
        let mut s = GovernorState::new(Mode::M4);
        assert!(matches!(
            s.observe(Mode::M4, severe(), 10),
            Some(Transition::Demoted { to: Mode::M3, severe: true, .. })
        ));
        let mut floor = GovernorState::new(Mode::M1);
        assert_eq!(floor.observe(Mode::M4, severe(), 10), None);
        assert_eq!(floor.mode, Mode::M1);
    }

    #[test]
    fn test_moves_one_level_at_most() {
        let signals = [TurnSignal::clean(), hit(), severe()];
        let mut s = GovernorState::new(Mode::M1);
        for i in 0..200usize {
            let before = s.mode.level() as i32;
            s.observe(Mode::M4, signals[(i * 7 + i / 3) % 3], 10);
            assert!((s.mode.level() as i32 - before).abs() <= 1);
        }
    }

    #[test]
    fn test_window_is_bounded() {
        let mut s = GovernorState::new(Mode::M2);
        for _ in 0..15 {
            s.observe(Mode::M2, TurnSignal::clean(), 4);
        }
        assert_eq!(s.window.len(), 4);
        let json = serde_json::to_string(&s).unwrap();
        let back: GovernorState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}

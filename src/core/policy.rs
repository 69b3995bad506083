// src/core/policy.rs — Stop decision for the feedback loop
//
// Order of checks:
//   1. average >= min_score             -> accept
//   2. any blocking feedback            -> stop (blocked)
//   3. soft_threshold set and exceeded  -> accept
//   4. round == max_rounds              -> stop (budget exhausted)
//   5. otherwise                        -> continue

use super::types::{LoopPolicy, StopReason};
use crate::evaluator::CriticFeedback;

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Stop(StopReason),
    Continue { average: f64 },
}

impl Verdict {
    pub fn is_stop(&self) -> bool {
        matches!(self, Verdict::Stop(_))
    }
}

/// Mean score, or `None` when there is no feedback.
pub fn average_score(feedback: &[CriticFeedback]) -> Option<f64> {
    if feedback.is_empty() {
        return None;
    }
    Some(feedback.iter().map(|f| f.score).sum::<f64>() / feedback.len() as f64)
}

pub fn decide(policy: &LoopPolicy, round: u8, feedback: &[CriticFeedback]) -> Verdict {
    let Some(average) = average_score(feedback) else {
        return Verdict::Stop(StopReason::AllCriticsFailed { round });
    };

    if average >= policy.min_score {
        return Verdict::Stop(StopReason::QualityReached { score: average });
    }

    if feedback.iter().any(|f| f.blocking) {
        let issues = feedback
            .iter()
            .filter(|f| f.blocking)
            .flat_map(|f| f.blocking_issues.iter().cloned())
            .collect();
        return Verdict::Stop(StopReason::Blocked { issues });
    }

    if policy.soft_threshold.is_some_and(|soft| average > soft) {
        return Verdict::Stop(StopReason::SoftThreshold { score: average });
    }

    if round >= policy.max_rounds {
        return Verdict::Stop(StopReason::RoundBudgetExhausted { rounds: round });
    }

    Verdict::Continue { average }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy(max_rounds: u8, min_score: f64) -> LoopPolicy {
        LoopPolicy::new(max_rounds, min_score).unwrap()
    }

    #[test]
    fn test_accepts_at_min_score() {
        let v = decide(&policy(3, 0.8), 1, &[CriticFeedback::new(0.9)]);
        assert_eq!(v, Verdict::Stop(StopReason::QualityReached { score: 0.9 }));
    }

    #[test]
    fn test_min_score_zero_always_accepts() {
        let v = decide(&policy(3, 0.0), 1, &[CriticFeedback::new(0.0)]);
        assert!(matches!(v, Verdict::Stop(StopReason::QualityReached { .. })));
    }

    #[test]
    fn test_averages_across_critics() {
        let fb = [CriticFeedback::new(1.0), CriticFeedback::new(0.5)];
        assert_eq!(average_score(&fb), Some(0.75));
        assert!(decide(&policy(3, 0.75), 1, &fb).is_stop());
        assert!(!decide(&policy(3, 0.76), 1, &fb).is_stop());
    }

    #[test]
    fn test_blocking_stops_below_min_score() {
        let fb = [
            CriticFeedback::new(0.5).with_blocking_issue("factually wrong"),
            CriticFeedback::new(0.6),
        ];
        let v = decide(&policy(4, 0.9), 1, &fb);
        assert_eq!(
            v,
            Verdict::Stop(StopReason::Blocked {
                issues: vec!["factually wrong".into()]
            })
        );
    }

    #[test]
    fn test_soft_threshold_only_when_configured() {
        let fb = [CriticFeedback::new(0.75)];
        let strict = policy(4, 0.85);
        assert_eq!(decide(&strict, 1, &fb), Verdict::Continue { average: 0.75 });

        let soft = strict.with_soft_threshold(Some(0.7)).unwrap();
        assert!(matches!(
            decide(&soft, 1, &fb),
            Verdict::Stop(StopReason::SoftThreshold { .. })
        ));
    }

    #[test]
    fn test_soft_threshold_ignored_with_blocking() {
        let soft = policy(4, 0.85).with_soft_threshold(Some(0.7)).unwrap();
        let mut fb = CriticFeedback::new(0.8);
        fb.blocking = true;
        assert!(matches!(
            decide(&soft, 1, &[fb]),
            Verdict::Stop(StopReason::Blocked { .. })
        ));
    }

    #[test]
    fn test_budget_exhausted_at_last_round() {
        let p = policy(3, 1.0);
        let fb = [CriticFeedback::new(0.99)];
        assert!(!decide(&p, 2, &fb).is_stop());
        assert_eq!(
            decide(&p, 3, &fb),
            Verdict::Stop(StopReason::RoundBudgetExhausted { rounds: 3 })
        );
    }

    #[test]
    fn test_no_feedback_is_terminal() {
        assert_eq!(
            decide(&policy(3, 0.5), 2, &[]),
            Verdict::Stop(StopReason::AllCriticsFailed { round: 2 })
        );
    }
}

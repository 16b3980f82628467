//! Join evaluation: deciding, from a set of effect outcomes arriving
//! concurrently, whether a `Need`'s `Join` policy is satisfied yet, per
//! `spec.md` §4.4.

use crate::decision::Join;
use crate::effect::EffectOutcome;
use crate::error::Error;

/// The result of folding one more outcome into a join's running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinProgress {
    /// Still waiting on more outcomes.
    Pending,
    /// The join is satisfied; remaining outstanding effects (if any)
    /// should be cancelled.
    Satisfied,
    /// The join can never be satisfied (e.g. `AllRequired` with a
    /// required effect that failed); the whole `Need` fails.
    Failed,
}

/// Tracks join state for one `Need` as its effects' outcomes arrive.
/// Built once per `Need`, fed outcomes one at a time via
/// [`JoinState::record`].
pub struct JoinState {
    join: Join,
    total: usize,
    required_count: usize,
    completed: usize,
    required_completed: usize,
    failed: usize,
    required_failed: usize,
    /// The first required effect's failure recorded, per `spec.md` §4.4's
    /// "tie-breaks by first-recorded" — this is the error the context
    /// ultimately fails with.
    first_failure: Option<Error>,
}

impl JoinState {
    pub fn new(join: Join, total: usize, required_count: usize) -> Self {
        Self {
            join,
            total,
            required_count,
            completed: 0,
            required_completed: 0,
            failed: 0,
            required_failed: 0,
            first_failure: None,
        }
    }

    /// Folds one outcome into the running tally. `required` must match
    /// the originating effect's `Effect::required` flag.
    pub fn record(&mut self, outcome: &EffectOutcome, required: bool) -> JoinProgress {
        self.completed += 1;
        if required {
            self.required_completed += 1;
        }
        if !outcome.is_success() {
            self.failed += 1;
            if required {
                self.required_failed += 1;
                if self.first_failure.is_none() {
                    self.first_failure = outcome.result.as_ref().err().cloned();
                }
            }
        }

        match self.join {
            Join::All => {
                if self.completed == self.total {
                    // "If any required failed → fail context with
                    // first_failure" (`spec.md` §4.4): `All` waits for
                    // every effect before checking, unlike `AllRequired`
                    // which fails fast.
                    if self.required_failed > 0 {
                        JoinProgress::Failed
                    } else {
                        JoinProgress::Satisfied
                    }
                } else {
                    JoinProgress::Pending
                }
            }
            Join::AllRequired => {
                // "resume when completed_required == required (optional
                // effects continue; their later completions write slots
                // but do not re-trigger resume)" (`spec.md` §4.4) — wait
                // for every required effect to complete, even if one of
                // them has already failed, rather than failing on the
                // first required failure.
                if self.required_completed == self.required_count {
                    if self.required_failed > 0 {
                        JoinProgress::Failed
                    } else {
                        JoinProgress::Satisfied
                    }
                } else {
                    JoinProgress::Pending
                }
            }
            Join::Any => {
                if self.completed >= 1 {
                    JoinProgress::Satisfied
                } else {
                    JoinProgress::Pending
                }
            }
            Join::FirstSuccess => {
                if outcome.is_success() {
                    JoinProgress::Satisfied
                } else if self.completed == self.total {
                    // Every effect failed with no success arriving.
                    // "if any were required, context fails; otherwise
                    // continuation runs with no slot writes" (`spec.md`
                    // §8 boundary behaviors).
                    if self.required_count > 0 {
                        JoinProgress::Failed
                    } else {
                        JoinProgress::Satisfied
                    }
                } else {
                    JoinProgress::Pending
                }
            }
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// The first required effect's failure, if any — the error a `Failed`
    /// progress ultimately resolves the `Need` with.
    pub fn first_failure(&self) -> Option<&Error> {
        self.first_failure.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Kind};

    fn ok(token: &'static str) -> EffectOutcome {
        EffectOutcome {
            token,
            result: Ok(bytes::Bytes::new()),
            attempts: 1,
            late: false,
        }
    }

    fn fail(token: &'static str) -> EffectOutcome {
        EffectOutcome {
            token,
            result: Err(Error::new(Kind::Internal, "effect", token)),
            attempts: 1,
            late: false,
        }
    }

    #[test]
    fn all_waits_for_every_outcome_then_succeeds_if_none_required_failed() {
        let mut join = JoinState::new(Join::All, 2, 2);
        assert_eq!(join.record(&ok("a"), true), JoinProgress::Pending);
        assert_eq!(join.record(&ok("b"), true), JoinProgress::Satisfied);
    }

    #[test]
    fn all_fails_after_every_outcome_if_a_required_one_failed() {
        let mut join = JoinState::new(Join::All, 2, 2);
        assert_eq!(join.record(&ok("a"), true), JoinProgress::Pending);
        assert_eq!(join.record(&fail("b"), true), JoinProgress::Failed);
        assert_eq!(join.first_failure().unwrap().key, "b");
    }

    #[test]
    fn all_ignores_optional_failure() {
        let mut join = JoinState::new(Join::All, 2, 1);
        assert_eq!(join.record(&fail("optional"), false), JoinProgress::Pending);
        assert_eq!(join.record(&ok("required"), true), JoinProgress::Satisfied);
    }

    #[test]
    fn all_required_fails_fast_on_required_failure() {
        let mut join = JoinState::new(Join::AllRequired, 2, 1);
        assert_eq!(join.record(&fail("a"), true), JoinProgress::Failed);
    }

    #[test]
    fn all_required_ignores_optional_failure() {
        let mut join = JoinState::new(Join::AllRequired, 2, 1);
        assert_eq!(join.record(&fail("optional"), false), JoinProgress::Pending);
        assert_eq!(join.record(&ok("required"), true), JoinProgress::Satisfied);
    }

    #[test]
    fn all_required_waits_for_every_required_effect_before_failing() {
        let mut join = JoinState::new(Join::AllRequired, 2, 2);
        assert_eq!(join.record(&fail("a"), true), JoinProgress::Pending);
        assert_eq!(join.record(&ok("b"), true), JoinProgress::Failed);
        assert_eq!(join.first_failure().unwrap().key, "a");
    }

    #[test]
    fn any_resolves_on_first_outcome_regardless_of_success() {
        let mut join = JoinState::new(Join::Any, 3, 3);
        assert_eq!(join.record(&fail("a"), true), JoinProgress::Satisfied);
    }

    #[test]
    fn first_success_waits_past_failures() {
        let mut join = JoinState::new(Join::FirstSuccess, 3, 3);
        assert_eq!(join.record(&fail("a"), true), JoinProgress::Pending);
        assert_eq!(join.record(&ok("b"), true), JoinProgress::Satisfied);
    }

    #[test]
    fn first_success_fails_when_all_fail_and_one_was_required() {
        let mut join = JoinState::new(Join::FirstSuccess, 2, 2);
        assert_eq!(join.record(&fail("a"), true), JoinProgress::Pending);
        assert_eq!(join.record(&fail("b"), true), JoinProgress::Failed);
    }

    #[test]
    fn first_success_succeeds_with_no_writes_when_all_optional_effects_fail() {
        let mut join = JoinState::new(Join::FirstSuccess, 2, 0);
        assert_eq!(join.record(&fail("a"), false), JoinProgress::Pending);
        assert_eq!(join.record(&fail("b"), false), JoinProgress::Satisfied);
    }
}

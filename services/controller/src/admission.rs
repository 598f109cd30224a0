//! Admission policy: usage estimation, spare computation and victim order.
//!
//! These are pure functions over numbers and candidate lists. The scheduler
//! state decides when to call them.

use std::cmp::Reverse;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ledger::JobKey;

// =============================================================================
// Strategies
// =============================================================================

/// Converts a job's CPU percentage into the number of cores it is using.
///
/// `cpu_percent` is relative to the job's own allocation: 100% means every
/// owned core is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEstimator {
    /// `ceil(cpu / 100 * owned)`.
    #[default]
    Ceil,
    /// `max(1, round(cpu / 100 * owned))`.
    RoundedAtLeastOne,
}

impl UsageEstimator {
    /// Estimated cores in use, never more than `owned`.
    ///
    /// A non-finite reading counts as fully used so it can never free cores.
    pub fn effective_used(&self, cpu_percent: f64, owned: usize) -> usize {
        if !cpu_percent.is_finite() {
            return owned;
        }
        let busy = cpu_percent.max(0.0) / 100.0 * owned as f64;
        let used = match self {
            UsageEstimator::Ceil => busy.ceil() as usize,
            UsageEstimator::RoundedAtLeastOne => (busy.round() as usize).max(1),
        };
        used.min(owned)
    }
}

impl FromStr for UsageEstimator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ceil" => Ok(UsageEstimator::Ceil),
            "rounded" | "rounded_at_least_one" => Ok(UsageEstimator::RoundedAtLeastOne),
            other => Err(format!(
                "unknown usage estimator '{other}' (expected 'ceil' or 'rounded')"
            )),
        }
    }
}

/// Order in which steal candidates are drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StealOrder {
    #[default]
    LargestSpareFirst,
    OldestAllocationFirst,
}

impl FromStr for StealOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "largest_spare" | "largest_spare_first" => Ok(StealOrder::LargestSpareFirst),
            "oldest_allocation" | "oldest_allocation_first" => {
                Ok(StealOrder::OldestAllocationFirst)
            }
            other => Err(format!(
                "unknown steal order '{other}' (expected 'largest_spare' or 'oldest_allocation')"
            )),
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Floor below which stealing never reduces a job.
    pub min_cores_per_job: usize,
    /// Free cores that must remain after a direct fit.
    pub reserve_cores: usize,
    pub estimator: UsageEstimator,
    pub steal_order: StealOrder,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            min_cores_per_job: 1,
            reserve_cores: 0,
            estimator: UsageEstimator::default(),
            steal_order: StealOrder::default(),
        }
    }
}

impl AdmissionPolicy {
    /// Effective floor; a job always keeps at least one core.
    pub fn floor(&self) -> usize {
        self.min_cores_per_job.max(1)
    }

    /// Whether a job owning `owned` cores could give any up.
    pub fn can_donate(&self, owned: usize) -> bool {
        owned > self.floor()
    }

    /// Cores that may be taken from a job owning `owned` cores at `cpu_percent`.
    pub fn spare(&self, cpu_percent: f64, owned: usize) -> usize {
        let used = self.estimator.effective_used(cpu_percent, owned);
        let idle = owned.saturating_sub(used);
        idle.min(owned.saturating_sub(self.floor()))
    }

    /// Sorts candidates into drain order. Ties break by allocation sequence,
    /// then job key, so the order is deterministic.
    pub fn order(&self, candidates: &mut [StealCandidate]) {
        match self.steal_order {
            StealOrder::LargestSpareFirst => candidates.sort_by(|a, b| {
                (Reverse(a.spare), a.sequence, &a.key).cmp(&(Reverse(b.spare), b.sequence, &b.key))
            }),
            StealOrder::OldestAllocationFirst => {
                candidates.sort_by(|a, b| (a.sequence, &a.key).cmp(&(b.sequence, &b.key)))
            }
        }
    }
}

// =============================================================================
// Candidates
// =============================================================================

/// A job that could donate cores, as seen at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealCandidate {
    pub key: JobKey,
    pub spare: usize,
    pub sequence: u64,
    /// Owned indices, ascending.
    pub cores: Vec<usize>,
}

/// Cores to take from one victim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealTake {
    pub victim: JobKey,
    /// Taken indices, highest first.
    pub cores: Vec<usize>,
}

/// Takes `needed` cores from `candidates` in the given order, highest
/// indices of each victim first and never more than its spare.
///
/// Returns `None` if the candidates cannot cover `needed`.
pub fn plan_steal(needed: usize, candidates: &[StealCandidate]) -> Option<Vec<StealTake>> {
    if needed == 0 {
        return Some(Vec::new());
    }

    let mut remaining = needed;
    let mut takes = Vec::new();

    for candidate in candidates {
        if remaining == 0 {
            break;
        }
        let count = candidate.spare.min(remaining).min(candidate.cores.len());
        if count == 0 {
            continue;
        }
        let cores: Vec<usize> = candidate.cores.iter().rev().take(count).copied().collect();
        remaining -= cores.len();
        takes.push(StealTake {
            victim: candidate.key.clone(),
            cores,
        });
    }

    (remaining == 0).then_some(takes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotplug_id::{AgentName, JobName};
    use proptest::prelude::*;
    use rstest::rstest;

    fn key(job: &str) -> JobKey {
        JobKey::new(AgentName::parse("agentX").unwrap(), JobName::parse(job).unwrap())
    }

    fn candidate(job: &str, spare: usize, sequence: u64, cores: Vec<usize>) -> StealCandidate {
        StealCandidate {
            key: key(job),
            spare,
            sequence,
            cores,
        }
    }

    #[rstest]
    #[case(UsageEstimator::Ceil, 10.0, 4, 1)]
    #[case(UsageEstimator::Ceil, 0.0, 4, 0)]
    #[case(UsageEstimator::Ceil, 50.0, 4, 2)]
    #[case(UsageEstimator::Ceil, 51.0, 4, 3)]
    #[case(UsageEstimator::Ceil, 250.0, 4, 4)]
    #[case(UsageEstimator::Ceil, f64::NAN, 4, 4)]
    #[case(UsageEstimator::RoundedAtLeastOne, 0.0, 4, 1)]
    #[case(UsageEstimator::RoundedAtLeastOne, 10.0, 4, 1)]
    #[case(UsageEstimator::RoundedAtLeastOne, 60.0, 4, 2)]
    #[case(UsageEstimator::RoundedAtLeastOne, f64::INFINITY, 4, 4)]
    fn test_effective_used(
        #[case] estimator: UsageEstimator,
        #[case] cpu: f64,
        #[case] owned: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(estimator.effective_used(cpu, owned), expected);
    }

    #[test]
    fn test_spare_scenario_ten_percent_of_four() {
        let policy = AdmissionPolicy::default();
        assert_eq!(policy.spare(10.0, 4), 3);
    }

    #[test]
    fn test_spare_respects_floor() {
        let policy = AdmissionPolicy {
            min_cores_per_job: 3,
            ..AdmissionPolicy::default()
        };
        assert_eq!(policy.spare(0.0, 4), 1);
        assert_eq!(policy.spare(0.0, 3), 0);
        assert!(!policy.can_donate(3));
    }

    #[test]
    fn test_zero_floor_still_keeps_one_core() {
        let policy = AdmissionPolicy {
            min_cores_per_job: 0,
            ..AdmissionPolicy::default()
        };
        assert_eq!(policy.spare(0.0, 2), 1);
    }

    #[test]
    fn test_largest_spare_order_with_ties() {
        let policy = AdmissionPolicy::default();
        let mut candidates = vec![
            candidate("b", 1, 0, vec![0, 1]),
            candidate("c", 3, 5, vec![2, 3, 4, 5]),
            candidate("a", 3, 2, vec![6, 7, 8, 9]),
        ];
        policy.order(&mut candidates);
        let order: Vec<_> = candidates.iter().map(|c| c.key.job.to_string()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_oldest_allocation_order() {
        let policy = AdmissionPolicy {
            steal_order: StealOrder::OldestAllocationFirst,
            ..AdmissionPolicy::default()
        };
        let mut candidates = vec![
            candidate("b", 3, 7, vec![0, 1, 2, 3]),
            candidate("a", 1, 1, vec![4, 5]),
        ];
        policy.order(&mut candidates);
        assert_eq!(candidates[0].key, key("a"));
    }

    #[test]
    fn test_plan_takes_highest_indices_first() {
        let candidates = vec![candidate("J1", 3, 0, vec![0, 1, 2, 3])];
        let takes = plan_steal(2, &candidates).unwrap();
        assert_eq!(takes.len(), 1);
        assert_eq!(takes[0].cores, vec![3, 2]);
    }

    #[test]
    fn test_plan_spans_victims() {
        let candidates = vec![
            candidate("J1", 1, 0, vec![0, 1]),
            candidate("J2", 2, 1, vec![4, 5, 6]),
        ];
        let takes = plan_steal(3, &candidates).unwrap();
        assert_eq!(takes[0].cores, vec![1]);
        assert_eq!(takes[1].cores, vec![6, 5]);
    }

    #[test]
    fn test_plan_insufficient() {
        let candidates = vec![candidate("J1", 1, 0, vec![0, 1])];
        assert!(plan_steal(2, &candidates).is_none());
        assert_eq!(plan_steal(0, &candidates), Some(Vec::new()));
    }

    #[rstest]
    #[case("ceil", Ok(UsageEstimator::Ceil))]
    #[case("rounded", Ok(UsageEstimator::RoundedAtLeastOne))]
    fn test_estimator_parse(#[case] raw: &str, #[case] expected: Result<UsageEstimator, String>) {
        assert_eq!(raw.parse::<UsageEstimator>(), expected);
    }

    #[test]
    fn test_unknown_strategy_names() {
        assert!("floor".parse::<UsageEstimator>().is_err());
        assert!("random".parse::<StealOrder>().is_err());
        assert_eq!(
            "oldest_allocation".parse::<StealOrder>(),
            Ok(StealOrder::OldestAllocationFirst)
        );
    }

    proptest! {
        #[test]
        fn prop_spare_never_breaks_floor(
            cpu in -50.0f64..400.0,
            owned in 0usize..64,
            floor in 0usize..8,
            rounded in any::<bool>(),
        ) {
            let policy = AdmissionPolicy {
                min_cores_per_job: floor,
                estimator: if rounded {
                    UsageEstimator::RoundedAtLeastOne
                } else {
                    UsageEstimator::Ceil
                },
                ..AdmissionPolicy::default()
            };
            let spare = policy.spare(cpu, owned);
            prop_assert!(spare <= owned);
            if spare > 0 {
                prop_assert!(owned - spare >= policy.floor());
            }
        }
    }
}

//! Build lifecycle state machine.
//!
//! The transition table is a pure function of the build's current state, the
//! incoming event and the policy of the region the build is in. Moving on to
//! the next region is reported as [`Step::Advance`] so the caller can consult
//! the region registry exactly once, when the transition is actually applied.

use crate::region::RegionPolicy;
use crate::types::{BuildState, PipelineEvent};

/// Outcome of a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Stay in the current region and enter this state.
    Enter(BuildState),
    /// The current region is done: `awaiting_deploy` at the next region, or
    /// `deployed` if there is none.
    Advance,
}

/// Evaluate the transition table. `None` means the pair is not in the table.
pub fn evaluate(state: BuildState, event: PipelineEvent, policy: RegionPolicy) -> Option<Step> {
    use BuildState as S;
    use PipelineEvent as E;

    let step = match (state, event) {
        (S::AwaitingDeploy, E::BeginDeploy) => Step::Enter(S::Deploying),
        (S::Deploying, E::DeploySucceeded) => Step::Enter(S::Testing),
        (S::Deploying, E::DeployFailed) => Step::Enter(S::DeployFailed),
        (S::Testing, E::TestingSucceeded) => {
            if policy.requires_manual_approval {
                Step::Enter(S::AwaitingConfirmation)
            } else {
                after_confirmation(policy)
            }
        }
        (S::Testing, E::TestingFailed) => Step::Enter(S::TestingFailed),
        (S::AwaitingConfirmation, E::ManualDeployConfirmed) => after_confirmation(policy),
        (S::Monitoring, E::MonitoringSucceeded) => Step::Advance,
        (S::Monitoring, E::MonitoringFailed) => Step::Enter(S::MonitoringFailed),
        _ => return None,
    };
    Some(step)
}

fn after_confirmation(policy: RegionPolicy) -> Step {
    if policy.requires_monitoring {
        Step::Enter(BuildState::Monitoring)
    } else {
        Step::Advance
    }
}

/// True if `event` is in the table for `state` under any region policy.
pub fn accepts(state: BuildState, event: PipelineEvent) -> bool {
    [false, true].iter().any(|&approval| {
        [false, true].iter().any(|&monitoring| {
            evaluate(
                state,
                event,
                RegionPolicy {
                    requires_manual_approval: approval,
                    requires_monitoring: monitoring,
                },
            )
            .is_some()
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

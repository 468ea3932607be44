//! Named-policy registry and `DAGRT_SCHED` selection.
//!
//! Mirrors `select_sched_policy`/`display_sched_help_message` in
//! `original_source/src/core/sched_policy.c`: a fixed table of predefined
//! policies searched by name, a default when none match, and a `"help"`
//! sentinel that lists every registered name and description before
//! selection proceeds.

use super::policies::{Delegating, Eager, NoPrio, Prio, Random, WorkStealing};
use super::SchedPolicy;

type Factory = fn() -> Box<dyn SchedPolicy>;

const REGISTRY: &[(&str, &str, Factory)] = &[
    ("ws", "work-stealing", || Box::new(WorkStealing::new())),
    ("prio", "central priority-bucketed queue", || Box::new(Prio::new())),
    ("no-prio", "central stack ignoring priority", || Box::new(NoPrio::new())),
    ("random", "uniformly random eligible task", || Box::new(Random::new())),
    (
        "dm",
        "deadline model (delegates to eager: no calibrated performance model)",
        || Box::new(Delegating::new("dm", "deadline model (delegates to eager)")),
    ),
    (
        "dmda",
        "deadline model + data-aware (delegates to eager: no calibrated performance model)",
        || Box::new(Delegating::new("dmda", "deadline model + data-aware (delegates to eager)")),
    ),
    (
        "dmda-ready",
        "dmda restricted to ready tasks (delegates to eager: no calibrated performance model)",
        || Box::new(Delegating::new("dmda-ready", "dmda restricted to ready tasks (delegates to eager)")),
    ),
    (
        "dmda-sorted",
        "dmda with sorted task list (delegates to eager: no calibrated performance model)",
        || Box::new(Delegating::new("dmda-sorted", "dmda with sorted task list (delegates to eager)")),
    ),
    (
        "heft",
        "heterogeneous earliest finish time (delegates to eager: no calibrated performance model)",
        || Box::new(Delegating::new("heft", "heterogeneous earliest finish time (delegates to eager)")),
    ),
    ("eager", "greedy policy, central FIFO (default)", || Box::new(Eager::new())),
    (
        "parallel-heft",
        "heft extended to parallel tasks (delegates to eager: no calibrated performance model)",
        || Box::new(Delegating::new("parallel-heft", "heft extended to parallel tasks (delegates to eager)")),
    ),
    (
        "pgreedy",
        "greedy policy extended to parallel tasks (delegates to eager: no calibrated performance model)",
        || Box::new(Delegating::new("pgreedy", "greedy policy extended to parallel tasks (delegates to eager)")),
    ),
];

const DEFAULT_POLICY_NAME: &str = "eager";

fn find_by_name(name: &str) -> Option<Factory> {
    REGISTRY.iter().find(|(n, _, _)| *n == name).map(|(_, _, f)| *f)
}

/// Every registered policy's `(name, description)`, in registration order.
pub fn list() -> Vec<(&'static str, &'static str)> {
    REGISTRY.iter().map(|(n, d, _)| (*n, *d)).collect()
}

/// If `DAGRT_SCHED=help`, log every registered policy's name and
/// description before selection proceeds -- the `display_sched_help_message`
/// step always runs ahead of `select_sched_policy` in the source system.
pub fn maybe_display_help() {
    if crate::env::sched_name().as_deref() == Some("help") {
        tracing::info!("DAGRT_SCHED can be either of:");
        for (name, description) in list() {
            tracing::info!("{name}\t-> {description}");
        }
    }
}

/// Select a policy: an explicit `requested` name wins; otherwise
/// `DAGRT_SCHED`; otherwise the `eager` default. An unrecognized name (or
/// the `"help"` sentinel itself) falls through to the default, matching
/// "perhaps there was no policy that matched the name".
pub fn select(requested: Option<&str>) -> Box<dyn SchedPolicy> {
    maybe_display_help();

    let name = requested.map(str::to_owned).or_else(crate::env::sched_name);
    let factory = name
        .as_deref()
        .filter(|n| *n != "help")
        .and_then(find_by_name)
        .unwrap_or_else(|| find_by_name(DEFAULT_POLICY_NAME).expect("eager always registered"));
    factory()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_falls_back_to_eager_default() {
        let policy = select(Some("not-a-real-policy"));
        assert_eq!(policy.name(), "eager");
    }

    #[test]
    fn explicit_name_is_honored() {
        let policy = select(Some("prio"));
        assert_eq!(policy.name(), "prio");
    }

    #[test]
    fn every_registered_name_is_constructible() {
        for (name, _) in list() {
            let policy = select(Some(name));
            assert_eq!(policy.name(), name);
        }
    }

    #[test]
    fn list_is_not_empty_and_matches_twelve_predefined_policies() {
        assert_eq!(list().len(), 12);
    }
}

//! Kahn ordering of expanded steps.

use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::model::ResourceId;

use super::step::{Step, StepKind};

/// A step before ordering; dependencies index into the unordered list.
#[derive(Debug, Clone)]
pub(super) struct PendingStep {
    pub resource: ResourceId,
    pub kind: StepKind,
    pub provider_id: Option<String>,
    pub dependencies: BTreeSet<usize>,
}

type ReadyKey = (u8, ResourceId, StepKind, usize);

/// Orders steps so every dependency comes first.
///
/// Among ready steps, creates go first and destroys last; ties are broken by
/// resource identity.
pub(super) fn order(pending: Vec<PendingStep>) -> std::result::Result<Vec<Step>, ValidationError> {
    let count = pending.len();
    let mut indegree: Vec<usize> = pending.iter().map(|s| s.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (i, step) in pending.iter().enumerate() {
        for &dep in &step.dependencies {
            dependents[dep].push(i);
        }
    }

    let key = |i: usize| -> ReadyKey {
        let step = &pending[i];
        (step.kind.priority(), step.resource.clone(), step.kind, i)
    };

    let mut ready: BTreeSet<ReadyKey> = (0..count).filter(|&i| indegree[i] == 0).map(key).collect();
    let mut position: Vec<Option<usize>> = vec![None; count];
    let mut waves = vec![0_usize; count];
    let mut ordered: Vec<usize> = Vec::with_capacity(count);

    while let Some((_, _, _, i)) = ready.pop_first() {
        waves[i] = pending[i]
            .dependencies
            .iter()
            .map(|&d| waves[d] + 1)
            .max()
            .unwrap_or(0);
        position[i] = Some(ordered.len());
        ordered.push(i);

        for &j in &dependents[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(key(j));
            }
        }
    }

    if ordered.len() < count {
        let remaining = (0..count)
            .filter(|&i| position[i].is_none())
            .map(|i| format!("{} {}", pending[i].kind, pending[i].resource))
            .collect();
        return Err(ValidationError::UnresolvableOrder { remaining });
    }

    Ok(ordered
        .iter()
        .enumerate()
        .map(|(index, &i)| {
            let step = &pending[i];
            let mut dependencies: Vec<usize> = step
                .dependencies
                .iter()
                .filter_map(|&d| position[d])
                .collect();
            dependencies.sort_unstable();
            Step {
                index,
                resource: step.resource.clone(),
                kind: step.kind,
                provider_id: step.provider_id.clone(),
                dependencies,
                wave: waves[i],
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(resource: &str, kind: StepKind, deps: &[usize]) -> PendingStep {
        PendingStep {
            resource: resource.parse().unwrap(),
            kind,
            provider_id: None,
            dependencies: deps.iter().copied().collect(),
        }
    }

    #[test]
    fn test_creates_before_destroys_when_both_ready() {
        let steps = order(vec![
            pending("aws_eip.old", StepKind::Destroy, &[]),
            pending("aws_vpc.main", StepKind::Create, &[]),
            pending("aws_subnet.a", StepKind::Update, &[]),
        ])
        .unwrap();

        let kinds: Vec<StepKind> = steps.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StepKind::Create, StepKind::Update, StepKind::Destroy]);
        assert!(steps.iter().all(|s| s.wave == 0));
    }

    #[test]
    fn test_dependencies_are_remapped() {
        let steps = order(vec![
            pending("aws_subnet.a", StepKind::Create, &[1]),
            pending("aws_vpc.main", StepKind::Create, &[]),
        ])
        .unwrap();

        assert_eq!(steps[0].resource.to_string(), "aws_vpc.main");
        assert_eq!(steps[1].dependencies, vec![0]);
        assert_eq!(steps[1].wave, 1);
    }

    #[test]
    fn test_cyclic_steps_are_unresolvable() {
        let err = order(vec![
            pending("aws_vpc.main", StepKind::CreateReplacement, &[1]),
            pending("aws_vpc.main", StepKind::DestroyDeposed, &[0]),
            pending("aws_eip.nat", StepKind::Create, &[]),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            ValidationError::UnresolvableOrder {
                remaining: vec![
                    "create_replacement aws_vpc.main".into(),
                    "destroy_deposed aws_vpc.main".into()
                ]
            }
        );
    }
}

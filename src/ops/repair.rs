//! Plan repairs for a cluster image

use crate::common::Result;
use crate::coordinator::{Directive, DirectiveKind, Evaluator};
use serde::Serialize;
use std::path::Path;

/// Every directive one evaluation pass would emit, in container order
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairPlan {
    pub containers: usize,
    pub directives: Vec<Directive>,
    pub withheld: usize,
    pub errors: Vec<String>,
}

impl RepairPlan {
    pub fn count(&self, kind: DirectiveKind) -> usize {
        self.directives.iter().filter(|d| d.kind == kind).count()
    }
}

pub async fn plan_repairs(path: impl AsRef<Path>) -> Result<RepairPlan> {
    tracing::info!("Planning cluster repairs");
    let (store, registry) = super::load_cluster(path.as_ref()).await?;
    let evaluator = Evaluator::new(&store, &registry);

    let mut plan = RepairPlan::default();
    for id in store.container_ids()? {
        plan.containers += 1;
        match evaluator.evaluate(id) {
            Ok(evaluation) => {
                plan.withheld += evaluation.withheld_count();
                plan.directives.extend(evaluation.directives);
            }
            Err(e) => plan.errors.push(format!("{}: {}", id, e)),
        }
    }

    tracing::info!(
        directives = plan.directives.len(),
        withheld = plan.withheld,
        "Repair plan ready"
    );
    Ok(plan)
}

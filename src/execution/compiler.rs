//! DAG compiler - validates a pipeline and groups its steps into stages

use crate::core::{PipelineDefinition, Step};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Summary of a step inside a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStep {
    pub id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl From<&Step> for StageStep {
    fn from(step: &Step) -> Self {
        Self {
            id: step.id.clone(),
            role: step.role.clone(),
            agent_id: step.agent_id.clone(),
        }
    }
}

/// One topological level: steps whose dependencies are all in earlier stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub index: usize,
    pub steps: Vec<StageStep>,
}

/// Execution plan with any validation issues found while building it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub stages: Vec<Stage>,
    pub issues: Vec<String>,
}

impl Plan {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Stage index of a step, if it was scheduled
    pub fn stage_of(&self, step_id: &str) -> Option<usize> {
        self.stages
            .iter()
            .find(|stage| stage.steps.iter().any(|s| s.id == step_id))
            .map(|stage| stage.index)
    }

    /// Step ids per stage, handy for display and assertions
    pub fn stage_ids(&self) -> Vec<Vec<String>> {
        self.stages
            .iter()
            .map(|stage| stage.steps.iter().map(|s| s.id.clone()).collect())
            .collect()
    }
}

/// Validate a pipeline and compute its stages
///
/// Pure and side-effect free; never fails. Problems come back as issues.
pub fn validate(pipeline: &PipelineDefinition) -> Plan {
    CompiledGraph::compile(pipeline).plan
}

/// A compiled pipeline: the plan plus the edge maps the coordinator needs
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pub plan: Plan,
    steps: HashMap<String, Step>,
    /// Parents in edge declaration order
    parents: HashMap<String, Vec<String>>,
    /// Children in edge declaration order
    children: HashMap<String, Vec<String>>,
}

impl CompiledGraph {
    pub fn compile(pipeline: &PipelineDefinition) -> Self {
        let enabled: Vec<&Step> = pipeline.enabled_steps().collect();
        let position: HashMap<&str, usize> = enabled
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let declared: HashSet<&str> = pipeline.steps.iter().map(|s| s.id.as_str()).collect();

        let steps: HashMap<String, Step> = enabled
            .iter()
            .map(|s| (s.id.clone(), (*s).clone()))
            .collect();

        if pipeline.edges.is_empty() {
            let plan = Self::linear_plan(&enabled);
            // Consecutive stages act as an implicit chain
            let mut parents: HashMap<String, Vec<String>> = HashMap::new();
            let mut children: HashMap<String, Vec<String>> = HashMap::new();
            let order: Vec<&str> = plan
                .stages
                .iter()
                .flat_map(|stage| stage.steps.iter().map(|s| s.id.as_str()))
                .collect();
            for pair in order.windows(2) {
                children.entry(pair[0].to_string()).or_default().push(pair[1].to_string());
                parents.entry(pair[1].to_string()).or_default().push(pair[0].to_string());
            }
            return Self {
                plan,
                steps,
                parents,
                children,
            };
        }

        let mut issues = Vec::new();
        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut indegree: HashMap<&str, usize> = enabled.iter().map(|s| (s.id.as_str(), 0)).collect();
        let mut seen_edges = HashSet::new();

        for edge in &pipeline.edges {
            let (from, to) = (edge.from.as_str(), edge.to.as_str());
            if !declared.contains(from) || !declared.contains(to) {
                issues.push(format!("Edge references missing step: {} -> {}", from, to));
                continue;
            }
            // Edges touching disabled steps drop out with the step
            if !position.contains_key(from) || !position.contains_key(to) {
                continue;
            }
            if !seen_edges.insert((from, to)) {
                continue;
            }
            children.entry(from.to_string()).or_default().push(to.to_string());
            parents.entry(to.to_string()).or_default().push(from.to_string());
            *indegree.entry(to).or_default() += 1;
        }

        // Kahn's algorithm, one whole frontier per stage
        let mut frontier: Vec<&str> = enabled
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| indegree.get(id).copied().unwrap_or(0) == 0)
            .collect();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stages = Vec::new();

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for id in &frontier {
                visited.insert(*id);
                for child in children.get(*id).map(Vec::as_slice).unwrap_or(&[]) {
                    if let Some(degree) = indegree.get_mut(child.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(child.as_str());
                        }
                    }
                }
            }

            stages.push(Stage {
                index: stages.len(),
                steps: frontier
                    .iter()
                    .filter_map(|id| steps.get(*id))
                    .map(StageStep::from)
                    .collect(),
            });

            next.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
            frontier = next;
        }

        let stuck: Vec<&str> = enabled
            .iter()
            .filter(|s| !visited.contains(s.id.as_str()))
            .map(|s| s.role.as_str())
            .collect();
        if !stuck.is_empty() {
            issues.push(format!(
                "Cycle detected or unreachable steps: {}",
                stuck.join(", ")
            ));
        }

        Self {
            plan: Plan { stages, issues },
            steps,
            parents,
            children,
        }
    }

    /// One step per stage, by `order_index` then declaration order
    fn linear_plan(enabled: &[&Step]) -> Plan {
        let mut ordered: Vec<(usize, &Step)> = enabled.iter().copied().enumerate().collect();
        ordered.sort_by_key(|(i, s)| s.order_index.unwrap_or(*i as i64));

        Plan {
            stages: ordered
                .into_iter()
                .enumerate()
                .map(|(index, (_, step))| Stage {
                    index,
                    steps: vec![StageStep::from(step)],
                })
                .collect(),
            issues: Vec::new(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.plan.stages
    }

    pub fn issues(&self) -> &[String] {
        &self.plan.issues
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    pub fn parents(&self, id: &str) -> &[String] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of enabled steps
    pub fn node_count(&self) -> usize {
        self.steps.len()
    }
}

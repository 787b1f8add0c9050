use crate::model::edge::{Edge, EdgeKey, EdgeTarget};
use crate::model::step::{ActivationMode, Step};
use deck_core::error::WorkflowError;
use deck_core::id::StepId;
use deck_core::log_event;
use deck_core::utils::{EngineConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Serializable overview of a definition's graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionSummary {
    /// Workflow name
    pub name: String,
    /// Name of the start step
    pub start: String,
    /// Declared outcomes
    pub outcomes: Vec<String>,
    /// Steps in declaration order
    pub steps: Vec<StepSummary>,
}

/// One step of a `DefinitionSummary`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    /// Step id
    pub id: StepId,
    /// Step name
    pub name: String,
    /// Components built per activation
    pub mode: ActivationMode,
    /// Outgoing edges
    pub edges: Vec<EdgeSummary>,
}

/// One edge of a `StepSummary`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSummary {
    /// Rendered edge key, e.g. `named:Next`
    pub key: String,
    /// Target step name, `finish`, or `outcome:<name>`
    pub target: String,
}

/// An immutable workflow graph
///
/// Built by `WorkflowBuilder`. Each workflow instance owns its own
/// definition, so factories may capture per-run state.
pub struct WorkflowDefinition {
    name: String,
    steps: Vec<Step>,
    index: HashMap<StepId, usize>,
    start: StepId,
    outcomes: Vec<String>,
    config: EngineConfig,
}

impl WorkflowDefinition {
    /// Definition name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in declaration order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Look up a step
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Look up a step by name
    pub fn step_named(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Id of the start step
    pub fn start(&self) -> StepId {
        self.start
    }

    /// Declared outcome names
    pub fn outcomes(&self) -> &[String] {
        &self.outcomes
    }

    /// Whether `name` is a declared outcome
    pub fn declares_outcome(&self, name: &str) -> bool {
        self.outcomes.iter().any(|outcome| outcome == name)
    }

    /// Engine settings for instances of this definition
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// A built definition always has a start step.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps reachable from the start step along step edges
    pub fn reachable_from_start(&self) -> HashSet<StepId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.start]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(step) = self.step(&id) {
                for edge in step.edges() {
                    if let EdgeTarget::Step(next) = edge.target {
                        queue.push_back(next);
                    }
                }
            }
        }
        seen
    }

    /// Steps the start step cannot reach
    pub fn unreachable_steps(&self) -> Vec<&Step> {
        let reachable = self.reachable_from_start();
        self.steps
            .iter()
            .filter(|step| !reachable.contains(&step.id))
            .collect()
    }

    /// Steps with nothing to build. No trigger can leave them, so a
    /// workflow that enters one waits for `end_task` or an outcome.
    pub fn idle_steps(&self) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|step| step.mode() == ActivationMode::Empty)
            .collect()
    }

    /// Serializable overview for diagnostics
    pub fn summary(&self) -> DefinitionSummary {
        let step_name = |id: &StepId| {
            self.step(id)
                .map(|step| step.name.clone())
                .unwrap_or_else(|| id.to_string())
        };

        DefinitionSummary {
            name: self.name.clone(),
            start: step_name(&self.start),
            outcomes: self.outcomes.clone(),
            steps: self
                .steps
                .iter()
                .map(|step| StepSummary {
                    id: step.id,
                    name: step.name.clone(),
                    mode: step.mode(),
                    edges: step
                        .edges()
                        .iter()
                        .map(|edge| EdgeSummary {
                            key: edge.key.to_string(),
                            target: match &edge.target {
                                EdgeTarget::Step(id) => step_name(id),
                                EdgeTarget::Finish => "finish".to_string(),
                                EdgeTarget::Outcome(name) => format!("outcome:{}", name),
                            },
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("start", &self.start)
            .field("outcomes", &self.outcomes)
            .finish()
    }
}

/// Builder for workflow definitions
pub struct WorkflowBuilder {
    name: String,
    steps: Vec<Step>,
    start: Option<StepId>,
    outcomes: Vec<String>,
    config: EngineConfig,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(name: &str) -> Self {
        WorkflowBuilder {
            name: name.to_string(),
            steps: Vec::new(),
            start: None,
            outcomes: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Engine settings for instances of this workflow
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a step. The first step added is the default start step.
    pub fn add_step(mut self, step: Step) -> Result<Self, WorkflowError> {
        if self.steps.iter().any(|existing| existing.id == step.id) {
            return Err(WorkflowError::Definition(format!(
                "step {} was added twice",
                step.id
            )));
        }
        self.steps.push(step);
        Ok(self)
    }

    /// Add an edge to a step that was already added
    pub fn add_edge(mut self, source: StepId, edge: Edge) -> Result<Self, WorkflowError> {
        let step = self
            .steps
            .iter_mut()
            .find(|step| step.id == source)
            .ok_or(WorkflowError::StepNotFound(source))?;
        step.push_edge(edge);
        Ok(self)
    }

    /// Add an edge from `source` to `target`
    pub fn connect(
        self,
        source: StepId,
        key: EdgeKey,
        target: EdgeTarget,
    ) -> Result<Self, WorkflowError> {
        self.add_edge(source, Edge::new(key, target))
    }

    /// Choose the start step
    pub fn start_at(mut self, step: StepId) -> Self {
        self.start = Some(step);
        self
    }

    /// Declare a named outcome the workflow can report to its parent
    pub fn outcome(mut self, name: &str) -> Self {
        if !self.outcomes.iter().any(|outcome| outcome == name) {
            self.outcomes.push(name.to_string());
        }
        self
    }

    /// Validate the graph and build the definition
    pub fn build(mut self) -> Result<WorkflowDefinition, WorkflowError> {
        self.config
            .validate()
            .map_err(|e| WorkflowError::Definition(e.to_string()))?;

        if self.steps.is_empty() {
            return Err(WorkflowError::Definition(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }

        let start = match self.start {
            Some(start) => start,
            None => self.steps[0].id,
        };

        let index: HashMap<StepId, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id, i))
            .collect();

        if !index.contains_key(&start) {
            return Err(WorkflowError::StepNotFound(start));
        }

        for (position, step) in self.steps.iter_mut().enumerate() {
            if step.name.trim().is_empty() {
                step.name = format!("{}-{}", self.config.default_step_name_prefix, position + 1);
                log_event!(LogLevel::Warning, "unnamed step given a default name",
                    workflow => &self.name,
                    step => &step.name,
                );
            }
        }

        for step in &self.steps {
            Self::check_step(step, &index)?;
            for edge in step.edges() {
                if let EdgeTarget::Outcome(name) = &edge.target {
                    if !self.outcomes.iter().any(|outcome| outcome == name) {
                        self.outcomes.push(name.clone());
                    }
                }
            }
        }

        let definition = WorkflowDefinition {
            name: self.name,
            steps: self.steps,
            index,
            start,
            outcomes: self.outcomes,
            config: self.config,
        };

        if definition.config.validate_reachability {
            for step in definition.unreachable_steps() {
                log_event!(LogLevel::Warning, "step is unreachable from the start step",
                    workflow => definition.name(),
                    step => &step.name,
                );
            }
        }

        for step in definition.idle_steps() {
            log_event!(LogLevel::Warning, "step builds nothing and no trigger can leave it",
                workflow => definition.name(),
                step => &step.name,
            );
        }

        Ok(definition)
    }

    fn check_step(step: &Step, index: &HashMap<StepId, usize>) -> Result<(), WorkflowError> {
        let mode = step.mode();
        if mode == ActivationMode::Conflicting {
            return Err(WorkflowError::Definition(format!(
                "step '{}' combines a nested workflow with a view or controller",
                step.name
            )));
        }

        for (i, edge) in step.edges().iter().enumerate() {
            if step.edges()[..i]
                .iter()
                .any(|earlier| earlier.key.same_key(&edge.key))
            {
                return Err(WorkflowError::Definition(format!(
                    "step '{}' declares edge '{}' more than once",
                    step.name, edge.key
                )));
            }

            if let EdgeTarget::Step(target) = edge.target {
                if !index.contains_key(&target) {
                    return Err(WorkflowError::Definition(format!(
                        "edge '{}' of step '{}' leads to a step outside this workflow",
                        edge.key, step.name
                    )));
                }
            }

            match &edge.key {
                EdgeKey::Property { .. }
                    if !matches!(
                        mode,
                        ActivationMode::ViewController | ActivationMode::ControllerOnly
                    ) =>
                {
                    return Err(WorkflowError::Definition(format!(
                        "step '{}' has property edge '{}' but no controller",
                        step.name,
                        edge.key.label()
                    )));
                }
                key if key.needs_nested() && mode != ActivationMode::Nested => {
                    return Err(WorkflowError::Definition(format!(
                        "step '{}' has edge '{}' but hosts no nested workflow",
                        step.name, edge.key
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

//! Loop regions.
//!
//! A region is a loop-start node, the loop-end node that closes it, and the
//! body between them: every node that depends on the loop-start and that the
//! loop-end depends on, through edges or template references. A loop-end
//! closes the loop-start named by its `loopStart` setting, otherwise the
//! innermost open loop-start it depends on.
//!
//! The body must be a contiguous run of the plan. Unrelated nodes that the
//! scheduler placed between the markers are moved out of the span, ahead of
//! the loop-start when the loop-end depends on them and after the loop-end
//! otherwise. Anything that still does not pair up cleanly is a
//! configuration error, reported before a run starts.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    Result, StepflowError,
    workflow::{
        condition::Condition,
        consts::{CONFIG_CONDITION, CONFIG_LOOP_START, CONFIG_MAX_ITERATIONS, CONFIG_MODE},
        dependency::DependencyGraph,
        node::{Node, NodeId, NodeKind},
        schedule::{ExecutionPlan, Schedule},
        template::LoopVars,
    },
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LoopMode {
    /// repeat while the condition holds
    #[default]
    While,
    /// repeat until the condition holds
    Until,
}

impl LoopMode {
    pub fn should_continue(
        &self,
        condition: bool,
    ) -> bool {
        match self {
            LoopMode::While => condition,
            LoopMode::Until => !condition,
        }
    }

    fn parse(
        node_id: &str,
        value: &Value,
    ) -> Result<Self> {
        value
            .as_str()
            .and_then(|s| s.trim().to_ascii_lowercase().parse::<LoopMode>().ok())
            .ok_or_else(|| StepflowError::Loop(format!("node {} has invalid mode {}, expected while or until", node_id, value)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopRegion {
    pub start: NodeId,
    pub end: NodeId,
    pub mode: LoopMode,
    pub condition: Condition,
    /// per-region pass limit, overrides the engine default
    pub max_iterations: Option<u32>,
    /// nodes between start and end, in plan order
    pub body: Vec<NodeId>,
    pub start_pos: usize,
    pub end_pos: usize,
    /// index of the enclosing region
    pub parent: Option<usize>,
}

impl LoopRegion {
    /// Whether the plan position lies inside the body.
    pub fn encloses(
        &self,
        pos: usize,
    ) -> bool {
        pos > self.start_pos && pos < self.end_pos
    }

    pub fn limit(
        &self,
        default: u32,
    ) -> u32 {
        self.max_iterations.unwrap_or(default).max(1)
    }
}

/// A loop-start and the loop-end closing it, by plan position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start_pos: usize,
    end_pos: usize,
    /// closes a loop-start other than the innermost open one
    crossed: bool,
}

/// Pairs loop-start and loop-end nodes of `plan` and moves unrelated nodes out
/// of every span. Returns the final plan and its regions, ordered by start
/// position so a parent always precedes its children.
///
/// A fallback plan is not rearranged and its bodies are positional.
pub fn detect_regions(
    mut plan: ExecutionPlan,
    nodes: &BTreeMap<NodeId, Node>,
    graph: &DependencyGraph,
) -> Result<(ExecutionPlan, Vec<LoopRegion>)> {
    let structural = !plan.schedule().is_fallback();
    let mut spans = pair_markers(&plan, nodes, graph)?;

    // each pass fixes one span; nested spans may need another look afterwards
    if structural {
        for _ in 0..=plan.len() {
            let Some(order) = spans.iter().find_map(|span| rearrange(&plan, span, graph)) else {
                break;
            };
            plan = ExecutionPlan::new(Schedule::Ordered(order));
            spans = pair_markers(&plan, nodes, graph)?;
        }
    }

    let mut regions = Vec::with_capacity(spans.len());
    for span in &spans {
        let order = plan.order();
        let (start, end) = (&nodes[&order[span.start_pos]], &nodes[&order[span.end_pos]]);
        if span.crossed {
            return Err(StepflowError::Loop(format!(
                "loop-end {} closes {} but another loop-start opened in between, regions overlap",
                end.id, start.id
            )));
        }
        let inside = &order[span.start_pos + 1..span.end_pos];
        if structural {
            let body = structural_body(graph, &start.id, &end.id);
            if body.len() != inside.len() || inside.iter().any(|id| !body.contains(id)) {
                return Err(StepflowError::Loop(format!("body of loop-start {} is not contiguous in the plan", start.id)));
            }
            if !graph.reaches(&start.id, &end.id) {
                warn!("loop-end {} does not depend on loop-start {}, the loop body is empty", end.id, start.id);
            }
        }
        regions.push(build_region(start, end, inside.to_vec(), span.start_pos, span.end_pos)?);
    }

    regions.sort_by_key(|r| r.start_pos);
    for i in 0..regions.len() {
        let (start_pos, end_pos) = (regions[i].start_pos, regions[i].end_pos);
        let parent = (0..i).rev().find(|&j| regions[j].start_pos < start_pos && regions[j].end_pos > end_pos);
        regions[i].parent = parent;
    }

    debug!("detected {} loop regions", regions.len());
    Ok((plan, regions))
}

fn pair_markers(
    plan: &ExecutionPlan,
    nodes: &BTreeMap<NodeId, Node>,
    graph: &DependencyGraph,
) -> Result<Vec<Span>> {
    let mut open: Vec<(usize, &Node)> = Vec::new();
    let mut spans = Vec::new();

    for (pos, id) in plan.order().iter().enumerate() {
        let Some(node) = nodes.get(id) else {
            continue;
        };
        match node.kind {
            NodeKind::LoopStart => open.push((pos, node)),
            NodeKind::LoopEnd => {
                if open.is_empty() {
                    return Err(StepflowError::Loop(format!("loop-end {} has no matching loop-start", id)));
                }
                let index = match node.get(CONFIG_LOOP_START).and_then(Value::as_str) {
                    Some(partner) => open.iter().rposition(|(_, start)| start.id == partner).ok_or_else(|| {
                        StepflowError::Loop(format!("loop-end {} closes {} which is not an open loop-start, regions overlap", id, partner))
                    })?,
                    None => open.iter().rposition(|(_, start)| graph.reaches(&start.id, id)).unwrap_or(open.len() - 1),
                };
                let crossed = index != open.len() - 1;
                let (start_pos, _) = open.remove(index);
                spans.push(Span {
                    start_pos,
                    end_pos: pos,
                    crossed,
                });
            }
            NodeKind::Step | NodeKind::Conditional => {}
        }
    }

    if let Some((_, start)) = open.first() {
        return Err(StepflowError::Loop(format!("loop-start {} is never closed", start.id)));
    }
    Ok(spans)
}

/// Nodes that depend on `start` and that `end` depends on.
fn structural_body(
    graph: &DependencyGraph,
    start: &str,
    end: &str,
) -> BTreeSet<NodeId> {
    let upstream = graph.upstream(end);
    graph.downstream(start).into_iter().filter(|id| upstream.contains(id)).collect()
}

/// Moves the nodes of `span` that are not part of its body out of it, keeping
/// relative plan order. Returns `None` when the span is already clean.
fn rearrange(
    plan: &ExecutionPlan,
    span: &Span,
    graph: &DependencyGraph,
) -> Option<Vec<NodeId>> {
    let order = plan.order();
    let (start, end) = (&order[span.start_pos], &order[span.end_pos]);
    let inside = &order[span.start_pos + 1..span.end_pos];
    let body = structural_body(graph, start, end);
    if inside.iter().all(|id| body.contains(id)) {
        return None;
    }

    let upstream = graph.upstream(end);
    let (members, outside): (Vec<&NodeId>, Vec<&NodeId>) = inside.iter().partition(|id| body.contains(*id));
    let (before, after): (Vec<&NodeId>, Vec<&NodeId>) = outside.into_iter().partition(|id| upstream.contains(*id));
    debug!("moving {:?} ahead of loop {} and {:?} after it", before, start, after);

    let mut rearranged = Vec::with_capacity(order.len());
    rearranged.extend(order[..span.start_pos].iter().cloned());
    rearranged.extend(before.into_iter().cloned());
    rearranged.push(start.clone());
    rearranged.extend(members.into_iter().cloned());
    rearranged.push(end.clone());
    rearranged.extend(after.into_iter().cloned());
    rearranged.extend(order[span.end_pos + 1..].iter().cloned());
    Some(rearranged)
}

fn build_region(
    start: &Node,
    end: &Node,
    body: Vec<NodeId>,
    start_pos: usize,
    end_pos: usize,
) -> Result<LoopRegion> {
    let setting = |key: &str| start.get(key).or_else(|| end.get(key));

    let mode = match setting(CONFIG_MODE) {
        Some(value) => LoopMode::parse(&start.id, value)?,
        None => LoopMode::default(),
    };
    let condition_owner = if start.get(CONFIG_CONDITION).is_some() { &start.id } else { &end.id };
    let condition = Condition::parse(condition_owner, setting(CONFIG_CONDITION))?;
    let max_iterations = match setting(CONFIG_MAX_ITERATIONS) {
        None => None,
        Some(value) => Some(
            value
                .as_u64()
                .filter(|n| *n > 0)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| StepflowError::Loop(format!("loop-start {} has invalid maxIterations {}", start.id, value)))?,
        ),
    };

    Ok(LoopRegion {
        start: start.id.clone(),
        end: end.id.clone(),
        mode,
        condition,
        max_iterations,
        body,
        start_pos,
        end_pos,
        parent: None,
    })
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoopPhase {
    #[default]
    NotStarted,
    Iterating,
    Evaluating,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    Continue { iteration: u32 },
    Complete { limit_reached: bool },
}

/// Run-scoped state of one region.
///
/// Iteration numbers are handed out from a per-run counter that survives
/// [`LoopState::reset`], so re-entering a nested region continues numbering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopState {
    pub phase: LoopPhase,
    /// iteration of the current pass, used as the NodeRun iteration
    pub iteration: u32,
    /// zero-based pass within the current entry
    pub pass: u32,
    next_iteration: u32,
}

impl LoopState {
    /// Starts a new entry, returns its first iteration number.
    pub fn enter(&mut self) -> u32 {
        self.iteration = self.next_iteration;
        self.next_iteration += 1;
        self.pass = 0;
        self.phase = LoopPhase::Iterating;
        self.iteration
    }

    /// The region will not run this entry; one iteration number is still consumed.
    pub fn skip(&mut self) -> u32 {
        let iteration = self.enter();
        self.phase = LoopPhase::Completed;
        iteration
    }

    pub fn evaluate(&mut self) {
        self.phase = LoopPhase::Evaluating;
    }

    pub fn advance(
        &mut self,
        mode: LoopMode,
        condition: bool,
        limit: u32,
    ) -> LoopDecision {
        let wants_more = mode.should_continue(condition);
        if wants_more && self.pass + 1 < limit {
            self.iteration = self.next_iteration;
            self.next_iteration += 1;
            self.pass += 1;
            self.phase = LoopPhase::Iterating;
            return LoopDecision::Continue {
                iteration: self.iteration,
            };
        }
        self.phase = LoopPhase::Completed;
        LoopDecision::Complete {
            limit_reached: wants_more,
        }
    }

    pub fn reset(&mut self) {
        self.phase = LoopPhase::NotStarted;
        self.pass = 0;
    }

    pub fn vars(&self) -> LoopVars {
        LoopVars {
            iteration: self.iteration,
            pass: self.pass,
        }
    }
}

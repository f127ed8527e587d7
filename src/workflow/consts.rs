//! Reserved port labels, type tags and output keys.

/// Implied source port of edges derived from `inputFrom`.
pub const LEGACY_SOURCE_PORT: &str = "right";
/// Implied target port of edges derived from `inputFrom`.
pub const LEGACY_TARGET_PORT: &str = "left";

/// Branch taken when a conditional evaluates to true.
pub const COND_TRUE_PORT: &str = "cond-true";
/// Branch taken when a conditional evaluates to false.
pub const COND_FALSE_PORT: &str = "cond-false";

pub const TAG_LOOP_START: &str = "loop-start";
pub const TAG_LOOP_END: &str = "loop-end";
pub const TAG_CONDITIONAL: &str = "conditional";

/// Output keys of control nodes.
pub const CONDITION_RESULT: &str = "result";
pub const CONDITION_SELECTED: &str = "selected";
pub const LOOP_ITERATION: &str = "iteration";
pub const LOOP_PASS: &str = "pass";
pub const LOOP_CONTINUE: &str = "continue";
pub const LOOP_LIMIT_REACHED: &str = "limitReached";

/// Node config keys.
pub const CONFIG_MODE: &str = "mode";
pub const CONFIG_CONDITION: &str = "condition";
pub const CONFIG_MAX_ITERATIONS: &str = "maxIterations";
pub const CONFIG_LOOP_START: &str = "loopStart";
pub const CONFIG_RETRY: &str = "retry";

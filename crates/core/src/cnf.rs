use std::sync::LazyLock;

/// Maximum depth of a workflow tree accepted by the task compiler.
///
/// The compiler recurses once per tree level, so this bounds the stack used
/// by a compile. Trees produced by real queries sit far below the default.
pub static MAX_PLAN_DEPTH: LazyLock<usize> = lazy_env!("DOCFLOW_MAX_PLAN_DEPTH", usize, 10_000);

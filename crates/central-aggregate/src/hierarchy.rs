//! Agent-rollup hierarchy.
//!
//! Agent ids encode their rollup chain with `::` separators:
//! `us-east::web::web-1` is an agent in group `us-east::web`, which is in
//! group `us-east`. An id without `::` has no parent.

const SEPARATOR: &str = "::";

/// Ancestor rollup ids for an agent id, immediate parent first.
///
/// `rollup_chain("a::b::c")` is `["a::b", "a"]`; `rollup_chain("a")` is
/// empty.
pub fn rollup_chain(agent_id: &str) -> Vec<String> {
    let segments: Vec<&str> = agent_id.split(SEPARATOR).filter(|s| !s.is_empty()).collect();
    (1..segments.len())
        .rev()
        .map(|k| segments[..k].join(SEPARATOR))
        .collect()
}

/// The immediate parent rollup id, if any.
pub fn parent_of(agent_rollup_id: &str) -> Option<String> {
    rollup_chain(agent_rollup_id).into_iter().next()
}

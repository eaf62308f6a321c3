//! Agent routing
//!
//! Precedence: a mutating verb always routes to the script guard, then the
//! category table, then the guide persona.

use nf_core::{AgentRole, Verb};

/// Category keywords, matched against the lowercase words of a category name.
/// Earlier rows win.
const CATEGORY_ROUTES: &[(&[&str], AgentRole)] = &[
    (&["security", "cybersecurity"], AgentRole::ScriptGuard),
    (&["trigger", "flow", "schedule"], AgentRole::Orchestrator),
    (
        &["storage", "database", "files", "ai", "analytics"],
        AgentRole::NodeExpert,
    ),
    (
        &["communication", "marketing", "productivity", "sales"],
        AgentRole::Connector,
    ),
    (&["development", "utility", "core"], AgentRole::Builder),
];

/// Recommended persona for a tool in `category`, optionally bound to `verb`
pub fn route(category: &str, verb: Option<Verb>) -> AgentRole {
    match verb {
        Some(v) if v.is_mutating() => AgentRole::ScriptGuard,
        _ => category_route(category),
    }
}

/// Category-only routing, used for category tools and non-mutating verbs
pub fn category_route(category: &str) -> AgentRole {
    let lowered = category.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    CATEGORY_ROUTES
        .iter()
        .find(|(keywords, _)| words.iter().any(|w| keywords.contains(w)))
        .map(|(_, role)| *role)
        .unwrap_or(AgentRole::Guide)
}

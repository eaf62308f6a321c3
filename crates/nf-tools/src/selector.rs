//! Context-Aware Selector
//!
//! Scores tool metadata against a [`ToolContext`] and returns a ranked,
//! capped subset with the reasoning behind it.
//!
//! Score = 0.40 × text similarity
//!       + 0.25 × category match
//!       + 0.15 × historical success rate
//!       + 0.10 × declared priority / 100
//!       + 0.10 × learned context-pattern affinity
//!       + 0.05 if the tool was used earlier in the conversation
//!
//! Only tools with a context signal (text, category, learned pattern or
//! previous use) are candidates; success rate and priority order them but
//! never make an unrelated tool eligible.
//!
//! Usage counters and learned patterns only ever grow.

use nf_core::{GeneratedTool, ToolContext, ToolSelection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Minimum query overlap for a learned pattern to apply
const PATTERN_SIMILARITY_THRESHOLD: f64 = 0.5;

/// Relative weight of each scoring signal
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionWeights {
    pub text: f64,
    pub category: f64,
    pub success: f64,
    pub priority: f64,
    pub pattern: f64,
    pub previous: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            text: 0.4,
            category: 0.25,
            success: 0.15,
            priority: 0.1,
            pattern: 0.1,
            previous: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageCounter {
    pub successes: u64,
    pub failures: u64,
}

impl UsageCounter {
    /// Laplace-smoothed success rate; 0.5 for an unused tool
    pub fn success_rate(&self) -> f64 {
        (self.successes as f64 + 1.0) / ((self.successes + self.failures) as f64 + 2.0)
    }
}

#[derive(Debug, Clone)]
struct LearnedPattern {
    tokens: BTreeSet<String>,
    category: Option<String>,
    tools: BTreeMap<String, u64>,
}

/// Learning state summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorStats {
    pub tracked_tools: usize,
    pub total_uses: u64,
    pub learned_patterns: usize,
}

#[derive(Debug, Clone, Copy)]
struct Breakdown {
    text: f64,
    category: f64,
    success: f64,
    priority: f64,
    pattern: f64,
    previous: f64,
}

impl Breakdown {
    /// Whether anything in the context points at this tool
    fn is_relevant(&self) -> bool {
        self.text > 0.0 || self.category > 0.0 || self.pattern > 0.0 || self.previous > 0.0
    }
}

struct Scored {
    tool: Arc<GeneratedTool>,
    score: f64,
    breakdown: Breakdown,
}

pub struct ContextSelector {
    weights: SelectionWeights,
    usage: RwLock<HashMap<String, UsageCounter>>,
    patterns: RwLock<Vec<LearnedPattern>>,
}

impl Default for ContextSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextSelector {
    pub fn new() -> Self {
        Self::with_weights(SelectionWeights::default())
    }

    pub fn with_weights(weights: SelectionWeights) -> Self {
        Self {
            weights,
            usage: RwLock::new(HashMap::new()),
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// Rank `tools` against `context`
    pub async fn select(
        &self,
        tools: &[Arc<GeneratedTool>],
        context: &ToolContext,
    ) -> ToolSelection {
        if tools.is_empty() {
            return ToolSelection::empty("No tools are registered");
        }
        if context.max_tools == 0 {
            return ToolSelection::empty("Context allows zero tools (maxTools = 0)");
        }

        let query = context_tokens(context);
        let usage = self.usage.read().await;
        let affinity = pattern_affinity(
            &self.patterns.read().await,
            &query,
            context.category.as_deref(),
        );

        let mut scored: Vec<Scored> = tools
            .iter()
            .filter_map(|tool| {
                let breakdown = Breakdown {
                    text: text_similarity(&query, tool),
                    category: category_match(context.category.as_deref(), &tool.category),
                    success: usage
                        .get(&tool.name)
                        .copied()
                        .unwrap_or_default()
                        .success_rate(),
                    priority: f64::from(tool.priority.min(100)) / 100.0,
                    pattern: affinity.get(&tool.name).copied().unwrap_or(0.0),
                    previous: if context
                        .previous_tools
                        .iter()
                        .any(|p| *p == tool.name || *p == tool.id)
                    {
                        1.0
                    } else {
                        0.0
                    },
                };
                breakdown.is_relevant().then(|| Scored {
                    tool: Arc::clone(tool),
                    score: self.combine(&breakdown),
                    breakdown,
                })
            })
            .collect();
        drop(usage);

        if scored.is_empty() {
            return ToolSelection::empty(format!(
                "No tool matched '{}' by text, category, learned pattern or previous use",
                context.query
            ));
        }

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.tool.priority.cmp(&a.tool.priority))
                .then_with(|| a.tool.name.cmp(&b.tool.name))
        });

        let chosen: Vec<Scored> = scored
            .into_iter()
            .take_while(|s| s.score >= context.priority_threshold)
            .take(context.max_tools)
            .collect();

        if chosen.is_empty() {
            return ToolSelection::empty(format!(
                "No tool scored at or above the threshold {:.2} for '{}'",
                context.priority_threshold, context.query
            ));
        }

        let mut selection = ToolSelection::default();
        selection.reasoning.push(format!(
            "Selected {} of {} tools for '{}'",
            chosen.len(),
            tools.len(),
            context.query
        ));
        for s in chosen {
            let b = s.breakdown;
            selection.reasoning.push(format!(
                "{}: {:.3} (text {:.2}, category {:.2}, success {:.2}, priority {:.2}, pattern {:.2}, previous {:.0})",
                s.tool.name, s.score, b.text, b.category, b.success, b.priority, b.pattern, b.previous
            ));
            selection.scores.insert(s.tool.name.clone(), s.score);
            selection.total_score += s.score;
            selection.selected_tools.push(s.tool);
        }
        selection.token_efficiency = selection.total_score / selection.selected_tools.len() as f64;

        debug!(
            "Selection for '{}': {:?}",
            context.query,
            selection.tool_names()
        );
        selection
    }

    fn combine(&self, b: &Breakdown) -> f64 {
        let w = &self.weights;
        w.text * b.text
            + w.category * b.category
            + w.success * b.success
            + w.priority * b.priority
            + w.pattern * b.pattern
            + w.previous * b.previous
    }

    /// Record the outcome of one tool invocation
    pub async fn record_usage(&self, tool: &str, success: bool) {
        let mut usage = self.usage.write().await;
        let counter = usage.entry(tool.to_string()).or_default();
        if success {
            counter.successes += 1;
        } else {
            counter.failures += 1;
        }
    }

    pub async fn usage(&self, tool: &str) -> UsageCounter {
        self.usage.read().await.get(tool).copied().unwrap_or_default()
    }

    /// Associate the shape of `context` with the tools that were finally used
    pub async fn learn_pattern(&self, context: &ToolContext, tools: &[String]) {
        let tokens = context_tokens(context);
        if tokens.is_empty() || tools.is_empty() {
            return;
        }

        let mut patterns = self.patterns.write().await;
        let position = patterns
            .iter()
            .position(|p| p.tokens == tokens && p.category == context.category);
        let pattern = match position {
            Some(i) => &mut patterns[i],
            None => {
                patterns.push(LearnedPattern {
                    tokens,
                    category: context.category.clone(),
                    tools: BTreeMap::new(),
                });
                let last = patterns.len() - 1;
                &mut patterns[last]
            }
        };
        for tool in tools {
            *pattern.tools.entry(tool.clone()).or_default() += 1;
        }
    }

    pub async fn stats(&self) -> SelectorStats {
        let usage = self.usage.read().await;
        SelectorStats {
            tracked_tools: usage.len(),
            total_uses: usage.values().map(|c| c.successes + c.failures).sum(),
            learned_patterns: self.patterns.read().await.len(),
        }
    }
}

/// Lowercase alphanumeric words of at least two characters
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(str::to_lowercase)
}

fn context_tokens(context: &ToolContext) -> BTreeSet<String> {
    let mut tokens: BTreeSet<String> = tokenize(&context.query).collect();
    if let Some(intent) = &context.user_intent {
        tokens.extend(tokenize(intent));
    }
    tokens
}

/// Share of query tokens found in the tool's name, description, category or verb
fn text_similarity(query: &BTreeSet<String>, tool: &GeneratedTool) -> f64 {
    if query.is_empty() {
        return 0.0;
    }

    let mut tool_tokens: BTreeSet<String> = tokenize(&tool.name).collect();
    tool_tokens.extend(tokenize(&tool.description));
    tool_tokens.extend(tokenize(&tool.category));
    if let Some(verb) = tool.operation_name {
        tool_tokens.insert(verb.as_str().to_string());
    }

    let overlap = query.iter().filter(|t| tool_tokens.contains(*t)).count();
    overlap as f64 / query.len() as f64
}

fn category_match(wanted: Option<&str>, category: &str) -> f64 {
    let Some(wanted) = wanted.map(str::trim).filter(|w| !w.is_empty()) else {
        return 0.0;
    };
    let wanted = wanted.to_lowercase();
    let category = category.to_lowercase();
    if wanted == category {
        1.0
    } else if category.contains(&wanted) || wanted.contains(&category) {
        0.5
    } else {
        0.0
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Best pattern similarity per tool name, over patterns similar enough to the query
fn pattern_affinity(
    patterns: &[LearnedPattern],
    query: &BTreeSet<String>,
    category: Option<&str>,
) -> HashMap<String, f64> {
    let mut affinity: HashMap<String, f64> = HashMap::new();
    for pattern in patterns {
        if pattern.category.is_some() && pattern.category.as_deref() != category {
            continue;
        }
        let similarity = jaccard(query, &pattern.tokens);
        if similarity < PATTERN_SIMILARITY_THRESHOLD {
            continue;
        }
        for tool in pattern.tools.keys() {
            let best = affinity.entry(tool.clone()).or_insert(0.0);
            *best = best.max(similarity);
        }
    }
    affinity
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_core::{AgentRole, SchemaRef, ToolType, Verb};

    fn tool(name: &str, description: &str, category: &str, priority: u8) -> Arc<GeneratedTool> {
        Arc::new(GeneratedTool::new(
            format!("general:{}", name),
            name,
            description,
            SchemaRef::NodeParameters {
                node: name.to_string(),
            },
            ToolType::General,
            category,
            AgentRole::Guide,
            1000,
            priority,
        ))
    }

    fn catalogue() -> Vec<Arc<GeneratedTool>> {
        vec![
            tool("slack", "Send messages to Slack channels", "Communication", 50),
            tool("gmail", "Send and read email with Gmail", "Communication", 50),
            tool("postgres", "Query a Postgres database", "Data & Storage", 50),
            tool("google_sheets", "Read and write spreadsheet rows", "Data & Storage", 50),
            Arc::new(GeneratedTool::new(
                "operation:n8n-nodes-base.slack:send",
                "slack_send",
                "Send via Slack",
                SchemaRef::Operation {
                    node: "n8n-nodes-base.slack".to_string(),
                    verb: Verb::Send,
                },
                ToolType::OperationSpecific,
                "Communication",
                AgentRole::Connector,
                1150,
                60,
            )),
        ]
    }

    #[tokio::test]
    async fn test_relevant_tools_rank_first() {
        let selector = ContextSelector::new();
        let context = ToolContext::new("send a slack message").with_max_tools(2);
        let selection = selector.select(&catalogue(), &context).await;

        assert_eq!(selection.tool_names(), vec!["slack_send", "slack"]);
        assert_eq!(selection.scores.len(), 2);
        assert!(selection.reasoning.len() > 1);
        assert!(
            (selection.token_efficiency - selection.total_score / 2.0).abs() < f64::EPSILON
        );
    }

    #[tokio::test]
    async fn test_selection_cap_and_threshold() {
        let selector = ContextSelector::new();
        let tools = catalogue();
        for max_tools in 0..=6 {
            let context = ToolContext::new("read rows")
                .with_max_tools(max_tools)
                .with_priority_threshold(0.3);
            let selection = selector.select(&tools, &context).await;
            assert!(selection.selected_tools.len() <= max_tools);
            for name in selection.tool_names() {
                assert!(selection.scores[name] >= 0.3);
            }
        }
    }

    #[tokio::test]
    async fn test_nothing_above_threshold_explains_why() {
        let selector = ContextSelector::new();
        let context = ToolContext::new("slack").with_priority_threshold(0.9);
        let selection = selector.select(&catalogue(), &context).await;
        assert!(selection.is_empty());
        assert_eq!(selection.token_efficiency, 0.0);
        assert!(selection.reasoning[0].contains("threshold"));

        let none = selector.select(&[], &ToolContext::new("slack")).await;
        assert!(none.is_empty());
        assert_eq!(none.reasoning.len(), 1);
    }

    #[tokio::test]
    async fn test_unrelated_query_selects_nothing() {
        let selector = ContextSelector::new();
        let tools = catalogue();
        for tool in &tools {
            selector.record_usage(&tool.name, true).await;
        }

        let selection = selector.select(&tools, &ToolContext::new("qwxz zzyqv")).await;
        assert!(selection.is_empty());
        assert_eq!(selection.reasoning.len(), 1);
        assert!(selection.reasoning[0].contains("No tool matched"));
    }

    #[tokio::test]
    async fn test_category_match_boosts() {
        let selector = ContextSelector::new();
        let context = ToolContext::new("rows")
            .with_category("Data & Storage")
            .with_max_tools(2);
        let selection = selector.select(&catalogue(), &context).await;
        assert_eq!(selection.tool_names(), vec!["google_sheets", "postgres"]);
    }

    #[tokio::test]
    async fn test_ties_break_by_priority_then_name() {
        let selector = ContextSelector::new();
        let tools = vec![
            tool("b_tool", "", "x", 50),
            tool("a_tool", "", "x", 50),
            tool("c_tool", "", "x", 70),
        ];
        let selection = selector.select(&tools, &ToolContext::new("tool")).await;
        assert_eq!(selection.tool_names(), vec!["c_tool", "a_tool", "b_tool"]);
    }

    #[tokio::test]
    async fn test_usage_history_shifts_scores() {
        let selector = ContextSelector::new();
        let tools = vec![
            tool("gmail", "Send email", "Communication", 50),
            tool("outlook", "Send email", "Communication", 50),
        ];
        for _ in 0..5 {
            selector.record_usage("gmail", false).await;
            selector.record_usage("outlook", true).await;
        }

        let selection = selector.select(&tools, &ToolContext::new("send email")).await;
        assert_eq!(selection.tool_names()[0], "outlook");
        assert!(selection.scores["outlook"] > selection.scores["gmail"]);

        let stats = selector.stats().await;
        assert_eq!(stats.tracked_tools, 2);
        assert_eq!(stats.total_uses, 10);
    }

    #[tokio::test]
    async fn test_learned_patterns_bias_similar_contexts() {
        let selector = ContextSelector::new();
        let tools = vec![
            tool("alpha", "Invoice helper", "Utility", 50),
            tool("beta", "Invoice helper", "Utility", 50),
        ];
        let learned = ToolContext::new("weekly invoice report");
        selector.learn_pattern(&learned, &["beta".to_string()]).await;
        selector.learn_pattern(&learned, &["beta".to_string()]).await;
        assert_eq!(selector.stats().await.learned_patterns, 1);

        let similar = ToolContext::new("weekly invoice summary");
        let selection = selector.select(&tools, &similar).await;
        assert_eq!(selection.tool_names()[0], "beta");

        let unrelated = ToolContext::new("resize invoice images");
        let selection = selector.select(&tools, &unrelated).await;
        assert_eq!(selection.tool_names()[0], "alpha");
    }

    #[tokio::test]
    async fn test_previous_tools_bonus() {
        let selector = ContextSelector::new();
        let tools = vec![tool("a", "", "x", 50), tool("b", "", "x", 50)];
        let context = ToolContext::new("").with_previous_tools(vec!["b".to_string()]);
        let selection = selector.select(&tools, &context).await;
        assert_eq!(selection.tool_names(), vec!["b"]);
    }
}

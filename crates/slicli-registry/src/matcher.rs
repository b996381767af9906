//! Rule-based content→plugin matching

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::registry::PluginRegistry;
use slicli_types::PluginType;

/// One match rule attached to a plugin. Unset fields match anything; a rule
/// fires iff every set field matches the corresponding input attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRule {
    pub id: String,
    pub priority: i32,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub file_ext: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Regular expression matched against the content
    #[serde(default)]
    pub pattern: Option<String>,
}

struct CompiledRule {
    rule: MatchRule,
    /// None when the rule has no pattern, or the pattern failed to compile
    regex: Option<Regex>,
    pattern_invalid: bool,
}

impl CompiledRule {
    fn matches(&self, content: &str, language: &str, metadata: &HashMap<String, String>) -> bool {
        if let Some(lang) = &self.rule.language {
            if lang != language {
                return false;
            }
        }
        if let Some(ext) = &self.rule.file_ext {
            match metadata.get("file_ext") {
                Some(value) if value.ends_with(ext.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(content_type) = &self.rule.content_type {
            if metadata.get("content_type") != Some(content_type) {
                return false;
            }
        }
        if self.rule.pattern.is_some() {
            // An uncompilable pattern never matches; it is not fatal
            match &self.regex {
                Some(regex) if regex.is_match(content) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Default)]
struct MatcherState {
    rules: HashMap<String, Vec<CompiledRule>>,
    /// Plugin order of first rule insertion, for deterministic tie-breaks
    order: Vec<String>,
}

/// Evaluates per-plugin rules against an input and returns plugin names
/// sorted by the highest priority among each plugin's matching rules.
#[derive(Default)]
pub struct ContentMatcher {
    state: RwLock<MatcherState>,
}

impl ContentMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_rule(&self, plugin: impl Into<String>, rule: MatchRule) {
        let plugin = plugin.into();
        let (regex, pattern_invalid) = match &rule.pattern {
            Some(pattern) => match Regex::new(pattern) {
                Ok(regex) => (Some(regex), false),
                Err(e) => {
                    warn!(
                        plugin = %plugin,
                        rule = %rule.id,
                        error = %e,
                        "Match rule pattern failed to compile; rule will never fire"
                    );
                    (None, true)
                }
            },
            None => (None, false),
        };

        let mut state = self.state.write().await;
        if !state.rules.contains_key(&plugin) {
            state.order.push(plugin.clone());
        }
        state.rules.entry(plugin).or_default().push(CompiledRule {
            rule,
            regex,
            pattern_invalid,
        });
    }

    pub async fn remove_rule(&self, plugin: &str, rule_id: &str) {
        let mut state = self.state.write().await;
        if let Some(rules) = state.rules.get_mut(plugin) {
            rules.retain(|compiled| compiled.rule.id != rule_id);
            if rules.is_empty() {
                state.rules.remove(plugin);
                state.order.retain(|name| name != plugin);
            }
        }
    }

    /// Match an input against every plugin's rules. Returns plugin names,
    /// highest priority first, ties broken by rule insertion order; each
    /// plugin appears at most once.
    pub async fn match_content(
        &self,
        content: &str,
        language: &str,
        metadata: &HashMap<String, String>,
    ) -> Vec<String> {
        let state = self.state.read().await;
        let mut matched: Vec<(usize, i32, String)> = Vec::new();

        for (position, plugin) in state.order.iter().enumerate() {
            let Some(rules) = state.rules.get(plugin) else {
                continue;
            };
            let best = rules
                .iter()
                .filter(|compiled| !compiled.pattern_invalid)
                .filter(|compiled| compiled.matches(content, language, metadata))
                .map(|compiled| compiled.rule.priority)
                .max();
            if let Some(priority) = best {
                matched.push((position, priority, plugin.clone()));
            }
        }

        matched.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        matched.into_iter().map(|(_, _, name)| name).collect()
    }
}

/// Matcher wired to a registry: restricts matches by plugin type and falls
/// back to all processor plugins when no rule fires.
pub struct ConfigurableMatcher {
    matcher: ContentMatcher,
    registry: Arc<PluginRegistry>,
}

impl ConfigurableMatcher {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            matcher: ContentMatcher::new(),
            registry,
        }
    }

    pub fn rules(&self) -> &ContentMatcher {
        &self.matcher
    }

    /// Rule-based match with processor fallback: when no rule fires, every
    /// registered processor plugin is returned in registration order.
    pub async fn match_content(
        &self,
        content: &str,
        language: &str,
        metadata: &HashMap<String, String>,
    ) -> Vec<String> {
        let matched = self.matcher.match_content(content, language, metadata).await;
        if !matched.is_empty() {
            return matched;
        }
        self.registry
            .get_by_type(PluginType::Processor)
            .await
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Rule-based match restricted to plugins of one type. No fallback.
    pub async fn match_by_type(&self, content: &str, plugin_type: PluginType) -> Vec<String> {
        let matched = self
            .matcher
            .match_content(content, "", &HashMap::new())
            .await;
        let mut result = Vec::with_capacity(matched.len());
        for name in matched {
            if let Ok(metadata) = self.registry.get_metadata(&name).await {
                if metadata.plugin_type == plugin_type {
                    result.push(name);
                }
            }
        }
        result
    }
}

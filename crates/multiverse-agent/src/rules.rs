//! Naming rules sent by the collector on `connect`.
//!
//! A rule rewrites a transaction or metric name with a regular expression.
//! Rules run in ascending `eval_order`; a matching rule with
//! `terminate_chain` stops evaluation, and a matching `ignore` rule drops the
//! name entirely.

use crate::error::{AgentError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

/// Wire form of a naming rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSpec {
    /// Pattern to match.
    pub match_expression: String,
    /// Replacement; `\1`-style back-references are accepted.
    pub replacement: String,
    /// Drop the name when the rule matches.
    pub ignore: bool,
    /// Evaluation position; lower runs first.
    pub eval_order: i64,
    /// Stop evaluating further rules after this one matches.
    pub terminate_chain: bool,
    /// Replace every match instead of only the first.
    pub replace_all: bool,
    /// Apply the rule to each `/`-separated segment separately.
    pub each_segment: bool,
}

impl Default for RuleSpec {
    fn default() -> Self {
        Self {
            match_expression: String::new(),
            replacement: String::new(),
            ignore: false,
            eval_order: 0,
            terminate_chain: true,
            replace_all: false,
            each_segment: false,
        }
    }
}

/// Result of applying one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule did not match.
    NoMatch,
    /// The name was rewritten.
    Renamed(String),
    /// The name must be dropped.
    Ignored,
}

/// A compiled naming rule.
#[derive(Debug, Clone)]
pub struct NamingRule {
    spec: RuleSpec,
    regex: Regex,
    replacement: String,
}

impl NamingRule {
    /// Compiles a rule. Matching is case-insensitive.
    pub fn new(spec: RuleSpec) -> Result<Self> {
        let regex = Regex::new(&format!("(?i){}", spec.match_expression)).map_err(|source| {
            AgentError::InvalidRule {
                pattern: spec.match_expression.clone(),
                source,
            }
        })?;
        let replacement = convert_backrefs(&spec.replacement);
        Ok(Self {
            spec,
            regex,
            replacement,
        })
    }

    /// Wire form of this rule.
    #[must_use]
    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    /// Applies the rule to `name`.
    #[must_use]
    pub fn apply(&self, name: &str) -> RuleOutcome {
        if self.spec.each_segment {
            return self.apply_segments(name);
        }
        if !self.regex.is_match(name) {
            return RuleOutcome::NoMatch;
        }
        if self.spec.ignore {
            return RuleOutcome::Ignored;
        }
        RuleOutcome::Renamed(self.replace(name))
    }

    fn apply_segments(&self, name: &str) -> RuleOutcome {
        let mut matched = false;
        let segments: Vec<String> = name
            .split('/')
            .map(|segment| {
                if self.regex.is_match(segment) {
                    matched = true;
                    self.replace(segment)
                } else {
                    segment.to_string()
                }
            })
            .collect();

        match (matched, self.spec.ignore) {
            (false, _) => RuleOutcome::NoMatch,
            (true, true) => RuleOutcome::Ignored,
            (true, false) => RuleOutcome::Renamed(segments.join("/")),
        }
    }

    fn replace(&self, input: &str) -> String {
        if self.spec.replace_all {
            self.regex
                .replace_all(input, self.replacement.as_str())
                .into_owned()
        } else {
            self.regex
                .replace(input, self.replacement.as_str())
                .into_owned()
        }
    }
}

/// Rewrites `\N` back-references into `${N}`.
fn convert_backrefs(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek().is_some_and(char::is_ascii_digit) => {
                out.push_str("${");
                while let Some(digit) = chars.next_if(char::is_ascii_digit) {
                    out.push(digit);
                }
                out.push('}');
            }
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out
}

/// Ordered, shared collection of naming rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: RwLock<Vec<NamingRule>>,
}

impl RuleSet {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and appends rules, keeping the set sorted by `eval_order`.
    ///
    /// Nothing is appended if any rule fails to compile.
    pub fn append(&self, specs: impl IntoIterator<Item = RuleSpec>) -> Result<()> {
        let compiled = specs
            .into_iter()
            .map(NamingRule::new)
            .collect::<Result<Vec<_>>>()?;

        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.extend(compiled);
        rules.sort_by_key(|rule| rule.spec.eval_order);
        Ok(())
    }

    /// Removes every rule.
    pub fn clear(&self) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `name` through the rule chain.
    ///
    /// Returns `None` if a matching rule says to ignore the name.
    #[must_use]
    pub fn rename(&self, name: &str) -> Option<String> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut current = name.to_string();
        for rule in rules.iter() {
            match rule.apply(&current) {
                RuleOutcome::NoMatch => {}
                RuleOutcome::Ignored => return None,
                RuleOutcome::Renamed(renamed) => {
                    current = renamed;
                    if rule.spec.terminate_chain {
                        break;
                    }
                }
            }
        }
        Some(current)
    }
}

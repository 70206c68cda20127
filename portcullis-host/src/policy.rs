//! Symbol-resolution access policy
//!
//! Decides, at class-load time, whether a fully-qualified symbol referenced
//! by untrusted extension code may be resolved at all. The policy is a pure
//! evaluator over four immutable name-pattern sets:
//!
//! | Tier | Set | Effect |
//! |------|-----|--------|
//! | 1 | always-blacklist | deny, cannot be overridden by anything |
//! | 2 | exact-blacklist | deny unless the caller holds elevated privilege |
//! | 3 | package-blacklist | deny unless whitelisted or elevated |
//! | 4 | whitelist | allow |
//! | 5 | (default) | deny unless elevated |
//!
//! # Matching semantics
//!
//! Tiers 1, 3 and 4 use *substring* matching ("name contains pattern"),
//! deliberately broader than a package-prefix match. This makes the sieve
//! coarse and conservative: `"sun."` also catches shaded or relocated
//! copies of a package. The breadth is preserved for behavioral
//! compatibility and is flagged for review; do not quietly narrow it to
//! prefix matching.
//!
//! The policy holds no mutable state and is safe for unsynchronized
//! concurrent use from multiple load threads.

use std::sync::Arc;

use portcullis_api::AccessDecision;

/// An ordered, deduplicated set of name patterns.
///
/// Construction preserves first-seen order and drops duplicates; the set is
/// immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct NamePatternSet {
    patterns: Vec<String>,
}

impl NamePatternSet {
    /// Build a set from pattern strings, deduplicating while preserving order.
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for pattern in patterns {
            let pattern = pattern.into();
            if !out.contains(&pattern) {
                out.push(pattern);
            }
        }
        Self { patterns: out }
    }

    /// First pattern that occurs as a substring of `name`, if any.
    pub fn find_substring(&self, name: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| name.contains(pattern.as_str()))
            .map(String::as_str)
    }

    /// Whether `name` is exactly equal to one of the patterns.
    pub fn contains_exact(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern == name)
    }

    /// Number of patterns in the set.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Iterate the patterns in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(String::as_str)
    }
}

/// An ordered, deduplicated set of `owner#method` call patterns.
///
/// Used by the bytecode guard to refuse specific calls even when the owning
/// class is otherwise permitted.
#[derive(Debug, Clone, Default)]
pub struct MethodPatternSet {
    patterns: Vec<String>,
}

impl MethodPatternSet {
    /// Build a set from `owner#method` strings, deduplicating while
    /// preserving order.
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for pattern in patterns {
            let pattern = pattern.into();
            if !out.contains(&pattern) {
                out.push(pattern);
            }
        }
        Self { patterns: out }
    }

    /// Whether the exact `owner#method` identifier is blacklisted.
    pub fn contains(&self, identifier: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern == identifier)
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Immutable rule configuration for the whole trust boundary.
///
/// Built once at process start from static configuration and shared by
/// reference into the policy and the bytecode guard; there is no hidden
/// process-wide mutable state.
#[derive(Debug, Default)]
pub struct RuleSet {
    whitelist: NamePatternSet,
    package_blacklist: NamePatternSet,
    exact_blacklist: NamePatternSet,
    always_blacklist: NamePatternSet,
    method_blacklist: MethodPatternSet,
}

impl RuleSet {
    /// Start building a rule set.
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    /// The whitelist (tier 4; also overrides tier 3).
    pub fn whitelist(&self) -> &NamePatternSet {
        &self.whitelist
    }

    /// The package blacklist (tier 3).
    pub fn package_blacklist(&self) -> &NamePatternSet {
        &self.package_blacklist
    }

    /// The exact-match blacklist (tier 2).
    pub fn exact_blacklist(&self) -> &NamePatternSet {
        &self.exact_blacklist
    }

    /// The always-blacklist (tier 1, overrides everything).
    pub fn always_blacklist(&self) -> &NamePatternSet {
        &self.always_blacklist
    }

    /// The `owner#method` call blacklist used by the bytecode guard.
    pub fn method_blacklist(&self) -> &MethodPatternSet {
        &self.method_blacklist
    }
}

/// Builder for [`RuleSet`]; the built set is sealed.
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    whitelist: Vec<String>,
    package_blacklist: Vec<String>,
    exact_blacklist: Vec<String>,
    always_blacklist: Vec<String>,
    method_blacklist: Vec<String>,
}

impl RuleSetBuilder {
    /// Add whitelist patterns.
    pub fn allow(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.whitelist.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Add package-blacklist patterns.
    pub fn deny_package(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.package_blacklist
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Add exact-match blacklist entries.
    pub fn deny_exact(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exact_blacklist
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Add always-blacklist patterns. These cannot be overridden.
    pub fn deny_always(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.always_blacklist
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Add `owner#method` call patterns for the bytecode guard.
    pub fn deny_call(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.method_blacklist
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Seal the rule set.
    pub fn build(self) -> Arc<RuleSet> {
        Arc::new(RuleSet {
            whitelist: NamePatternSet::new(self.whitelist),
            package_blacklist: NamePatternSet::new(self.package_blacklist),
            exact_blacklist: NamePatternSet::new(self.exact_blacklist),
            always_blacklist: NamePatternSet::new(self.always_blacklist),
            method_blacklist: MethodPatternSet::new(self.method_blacklist),
        })
    }
}

/// Pure symbol-resolution evaluator over a shared [`RuleSet`].
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    rules: Arc<RuleSet>,
}

impl AccessPolicy {
    /// Create a policy over a sealed rule set.
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// The rule set this policy evaluates.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Decide whether `symbol` may be resolved.
    ///
    /// `elevated` is a caller-held capability that bypasses tiers 2, 3 and
    /// the default deny, but never the always-blacklist.
    pub fn decide(&self, symbol: &str, elevated: bool) -> AccessDecision {
        // Tier 1: unconditional deny, even with elevated privilege.
        if let Some(pattern) = self.rules.always_blacklist.find_substring(symbol) {
            return AccessDecision::denied(format!(
                "'{symbol}' matches always-blacklist entry '{pattern}'"
            ));
        }

        // Tier 2: exact deny unless elevated.
        if self.rules.exact_blacklist.contains_exact(symbol) {
            if elevated {
                return AccessDecision::Allowed;
            }
            return AccessDecision::denied(format!("'{symbol}' is blacklisted by exact match"));
        }

        // Tier 3: package deny; whitelist overrides this tier only.
        if let Some(pattern) = self.rules.package_blacklist.find_substring(symbol) {
            if elevated || self.rules.whitelist.find_substring(symbol).is_some() {
                return AccessDecision::Allowed;
            }
            return AccessDecision::denied(format!(
                "'{symbol}' matches package-blacklist entry '{pattern}'"
            ));
        }

        // Tier 4: whitelist allow.
        if self.rules.whitelist.find_substring(symbol).is_some() {
            return AccessDecision::Allowed;
        }

        // Tier 5: default deny.
        if elevated {
            return AccessDecision::Allowed;
        }
        AccessDecision::denied(format!("'{symbol}' matches no whitelist entry (default deny)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rules() -> Arc<RuleSet> {
        RuleSet::builder()
            .allow(["acme.filters.", "acme.util."])
            .deny_package(["acme.filters.internal", "host.gui."])
            .deny_exact(["acme.util.Shell"])
            .deny_always(["host.process.", "host.loader."])
            .build()
    }

    #[test]
    fn test_always_blacklist_beats_everything() {
        // Whitelisted and elevated, still denied: tier 1 is absolute.
        let rules = RuleSet::builder()
            .allow(["host.process.Launcher"])
            .deny_always(["host.process."])
            .build();
        let policy = AccessPolicy::new(rules);

        for elevated in [false, true] {
            let decision = policy.decide("host.process.Launcher", elevated);
            assert!(!decision.is_allowed());
            assert!(decision.reason().unwrap().contains("always-blacklist"));
        }
    }

    #[test]
    fn test_exact_blacklist_denies_without_privilege() {
        let policy = AccessPolicy::new(sample_rules());

        let decision = policy.decide("acme.util.Shell", false);
        assert!(!decision.is_allowed());
        assert!(decision.reason().unwrap().contains("exact match"));

        assert!(policy.decide("acme.util.Shell", true).is_allowed());
    }

    #[test]
    fn test_whitelist_overrides_package_blacklist_only() {
        let policy = AccessPolicy::new(sample_rules());

        // Matches both package blacklist and whitelist, no higher tier.
        assert!(policy
            .decide("acme.filters.internal.FastBlur", false)
            .is_allowed());

        // Package-blacklisted without whitelist coverage.
        let decision = policy.decide("host.gui.PanelHandle", false);
        assert!(!decision.is_allowed());
        assert!(decision.reason().unwrap().contains("package-blacklist"));

        // Elevated privilege also clears tier 3.
        assert!(policy.decide("host.gui.PanelHandle", true).is_allowed());
    }

    #[test]
    fn test_whitelist_allows() {
        let policy = AccessPolicy::new(sample_rules());
        assert!(policy.decide("acme.filters.Blur", false).is_allowed());
    }

    #[test]
    fn test_default_deny() {
        let policy = AccessPolicy::new(sample_rules());

        let decision = policy.decide("com.example.Unknown", false);
        assert!(!decision.is_allowed());
        assert!(decision.reason().unwrap().contains("default deny"));

        assert!(policy.decide("com.example.Unknown", true).is_allowed());
    }

    #[test]
    fn test_substring_matching_is_intentionally_broad() {
        // A relocated copy of a blacklisted package is still caught because
        // matching is "name contains pattern", not a prefix test.
        let policy = AccessPolicy::new(sample_rules());
        let decision = policy.decide("shaded.host.process.Runtime", false);
        assert!(!decision.is_allowed());
        assert!(decision.reason().unwrap().contains("always-blacklist"));
    }

    #[test]
    fn test_pattern_set_dedup_preserves_order() {
        let set = NamePatternSet::new(["b.", "a.", "b.", "c."]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["b.", "a.", "c."]);
    }

    #[test]
    fn test_decide_is_deterministic() {
        let policy = AccessPolicy::new(sample_rules());
        let first = policy.decide("acme.filters.internal.Blur", false);
        for _ in 0..8 {
            assert_eq!(policy.decide("acme.filters.internal.Blur", false), first);
        }
    }
}

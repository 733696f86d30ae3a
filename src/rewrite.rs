//! Domain suffix rewriting applied before forwarding.

use hickory_proto::rr::{LowerName, Name};
use hickory_proto::ProtoError;
use std::collections::BTreeMap;
use tracing::trace;

use crate::records::fqdn;

/// Replace one domain suffix with another.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    from: LowerName,
    to: Name,
}

impl RewriteRule {
    /// Build a rule from its source and replacement suffixes.
    pub fn new(from: &str, to: &str) -> Result<Self, ProtoError> {
        Ok(Self {
            from: LowerName::from(fqdn(from)?),
            to: fqdn(to)?,
        })
    }

    /// True if `name` equals the source suffix or is a subdomain of it.
    pub fn matches(&self, name: &LowerName) -> bool {
        self.from.zone_of(name)
    }

    /// Swap the source suffix of `name` for the replacement.
    ///
    /// `name` must satisfy [`RewriteRule::matches`].
    pub fn apply(&self, name: &Name) -> Result<Name, ProtoError> {
        let keep = name.num_labels().saturating_sub(self.from.num_labels()) as usize;
        if keep == 0 {
            return Ok(self.to.clone());
        }

        let prefix = Name::from_labels(name.iter().take(keep))?;
        prefix.append_name(&self.to)
    }

    /// Source suffix.
    pub fn from(&self) -> &LowerName {
        &self.from
    }

    /// Replacement suffix.
    pub fn to(&self) -> &Name {
        &self.to
    }
}

/// Ordered set of rewrite rules.
///
/// When several source suffixes contain a name, the longest (most labels)
/// wins; equally long suffixes cannot both contain the same name.
#[derive(Debug, Clone, Default)]
pub struct RewriteMatcher {
    rules: Vec<RewriteRule>,
}

impl RewriteMatcher {
    /// Build a matcher from `source suffix -> replacement suffix` pairs.
    pub fn new(rewrites: &BTreeMap<String, String>) -> Result<Self, ProtoError> {
        let mut rules = rewrites
            .iter()
            .map(|(from, to)| RewriteRule::new(from, to))
            .collect::<Result<Vec<_>, _>>()?;

        rules.sort_by(|a, b| b.from.num_labels().cmp(&a.from.num_labels()));

        Ok(Self { rules })
    }

    /// Rule that applies to `name`, if any.
    pub fn find(&self, name: &LowerName) -> Option<&RewriteRule> {
        let rule = self.rules.iter().find(|rule| rule.matches(name));
        if let Some(rule) = rule {
            trace!(name = %name, from = %rule.from, to = %rule.to, "rewrite rule matched");
        }
        rule
    }

    /// Rewrite `name` with the matching rule; `None` when no rule applies.
    pub fn rewrite(&self, name: &Name) -> Option<Result<Name, ProtoError>> {
        let lower = LowerName::from(name.clone());
        self.find(&lower).map(|rule| rule.apply(name))
    }

    /// Number of configured rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// crates/rule-arbiter-core/src/core/rule_info.rs
// ============================================================================
// Module: Rule Arbiter Rule Info
// Description: Descriptors of rules and knowledge items exposed by containers.
// Purpose: Support registry introspection without touching the rule engine.
// Dependencies: serde, crate::core::identifiers
// ============================================================================

//! ## Overview
//! Containers describe the rules they carry as [`RuleInfo`] records. The
//! service concatenates these across containers for introspection and can
//! narrow them to the sessions bound to one request kind.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::SessionId;

// ============================================================================
// SECTION: Rule Info
// ============================================================================

/// Category of a knowledge item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleInfoKind {
    /// Production rule.
    Rule,
    /// Query over working memory.
    Query,
    /// Function callable from rules.
    Function,
    /// Declared fact type.
    Fact,
    /// Declared global.
    Global,
}

/// Description of one knowledge item inside a container session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    /// Package or namespace.
    pub package: String,
    /// Item name, unique within the package.
    pub id: String,
    /// Item category.
    pub kind: RuleInfoKind,
    /// Source reference, when known.
    pub source: Option<String>,
    /// Session the item belongs to.
    pub session: SessionId,
    /// Free-form metadata.
    pub attributes: BTreeMap<String, String>,
}

impl RuleInfo {
    /// Creates a rule info record with no source or attributes.
    #[must_use]
    pub fn new(
        package: impl Into<String>,
        id: impl Into<String>,
        kind: RuleInfoKind,
        session: SessionId,
    ) -> Self {
        Self {
            package: package.into(),
            id: id.into(),
            kind,
            source: None,
            session,
            attributes: BTreeMap::new(),
        }
    }

    /// Returns the `package.id` qualified name.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        if self.package.is_empty() {
            self.id.clone()
        } else {
            format!("{}.{}", self.package, self.id)
        }
    }
}

//! Rich diagnostic error types for the reasoning core.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives, providing error codes, help text, and source chains so that rule
//! authors know exactly what went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the reasoning core.
///
/// Each variant wraps a subsystem-specific error, preserving the full
/// diagnostic chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum LogicError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Stratification(#[from] StratificationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("internal invariant violated: {message}")]
    #[diagnostic(
        code(maat::internal::illegal_state),
        help(
            "This indicates a bug in upstream pattern validation rather than \
             a problem with your rules or data. Please file a bug report with \
             the rule and query that triggered it."
        )
    )]
    Internal { message: String },
}

impl LogicError {
    /// An internal invariant violation (upstream validation bug).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule definition errors
// ---------------------------------------------------------------------------

/// Errors raised at rule definition/validation time, before the rule
/// becomes visible.
#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("the condition of rule '{rule}' can never be satisfied")]
    #[diagnostic(
        code(maat::rule::when_incoherent),
        help(
            "Type inference found no consistent type assignment for any \
             branch of the rule's condition. Check that the types and roles \
             it mentions exist and are compatible."
        )
    )]
    WhenIncoherent { rule: String },

    #[error("the conclusion of rule '{rule}' can never be satisfied")]
    #[diagnostic(
        code(maat::rule::then_incoherent),
        help(
            "Type inference found no consistent type assignment for the \
             rule's conclusion. Check that the concluded type exists and \
             that its roles/ownerships are declared in the schema."
        )
    )]
    ThenIncoherent { rule: String },

    #[error("rule '{rule}' concludes an instance of abstract type '{type_label}'")]
    #[diagnostic(
        code(maat::rule::then_inserts_abstract),
        help(
            "Abstract types cannot be instantiated, by a rule or otherwise. \
             Conclude a concrete subtype instead, or make the type concrete."
        )
    )]
    ThenInsertsAbstractTypes { rule: String, type_label: String },

    #[error("rule '{rule}' may infer type combinations its conclusion cannot legally insert")]
    #[diagnostic(
        code(maat::rule::conclusion_illegal_insert),
        help(
            "Every type assignment the condition can produce for variables \
             shared with the conclusion must also be insertable by the \
             conclusion. Narrow the condition with 'isa' constraints, or \
             widen the schema definitions the conclusion relies on."
        )
    )]
    ConclusionIllegalInsert { rule: String },

    #[error("rule '{rule}' assigns a value incompatible with attribute type '{attribute_type}'")]
    #[diagnostic(
        code(maat::rule::then_illegal_value),
        help(
            "The concluded value's kind must match the attribute type's \
             declared value type (longs may widen to doubles)."
        )
    )]
    ThenIllegalValueType {
        rule: String,
        attribute_type: String,
    },
}

// ---------------------------------------------------------------------------
// Stratification errors
// ---------------------------------------------------------------------------

/// Errors raised by whole-rule-set validation at schema-commit time.
#[derive(Debug, Error, Diagnostic)]
pub enum StratificationError {
    #[error("the rule set contains a cycle through negation: {}", cycle.join(" -> "))]
    #[diagnostic(
        code(maat::stratification::contradictory_cycle),
        help(
            "A rule whose condition negates a pattern must not be able to \
             trigger itself through that negation, directly or transitively; \
             the semantics of such a rule set are ill-defined. Break the \
             cycle by removing one of the listed rules' negations or by \
             narrowing what they conclude."
        )
    )]
    ContradictoryRuleCycle { cycle: Vec<String> },
}

// ---------------------------------------------------------------------------
// Rule store errors
// ---------------------------------------------------------------------------

/// Errors from the persisted rule-structure store.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("no rule named '{label}' exists")]
    #[diagnostic(
        code(maat::store::rule_not_found),
        help("Check the rule label; defined rules can be listed via LogicManager::rules().")
    )]
    RuleNotFound { label: String },

    #[error("a rule named '{label}' already exists")]
    #[diagnostic(
        code(maat::store::rule_exists),
        help("Rule labels are unique. Delete the existing rule first or pick another label.")
    )]
    RuleExists { label: String },

    #[error("rule structure serialization error: {message}")]
    #[diagnostic(
        code(maat::store::serialization),
        help(
            "The persisted rule structure could not be read or written. This \
             usually means the stored format changed between versions; \
             re-define the affected rules."
        )
    )]
    Serialization { message: String },
}

/// Convenience alias for functions returning reasoning-core results.
pub type LogicResult<T> = std::result::Result<T, LogicError>;

//! # maat
//!
//! The reasoning core of a typed graph database: rules are unified against
//! query fragments, satisfied conditions are materialized into deduplicated
//! inferred facts, and the rule set as a whole is validated for coherence
//! and stratifiability.
//!
//! ## Architecture
//!
//! - **Patterns** (`pattern`): constraint trees, DNF normalization, and the
//!   type annotations produced by the external type-inference pass
//! - **Concludables** (`concludable`): canonical query fragments a rule
//!   conclusion might satisfy, plus compiled `Resolvable` partitions
//! - **Rules** (`rule`): validated condition/conclusion pairs with eager
//!   definition-time checks
//! - **Unification** (`unify`): variable-set mappings with requirements,
//!   including the injective role-player matching for relations
//! - **Materialization** (`materialise`): reuse-or-insert of inferred
//!   relations and ownerships
//! - **Management** (`manager`, `cache`): the transaction-facing facade and
//!   its bounded TTL caches
//!
//! The storage engine, traversal engine, type inference, and parsing live
//! outside this crate, behind the traits in `schema`.
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use maat::manager::LogicManager;
//! use maat::schema::{RuleStore, RuleStructure, SchemaTypes, TypeAnnotator};
//!
//! fn open(
//!     schema: Arc<dyn SchemaTypes>,
//!     annotator: Arc<dyn TypeAnnotator>,
//!     store: Arc<dyn RuleStore>,
//!     structure: RuleStructure,
//! ) -> maat::error::LogicResult<()> {
//!     let manager = LogicManager::new(schema, annotator, store);
//!     let rule = manager.put_rule(structure)?;
//!     println!("defined {}", rule.label());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod common;
pub mod concludable;
pub mod error;
pub mod manager;
pub mod materialise;
pub mod pattern;
pub mod rule;
pub mod schema;
pub mod unify;

pub use cache::{CacheConfig, LogicCache};
pub use common::{Concept, ConceptMap, Label, Predicate, ThingId, Value, ValueType, Var};
pub use concludable::{Concludable, Resolvable};
pub use error::{LogicError, LogicResult};
pub use manager::LogicManager;
pub use materialise::{Materialisation, Materialiser};
pub use rule::{Conclusion, Rule};
pub use unify::{Requirements, Unifier};

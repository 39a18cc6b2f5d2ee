//! The `LogicManager`: the transaction-facing facade over rules,
//! applicability, compilation, and rule-set validation.
//!
//! One manager lives per transaction scope, sharing the `LogicCache` it was
//! built with. All reasoning state it serves is derived from the rule store
//! and the schema; nothing here persists beyond what `RuleStore` holds.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{CacheConfig, LogicCache};
use crate::common::Label;
use crate::concludable::{Concludable, Resolvable};
use crate::error::{LogicResult, StoreError, StratificationError};
use crate::pattern::{Conjunction, TypeAnnotations};
use crate::rule::Rule;
use crate::schema::{RuleStore, RuleStructure, SchemaTypes, TypeAnnotator};
use crate::unify::Unifier;

pub struct LogicManager {
    schema: Arc<dyn SchemaTypes>,
    annotator: Arc<dyn TypeAnnotator>,
    store: Arc<dyn RuleStore>,
    cache: LogicCache,
}

impl LogicManager {
    pub fn new(
        schema: Arc<dyn SchemaTypes>,
        annotator: Arc<dyn TypeAnnotator>,
        store: Arc<dyn RuleStore>,
    ) -> Self {
        Self::with_cache_config(schema, annotator, store, CacheConfig::default())
    }

    pub fn with_cache_config(
        schema: Arc<dyn SchemaTypes>,
        annotator: Arc<dyn TypeAnnotator>,
        store: Arc<dyn RuleStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            schema,
            annotator,
            store,
            cache: LogicCache::new(config),
        }
    }

    pub fn schema(&self) -> &dyn SchemaTypes {
        self.schema.as_ref()
    }

    // -----------------------------------------------------------------------
    // Rule lifecycle
    // -----------------------------------------------------------------------

    /// Define a new rule: validate it, persist its structure, and index its
    /// concluded types. Rule labels are unique.
    pub fn put_rule(&self, structure: RuleStructure) -> LogicResult<Arc<Rule>> {
        if self.store.get(&structure.label)?.is_some() {
            return Err(StoreError::RuleExists {
                label: structure.label,
            }
            .into());
        }
        let rule = Arc::new(Rule::new(structure.clone(), self.schema.as_ref(), self)?);
        // The indices must never reference an unpersisted rule.
        self.store.put(&structure)?;
        rule.index(self.store.as_ref());
        self.cache.rules().insert(structure.label, rule.clone());
        // A new rule can make previously retrievable fragments concludable.
        self.cache.applicability().clear();
        self.cache.resolvables().clear();
        Ok(rule)
    }

    pub fn rule(&self, label: &str) -> LogicResult<Arc<Rule>> {
        if let Some(rule) = self.cache.rules().get(&label.to_string()) {
            return Ok(rule);
        }
        let structure = self
            .store
            .get(label)?
            .ok_or_else(|| StoreError::RuleNotFound {
                label: label.to_string(),
            })?;
        let rule = Arc::new(Rule::load(structure, self.schema.as_ref(), self)?);
        self.cache.rules().insert(label.to_string(), rule.clone());
        Ok(rule)
    }

    pub fn rules(&self) -> LogicResult<Vec<Arc<Rule>>> {
        self.store
            .all()
            .into_iter()
            .map(|structure| self.rule(&structure.label))
            .collect()
    }

    /// Rules whose conclusion can produce an instance of the given type.
    pub fn rules_concluding(&self, type_label: &Label) -> LogicResult<Vec<Arc<Rule>>> {
        self.store
            .rules_concluding_type(type_label)
            .iter()
            .map(|label| self.rule(label))
            .collect()
    }

    /// Rules whose conclusion can produce an ownership of the given
    /// attribute type.
    pub fn rules_concluding_has(&self, attribute_type: &Label) -> LogicResult<Vec<Arc<Rule>>> {
        self.store
            .rules_concluding_has(attribute_type)
            .iter()
            .map(|label| self.rule(label))
            .collect()
    }

    pub fn delete_rule(&self, label: &str) -> LogicResult<()> {
        let rule = self.rule(label)?;
        rule.unindex(self.store.as_ref());
        self.store.delete(label)?;
        self.cache.rules().invalidate(&label.to_string());
        self.cache.applicability().clear();
        self.cache.resolvables().clear();
        info!(rule = label, "rule deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Type inference wrappers
    // -----------------------------------------------------------------------

    /// Cached type annotation of a conjunction.
    pub fn annotate(&self, conjunction: &Conjunction) -> LogicResult<TypeAnnotations> {
        if let Some(annotations) = self.cache.annotations().get(conjunction) {
            return Ok(annotations);
        }
        let annotations = self.annotator.annotate(conjunction)?;
        self.cache
            .annotations()
            .insert(conjunction.clone(), annotations.clone());
        Ok(annotations)
    }

    /// Cached coherence check: whether any consistent type assignment
    /// exists for the conjunction.
    pub fn coherent(&self, conjunction: &Conjunction) -> LogicResult<bool> {
        if let Some(coherent) = self.cache.coherence().get(conjunction) {
            return Ok(coherent);
        }
        let coherent = self.annotate(conjunction)?.satisfiable();
        self.cache
            .coherence()
            .insert(conjunction.clone(), coherent);
        Ok(coherent)
    }

    // -----------------------------------------------------------------------
    // Applicability and compilation
    // -----------------------------------------------------------------------

    /// Every rule whose conclusion unifies with the concludable, with the
    /// full set of unifiers per rule. Cached per concludable.
    pub fn applicable_rules(
        &self,
        concludable: &Concludable,
    ) -> LogicResult<HashMap<Arc<Rule>, HashSet<Unifier>>> {
        if let Some(cached) = self.cache.applicability().get(concludable) {
            return self.resolve_labels(&cached);
        }
        let mut computed: HashMap<String, HashSet<Unifier>> = HashMap::new();
        for rule in self.candidate_rules(concludable)? {
            let unifiers = Unifier::unify(concludable, &rule, self.schema.as_ref());
            if !unifiers.is_empty() {
                computed.insert(rule.label().to_string(), unifiers);
            }
        }
        let computed = Arc::new(computed);
        self.cache
            .applicability()
            .insert(concludable.clone(), computed.clone());
        self.resolve_labels(&computed)
    }

    fn resolve_labels(
        &self,
        by_label: &HashMap<String, HashSet<Unifier>>,
    ) -> LogicResult<HashMap<Arc<Rule>, HashSet<Unifier>>> {
        by_label
            .iter()
            .map(|(label, unifiers)| Ok((self.rule(label)?, unifiers.clone())))
            .collect()
    }

    /// Candidate rules for unification, narrowed through the concluding-type
    /// indices when the concludable spells out a type.
    fn candidate_rules(&self, concludable: &Concludable) -> LogicResult<Vec<Arc<Rule>>> {
        let written = match concludable {
            Concludable::Isa(isa) => isa.isa.label.as_ref().map(|label| (label, false)),
            Concludable::Relation(rel) => rel
                .isa
                .as_ref()
                .and_then(|isa| isa.label.as_ref())
                .map(|label| (label, false)),
            Concludable::Has(has) => has.attribute_type.as_ref().map(|label| (label, true)),
            Concludable::Value(_) => None,
        };
        let Some((label, has_index)) = written else {
            return self.rules();
        };
        let mut labels = BTreeSet::new();
        for subtype in self.schema.subtype_labels(label) {
            let indexed = if has_index {
                self.store.rules_concluding_has(&subtype)
            } else {
                self.store.rules_concluding_type(&subtype)
            };
            labels.extend(indexed);
        }
        labels.iter().map(|label| self.rule(label)).collect()
    }

    /// Partition a conjunction into resolvables: concludables some rule can
    /// answer, one retrievable for everything no rule touches, and the
    /// negated sub-disjunctions. Cached per conjunction.
    pub fn compile(&self, conjunction: &Conjunction) -> LogicResult<Arc<Vec<Resolvable>>> {
        if let Some(cached) = self.cache.resolvables().get(conjunction) {
            return Ok(cached);
        }
        let mut resolvables = Vec::new();
        let mut retrievable = Vec::new();
        for (concludable, sources) in Concludable::extract_with_sources(conjunction) {
            if self.applicable_rules(&concludable)?.is_empty() {
                retrievable.extend(sources);
            } else {
                resolvables.push(Resolvable::Concludable(concludable));
            }
        }
        if !retrievable.is_empty() {
            resolvables.push(Resolvable::Retrievable(retrievable));
        }
        for negation in &conjunction.negations {
            resolvables.push(Resolvable::Negated(negation.clone()));
        }
        let resolvables = Arc::new(resolvables);
        // First publisher wins; later computations for the same key are
        // discarded.
        Ok(self
            .cache
            .resolvables()
            .get_or_insert_with(conjunction.clone(), || resolvables))
    }

    // -----------------------------------------------------------------------
    // Rule-set validation
    // -----------------------------------------------------------------------

    /// After a schema change: drop every cache, re-validate and re-index
    /// all stored rules, then check the rule set is stratifiable.
    pub fn revalidate_and_reindex_rules(&self) -> LogicResult<()> {
        self.cache.clear();
        let mut rules = Vec::new();
        for structure in self.store.all() {
            let label = structure.label.clone();
            let rule = Arc::new(Rule::load(structure, self.schema.as_ref(), self)?);
            rule.validate(self.schema.as_ref())?;
            // Entries from the previous schema epoch may index types the
            // rule no longer concludes; rebuild from scratch per rule.
            self.store.unindex_rule(&label);
            rule.index(self.store.as_ref());
            self.cache.rules().insert(label, rule.clone());
            rules.push(rule);
        }
        info!(rules = rules.len(), "rule set revalidated and reindexed");
        self.validate_stratifiable(&rules)
    }

    /// A rule must not be able to trigger itself through one of its own
    /// negations, directly or transitively.
    pub fn validate_stratifiable(&self, rules: &[Arc<Rule>]) -> LogicResult<()> {
        for rule in rules {
            for successor in self.negated_successors(rule)? {
                if let Some(path) = self.path_back_to(successor, rule)? {
                    let mut cycle = vec![rule.label().to_string()];
                    cycle.extend(path);
                    debug!(?cycle, "contradictory rule cycle found");
                    return Err(StratificationError::ContradictoryRuleCycle { cycle }.into());
                }
            }
        }
        Ok(())
    }

    /// Rules applicable to a concludable inside one of the rule's
    /// negations.
    fn negated_successors(&self, rule: &Rule) -> LogicResult<HashSet<Arc<Rule>>> {
        let mut successors = HashSet::new();
        for branch in rule.condition().live_branches() {
            for negation in branch.negations() {
                for negated_branch in &negation.branches {
                    for concludable in Concludable::extract(negated_branch) {
                        successors.extend(self.applicable_rules(&concludable)?.into_keys());
                    }
                }
            }
        }
        Ok(successors)
    }

    /// Rules applicable anywhere in the rule's condition, positive or
    /// negated.
    fn successors(&self, rule: &Rule) -> LogicResult<HashSet<Arc<Rule>>> {
        let mut successors = self.negated_successors(rule)?;
        for branch in rule.condition().live_branches() {
            for concludable in branch.concludables() {
                successors.extend(self.applicable_rules(&concludable)?.into_keys());
            }
        }
        Ok(successors)
    }

    /// Breadth-first search from `from` back to `target` over triggering
    /// edges, returning the rule labels along the path (inclusive).
    fn path_back_to(&self, from: Arc<Rule>, target: &Rule) -> LogicResult<Option<Vec<String>>> {
        let mut predecessors: HashMap<String, Option<String>> = HashMap::new();
        predecessors.insert(from.label().to_string(), None);
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current.label() == target.label() {
                let mut path = Vec::new();
                let mut cursor = Some(current.label().to_string());
                while let Some(label) = cursor {
                    cursor = predecessors.get(&label).cloned().flatten();
                    path.push(label);
                }
                path.reverse();
                return Ok(Some(path));
            }
            for next in self.successors(&current)? {
                if !predecessors.contains_key(next.label()) {
                    predecessors.insert(
                        next.label().to_string(),
                        Some(current.label().to_string()),
                    );
                    queue.push_back(next);
                }
            }
        }
        Ok(None)
    }
}

/// The manager fronts the external type-inference pass with its annotation
/// cache, so rule construction and query compilation share results.
impl TypeAnnotator for LogicManager {
    fn annotate(&self, conjunction: &Conjunction) -> LogicResult<TypeAnnotations> {
        LogicManager::annotate(self, conjunction)
    }
}

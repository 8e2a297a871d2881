//! The concept mapping table.
//!
//! [`MappingTable`] holds the standardized metric catalog and its concept
//! mapping rules, validated and frozen at construction. The system refuses
//! to start on a malformed rule or a circular derived-metric dependency;
//! nothing is re-validated per filing.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use normalize_core::{ConceptMapping, NormalizeError, Result, StandardizedMetric};

use crate::formula::Formula;
use crate::seed;

/// Immutable registry of standardized metrics and their mapping rules.
#[derive(Debug)]
pub struct MappingTable {
    metrics: BTreeMap<String, StandardizedMetric>,
    rules: HashMap<String, Vec<ConceptMapping>>,
    formulas: HashMap<String, Formula>,
    derived_order: Vec<String>,
}

impl MappingTable {
    /// Builds and validates a mapping table.
    ///
    /// # Errors
    /// Fails fast on: a mapping targeting an unknown metric, a confidence
    /// outside [0, 1], two rules with identical (metric, priority, industry),
    /// a calculation rule that does not parse or references an unknown
    /// metric, or a circular derived-metric dependency.
    pub fn new(
        metrics: Vec<StandardizedMetric>,
        mappings: Vec<ConceptMapping>,
    ) -> Result<Self> {
        let mut metric_map = BTreeMap::new();
        for metric in metrics {
            if metric_map
                .insert(metric.metric_id.clone(), metric)
                .is_some()
            {
                return Err(NormalizeError::Config(
                    "duplicate metric definition".to_string(),
                ));
            }
        }

        let mut rules: HashMap<String, Vec<ConceptMapping>> = HashMap::new();
        let mut seen = HashSet::new();
        for mapping in mappings {
            if !metric_map.contains_key(&mapping.metric_id) {
                return Err(NormalizeError::UnknownMetric(mapping.metric_id));
            }
            if !(0.0..=1.0).contains(&mapping.confidence_score) {
                return Err(NormalizeError::Config(format!(
                    "mapping {} -> {} has confidence {} outside [0, 1]",
                    mapping.metric_id, mapping.concept_name, mapping.confidence_score
                )));
            }
            let key = (
                mapping.metric_id.clone(),
                mapping.priority,
                mapping.applies_to_industry.clone(),
            );
            if !seen.insert(key) {
                return Err(NormalizeError::Config(format!(
                    "duplicate mapping for metric '{}' at priority {} (industry {:?})",
                    mapping.metric_id, mapping.priority, mapping.applies_to_industry
                )));
            }
            rules
                .entry(mapping.metric_id.clone())
                .or_default()
                .push(mapping);
        }

        // Within a metric, lower priority first; at equal priority an
        // industry-specific rule sorts before a universal one.
        for metric_rules in rules.values_mut() {
            metric_rules.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.applies_to_industry.is_none().cmp(&b.applies_to_industry.is_none()))
                    .then(a.concept_name.cmp(&b.concept_name))
            });
        }

        let mut formulas = HashMap::new();
        for metric in metric_map.values() {
            if let Some(rule) = &metric.calculation_rule {
                let formula = Formula::parse(rule)?;
                for input in formula.inputs() {
                    if !metric_map.contains_key(input) {
                        return Err(NormalizeError::UnknownMetric(format!(
                            "{input} (referenced by calculation rule of '{}')",
                            metric.metric_id
                        )));
                    }
                }
                formulas.insert(metric.metric_id.clone(), formula);
            }
        }

        let derived_order = topo_sort_derived(&metric_map, &formulas)?;

        debug!(
            metrics = metric_map.len(),
            derived = derived_order.len(),
            "Mapping table validated"
        );

        Ok(Self {
            metrics: metric_map,
            rules,
            formulas,
            derived_order,
        })
    }

    /// The built-in metric and mapping catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(seed::metrics(), seed::mappings())
            .expect("built-in mapping catalog must validate")
    }

    /// Number of standardized metrics.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// Looks up one metric definition.
    #[must_use]
    pub fn metric(&self, metric_id: &str) -> Option<&StandardizedMetric> {
        self.metrics.get(metric_id)
    }

    /// Iterates all metrics in metric-id order.
    pub fn metrics(&self) -> impl Iterator<Item = &StandardizedMetric> {
        self.metrics.values()
    }

    /// Ids of directly-tagged metrics, in metric-id order.
    pub fn direct_metric_ids(&self) -> impl Iterator<Item = &str> {
        self.metrics
            .values()
            .filter(|m| !m.is_derived())
            .map(|m| m.metric_id.as_str())
    }

    /// Ids of derived metrics in dependency order: every metric appears
    /// after all derived metrics its formula reads.
    #[must_use]
    pub fn derived_order(&self) -> &[String] {
        &self.derived_order
    }

    /// The parsed calculation rule for a derived metric.
    #[must_use]
    pub fn formula(&self, metric_id: &str) -> Option<&Formula> {
        self.formulas.get(metric_id)
    }

    /// Returns the mapping rules applicable to a company, best first.
    ///
    /// Rules restricted to an industry the company is not in are dropped;
    /// the rest are ordered by priority, with industry-specific rules
    /// winning ties against universal ones.
    #[must_use]
    pub fn rules_for(&self, metric_id: &str, sic_code: Option<&str>) -> Vec<&ConceptMapping> {
        self.rules
            .get(metric_id)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|r| r.applies_to(sic_code))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Orders derived metrics so dependencies evaluate first, rejecting cycles.
fn topo_sort_derived(
    metrics: &BTreeMap<String, StandardizedMetric>,
    formulas: &HashMap<String, Formula>,
) -> Result<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        id: &str,
        formulas: &HashMap<String, Formula>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let mut path: Vec<&str> = stack.iter().map(String::as_str).collect();
                path.push(id);
                return Err(NormalizeError::CircularReference {
                    metric: id.to_string(),
                    path: path.join(" -> "),
                });
            }
            None => {}
        }
        let Some(formula) = formulas.get(id) else {
            // Directly-tagged metrics terminate the walk.
            marks.insert(id.to_string(), Mark::Done);
            return Ok(());
        };
        marks.insert(id.to_string(), Mark::Visiting);
        stack.push(id.to_string());
        for input in formula.inputs() {
            visit(input, formulas, marks, stack, order)?;
        }
        stack.pop();
        marks.insert(id.to_string(), Mark::Done);
        order.push(id.to_string());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut order = Vec::new();
    let mut stack = Vec::new();
    for id in metrics.keys() {
        visit(id, formulas, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

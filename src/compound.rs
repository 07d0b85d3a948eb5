//! Compound types: collection literals and comprehensions
//!
//! These handlers only run when the context enables the compound node kinds.
//! Every comprehension iteration, nested loops included, counts against one
//! shared total per top-level evaluation. Each `for` clause is one level of
//! evaluation depth. Collections are size-checked while they are built, not
//! only once they are finished.

use crate::ast::{Expression, Generator, Target};
use crate::error::{EvalError, EvalResult};
use crate::evaluator::Evaluator;
use crate::governor;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;

type Emit<'a> = dyn FnMut(&mut Evaluator) -> EvalResult<()> + 'a;

impl Evaluator {
    /// Elements of a list or tuple literal, left to right
    pub(crate) fn eval_sequence(&mut self, elements: &[Expression]) -> EvalResult<Vec<Value>> {
        governor::check_length(elements.len(), &self.ctx.limits)?;
        let mut values = Vec::with_capacity(elements.len());
        let mut size = 0usize;
        for element in elements {
            let value = self.eval_node(element)?;
            size = size.saturating_add(value.element_footprint());
            governor::check_length(size, &self.ctx.limits)?;
            values.push(value);
        }
        Ok(values)
    }

    pub(crate) fn eval_set(&mut self, elements: &[Expression]) -> EvalResult<Value> {
        let mut set = IndexSet::with_capacity(elements.len());
        for value in self.eval_sequence(elements)? {
            value.ensure_hashable()?;
            set.insert(value);
        }
        Ok(Value::Set(set))
    }

    pub(crate) fn eval_map(&mut self, entries: &[(Expression, Expression)]) -> EvalResult<Value> {
        governor::check_length(entries.len(), &self.ctx.limits)?;
        let mut map = IndexMap::with_capacity(entries.len());
        let mut size = 0usize;
        for (key, value) in entries {
            let key = self.eval_node(key)?;
            key.ensure_hashable()?;
            let value = self.eval_node(value)?;
            size = insert_entry(&mut map, key, value, size);
            governor::check_length(size, &self.ctx.limits)?;
        }
        Ok(Value::Map(map))
    }

    /// Collect `element` for every binding produced by `generators`
    pub(crate) fn eval_comprehension(
        &mut self,
        element: &Expression,
        generators: &[Generator],
    ) -> EvalResult<Vec<Value>> {
        if generators.is_empty() {
            return Err(EvalError::Malformed(
                "comprehension without a 'for' clause".to_string(),
            ));
        }

        let mut items = Vec::new();
        let mut size = 0usize;
        let mut emit = |evaluator: &mut Evaluator| -> EvalResult<()> {
            let value = evaluator.eval_node(element)?;
            size = size.saturating_add(value.element_footprint());
            governor::check_length(size, &evaluator.ctx.limits)?;
            items.push(value);
            Ok(())
        };
        self.comprehend(generators, &mut emit)?;
        Ok(items)
    }

    pub(crate) fn eval_dict_comprehension(
        &mut self,
        key: &Expression,
        value: &Expression,
        generators: &[Generator],
    ) -> EvalResult<Value> {
        if generators.is_empty() {
            return Err(EvalError::Malformed(
                "comprehension without a 'for' clause".to_string(),
            ));
        }

        let mut entries = IndexMap::new();
        let mut size = 0usize;
        let mut emit = |evaluator: &mut Evaluator| -> EvalResult<()> {
            let k = evaluator.eval_node(key)?;
            k.ensure_hashable()?;
            let v = evaluator.eval_node(value)?;
            size = insert_entry(&mut entries, k, v, size);
            governor::check_length(size, &evaluator.ctx.limits)
        };
        self.comprehend(generators, &mut emit)?;
        Ok(Value::Map(entries))
    }

    /// Run the first generator and recurse into the rest; `emit` runs once
    /// per binding that passes every filter
    fn comprehend(&mut self, generators: &[Generator], emit: &mut Emit<'_>) -> EvalResult<()> {
        let Some((generator, rest)) = generators.split_first() else {
            return emit(self);
        };

        self.descend(|evaluator| {
            let items = evaluator.eval_node(&generator.iter)?.iter_items()?;
            evaluator.scopes.push(HashMap::new());
            let result = evaluator.comprehend_items(generator, rest, items, emit);
            evaluator.scopes.pop();
            result
        })
    }

    fn comprehend_items(
        &mut self,
        generator: &Generator,
        rest: &[Generator],
        items: Vec<Value>,
        emit: &mut Emit<'_>,
    ) -> EvalResult<()> {
        'items: for item in items {
            self.ctx.counters.comprehension_iterations += 1;
            governor::check_comprehension(
                self.ctx.counters.comprehension_iterations,
                &self.ctx.limits,
            )?;

            if let Some(scope) = self.scopes.last_mut() {
                bind_target(&generator.target, item, scope)?;
            }

            for condition in &generator.conditions {
                if !self.eval_node(condition)?.is_truthy() {
                    continue 'items;
                }
            }

            self.comprehend(rest, emit)?;
        }
        Ok(())
    }
}

/// Insert into a dict under construction and return its updated footprint
fn insert_entry(map: &mut IndexMap<Value, Value>, key: Value, value: Value, size: usize) -> usize {
    let key_weight = key.element_footprint();
    let added = key_weight.saturating_add(value.element_footprint());
    match map.insert(key, value) {
        Some(old) => size
            .saturating_add(added)
            .saturating_sub(key_weight.saturating_add(old.element_footprint())),
        None => size.saturating_add(added),
    }
}

/// Bind a loop target, unpacking nested tuples
fn bind_target(target: &Target, value: Value, scope: &mut HashMap<String, Value>) -> EvalResult<()> {
    match target {
        Target::Name(name) => {
            scope.insert(name.clone(), value);
            Ok(())
        }
        Target::Tuple(targets) => {
            let items = value.iter_items().map_err(|_| {
                EvalError::TypeMismatch(format!(
                    "cannot unpack non-iterable {} object",
                    value.type_name()
                ))
            })?;
            if items.len() != targets.len() {
                let message = if items.len() < targets.len() {
                    format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )
                } else {
                    format!("too many values to unpack (expected {})", targets.len())
                };
                return Err(EvalError::InvalidArgument(message));
            }
            for (target, item) in targets.iter().zip(items) {
                bind_target(target, item, scope)?;
            }
            Ok(())
        }
    }
}

//! Evaluation context
//!
//! Everything an evaluation may reach lives here: names, functions,
//! operators, constants, limits, the attribute policy and the set of enabled
//! node kinds. The context is built once and then consulted at every name,
//! function and attribute reference.

use crate::ast::NodeKind;
use crate::config::{AttributeConfig, EvalConfig, Limits};
use crate::error::{EvalError, EvalResult};
use crate::functions::{FunctionTable, HostFunction};
use crate::operators::OperatorTable;
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Dynamic name lookup; return `EvalError::NameNotDefined` for unknown names
///
/// Receives the referenced name and the context of the running evaluation,
/// so a resolver can consult the constants, limits or counters.
pub type Resolver = Arc<dyn Fn(&str, &EvalContext) -> EvalResult<Value> + Send + Sync>;

/// Extra attribute denial rule; returns `true` to deny
pub type AttributePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Where free names are looked up
#[derive(Clone)]
pub enum Names {
    /// Static table; `WithNames` host functions may mutate it
    Table(HashMap<String, Value>),
    /// Callback consulted for each lookup
    Resolver(Resolver),
}

impl Names {
    /// Look `name` up; a resolver also sees the context it runs in
    pub fn resolve(&self, name: &str, ctx: &EvalContext) -> EvalResult<Value> {
        match self {
            Names::Table(table) => table.get(name).cloned().ok_or_else(|| EvalError::NameNotDefined {
                name: name.to_string(),
            }),
            Names::Resolver(resolver) => resolver(name, ctx),
        }
    }

    /// The static table, if names are not a resolver
    pub fn table(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Names::Table(table) => Some(table),
            Names::Resolver(_) => None,
        }
    }
}

impl Default for Names {
    fn default() -> Self {
        Names::Table(HashMap::new())
    }
}

impl fmt::Debug for Names {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Names::Table(table) => f.debug_tuple("Table").field(table).finish(),
            Names::Resolver(_) => write!(f, "Resolver(..)"),
        }
    }
}

/// Which attribute and method names may be touched
#[derive(Clone)]
pub struct AttributePolicy {
    pub deny_prefixes: Vec<String>,
    pub deny_names: Vec<String>,
    pub index_fallback: bool,
    predicate: Option<AttributePredicate>,
}

impl AttributePolicy {
    pub fn from_config(config: &AttributeConfig) -> Self {
        Self {
            deny_prefixes: config.deny_prefixes.clone(),
            deny_names: config.deny_names.clone(),
            index_fallback: config.index_fallback,
            predicate: None,
        }
    }

    /// Add a custom rule on top of the prefix and name lists
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_index_fallback(mut self, enabled: bool) -> Self {
        self.index_fallback = enabled;
        self
    }

    pub fn is_denied(&self, name: &str) -> bool {
        self.deny_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
            || self.deny_names.iter().any(|denied| denied == name)
            || self.predicate.as_ref().is_some_and(|predicate| predicate(name))
    }
}

impl Default for AttributePolicy {
    fn default() -> Self {
        Self::from_config(&AttributeConfig::default())
    }
}

impl fmt::Debug for AttributePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributePolicy")
            .field("deny_prefixes", &self.deny_prefixes)
            .field("deny_names", &self.deny_names)
            .field("index_fallback", &self.index_fallback)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Per-evaluation counters, reset at the start of every top-level evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub nodes: usize,
    pub comprehension_iterations: usize,
}

impl Counters {
    pub fn reset(&mut self) {
        *self = Counters::default();
    }
}

/// Evaluation context
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub names: Names,
    pub functions: FunctionTable,
    pub operators: OperatorTable,
    /// Looked up before `names`
    pub constants: HashMap<String, Value>,
    pub limits: Limits,
    pub attributes: AttributePolicy,
    pub counters: Counters,
    node_kinds: HashSet<NodeKind>,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self {
            names: Names::default(),
            functions: FunctionTable::defaults(),
            operators: OperatorTable::default(),
            constants: HashMap::new(),
            limits: Limits::default(),
            attributes: AttributePolicy::default(),
            counters: Counters::default(),
            node_kinds: NodeKind::BASIC.iter().copied().collect(),
        }
    }
}

impl EvalContext {
    /// Basic mode: no collection literals or comprehensions
    pub fn new() -> Self {
        Self::default()
    }

    /// Compound mode: collection literals, comprehensions and the
    /// `list`/`tuple`/`dict`/`set` constructors
    pub fn compound() -> Self {
        let mut ctx = Self::default();
        ctx.node_kinds.extend(NodeKind::COMPOUND.iter().copied());
        ctx.functions = FunctionTable::compound();
        ctx
    }

    pub fn from_config(config: &EvalConfig) -> Self {
        let mut ctx = if config.compound_types {
            Self::compound()
        } else {
            Self::new()
        };
        ctx.limits = config.limits.clone();
        ctx.attributes = AttributePolicy::from_config(&config.attributes);
        if config.standard_library {
            ctx.functions = std::mem::take(&mut ctx.functions).with_standard(&ctx.limits);
        }
        ctx
    }

    pub fn with_names(mut self, names: HashMap<String, Value>) -> Self {
        self.names = Names::Table(names);
        self
    }

    /// Add one name to the static table (replacing a resolver)
    pub fn with_name(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Names::Resolver(_) = self.names {
            self.names = Names::default();
        }
        if let Names::Table(table) = &mut self.names {
            table.insert(name.into(), value.into());
        }
        self
    }

    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str, &EvalContext) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.names = Names::Resolver(Arc::new(resolver));
        self
    }

    pub fn with_functions(mut self, functions: FunctionTable) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.functions.register(name, f);
        self
    }

    pub fn with_host_function(mut self, name: impl Into<String>, function: HostFunction) -> Self {
        self.functions.insert(name, function);
        self
    }

    /// Register `len`, `range`, `sum`, `min`, `max`, `abs`, `round` and `bool`
    /// against the current limits
    pub fn with_standard_library(mut self) -> Self {
        self.functions = std::mem::take(&mut self.functions).with_standard(&self.limits);
        self
    }

    pub fn with_constants(mut self, constants: HashMap<String, Value>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }

    pub fn with_operators(mut self, operators: OperatorTable) -> Self {
        self.operators = operators;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_attribute_policy(mut self, policy: AttributePolicy) -> Self {
        self.attributes = policy;
        self
    }

    /// Turn a node kind's handler on
    pub fn enable(mut self, kind: NodeKind) -> Self {
        self.node_kinds.insert(kind);
        self
    }

    /// Turn a node kind's handler off; nodes of that kind then fail with
    /// `FeatureNotAvailable`
    pub fn disable(mut self, kind: NodeKind) -> Self {
        self.node_kinds.remove(&kind);
        self
    }

    pub fn set_enabled(&mut self, kind: NodeKind, enabled: bool) {
        if enabled {
            self.node_kinds.insert(kind);
        } else {
            self.node_kinds.remove(&kind);
        }
    }

    pub fn is_enabled(&self, kind: NodeKind) -> bool {
        self.node_kinds.contains(&kind)
    }
}

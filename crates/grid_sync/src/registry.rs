//! Resolution strategy registry
//!
//! Merge policy is decoupled from conflict detection: strategies are named,
//! pluggable value-merge functions. New domain-specific strategies register
//! here without touching the detector.

use grid_common::{Conflict, GridError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Delimiter used by the built-in `merge_string` strategy
const MERGE_STRING_DELIMITER: &str = " / ";

type StrategyHandler = Box<dyn Fn(&Conflict) -> Result<serde_json::Value> + Send + Sync>;

/// A named function mapping a conflict to a resolved value
pub struct ResolutionStrategy {
    pub id: String,
    pub name: String,
    /// Auto-applicable strategies run after a grace window without user input
    pub auto_apply: bool,
    handler: StrategyHandler,
}

impl ResolutionStrategy {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        auto_apply: bool,
        handler: impl Fn(&Conflict) -> Result<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            auto_apply,
            handler: Box::new(handler),
        }
    }

    /// Run the strategy against a conflict
    pub fn resolve(&self, conflict: &Conflict) -> Result<serde_json::Value> {
        (self.handler)(conflict)
    }
}

impl std::fmt::Debug for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionStrategy")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("auto_apply", &self.auto_apply)
            .finish()
    }
}

/// Strategy metadata, as returned by [`StrategyRegistry::list`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyInfo {
    pub id: String,
    pub name: String,
    pub auto_apply: bool,
}

/// Registry of resolution strategies with a configurable default
pub struct StrategyRegistry {
    strategies: BTreeMap<String, ResolutionStrategy>,
    default_id: String,
}

impl StrategyRegistry {
    /// Registry pre-populated with the built-in strategies;
    /// `last_write_wins` is the initial default.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            strategies: BTreeMap::new(),
            default_id: "last_write_wins".to_string(),
        };

        registry.register(ResolutionStrategy::new(
            "last_write_wins",
            "Last write wins",
            true,
            |conflict| Ok(conflict.remote_value.clone()),
        ));
        registry.register(ResolutionStrategy::new(
            "first_write_wins",
            "First write wins",
            true,
            |conflict| Ok(conflict.local_value.clone()),
        ));
        registry.register(ResolutionStrategy::new(
            "manual",
            "Manual resolution",
            false,
            |conflict| {
                Err(GridError::Validation(format!(
                    "conflict {} requires manual resolution",
                    conflict.id
                )))
            },
        ));
        registry.register(ResolutionStrategy::new(
            "merge_string",
            "Concatenate text",
            false,
            merge_string,
        ));
        registry.register(ResolutionStrategy::new(
            "merge_numeric",
            "Numeric mean",
            false,
            merge_numeric,
        ));

        registry
    }

    /// Register (or replace) a strategy
    pub fn register(&mut self, strategy: ResolutionStrategy) {
        tracing::debug!(strategy = %strategy.id, "registered resolution strategy");
        self.strategies.insert(strategy.id.clone(), strategy);
    }

    /// Remove a strategy. The current default cannot be removed.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        if !self.strategies.contains_key(id) {
            return Err(GridError::UnknownStrategy(id.to_string()));
        }
        if id == self.default_id {
            return Err(GridError::Validation(format!(
                "cannot remove the default strategy '{id}'"
            )));
        }
        self.strategies.remove(id);
        Ok(())
    }

    /// Change the default strategy
    pub fn set_default(&mut self, id: &str) -> Result<()> {
        if !self.strategies.contains_key(id) {
            return Err(GridError::UnknownStrategy(id.to_string()));
        }
        self.default_id = id.to_string();
        Ok(())
    }

    /// Look up a strategy; unknown ids are a hard error
    pub fn get(&self, id: &str) -> Result<&ResolutionStrategy> {
        self.strategies
            .get(id)
            .ok_or_else(|| GridError::UnknownStrategy(id.to_string()))
    }

    pub fn default_strategy(&self) -> &ResolutionStrategy {
        // default_id is kept pointing at a registered strategy by
        // remove()/set_default()
        &self.strategies[&self.default_id]
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    /// Metadata for every registered strategy, ordered by id
    pub fn list(&self) -> Vec<StrategyInfo> {
        self.strategies
            .values()
            .map(|s| StrategyInfo {
                id: s.id.clone(),
                name: s.name.clone(),
                auto_apply: s.auto_apply,
            })
            .collect()
    }

    /// Resolve a conflict with the named strategy
    pub fn resolve_with(&self, id: &str, conflict: &Conflict) -> Result<serde_json::Value> {
        self.get(id)?.resolve(conflict)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn merge_string(conflict: &Conflict) -> Result<serde_json::Value> {
    match (&conflict.local_value, &conflict.remote_value) {
        (serde_json::Value::String(local), serde_json::Value::String(remote)) => Ok(
            serde_json::Value::String(format!("{local}{MERGE_STRING_DELIMITER}{remote}")),
        ),
        _ => Err(GridError::Validation(format!(
            "merge_string needs two text values (conflict {})",
            conflict.id
        ))),
    }
}

fn merge_numeric(conflict: &Conflict) -> Result<serde_json::Value> {
    let (local, remote) = (&conflict.local_value, &conflict.remote_value);

    // Integer inputs with an even sum stay integers
    if let (Some(l), Some(r)) = (local.as_i64(), remote.as_i64()) {
        if (l + r) % 2 == 0 {
            return Ok(serde_json::Value::from((l + r) / 2));
        }
    }

    match (local.as_f64(), remote.as_f64()) {
        (Some(l), Some(r)) => Ok(serde_json::Value::from((l + r) / 2.0)),
        _ => Err(GridError::Validation(format!(
            "merge_numeric needs two numeric values (conflict {})",
            conflict.id
        ))),
    }
}

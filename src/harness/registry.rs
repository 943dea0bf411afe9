//! Read-only operation registry keyed by identifier.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::harness::types::{
    ConfigError, ConfigResult, HarnessError, HarnessResult, Operation,
};

/// Listing entry for `-l`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Operation>,
}

impl OperationRegistry {
    /// Load a YAML (or JSON) file mapping identifiers to operations
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> ConfigResult<Self> {
        let parsed: BTreeMap<String, Operation> = serde_yaml::from_str(raw)?;
        Self::from_operations(parsed)
    }

    pub fn from_operations(operations: BTreeMap<String, Operation>) -> ConfigResult<Self> {
        let mut registry = BTreeMap::new();
        for (id, mut operation) in operations {
            operation.id = id.clone();
            operation.validate()?;
            registry.insert(id, operation);
        }
        Ok(Self {
            operations: registry,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Operation> {
        self.operations.get(id)
    }

    /// Look up an operation; an unknown id is a harness fault
    pub fn require(&self, id: &str) -> HarnessResult<&Operation> {
        self.get(id)
            .ok_or_else(|| HarnessError::UnknownOperation(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn listing(&self) -> Vec<OperationSummary> {
        self.operations
            .values()
            .map(|op| OperationSummary {
                id: op.id.clone(),
                name: op.name.clone(),
                descr: op.description(),
                depends: op.depends.clone(),
                endpoints: op.endpoints.clone(),
            })
            .collect()
    }

    /// Transitive prerequisites of `id` in execution order, without `id` itself.
    /// Each prerequisite appears once, after its own prerequisites.
    pub fn prerequisites(&self, id: &str) -> HarnessResult<Vec<&Operation>> {
        let root = self.require(id)?;
        let mut order = Vec::new();
        let mut done = BTreeSet::new();
        let mut visiting = BTreeSet::new();
        visiting.insert(root.id.as_str());
        for dep in &root.depends {
            self.visit(dep, &mut visiting, &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn visit<'r>(
        &'r self,
        id: &str,
        visiting: &mut BTreeSet<&'r str>,
        done: &mut BTreeSet<&'r str>,
        order: &mut Vec<&'r Operation>,
    ) -> HarnessResult<()> {
        let operation = self.require(id)?;
        let key = operation.id.as_str();
        if done.contains(key) {
            return Ok(());
        }
        if !visiting.insert(key) {
            return Err(HarnessError::DependencyCycle(key.to_string()));
        }
        for dep in &operation.depends {
            self.visit(dep, visiting, done, order)?;
        }
        visiting.remove(key);
        done.insert(key);
        order.push(operation);
        Ok(())
    }
}

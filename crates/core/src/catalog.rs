use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Static description of one callable tool. `parameters` is a JSON Schema object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub short_description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        short_description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            short_description: short_description.into(),
            parameters,
        }
    }
}

/// Immutable set of tool definitions, built once at startup and shared read-only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolCatalog {
    specs: Vec<ToolSpec>,
    classifier_descriptions: String,
}

impl ToolCatalog {
    /// Later duplicates of a name are ignored so lookups stay unambiguous.
    pub fn new(specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        let mut seen = BTreeSet::new();
        let specs: Vec<ToolSpec> =
            specs.into_iter().filter(|spec| seen.insert(spec.name.clone())).collect();
        let classifier_descriptions = specs
            .iter()
            .map(|spec| format!("- {}: {}", spec.name, spec.short_description))
            .collect::<Vec<_>>()
            .join("\n");
        Self { specs, classifier_descriptions }
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.specs.iter().map(|spec| spec.name.clone()).collect()
    }

    /// One `- name: short description` line per tool, in catalog order.
    pub fn classifier_descriptions(&self) -> &str {
        &self.classifier_descriptions
    }

    /// Tools bindable this turn. An empty allow-set means no filtering happened.
    pub fn restrict(&self, allowed: &BTreeSet<String>) -> Vec<ToolSpec> {
        if allowed.is_empty() {
            return self.specs.clone();
        }
        self.specs.iter().filter(|spec| allowed.contains(&spec.name)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::{ToolCatalog, ToolSpec};

    fn catalog() -> ToolCatalog {
        ToolCatalog::new([
            ToolSpec::new("calculator", "Basic arithmetic", "arithmetic", json!({"type": "object"})),
            ToolSpec::new("file_operations", "Files", "read and write files", json!({"type": "object"})),
            ToolSpec::new("calculator", "duplicate", "dup", json!({})),
        ])
    }

    #[test]
    fn duplicates_are_dropped_and_descriptions_precomputed() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.classifier_descriptions(),
            "- calculator: arithmetic\n- file_operations: read and write files"
        );
        assert_eq!(catalog.get("calculator").map(|spec| spec.description.as_str()), Some("Basic arithmetic"));
    }

    #[test]
    fn restrict_intersects_with_allow_set() {
        let catalog = catalog();
        let allowed = BTreeSet::from(["file_operations".to_string(), "weather".to_string()]);
        let restricted = catalog.restrict(&allowed);
        assert_eq!(restricted.len(), 1);
        assert_eq!(restricted[0].name, "file_operations");
    }

    #[test]
    fn empty_allow_set_means_full_catalog() {
        assert_eq!(catalog().restrict(&BTreeSet::new()).len(), 2);
    }
}

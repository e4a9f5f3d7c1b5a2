// 🏷️ Category Registry - user-editable income labels
//
// Ordered set of category names. Insertion order is display order.
// The registry only knows names: renaming here does NOT touch stored
// sessions, the Ledger is responsible for cascading a rename.

use serde::{Deserialize, Serialize};

/// Categories a fresh installation starts with
pub const DEFAULT_CATEGORIES: [&str; 5] = [
    "Consulta",
    "Procedimento",
    "Venda de Produtos",
    "Estética",
    "Outros",
];

// ============================================================================
// CATEGORY REGISTRY
// ============================================================================

/// Registry of category names (unique, case-sensitive)
///
/// All operations are total: unknown names are no-ops, never errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryRegistry {
    names: Vec<String>,
}

impl CategoryRegistry {
    /// Create new empty registry
    pub fn new() -> Self {
        CategoryRegistry { names: Vec::new() }
    }

    /// Create registry with the clinic's default categories
    pub fn with_defaults() -> Self {
        let mut registry = CategoryRegistry::new();
        for name in DEFAULT_CATEGORIES {
            registry.add(name);
        }
        registry
    }

    /// Rebuild a registry from a persisted list, dropping duplicates
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = CategoryRegistry::new();
        for name in names {
            registry.add(&name.into());
        }
        registry
    }

    /// Append a category. Returns false if it already exists.
    pub fn add(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    /// Replace `old_name` in place. Returns false if `old_name` is unknown.
    ///
    /// If `new_name` already exists elsewhere the old entry is dropped
    /// instead, so the registry never holds duplicates.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> bool {
        let Some(pos) = self.position(old_name) else {
            return false;
        };

        if old_name == new_name {
            return true;
        }

        if self.contains(new_name) {
            self.names.remove(pos);
        } else {
            self.names[pos] = new_name.to_string();
        }
        true
    }

    /// Remove a category. Historical transactions keep the stale name.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(pos) => {
                self.names.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// All names in display order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_unique(registry: &CategoryRegistry) {
        let unique: HashSet<&String> = registry.names().iter().collect();
        assert_eq!(unique.len(), registry.count(), "registry holds duplicates: {:?}", registry.names());
    }

    #[test]
    fn test_category_registry_initialization() {
        let registry = CategoryRegistry::with_defaults();

        assert_eq!(registry.count(), 5);
        assert_eq!(registry.names()[0], "Consulta");
        assert_eq!(registry.names()[4], "Outros");
    }

    #[test]
    fn test_add_is_noop_for_existing_name() {
        let mut registry = CategoryRegistry::with_defaults();

        assert!(!registry.add("Consulta"));
        assert!(registry.add("consulta"), "match is case-sensitive");
        assert!(registry.add("Exames"));

        assert_eq!(registry.count(), 7);
        assert_eq!(registry.names().last().unwrap(), "Exames");
    }

    #[test]
    fn test_rename_preserves_position() {
        let mut registry = CategoryRegistry::with_defaults();

        assert!(registry.rename("Procedimento", "Cirurgia"));

        assert_eq!(registry.names()[1], "Cirurgia");
        assert!(!registry.contains("Procedimento"));
    }

    #[test]
    fn test_rename_unknown_is_noop() {
        let mut registry = CategoryRegistry::with_defaults();
        let before = registry.clone();

        assert!(!registry.rename("Inexistente", "Outra"));
        assert_eq!(registry, before);
    }

    #[test]
    fn test_rename_onto_existing_name_never_duplicates() {
        let mut registry = CategoryRegistry::with_defaults();

        assert!(registry.rename("Estética", "Consulta"));

        assert_unique(&registry);
        assert_eq!(registry.count(), 4);
        assert!(!registry.contains("Estética"));
    }

    #[test]
    fn test_remove() {
        let mut registry = CategoryRegistry::with_defaults();

        assert!(registry.remove("Outros"));
        assert!(!registry.remove("Outros"));
        assert_eq!(registry.count(), 4);
    }

    #[test]
    fn test_empty_name_is_accepted() {
        let mut registry = CategoryRegistry::new();

        assert!(registry.add(""));
        assert!(registry.rename("", "Consulta"));
        assert_eq!(registry.names(), ["Consulta".to_string()]);
    }

    #[test]
    fn test_mixed_operations_never_duplicate() {
        let mut registry = CategoryRegistry::with_defaults();
        let ops: Vec<(&str, &str, &str)> = vec![
            ("add", "A", ""),
            ("add", "B", ""),
            ("rename", "A", "B"),
            ("add", "A", ""),
            ("rename", "Consulta", "A"),
            ("remove", "B", ""),
            ("rename", "Outros", "Outros"),
            ("add", "Outros", ""),
        ];

        for (op, a, b) in ops {
            match op {
                "add" => {
                    registry.add(a);
                }
                "rename" => {
                    registry.rename(a, b);
                }
                _ => {
                    registry.remove(a);
                }
            }
            assert_unique(&registry);
        }
    }

    #[test]
    fn test_from_names_drops_duplicates() {
        let registry = CategoryRegistry::from_names(vec!["A", "B", "A"]);

        assert_eq!(registry.names(), ["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let registry = CategoryRegistry::from_names(vec!["Consulta", "Exames"]);

        let json = serde_json::to_string(&registry).unwrap();
        assert_eq!(json, r#"["Consulta","Exames"]"#);

        let back: CategoryRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, registry);
    }
}

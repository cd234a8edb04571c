//! Operation Registry - Load operation descriptors from JSON
//!
//! Every resource group of the API is described in its own JSON file,
//! embedded at compile time. Groups are merged into one table when a client
//! is constructed; the table is read-only afterwards.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::OperationDescriptor;
use crate::error::RegistryError;

/// Embedded operation groups (compiled into the binary)
const OPERATION_GROUPS: &[(&str, &str)] = &[
    ("touristic_objects", include_str!("../operations/touristic_objects.json")),
    ("metadata", include_str!("../operations/metadata.json")),
    ("exports", include_str!("../operations/exports.json")),
    ("search", include_str!("../operations/search.json")),
    ("agenda", include_str!("../operations/agenda.json")),
    ("reference", include_str!("../operations/reference.json")),
    ("sso", include_str!("../operations/sso.json")),
    ("user", include_str!("../operations/user.json")),
    ("member", include_str!("../operations/member.json")),
    ("edit", include_str!("../operations/edit.json")),
    ("auth", include_str!("../operations/auth.json")),
];

/// Root structure of operations/*.json
#[derive(Debug, Deserialize)]
struct OperationGroup {
    operations: Vec<OperationDescriptor>,
}

#[derive(Debug)]
struct Entry {
    group: String,
    descriptor: Arc<OperationDescriptor>,
}

/// Name → descriptor table
#[derive(Debug, Default)]
pub struct OperationRegistry {
    entries: HashMap<String, Entry>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every embedded operation group
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (group, content) in OPERATION_GROUPS {
            registry.register_json(group, content)?;
        }
        tracing::debug!(
            "Operation registry loaded: {} operations in {} groups",
            registry.len(),
            OPERATION_GROUPS.len()
        );
        Ok(registry)
    }

    /// Names of the embedded groups
    pub fn builtin_groups() -> impl Iterator<Item = &'static str> {
        OPERATION_GROUPS.iter().map(|(group, _)| *group)
    }

    /// Merge a group of descriptors into the table.
    ///
    /// Nothing is registered when any descriptor is invalid or collides with
    /// an already registered name (or with another one of the same group).
    pub fn register<I>(&mut self, group: &str, descriptors: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = OperationDescriptor>,
    {
        let mut staged: HashMap<String, Entry> = HashMap::new();

        for descriptor in descriptors {
            descriptor.validate()?;

            let existing = self
                .entries
                .get(&descriptor.name)
                .or_else(|| staged.get(&descriptor.name));
            if let Some(existing) = existing {
                return Err(RegistryError::DuplicateOperation {
                    name: descriptor.name.clone(),
                    group: group.to_string(),
                    existing: existing.group.clone(),
                });
            }

            staged.insert(
                descriptor.name.clone(),
                Entry {
                    group: group.to_string(),
                    descriptor: Arc::new(descriptor),
                },
            );
        }

        self.entries.extend(staged);
        Ok(())
    }

    /// Parse a JSON group (`{"operations": [...]}`) and register it
    pub fn register_json(&mut self, group: &str, content: &str) -> Result<(), RegistryError> {
        let parsed: OperationGroup =
            serde_json::from_str(content).map_err(|source| RegistryError::Parse {
                group: group.to_string(),
                source,
            })?;
        self.register(group, parsed.operations)
    }

    /// Get a descriptor by operation name
    pub fn lookup(&self, name: &str) -> Result<Arc<OperationDescriptor>, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| Arc::clone(&entry.descriptor))
            .ok_or_else(|| RegistryError::UnknownOperation(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Group an operation was registered from
    pub fn group_of(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|entry| entry.group.as_str())
    }

    /// All operation names, sorted (for listings and autocomplete)
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

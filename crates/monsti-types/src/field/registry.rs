use super::{FieldConfig, FieldError, FieldType, FieldValue};
use std::collections::BTreeMap;

/// Named field types registered at startup.
///
/// Built-in variants of [`FieldType`] need no registration; named types are
/// aliases of composite shapes (e.g. `core.Categories` as a list of text).
/// The registry is frozen once requests are served.
#[derive(Debug, Clone, Default)]
pub struct FieldTypeRegistry {
    named: BTreeMap<String, FieldType>,
    frozen: bool,
}

impl FieldTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, field_type: FieldType) -> Result<(), FieldError> {
        if self.frozen {
            return Err(FieldError::RegistryFrozen);
        }
        let name = name.into();
        if self.named.contains_key(&name) {
            return Err(FieldError::DuplicateFieldType(name));
        }
        self.named.insert(name, field_type);
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Replace every `Named` reference with its registered definition.
    pub fn resolve(&self, field_type: &FieldType) -> Result<FieldType, FieldError> {
        self.resolve_inner(field_type, &mut Vec::new())
    }

    /// Resolve a type and build its zero value.
    pub fn construct(&self, field_type: &FieldType) -> Result<FieldValue, FieldError> {
        FieldValue::new(&self.resolve(field_type)?)
    }

    /// Resolve the type carried by a field config.
    pub fn resolve_config(&self, config: &FieldConfig) -> Result<FieldConfig, FieldError> {
        let mut resolved = config.clone();
        resolved.field_type = match &config.field_type {
            Some(field_type) => Some(self.resolve(field_type)?),
            None => return Err(FieldError::UnknownFieldType(format!("<untyped {}>", config.id))),
        };
        Ok(resolved)
    }

    fn resolve_inner(&self, field_type: &FieldType, seen: &mut Vec<String>) -> Result<FieldType, FieldError> {
        Ok(match field_type {
            FieldType::Named { name } => {
                if seen.contains(name) {
                    return Err(FieldError::UnknownFieldType(format!("{name} (recursive)")));
                }
                let target = self
                    .named
                    .get(name)
                    .ok_or_else(|| FieldError::UnknownFieldType(name.clone()))?;
                seen.push(name.clone());
                let resolved = self.resolve_inner(target, seen)?;
                seen.pop();
                resolved
            }
            FieldType::List {
                element,
                add_label,
                remove_label,
            } => FieldType::List {
                element: Box::new(self.resolve_inner(element, seen)?),
                add_label: add_label.clone(),
                remove_label: remove_label.clone(),
            },
            FieldType::Map { element } => FieldType::Map {
                element: Box::new(self.resolve_inner(element, seen)?),
            },
            FieldType::Combined { fields } => {
                let mut resolved = BTreeMap::new();
                for (name, config) in fields {
                    let mut config = config.clone();
                    if let Some(inner) = &config.field_type {
                        config.field_type = Some(self.resolve_inner(inner, seen)?);
                    }
                    resolved.insert(name.clone(), config);
                }
                FieldType::Combined { fields: resolved }
            }
            FieldType::DynamicType { variants } => {
                let mut resolved = Vec::with_capacity(variants.len());
                for variant in variants {
                    let mut variant = variant.clone();
                    if let Some(inner) = &variant.field_type {
                        variant.field_type = Some(self.resolve_inner(inner, seen)?);
                    }
                    resolved.push(variant);
                }
                FieldType::DynamicType { variants: resolved }
            }
            scalar => scalar.clone(),
        })
    }
}

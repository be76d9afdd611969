//! Polymorphic field values.
//!
//! `FieldType` describes the shape of a field, `FieldValue` holds a value of
//! that shape. Each variant is its own struct implementing [`Field`];
//! `FieldValue` dispatches to them.

mod composite;
mod registry;
mod scalar;

pub use composite::{CombinedField, DynamicTypeField, ListField, MapField};
pub use registry::FieldTypeRegistry;
pub use scalar::{
    BoolField, DateTimeField, FileField, HtmlField, IntegerField, RefField, TextField,
};

use crate::{form::Form, form::FormData, i18n::LanguageMap};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("could not load field: {0}")]
    FieldLoadFailed(String),
    #[error("unknown field type '{0}'")]
    UnknownFieldType(String),
    #[error("field type '{0}' is already registered")]
    DuplicateFieldType(String),
    #[error("field type registry is frozen")]
    RegistryFrozen,
    #[error("invalid value for {key}: {message}")]
    InvalidInput { key: String, message: String },
}

impl FieldError {
    pub(crate) fn load(msg: impl Into<String>) -> Self {
        FieldError::FieldLoadFailed(msg.into())
    }
}

/// Shape of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Kind", rename_all_fields = "PascalCase")]
pub enum FieldType {
    Text,
    Html,
    Bool,
    Integer,
    DateTime,
    File,
    Ref,
    List {
        element: Box<FieldType>,
        #[serde(default, skip_serializing_if = "LanguageMap::is_empty")]
        add_label: LanguageMap,
        #[serde(default, skip_serializing_if = "LanguageMap::is_empty")]
        remove_label: LanguageMap,
    },
    Map {
        element: Box<FieldType>,
    },
    Combined {
        fields: BTreeMap<String, FieldConfig>,
    },
    DynamicType {
        variants: Vec<FieldConfig>,
    },
    /// A type registered by name in a [`FieldTypeRegistry`].
    Named {
        name: String,
    },
}

impl FieldType {
    pub fn list(element: FieldType) -> Self {
        FieldType::List {
            element: Box::new(element),
            add_label: LanguageMap::default(),
            remove_label: LanguageMap::default(),
        }
    }

    pub fn map(element: FieldType) -> Self {
        FieldType::Map {
            element: Box::new(element),
        }
    }
}

/// Configuration of one field of a node type, a node or the site settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "LanguageMap::is_empty")]
    pub name: LanguageMap,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
}

impl FieldConfig {
    pub fn new(id: impl Into<String>, name: &str, field_type: FieldType) -> Self {
        FieldConfig {
            id: id.into(),
            name: LanguageMap::en(name),
            field_type: Some(field_type),
            ..Default::default()
        }
    }

    /// A config referencing a shared field by id only.
    pub fn shared(id: impl Into<String>) -> Self {
        FieldConfig {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn label(&self, locale: &str) -> String {
        self.name.get_or(locale, &self.id).to_string()
    }

    /// Widget key of this field in edit forms.
    pub fn form_key(&self) -> String {
        format!("Fields.{}", self.id)
    }

    /// Config for a nested element, keyed below this field.
    pub(crate) fn child(&self, suffix: &str, template: Option<&FieldConfig>) -> FieldConfig {
        let mut child = template.cloned().unwrap_or_default();
        child.id = format!("{}.{}", self.id, suffix);
        if child.name.is_empty() {
            child.name = self.name.clone();
        }
        child
    }
}

/// Site-dependent state fields need while initializing.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteContext {
    pub timezone: Tz,
    pub locale: String,
}

impl Default for SiteContext {
    fn default() -> Self {
        SiteContext {
            timezone: Tz::UTC,
            locale: "en".to_string(),
        }
    }
}

impl SiteContext {
    pub fn new(timezone: &str, locale: &str) -> Self {
        SiteContext {
            timezone: timezone.parse().unwrap_or(Tz::UTC),
            locale: locale.to_string(),
        }
    }
}

/// Capabilities every field value provides.
pub trait Field {
    /// Prepare the value for the given site.
    fn init(&mut self, site: &SiteContext);
    /// Raw semantic value.
    fn value(&self) -> Value;
    /// Markup safe to embed into templates.
    fn render_html(&self) -> String;
    /// Serialization form; the inverse of [`Field::load`].
    fn dump(&self) -> Value;
    fn load(&mut self, raw: &Value) -> Result<(), FieldError>;
    /// Add widgets for this field and pre-fill `data` with the current value.
    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str);
    /// Read the widget values of this field back from `data`.
    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError>;
}

/// A field value of any supported type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(TextField),
    Html(HtmlField),
    Bool(BoolField),
    Integer(IntegerField),
    DateTime(DateTimeField),
    File(FileField),
    Ref(RefField),
    List(ListField),
    Map(MapField),
    Combined(CombinedField),
    DynamicType(DynamicTypeField),
}

macro_rules! dispatch {
    ($self:expr, $f:ident => $body:expr) => {
        match $self {
            FieldValue::Text($f) => $body,
            FieldValue::Html($f) => $body,
            FieldValue::Bool($f) => $body,
            FieldValue::Integer($f) => $body,
            FieldValue::DateTime($f) => $body,
            FieldValue::File($f) => $body,
            FieldValue::Ref($f) => $body,
            FieldValue::List($f) => $body,
            FieldValue::Map($f) => $body,
            FieldValue::Combined($f) => $body,
            FieldValue::DynamicType($f) => $body,
        }
    };
}

impl FieldValue {
    /// Zero value of a resolved field type. `Named` types must be resolved
    /// through a [`FieldTypeRegistry`] first.
    pub fn new(field_type: &FieldType) -> Result<Self, FieldError> {
        Ok(match field_type {
            FieldType::Text => FieldValue::Text(TextField::default()),
            FieldType::Html => FieldValue::Html(HtmlField::default()),
            FieldType::Bool => FieldValue::Bool(BoolField::default()),
            FieldType::Integer => FieldValue::Integer(IntegerField::default()),
            FieldType::DateTime => FieldValue::DateTime(DateTimeField::default()),
            FieldType::File => FieldValue::File(FileField::default()),
            FieldType::Ref => FieldValue::Ref(RefField::default()),
            FieldType::List { element, .. } => {
                FieldValue::new(element)?;
                FieldValue::List(ListField::new((**element).clone()))
            }
            FieldType::Map { element } => {
                FieldValue::new(element)?;
                FieldValue::Map(MapField::new((**element).clone()))
            }
            FieldType::Combined { fields } => FieldValue::Combined(CombinedField::new(fields)?),
            FieldType::DynamicType { variants } => {
                FieldValue::DynamicType(DynamicTypeField::new(variants.clone()))
            }
            FieldType::Named { name } => return Err(FieldError::UnknownFieldType(name.clone())),
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(f) => Some(&f.0),
            FieldValue::Html(f) => Some(&f.0),
            FieldValue::Ref(f) => Some(&f.0),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(f) => Some(f.0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(f) => Some(f.0),
            _ => None,
        }
    }

    /// Set a text-like value; ignored for other variants.
    pub fn set_str(&mut self, value: impl Into<String>) {
        match self {
            FieldValue::Text(f) => f.0 = value.into(),
            FieldValue::Html(f) => f.0 = value.into(),
            FieldValue::Ref(f) => f.0 = value.into(),
            _ => {}
        }
    }
}

impl Field for FieldValue {
    fn init(&mut self, site: &SiteContext) {
        dispatch!(self, f => f.init(site))
    }

    fn value(&self) -> Value {
        dispatch!(self, f => f.value())
    }

    fn render_html(&self) -> String {
        dispatch!(self, f => f.render_html())
    }

    fn dump(&self) -> Value {
        dispatch!(self, f => f.dump())
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        dispatch!(self, f => f.load(raw))
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        dispatch!(self, f => f.to_form(form, data, config, locale))
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        dispatch!(self, f => f.from_form(data, config))
    }
}

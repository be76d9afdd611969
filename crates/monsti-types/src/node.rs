//! Node types, their registry, and nodes with their JSON codec.

use crate::{
    field::{Field, FieldConfig, FieldError, FieldTypeRegistry, FieldValue, SiteContext},
    field::FileField,
    i18n::LanguageMap,
    nested, paths,
    time::{self, epoch},
};
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

pub const PATH_TYPE: &str = "core.Path";

static NODE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-\w.]+$").expect("static regex"));

/// Whether `name` may be used as the last segment of a node path.
pub fn is_valid_node_name(name: &str) -> bool {
    NODE_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),
    #[error("field '{field}' of node type '{node_type}' has no type and is not a shared field")]
    IncompleteField { node_type: String, field: String },
    #[error("node type registry is frozen")]
    RegistryFrozen,
    #[error("field error: {0}")]
    Field(#[from] FieldError),
    #[error("node document error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A named reference to another node whose rendering is composed into the
/// embedding node's template context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmbedNode {
    pub id: String,
    #[serde(rename = "URI")]
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeType {
    pub id: String,
    #[serde(default)]
    pub name: LanguageMap,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embed: Vec<EmbedNode>,
    #[serde(default)]
    pub hide: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path_prefix: String,
    /// `None` allows the type anywhere.
    #[serde(default)]
    pub addable_to: Option<Vec<String>>,
}

impl NodeType {
    pub fn local_name(&self, locale: &str) -> String {
        self.name.get_or(locale, &self.id).to_string()
    }

    /// View template name, `ns/Name-view`.
    pub fn template_name(&self) -> String {
        format!("{}-view", self.id.replacen('.', "/", 1))
    }

    /// Whether nodes of this type may be added below a node of `parent_type`.
    pub fn addable_to_type(&self, parent_type: &str) -> bool {
        match &self.addable_to {
            None => true,
            Some(targets) => targets.iter().any(|target| {
                target == "."
                    || target == parent_type
                    || (target.ends_with('.') && parent_type.starts_with(target.as_str()))
            }),
        }
    }

    /// Number of path segments the path prefix adds.
    pub fn prefix_depth(&self) -> usize {
        paths::segments(&self.path_prefix).len()
    }
}

/// Replace `$year`, `$month` and `$day` in a path prefix.
pub fn expand_path_prefix(prefix: &str, at: DateTime<Tz>) -> String {
    prefix
        .replace("$year", &format!("{:04}", at.year()))
        .replace("$month", &format!("{:02}", at.month()))
        .replace("$day", &format!("{:02}", at.day()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyRegistered,
}

/// Registry of node types and of the shared field configurations they
/// reference by id.
#[derive(Debug, Default)]
pub struct NodeTypeRegistry {
    types: BTreeMap<String, Arc<NodeType>>,
    shared_fields: HashMap<String, FieldConfig>,
    field_types: FieldTypeRegistry,
    frozen: bool,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field_types(&self) -> &FieldTypeRegistry {
        &self.field_types
    }

    pub fn field_types_mut(&mut self) -> &mut FieldTypeRegistry {
        &mut self.field_types
    }

    /// Declare a field that node types may reference by id alone.
    pub fn add_shared_field(&mut self, config: FieldConfig) -> Result<(), NodeError> {
        let resolved = self.field_types.resolve_config(&config)?;
        self.shared_fields.insert(resolved.id.clone(), resolved);
        Ok(())
    }

    pub fn shared_field(&self, id: &str) -> Option<&FieldConfig> {
        self.shared_fields.get(id)
    }

    /// Register a node type. Registering an id twice keeps the first
    /// definition.
    pub fn register(&mut self, mut node_type: NodeType) -> Result<RegisterOutcome, NodeError> {
        if self.frozen {
            return Err(NodeError::RegistryFrozen);
        }
        if self.types.contains_key(&node_type.id) {
            return Ok(RegisterOutcome::AlreadyRegistered);
        }
        let mut fields = Vec::with_capacity(node_type.fields.len());
        let mut new_shared = Vec::new();
        for config in &node_type.fields {
            if let Some(shared) = self.shared_fields.get(&config.id) {
                fields.push(shared.clone());
                continue;
            }
            if config.field_type.is_none() {
                return Err(NodeError::IncompleteField {
                    node_type: node_type.id.clone(),
                    field: config.id.clone(),
                });
            }
            let resolved = self.field_types.resolve_config(config)?;
            if let Some(field_type) = &resolved.field_type {
                FieldValue::new(field_type)?;
            }
            new_shared.push(resolved.clone());
            fields.push(resolved);
        }
        for config in new_shared {
            self.shared_fields.insert(config.id.clone(), config);
        }
        node_type.fields = fields;
        self.types.insert(node_type.id.clone(), Arc::new(node_type));
        Ok(RegisterOutcome::Registered)
    }

    pub fn get(&self, id: &str) -> Option<Arc<NodeType>> {
        self.types.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    /// Ids of all types that may be added below a node of type `parent_type`.
    pub fn addable_to(&self, parent_type: &str) -> Vec<String> {
        self.types
            .values()
            .filter(|t| t.addable_to_type(parent_type))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Stop accepting registrations of node and field types.
    pub fn freeze(&mut self) {
        self.frozen = true;
        self.field_types.freeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Decode a node document, resolving its type through this registry.
    pub fn decode_node(&self, raw: &Value, site: &SiteContext) -> Result<Node, NodeError> {
        let type_id = raw
            .get("Type")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::UnknownNodeType(String::new()))?;
        let node_type = self
            .get(type_id)
            .ok_or_else(|| NodeError::UnknownNodeType(type_id.to_string()))?;
        Node::decode_with_type(raw, node_type, &self.field_types, site)
    }
}

/// On-disk and wire form of a node.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeDoc {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    path: String,
    #[serde(rename = "Type")]
    node_type: String,
    #[serde(default)]
    order: i32,
    #[serde(default)]
    hide: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    embed: Vec<EmbedNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    local_fields: Vec<FieldConfig>,
    #[serde(default)]
    public: bool,
    #[serde(default = "epoch", with = "time")]
    publish_time: DateTime<Utc>,
    #[serde(default = "epoch", with = "time")]
    changed: DateTime<Utc>,
    #[serde(default)]
    fields: Option<Value>,
}

/// A typed entity of the site tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub path: String,
    pub node_type: Arc<NodeType>,
    pub order: i32,
    pub hide: bool,
    pub public: bool,
    pub publish_time: DateTime<Utc>,
    pub changed: DateTime<Utc>,
    pub embed: Vec<EmbedNode>,
    pub local_fields: Vec<FieldConfig>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Node {
    /// A node with zero-valued fields.
    pub fn new(
        node_type: Arc<NodeType>,
        path: &str,
        local_fields: Vec<FieldConfig>,
        field_types: &FieldTypeRegistry,
        site: &SiteContext,
    ) -> Result<Self, NodeError> {
        let mut node = Node {
            path: paths::clean_path(path),
            node_type,
            order: 0,
            hide: false,
            public: false,
            publish_time: epoch(),
            changed: epoch(),
            embed: Vec::new(),
            local_fields,
            fields: BTreeMap::new(),
        };
        node.init_fields(field_types, site)?;
        Ok(node)
    }

    fn init_fields(&mut self, field_types: &FieldTypeRegistry, site: &SiteContext) -> Result<(), NodeError> {
        let mut fields = BTreeMap::new();
        let mut resolved_local = Vec::with_capacity(self.local_fields.len());
        for config in &self.local_fields {
            resolved_local.push(field_types.resolve_config(config)?);
        }
        self.local_fields = resolved_local;
        for config in self.node_type.fields.iter().chain(self.local_fields.iter()) {
            let field_type = config
                .field_type
                .as_ref()
                .ok_or_else(|| FieldError::UnknownFieldType(format!("<untyped {}>", config.id)))?;
            let mut value = FieldValue::new(field_type)?;
            value.init(site);
            if let FieldValue::File(file) = &mut value {
                file.blob_id = FileField::blob_name(&config.id);
            }
            fields.insert(config.id.clone(), value);
        }
        self.fields = fields;
        Ok(())
    }

    /// Decode a node document of a known type.
    pub fn decode_with_type(
        raw: &Value,
        node_type: Arc<NodeType>,
        field_types: &FieldTypeRegistry,
        site: &SiteContext,
    ) -> Result<Self, NodeError> {
        let doc: NodeDoc = serde_json::from_value(raw.clone())?;
        if doc.node_type != node_type.id {
            return Err(NodeError::UnknownNodeType(doc.node_type));
        }
        let mut node = Node::new(node_type, &doc.path, doc.local_fields, field_types, site)?;
        node.order = doc.order;
        node.hide = doc.hide;
        node.public = doc.public;
        node.publish_time = doc.publish_time;
        node.changed = doc.changed;
        node.embed = doc.embed;
        let configs: Vec<FieldConfig> = node.field_configs().cloned().collect();
        nested::restore_fields(doc.fields.as_ref(), &configs, &mut node.fields)?;
        Ok(node)
    }

    /// Encode the node, including its `Path`.
    pub fn to_json(&self) -> Result<Value, NodeError> {
        let doc = NodeDoc {
            path: self.path.clone(),
            node_type: self.node_type.id.clone(),
            order: self.order,
            hide: self.hide,
            embed: self.embed.clone(),
            local_fields: self.local_fields.clone(),
            public: self.public,
            publish_time: self.publish_time,
            changed: self.changed,
            fields: Some(Value::Object(nested::dump_fields(
                self.field_configs(),
                &self.fields,
            ))),
        };
        Ok(serde_json::to_value(doc)?)
    }

    /// Field configs in effective order: type fields, then local fields.
    pub fn field_configs(&self) -> impl Iterator<Item = &FieldConfig> {
        self.node_type.fields.iter().chain(self.local_fields.iter())
    }

    pub fn field(&self, id: &str) -> Option<&FieldValue> {
        self.fields.get(id)
    }

    pub fn field_mut(&mut self, id: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(id)
    }

    pub fn type_id(&self) -> &str {
        &self.node_type.id
    }

    /// URL-effective name, the last path segment.
    pub fn name(&self) -> &str {
        paths::base_name(&self.path)
    }

    /// `core.Title`, if set.
    pub fn title(&self) -> Option<&str> {
        self.field("core.Title")
            .and_then(FieldValue::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Whether anonymous viewers may see the node at `now`.
    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        self.public && self.publish_time <= now
    }

    /// Path of the logical parent, skipping the path prefix directories.
    pub fn parent_path(&self) -> String {
        let mut parent = paths::parent_path(&self.path);
        for _ in 0..self.node_type.prefix_depth() {
            parent = paths::parent_path(&parent);
        }
        parent
    }

    /// Expanded path prefix for this node's publish time.
    pub fn path_prefix(&self, timezone: Tz) -> String {
        expand_path_prefix(
            &self.node_type.path_prefix,
            self.publish_time.with_timezone(&timezone),
        )
    }

    /// HTML id derived from the path.
    pub fn path_to_id(&self) -> String {
        format!("node-{}", self.path.replace('/', "__"))
    }

    /// HTML id derived from the type.
    pub fn type_to_id(&self) -> String {
        format!("node-type-{}", self.node_type.id.replacen('.', "-", 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldType;
    use chrono::TimeZone;
    use serde_json::json;

    fn registry() -> NodeTypeRegistry {
        let mut registry = NodeTypeRegistry::new();
        registry
            .add_shared_field(FieldConfig::new("core.Title", "Title", FieldType::Text).required())
            .expect("shared");
        registry
            .register(NodeType {
                id: "core.Document".into(),
                fields: vec![
                    FieldConfig::shared("core.Title"),
                    FieldConfig::new("core.Body", "Body", FieldType::Html),
                    FieldConfig::new("core.File", "File", FieldType::File),
                ],
                ..Default::default()
            })
            .expect("register");
        registry
    }

    #[test]
    fn decode_inverts_encode_modulo_path() {
        let registry = registry();
        let site = SiteContext::default();
        let raw = json!({
            "Path": "/about",
            "Type": "core.Document",
            "Order": 3,
            "Public": true,
            "PublishTime": "2020-01-02T03:04:05Z",
            "Changed": "2020-01-03T03:04:05Z",
            "LocalFields": [{"Id": "local.Extra", "Type": {"Kind": "Integer"}}],
            "Fields": {"core": {"Title": "About", "Body": "<p>x</p>"}, "local": {"Extra": 5}}
        });
        let node = registry.decode_node(&raw, &site).expect("decode");
        assert_eq!(node.path, "/about");
        assert_eq!(node.title(), Some("About"));
        assert_eq!(node.field("local.Extra").and_then(FieldValue::as_i64), Some(5));
        assert_eq!(
            node.publish_time,
            Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).single().expect("time")
        );

        let encoded = node.to_json().expect("encode");
        assert_eq!(encoded["PublishTime"], json!("2020-01-02T03:04:05Z"));
        assert_eq!(encoded["Fields"]["core"]["File"], json!(""));
        let again = registry.decode_node(&encoded, &site).expect("decode again");
        assert_eq!(again, node);
    }

    #[test]
    fn missing_fields_load_as_zero_values() {
        let registry = registry();
        let node = registry
            .decode_node(&json!({"Type": "core.Document"}), &SiteContext::default())
            .expect("decode");
        assert_eq!(node.fields.len(), 3);
        assert_eq!(node.title(), None);
        match node.field("core.File") {
            Some(FieldValue::File(file)) => assert_eq!(file.blob_id, "__file_core.File"),
            other => panic!("unexpected file field: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_reported_with_its_id() {
        let err = registry()
            .decode_node(&json!({"Type": "core.Missing"}), &SiteContext::default())
            .expect_err("unknown");
        assert!(matches!(err, NodeError::UnknownNodeType(id) if id == "core.Missing"));
    }

    #[test]
    fn registration_reuses_shared_fields_and_is_idempotent() {
        let mut registry = registry();
        let outcome = registry
            .register(NodeType {
                id: "example.Foo".into(),
                fields: vec![
                    FieldConfig {
                        id: "core.Title".into(),
                        field_type: Some(FieldType::Bool),
                        ..Default::default()
                    },
                    FieldConfig::shared("core.Body"),
                ],
                ..Default::default()
            })
            .expect("register");
        assert_eq!(outcome, RegisterOutcome::Registered);
        let foo = registry.get("example.Foo").expect("type");
        assert_eq!(foo.fields[0].field_type, Some(FieldType::Text));
        assert!(foo.fields[0].required);
        assert_eq!(foo.fields[1].field_type, Some(FieldType::Html));

        let again = registry
            .register(NodeType {
                id: "example.Foo".into(),
                ..Default::default()
            })
            .expect("register again");
        assert_eq!(again, RegisterOutcome::AlreadyRegistered);
        assert_eq!(registry.get("example.Foo").expect("type").fields.len(), 2);

        let err = registry
            .register(NodeType {
                id: "example.Bar".into(),
                fields: vec![FieldConfig::shared("example.Unknown")],
                ..Default::default()
            })
            .expect_err("incomplete");
        assert!(matches!(err, NodeError::IncompleteField { .. }));
    }

    #[test]
    fn addable_types_follow_matching_rules() {
        let mut registry = NodeTypeRegistry::new();
        let types = [
            ("Foo.A", None),
            ("Foo.B", Some(vec!["Foo.B"])),
            ("Foo.C", Some(vec![])),
            ("Foo.D", Some(vec!["."])),
            ("Foo.E", Some(vec!["Foo."])),
            ("Bar.F", Some(vec!["Bar."])),
        ];
        for (id, addable) in types {
            registry
                .register(NodeType {
                    id: id.into(),
                    addable_to: addable.map(|v| v.into_iter().map(String::from).collect()),
                    ..Default::default()
                })
                .expect("register");
        }
        assert_eq!(
            registry.addable_to("Foo.B"),
            vec!["Foo.A", "Foo.B", "Foo.D", "Foo.E"]
        );
    }

    #[test]
    fn parent_path_skips_prefix_directories() {
        let mut registry = registry();
        registry
            .register(NodeType {
                id: "core.BlogPost".into(),
                path_prefix: "$year/$month".into(),
                ..Default::default()
            })
            .expect("register");
        let mut node = Node::new(
            registry.get("core.BlogPost").expect("type"),
            "/blog/2021/05/hello",
            Vec::new(),
            registry.field_types(),
            &SiteContext::default(),
        )
        .expect("node");
        node.publish_time = Utc.with_ymd_and_hms(2021, 5, 31, 23, 30, 0).single().expect("time");
        assert_eq!(node.parent_path(), "/blog");
        assert_eq!(node.path_prefix(Tz::UTC), "2021/05");
        assert_eq!(node.path_prefix(chrono_tz::Europe::Berlin), "2021/06");
        assert_eq!(node.path_to_id(), "node-__blog__2021__05__hello");
        assert_eq!(node.type_to_id(), "node-type-core-BlogPost");
    }

    #[test]
    fn node_names_are_validated() {
        assert!(is_valid_node_name("about-us_2.html"));
        assert!(!is_valid_node_name(""));
        assert!(!is_valid_node_name("a b"));
        assert!(!is_valid_node_name("a/b"));
    }
}

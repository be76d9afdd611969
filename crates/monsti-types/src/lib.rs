//! Shared data model of the Monsti content management system: field values,
//! node types, nodes and their JSON codec, cache dependencies, site settings,
//! users and the records exchanged with modules.

pub mod cache;
pub mod field;
pub mod form;
pub mod i18n;
pub mod nested;
pub mod paths;
pub mod node;
pub mod request;
pub mod settings;
pub mod signals;
pub mod time;
pub mod user;

pub use cache::{CacheDep, CacheMods};
pub use field::{
    Field, FieldConfig, FieldError, FieldType, FieldTypeRegistry, FieldValue, SiteContext,
};
pub use form::{Form, FormData, FormField, Widget, escape_html};
pub use i18n::LanguageMap;
pub use node::{
    EmbedNode, Node, NodeError, NodeType, NodeTypeRegistry, RegisterOutcome, is_valid_node_name,
};
pub use request::{Action, RequestInfo};
pub use settings::SiteSettings;
pub use user::User;

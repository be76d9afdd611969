//! Node types and shared fields the daemon provides itself.

use monsti_types::{
    FieldConfig, FieldType, LanguageMap, NodeError, NodeType, NodeTypeRegistry, node::PATH_TYPE,
};

pub const TITLE: &str = "core.Title";
pub const BODY: &str = "core.Body";
pub const DESCRIPTION: &str = "core.Description";
pub const THUMBNAIL: &str = "core.Thumbnail";
pub const CATEGORIES: &str = "core.Categories";
pub const FILE: &str = "core.File";

pub const DOCUMENT: &str = "core.Document";
pub const FILE_TYPE: &str = "core.File";
pub const IMAGE: &str = "core.Image";
pub const CONTACT_FORM: &str = "core.ContactForm";
pub const BLOG: &str = "core.Blog";
pub const BLOG_POST: &str = "core.BlogPost";

fn shared_fields() -> Vec<FieldConfig> {
    vec![
        FieldConfig::new(TITLE, "Title", FieldType::Text).required(),
        FieldConfig::new(BODY, "Body", FieldType::Html),
        FieldConfig::new(DESCRIPTION, "Description", FieldType::Text),
        FieldConfig::new(THUMBNAIL, "Thumbnail", FieldType::Ref),
        FieldConfig::new(CATEGORIES, "Categories", FieldType::list(FieldType::Text)),
        FieldConfig::new(FILE, "File", FieldType::File),
    ]
}

fn node_type(id: &str, name: &str, fields: &[&str]) -> NodeType {
    NodeType {
        id: id.to_string(),
        name: LanguageMap::en(name),
        fields: fields.iter().map(|f| FieldConfig::shared(*f)).collect(),
        ..Default::default()
    }
}

fn core_types() -> Vec<NodeType> {
    vec![
        NodeType {
            hide: true,
            addable_to: Some(Vec::new()),
            ..node_type(PATH_TYPE, "Path", &[])
        },
        node_type(DOCUMENT, "Document", &[TITLE, BODY]),
        node_type(FILE_TYPE, "File", &[TITLE, BODY, FILE]),
        node_type(IMAGE, "Image", &[TITLE, FILE]),
        node_type(CONTACT_FORM, "Contact form", &[TITLE, BODY]),
        node_type(BLOG, "Blog", &[TITLE]),
        NodeType {
            hide: true,
            path_prefix: "$year/$month".to_string(),
            addable_to: Some(vec![BLOG.to_string()]),
            ..node_type(BLOG_POST, "Blog post", &[TITLE, BODY])
        },
    ]
}

/// Register the shared fields and core node types.
pub fn register_core_types(registry: &mut NodeTypeRegistry) -> Result<(), NodeError> {
    for field in shared_fields() {
        registry.add_shared_field(field)?;
    }
    for node_type in core_types() {
        registry.register(node_type)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_types_resolve_shared_fields() {
        let mut registry = NodeTypeRegistry::new();
        register_core_types(&mut registry).expect("register");
        let image = registry.get(IMAGE).expect("image");
        assert_eq!(image.fields.len(), 2);
        assert_eq!(image.fields[1].field_type, Some(FieldType::File));
        assert!(image.fields[0].required);

        let addable = registry.addable_to(BLOG);
        assert!(addable.contains(&BLOG_POST.to_string()));
        assert!(addable.contains(&DOCUMENT.to_string()));
        assert!(!addable.contains(&PATH_TYPE.to_string()));
        assert!(!registry.addable_to(DOCUMENT).contains(&BLOG_POST.to_string()));
    }
}

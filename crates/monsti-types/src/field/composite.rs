use super::{Field, FieldConfig, FieldError, FieldType, FieldValue, SiteContext};
use crate::form::{Form, FormData, Widget};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Entry keys submitted below `config` (`Fields.<id>.<key>...`).
fn submitted_keys(data: &FormData, config: &FieldConfig) -> BTreeSet<String> {
    let prefix = format!("{}.", config.form_key());
    data.keys()
        .filter_map(|k| k.strip_prefix(&prefix))
        .filter_map(|rest| rest.split('.').next())
        .map(str::to_string)
        .collect()
}

fn construct(field_type: &FieldType, site: &SiteContext) -> Result<FieldValue, FieldError> {
    let mut value = FieldValue::new(field_type)?;
    value.init(site);
    Ok(value)
}

/// Ordered sequence of values of one element type.
#[derive(Debug, Clone, PartialEq)]
pub struct ListField {
    pub element: FieldType,
    pub items: Vec<FieldValue>,
    site: SiteContext,
}

impl ListField {
    pub fn new(element: FieldType) -> Self {
        ListField {
            element,
            items: Vec::new(),
            site: SiteContext::default(),
        }
    }
}

impl Field for ListField {
    fn init(&mut self, site: &SiteContext) {
        self.site = site.clone();
        for item in &mut self.items {
            item.init(site);
        }
    }

    fn value(&self) -> Value {
        Value::Array(self.items.iter().map(Field::value).collect())
    }

    fn render_html(&self) -> String {
        let mut out = String::from("<ul>");
        for item in &self.items {
            out.push_str("<li>");
            out.push_str(&item.render_html());
            out.push_str("</li>");
        }
        out.push_str("</ul>");
        out
    }

    fn dump(&self) -> Value {
        Value::Array(self.items.iter().map(Field::dump).collect())
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        let empty = Vec::new();
        let entries = match raw {
            Value::Null => &empty,
            Value::Array(entries) => entries,
            other => return Err(FieldError::load(format!("expected list, got {other}"))),
        };
        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut item = construct(&self.element, &self.site)?;
            item.load(entry)?;
            items.push(item);
        }
        self.items = items;
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        for (i, item) in self.items.iter().enumerate() {
            item.to_form(form, data, &config.child(&i.to_string(), None), locale);
        }
        // One empty slot to append an entry.
        if let Ok(empty) = construct(&self.element, &self.site) {
            let slot = config.child(&self.items.len().to_string(), None);
            empty.to_form(form, data, &slot, locale);
            data.remove(&slot.form_key());
        }
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        let mut indices: Vec<usize> = submitted_keys(data, config)
            .iter()
            .filter_map(|k| k.parse().ok())
            .collect();
        indices.sort_unstable();
        let zero = construct(&self.element, &self.site)?;
        let mut items = Vec::with_capacity(indices.len());
        for i in indices {
            let mut item = zero.clone();
            item.from_form(data, &config.child(&i.to_string(), None))?;
            if item != zero {
                items.push(item);
            }
        }
        self.items = items;
        Ok(())
    }
}

/// String-keyed map of values of one element type.
#[derive(Debug, Clone, PartialEq)]
pub struct MapField {
    pub element: FieldType,
    pub entries: BTreeMap<String, FieldValue>,
    site: SiteContext,
}

impl MapField {
    pub fn new(element: FieldType) -> Self {
        MapField {
            element,
            entries: BTreeMap::new(),
            site: SiteContext::default(),
        }
    }
}

impl Field for MapField {
    fn init(&mut self, site: &SiteContext) {
        self.site = site.clone();
        for entry in self.entries.values_mut() {
            entry.init(site);
        }
    }

    fn value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.value()))
                .collect(),
        )
    }

    fn render_html(&self) -> String {
        let mut out = String::from("<dl>");
        for (key, entry) in &self.entries {
            out.push_str(&format!(
                "<dt>{}</dt><dd>{}</dd>",
                crate::form::escape_html(key),
                entry.render_html()
            ));
        }
        out.push_str("</dl>");
        out
    }

    fn dump(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.dump()))
                .collect(),
        )
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        let empty = Map::new();
        let object = match raw {
            Value::Null => &empty,
            Value::Object(object) => object,
            other => return Err(FieldError::load(format!("expected map, got {other}"))),
        };
        let mut entries = BTreeMap::new();
        for (key, raw_entry) in object {
            let mut entry = construct(&self.element, &self.site)?;
            entry.load(raw_entry)?;
            entries.insert(key.clone(), entry);
        }
        self.entries = entries;
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        for (key, entry) in &self.entries {
            entry.to_form(form, data, &config.child(key, None), locale);
        }
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        let mut entries = BTreeMap::new();
        for key in submitted_keys(data, config) {
            let mut entry = match self.entries.get(&key) {
                Some(existing) => existing.clone(),
                None => construct(&self.element, &self.site)?,
            };
            entry.from_form(data, &config.child(&key, None))?;
            entries.insert(key, entry);
        }
        self.entries = entries;
        Ok(())
    }
}

/// Fixed-schema record of named sub-fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedField {
    pub configs: BTreeMap<String, FieldConfig>,
    pub values: BTreeMap<String, FieldValue>,
}

impl CombinedField {
    pub fn new(configs: &BTreeMap<String, FieldConfig>) -> Result<Self, FieldError> {
        let mut values = BTreeMap::new();
        for (name, config) in configs {
            let field_type = config
                .field_type
                .as_ref()
                .ok_or_else(|| FieldError::UnknownFieldType(format!("<untyped {name}>")))?;
            values.insert(name.clone(), FieldValue::new(field_type)?);
        }
        Ok(CombinedField {
            configs: configs.clone(),
            values,
        })
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }
}

impl Field for CombinedField {
    fn init(&mut self, site: &SiteContext) {
        for value in self.values.values_mut() {
            value.init(site);
        }
    }

    fn value(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.value()))
                .collect(),
        )
    }

    fn render_html(&self) -> String {
        self.values
            .values()
            .map(Field::render_html)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn dump(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.dump()))
                .collect(),
        )
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        let object = match raw {
            Value::Null => return Ok(()),
            Value::Object(object) => object,
            other => return Err(FieldError::load(format!("expected record, got {other}"))),
        };
        for (name, value) in &mut self.values {
            if let Some(raw_value) = object.get(name) {
                value.load(raw_value)?;
            }
        }
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        for (name, value) in &self.values {
            let child = config.child(name, self.configs.get(name));
            value.to_form(form, data, &child, locale);
        }
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        for (name, value) in &mut self.values {
            let child = config.child(name, self.configs.get(name));
            value.from_form(data, &child)?;
        }
        Ok(())
    }
}

/// Tagged variant choosing one of a fixed set of field configurations.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicTypeField {
    pub variants: Vec<FieldConfig>,
    pub selected: Option<(String, Box<FieldValue>)>,
    site: SiteContext,
}

impl DynamicTypeField {
    pub fn new(variants: Vec<FieldConfig>) -> Self {
        DynamicTypeField {
            variants,
            selected: None,
            site: SiteContext::default(),
        }
    }

    fn variant(&self, tag: &str) -> Option<&FieldConfig> {
        self.variants.iter().find(|v| v.id == tag)
    }

    fn construct_variant(&self, tag: &str) -> Result<FieldValue, FieldError> {
        let variant = self
            .variant(tag)
            .ok_or_else(|| FieldError::load(format!("unknown dynamic type variant '{tag}'")))?;
        let field_type = variant
            .field_type
            .as_ref()
            .ok_or_else(|| FieldError::UnknownFieldType(format!("<untyped {tag}>")))?;
        construct(field_type, &self.site)
    }

    /// Select a variant, resetting the inner value when the tag changes.
    pub fn select(&mut self, tag: &str) -> Result<&mut FieldValue, FieldError> {
        let keep = matches!(&self.selected, Some((current, _)) if current == tag);
        if !keep {
            let inner = self.construct_variant(tag)?;
            self.selected = Some((tag.to_string(), Box::new(inner)));
        }
        match &mut self.selected {
            Some((_, inner)) => Ok(&mut **inner),
            None => Err(FieldError::load("no variant selected")),
        }
    }
}

impl Field for DynamicTypeField {
    fn init(&mut self, site: &SiteContext) {
        self.site = site.clone();
        if let Some((_, inner)) = &mut self.selected {
            inner.init(site);
        }
    }

    fn value(&self) -> Value {
        match &self.selected {
            Some((tag, inner)) => serde_json::json!({"dynamicType": tag, "field": inner.value()}),
            None => Value::Null,
        }
    }

    fn render_html(&self) -> String {
        self.selected
            .as_ref()
            .map(|(_, inner)| inner.render_html())
            .unwrap_or_default()
    }

    fn dump(&self) -> Value {
        match &self.selected {
            Some((tag, inner)) => serde_json::json!({"dynamicType": tag, "field": inner.dump()}),
            None => Value::Null,
        }
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        let object = match raw {
            Value::Null => {
                self.selected = None;
                return Ok(());
            }
            Value::Object(object) => object,
            other => return Err(FieldError::load(format!("expected dynamic type, got {other}"))),
        };
        let tag = object
            .get("dynamicType")
            .and_then(Value::as_str)
            .ok_or_else(|| FieldError::load("dynamic type without 'dynamicType' tag"))?;
        let mut inner = self.construct_variant(tag)?;
        inner.load(object.get("field").unwrap_or(&Value::Null))?;
        self.selected = Some((tag.to_string(), Box::new(inner)));
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        let options = std::iter::once((String::new(), String::new()))
            .chain(
                self.variants
                    .iter()
                    .map(|v| (v.id.clone(), v.label(locale))),
            )
            .collect();
        let tag_config = config.child("dynamicType", None);
        let widget = form.add(tag_config.form_key(), config.label(locale), Widget::Select(options));
        widget.required = config.required;
        if let Some((tag, inner)) = &self.selected {
            data.insert(tag_config.form_key(), tag.clone());
            let template = self.variant(tag);
            inner.to_form(form, data, &config.child("field", template), locale);
        }
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        let tag_key = config.child("dynamicType", None).form_key();
        let tag = data.get(&tag_key).map(String::as_str).unwrap_or("").to_string();
        if tag.is_empty() {
            self.selected = None;
            return Ok(());
        }
        if self.variant(&tag).is_none() {
            return Err(FieldError::InvalidInput {
                key: tag_key,
                message: format!("Unknown type {tag}."),
            });
        }
        let template = self.variant(&tag).cloned();
        let child = config.child("field", template.as_ref());
        self.select(&tag)?.from_form(data, &child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dynamic() -> DynamicTypeField {
        let mut field = DynamicTypeField::new(vec![
            FieldConfig::new("text", "Text", FieldType::Text),
            FieldConfig::new("number", "Number", FieldType::Integer),
        ]);
        field.init(&SiteContext::default());
        field
    }

    #[test]
    fn dynamic_type_dumps_tag_and_inner_value() {
        let mut field = dynamic();
        field.load(&json!({"dynamicType": "number", "field": 3})).expect("load");
        assert_eq!(field.dump(), json!({"dynamicType": "number", "field": 3}));
        assert_eq!(field.render_html(), "3");
    }

    #[test]
    fn dynamic_type_rejects_unknown_variant() {
        let err = dynamic()
            .load(&json!({"dynamicType": "color", "field": "red"}))
            .expect_err("unknown variant");
        assert!(matches!(err, FieldError::FieldLoadFailed(_)));
    }

    #[test]
    fn list_form_round_trip_drops_empty_slot() {
        let mut list = ListField::new(FieldType::Text);
        list.load(&json!(["one", "two"])).expect("load");
        let config = FieldConfig::new("x.Tags", "Tags", FieldType::list(FieldType::Text));
        let mut form = Form::new();
        let mut data = FormData::new();
        list.to_form(&mut form, &mut data, &config, "en");
        assert_eq!(form.fields.len(), 3);
        data.insert("Fields.x.Tags.1".into(), "zwei".into());

        let mut back = ListField::new(FieldType::Text);
        back.from_form(&data, &config).expect("from form");
        assert_eq!(back.dump(), json!(["one", "zwei"]));
    }

    #[test]
    fn combined_form_uses_child_keys() {
        let configs: BTreeMap<String, FieldConfig> = [
            ("Width".to_string(), FieldConfig::new("", "Width", FieldType::Integer)),
            ("Height".to_string(), FieldConfig::new("", "Height", FieldType::Integer)),
        ]
        .into_iter()
        .collect();
        let mut combined = CombinedField::new(&configs).expect("construct");
        let config = FieldConfig::new("core.Size", "Size", FieldType::Combined { fields: configs });
        let mut data = FormData::new();
        data.insert("Fields.core.Size.Width".into(), "800".into());
        data.insert("Fields.core.Size.Height".into(), "400".into());
        combined.from_form(&data, &config).expect("from form");
        assert_eq!(combined.dump(), json!({"Width": 800, "Height": 400}));
    }
}

//! Site-scoped settings, stored with the same nested field layout as nodes.

use crate::{
    field::{CombinedField, Field, FieldConfig, FieldError, FieldType, FieldValue, SiteContext},
    i18n::LanguageMap,
    nested,
};
use serde_json::Value;
use std::collections::BTreeMap;

pub const SITE_TITLE: &str = "core.SiteTitle";
pub const LOCALE: &str = "core.Locale";
pub const TIMEZONE: &str = "core.Timezone";
pub const BASE_URL: &str = "core.BaseURL";
pub const EMAIL_NAME: &str = "core.EmailName";
pub const EMAIL_ADDRESS: &str = "core.EmailAddress";
pub const OWNER_NAME: &str = "core.OwnerName";
pub const OWNER_EMAIL: &str = "core.OwnerEmail";
pub const SESSION_AUTH_KEY: &str = "core.SessionAuthKey";
pub const PASSWORD_TOKEN_KEY: &str = "core.PasswordTokenKey";
pub const IMAGE_STYLES: &str = "core.ImageStyles";
pub const REGION_BLOCKS: &str = "core.RegionBlocks";

/// Field configurations of the site settings.
pub fn site_field_configs() -> Vec<FieldConfig> {
    let size: BTreeMap<String, FieldConfig> = [
        ("Width".to_string(), FieldConfig::new("", "Width", FieldType::Integer)),
        ("Height".to_string(), FieldConfig::new("", "Height", FieldType::Integer)),
    ]
    .into_iter()
    .collect();
    vec![
        FieldConfig::new(SITE_TITLE, "Site title", FieldType::Text).required(),
        FieldConfig::new(LOCALE, "Locale", FieldType::Text),
        FieldConfig::new(TIMEZONE, "Timezone", FieldType::Text),
        FieldConfig::new(BASE_URL, "Base URL", FieldType::Text),
        FieldConfig::new(EMAIL_NAME, "Email sender name", FieldType::Text),
        FieldConfig::new(EMAIL_ADDRESS, "Email sender address", FieldType::Text),
        FieldConfig::new(OWNER_NAME, "Owner name", FieldType::Text),
        FieldConfig::new(OWNER_EMAIL, "Owner email", FieldType::Text),
        FieldConfig::new(SESSION_AUTH_KEY, "Session key", FieldType::Text).hidden(),
        FieldConfig::new(PASSWORD_TOKEN_KEY, "Password token key", FieldType::Text).hidden(),
        FieldConfig {
            id: IMAGE_STYLES.to_string(),
            name: LanguageMap::en("Image styles"),
            field_type: Some(FieldType::map(FieldType::Combined { fields: size })),
            hidden: true,
            ..Default::default()
        },
        FieldConfig {
            id: REGION_BLOCKS.to_string(),
            name: LanguageMap::en("Region blocks"),
            field_type: Some(FieldType::map(FieldType::list(FieldType::Ref))),
            hidden: true,
            ..Default::default()
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteSettings {
    pub configs: Vec<FieldConfig>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl SiteSettings {
    pub fn new(site: &SiteContext) -> Result<Self, FieldError> {
        let configs = site_field_configs();
        let mut fields = BTreeMap::new();
        for config in &configs {
            if let Some(field_type) = &config.field_type {
                let mut value = FieldValue::new(field_type)?;
                value.init(site);
                fields.insert(config.id.clone(), value);
            }
        }
        Ok(SiteSettings { configs, fields })
    }

    /// Settings from a stored document; absent fields stay at zero.
    pub fn decode(raw: &Value, site: &SiteContext) -> Result<Self, FieldError> {
        let mut settings = Self::new(site)?;
        nested::restore_fields(Some(raw), &settings.configs, &mut settings.fields)?;
        Ok(settings)
    }

    pub fn to_document(&self) -> Value {
        Value::Object(nested::dump_fields(&self.configs, &self.fields))
    }

    pub fn text(&self, id: &str) -> &str {
        self.fields.get(id).and_then(FieldValue::as_str).unwrap_or("")
    }

    pub fn set_text(&mut self, id: &str, value: impl Into<String>) {
        if let Some(field) = self.fields.get_mut(id) {
            field.set_str(value);
        }
    }

    /// Set a text field only if it is still empty.
    pub fn default_text(&mut self, id: &str, value: &str) {
        if self.text(id).is_empty() && !value.is_empty() {
            self.set_text(id, value);
        }
    }

    pub fn title(&self) -> &str {
        self.text(SITE_TITLE)
    }

    pub fn locale(&self) -> &str {
        match self.text(LOCALE) {
            "" => "en",
            locale => locale,
        }
    }

    pub fn timezone(&self) -> &str {
        match self.text(TIMEZONE) {
            "" => "UTC",
            tz => tz,
        }
    }

    pub fn site_context(&self) -> SiteContext {
        SiteContext::new(self.timezone(), self.locale())
    }

    /// Width and height of a named image style.
    pub fn image_style(&self, name: &str) -> Option<(u32, u32)> {
        let FieldValue::Map(styles) = self.fields.get(IMAGE_STYLES)? else {
            return None;
        };
        let FieldValue::Combined(size) = styles.entries.get(name)? else {
            return None;
        };
        let dimension = |key| {
            size.get(key)
                .and_then(FieldValue::as_i64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0)
        };
        Some((dimension("Width"), dimension("Height")))
    }

    pub fn set_image_style(&mut self, name: &str, width: u32, height: u32) -> Result<(), FieldError> {
        let Some(FieldValue::Map(styles)) = self.fields.get_mut(IMAGE_STYLES) else {
            return Ok(());
        };
        let FieldType::Combined { fields } = &styles.element else {
            return Ok(());
        };
        let mut size = CombinedField::new(fields)?;
        size.load(&serde_json::json!({"Width": width, "Height": height}))?;
        styles.entries.insert(name.to_string(), FieldValue::Combined(size));
        Ok(())
    }

    /// Node paths rendered into each master page region.
    pub fn region_blocks(&self) -> BTreeMap<String, Vec<String>> {
        let Some(FieldValue::Map(regions)) = self.fields.get(REGION_BLOCKS) else {
            return BTreeMap::new();
        };
        regions
            .entries
            .iter()
            .map(|(region, blocks)| {
                let paths = match blocks {
                    FieldValue::List(list) => list
                        .items
                        .iter()
                        .filter_map(FieldValue::as_str)
                        .map(str::to_string)
                        .collect(),
                    _ => Vec::new(),
                };
                (region.clone(), paths)
            })
            .collect()
    }
}

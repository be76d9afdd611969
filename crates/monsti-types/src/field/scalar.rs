use super::{Field, FieldConfig, FieldError, SiteContext};
use crate::form::{Form, FormData, Widget, escape_html, is_checked};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

fn load_string(raw: &Value) -> Result<String, FieldError> {
    match raw {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        other => Err(FieldError::load(format!("expected string, got {other}"))),
    }
}

fn add_widget(form: &mut Form, config: &FieldConfig, locale: &str, widget: Widget) {
    let field = form.add(config.form_key(), config.label(locale), widget);
    field.required = config.required;
    field.classes = config.classes.clone();
}

fn submitted<'a>(data: &'a FormData, config: &FieldConfig) -> &'a str {
    data.get(&config.form_key()).map(String::as_str).unwrap_or("")
}

/// Plain text, escaped when rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextField(pub String);

impl Field for TextField {
    fn init(&mut self, _site: &SiteContext) {}

    fn value(&self) -> Value {
        Value::String(self.0.clone())
    }

    fn render_html(&self) -> String {
        escape_html(&self.0)
    }

    fn dump(&self) -> Value {
        Value::String(self.0.clone())
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        self.0 = load_string(raw)?;
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        let widget = if config.hidden { Widget::Hidden } else { Widget::Text };
        add_widget(form, config, locale, widget);
        data.insert(config.form_key(), self.0.clone());
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        self.0 = submitted(data, config).to_string();
        Ok(())
    }
}

/// Raw HTML, rendered verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HtmlField(pub String);

impl Field for HtmlField {
    fn init(&mut self, _site: &SiteContext) {}

    fn value(&self) -> Value {
        Value::String(self.0.clone())
    }

    fn render_html(&self) -> String {
        self.0.clone()
    }

    fn dump(&self) -> Value {
        Value::String(self.0.clone())
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        self.0 = load_string(raw)?;
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        let widget = if config.hidden { Widget::Hidden } else { Widget::HtmlArea };
        add_widget(form, config, locale, widget);
        data.insert(config.form_key(), self.0.clone());
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        self.0 = submitted(data, config).to_string();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolField(pub bool);

impl Field for BoolField {
    fn init(&mut self, _site: &SiteContext) {}

    fn value(&self) -> Value {
        Value::Bool(self.0)
    }

    fn render_html(&self) -> String {
        self.0.to_string()
    }

    fn dump(&self) -> Value {
        Value::Bool(self.0)
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        self.0 = match raw {
            Value::Null => false,
            Value::Bool(b) => *b,
            other => return Err(FieldError::load(format!("expected bool, got {other}"))),
        };
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        add_widget(form, config, locale, Widget::Checkbox);
        if self.0 {
            data.insert(config.form_key(), "on".to_string());
        }
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        self.0 = is_checked(submitted(data, config));
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegerField(pub i64);

impl Field for IntegerField {
    fn init(&mut self, _site: &SiteContext) {}

    fn value(&self) -> Value {
        Value::from(self.0)
    }

    fn render_html(&self) -> String {
        self.0.to_string()
    }

    fn dump(&self) -> Value {
        Value::from(self.0)
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        self.0 = match raw {
            Value::Null => 0,
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| FieldError::load(format!("expected integer, got {n}")))?,
            other => return Err(FieldError::load(format!("expected integer, got {other}"))),
        };
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        add_widget(form, config, locale, Widget::Number);
        data.insert(config.form_key(), self.0.to_string());
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        let raw = submitted(data, config).trim();
        self.0 = if raw.is_empty() {
            0
        } else {
            raw.parse().map_err(|_| FieldError::InvalidInput {
                key: config.form_key(),
                message: "Not a number.".to_string(),
            })?
        };
        Ok(())
    }
}

/// Path reference to another node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefField(pub String);

impl Field for RefField {
    fn init(&mut self, _site: &SiteContext) {}

    fn value(&self) -> Value {
        Value::String(self.0.clone())
    }

    fn render_html(&self) -> String {
        escape_html(&self.0)
    }

    fn dump(&self) -> Value {
        Value::String(self.0.clone())
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        self.0 = load_string(raw)?;
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        add_widget(form, config, locale, Widget::Ref);
        data.insert(config.form_key(), self.0.clone());
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        self.0 = submitted(data, config).trim().to_string();
        Ok(())
    }
}

/// Opaque blob stored next to the node. The value only names the blob;
/// the content is written by the data layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileField {
    pub blob_id: String,
}

impl FileField {
    /// Blob file name used for a top-level file field.
    pub fn blob_name(field_id: &str) -> String {
        format!("__file_{field_id}")
    }
}

impl Field for FileField {
    fn init(&mut self, _site: &SiteContext) {}

    fn value(&self) -> Value {
        Value::String(self.blob_id.clone())
    }

    fn render_html(&self) -> String {
        escape_html(&self.blob_id)
    }

    fn dump(&self) -> Value {
        Value::String(String::new())
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        load_string(raw).map(|_| ())
    }

    fn to_form(&self, form: &mut Form, _data: &mut FormData, config: &FieldConfig, locale: &str) {
        add_widget(form, config, locale, Widget::File);
    }

    fn from_form(&mut self, _data: &FormData, _config: &FieldConfig) -> Result<(), FieldError> {
        Ok(())
    }
}

const FORM_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// UTC instant displayed in the site's timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct DateTimeField {
    pub instant: Option<DateTime<Utc>>,
    pub timezone: Tz,
}

impl Default for DateTimeField {
    fn default() -> Self {
        DateTimeField {
            instant: None,
            timezone: Tz::UTC,
        }
    }
}

impl DateTimeField {
    pub fn local(&self) -> Option<DateTime<Tz>> {
        self.instant.map(|t| t.with_timezone(&self.timezone))
    }
}

impl Field for DateTimeField {
    fn init(&mut self, site: &SiteContext) {
        self.timezone = site.timezone;
    }

    fn value(&self) -> Value {
        self.local()
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null)
    }

    fn render_html(&self) -> String {
        self.local()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default()
    }

    fn dump(&self) -> Value {
        self.instant
            .map(|t| Value::String(crate::time::format(&t)))
            .unwrap_or(Value::Null)
    }

    fn load(&mut self, raw: &Value) -> Result<(), FieldError> {
        self.instant = match load_string(raw)?.as_str() {
            "" => None,
            s => Some(
                crate::time::parse(s)
                    .map_err(|e| FieldError::load(format!("invalid time '{s}': {e}")))?,
            ),
        };
        Ok(())
    }

    fn to_form(&self, form: &mut Form, data: &mut FormData, config: &FieldConfig, locale: &str) {
        add_widget(form, config, locale, Widget::DateTime);
        if let Some(local) = self.local() {
            data.insert(config.form_key(), local.format(FORM_TIME_FORMAT).to_string());
        }
    }

    fn from_form(&mut self, data: &FormData, config: &FieldConfig) -> Result<(), FieldError> {
        let raw = submitted(data, config).trim();
        if raw.is_empty() {
            self.instant = None;
            return Ok(());
        }
        let invalid = || FieldError::InvalidInput {
            key: config.form_key(),
            message: "Invalid date.".to_string(),
        };
        let naive = NaiveDateTime::parse_from_str(raw, FORM_TIME_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .map_err(|_| invalid())?;
        let local = self
            .timezone
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(invalid)?;
        self.instant = Some(local.with_timezone(&Utc));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn date_time_form_uses_site_timezone() {
        let mut field = DateTimeField::default();
        field.init(&SiteContext::new("Europe/Berlin", "en"));
        let config = FieldConfig::new("core.PublishTime", "Publish", super::super::FieldType::DateTime);
        let mut data = FormData::new();
        data.insert(config.form_key(), "2020-07-01T12:00".into());
        field.from_form(&data, &config).expect("parse");
        assert_eq!(field.dump(), json!("2020-07-01T10:00:00Z"));
        assert_eq!(field.render_html(), "2020-07-01 12:00");
    }

    #[test]
    fn integer_form_rejects_garbage() {
        let config = FieldConfig::new("x.N", "N", super::super::FieldType::Integer);
        let mut data = FormData::new();
        data.insert(config.form_key(), "twelve".into());
        let err = IntegerField::default().from_form(&data, &config).expect_err("garbage");
        assert!(matches!(err, FieldError::InvalidInput { .. }));
    }

    #[test]
    fn text_renders_escaped_and_html_raw() {
        assert_eq!(TextField("<i>".into()).render_html(), "&lt;i&gt;");
        assert_eq!(HtmlField("<i>".into()).render_html(), "<i>");
        assert_eq!(FileField { blob_id: "__file_core.File".into() }.dump(), json!(""));
    }
}

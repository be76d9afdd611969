//! Form model shared by field editors and the request pipeline.
//!
//! Fields contribute widgets through `Field::to_form` and read submitted
//! values back from a flat `FormData` map keyed by dotted widget keys
//! (`Fields.core.Title`, `Fields.example.List.0`, ...).

use serde::Serialize;
use std::collections::BTreeMap;

/// Submitted or pre-filled widget values keyed by widget key.
pub type FormData = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "options", rename_all = "snake_case")]
pub enum Widget {
    Text,
    TextArea,
    HtmlArea,
    Password,
    Checkbox,
    Number,
    DateTime,
    File,
    Hidden,
    Ref,
    Select(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub key: String,
    pub label: String,
    pub widget: Widget,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Form {
    pub fields: Vec<FormField>,
    pub errors: BTreeMap<String, Vec<String>>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, label: impl Into<String>, widget: Widget) -> &mut FormField {
        self.fields.push(FormField {
            key: key.into(),
            label: label.into(),
            widget,
            required: false,
            classes: Vec::new(),
        });
        let last = self.fields.len() - 1;
        &mut self.fields[last]
    }

    pub fn field(&self, key: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn add_error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(key.into()).or_default().push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Checks required widgets against submitted values; returns whether the
    /// form is valid.
    pub fn fill(&mut self, data: &FormData) -> bool {
        let missing: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.required && !matches!(f.widget, Widget::Checkbox | Widget::File))
            .filter(|f| data.get(&f.key).is_none_or(|v| v.trim().is_empty()))
            .map(|f| f.key.clone())
            .collect();
        for key in missing {
            self.add_error(key, "Required.");
        }
        !self.has_errors()
    }

    /// Plain HTML rendering used by the built-in templates.
    pub fn render_html(&self, action: &str, data: &FormData, submit: &str) -> String {
        let multipart = self.fields.iter().any(|f| f.widget == Widget::File);
        let mut out = format!(
            "<form method=\"post\" action=\"{}\"{}>\n",
            escape_html(action),
            if multipart { " enctype=\"multipart/form-data\"" } else { "" }
        );
        for field in &self.fields {
            let value = data.get(&field.key).map(String::as_str).unwrap_or("");
            let key = escape_html(&field.key);
            if field.widget == Widget::Hidden {
                out.push_str(&format!(
                    "<input type=\"hidden\" name=\"{key}\" value=\"{}\">\n",
                    escape_html(value)
                ));
                continue;
            }
            out.push_str("<div class=\"form-field");
            for class in &field.classes {
                out.push(' ');
                out.push_str(&escape_html(class));
            }
            out.push_str(&format!(
                "\">\n<label for=\"{key}\">{}{}</label>\n",
                escape_html(&field.label),
                if field.required { " *" } else { "" }
            ));
            out.push_str(&render_widget(field, &key, value));
            if let Some(errors) = self.errors.get(&field.key) {
                for error in errors {
                    out.push_str(&format!("<p class=\"error\">{}</p>\n", escape_html(error)));
                }
            }
            out.push_str("</div>\n");
        }
        out.push_str(&format!(
            "<button type=\"submit\">{}</button>\n</form>\n",
            escape_html(submit)
        ));
        out
    }
}

fn render_widget(field: &FormField, key: &str, value: &str) -> String {
    let value_attr = escape_html(value);
    match &field.widget {
        Widget::Text | Widget::Ref => {
            format!("<input type=\"text\" id=\"{key}\" name=\"{key}\" value=\"{value_attr}\">\n")
        }
        Widget::Password => format!("<input type=\"password\" id=\"{key}\" name=\"{key}\">\n"),
        Widget::Number => {
            format!("<input type=\"number\" id=\"{key}\" name=\"{key}\" value=\"{value_attr}\">\n")
        }
        Widget::DateTime => format!(
            "<input type=\"datetime-local\" id=\"{key}\" name=\"{key}\" value=\"{value_attr}\">\n"
        ),
        Widget::Checkbox => format!(
            "<input type=\"checkbox\" id=\"{key}\" name=\"{key}\"{}>\n",
            if is_checked(value) { " checked" } else { "" }
        ),
        Widget::File => format!("<input type=\"file\" id=\"{key}\" name=\"{key}\">\n"),
        Widget::TextArea => {
            format!("<textarea id=\"{key}\" name=\"{key}\">{value_attr}</textarea>\n")
        }
        Widget::HtmlArea => format!(
            "<textarea class=\"html-area\" id=\"{key}\" name=\"{key}\">{value_attr}</textarea>\n"
        ),
        Widget::Hidden => String::new(),
        Widget::Select(options) => {
            let mut out = format!("<select id=\"{key}\" name=\"{key}\">\n");
            for (option, label) in options {
                out.push_str(&format!(
                    "<option value=\"{}\"{}>{}</option>\n",
                    escape_html(option),
                    if option == value { " selected" } else { "" },
                    escape_html(label)
                ));
            }
            out.push_str("</select>\n");
            out
        }
    }
}

/// Whether a submitted checkbox value means "checked".
pub fn is_checked(value: &str) -> bool {
    matches!(value, "on" | "true" | "1" | "yes")
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

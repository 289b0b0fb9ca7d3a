use std::collections::HashMap;

use crate::adapters::RenderedContent;
use crate::error::NotificationError;

pub const WELCOME_TEMPLATE: &str = "patient-welcome";
pub const UPDATED_TEMPLATE: &str = "patient-updated";
pub const CLOSURE_TEMPLATE: &str = "patient-closure";

/// Template renderer using {{variable}} placeholders.
///
/// Placeholders with no matching key are left in the output untouched.
pub struct TemplateRenderer {
    templates: HashMap<String, Template>,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub subject: Option<String>,
    pub body: String,
}

impl Template {
    pub fn new(id: impl Into<String>, subject: Option<&str>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.map(str::to_string),
            body: body.into(),
        }
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Renderer preloaded with the welcome, update and closure templates.
    pub fn with_defaults() -> Self {
        let mut renderer = Self::new();
        renderer.register(Template::new(
            WELCOME_TEMPLATE,
            Some("Welcome to {{gp_practice}}"),
            "Dear {{name}},\n\n\
             Your patient record (NHS number {{nhs_number}}) has been created at \
             {{gp_practice}}.\n",
        ));
        renderer.register(Template::new(
            UPDATED_TEMPLATE,
            Some("Your patient record has been updated"),
            "Dear {{name}},\n\n\
             The details held for NHS number {{nhs_number}} were updated on {{timestamp}}.\n\
             If you did not expect this change, please contact {{gp_practice}}.\n",
        ));
        renderer.register(Template::new(
            CLOSURE_TEMPLATE,
            Some("Your patient record has been closed"),
            "Dear {{name}},\n\n\
             Your patient record (NHS number {{nhs_number}}) at {{gp_practice}} \
             was closed on {{timestamp}}.\n",
        ));
        renderer
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, template_id: &str) -> Option<&Template> {
        self.templates.get(template_id)
    }

    pub fn render(
        &self,
        template_id: &str,
        data: &HashMap<String, serde_json::Value>,
    ) -> Result<RenderedContent, NotificationError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| NotificationError::TemplateNotFound(template_id.to_string()))?;

        Ok(RenderedContent {
            subject: template.subject.as_deref().map(|s| render_string(s, data)),
            body: render_string(&template.body, data),
        })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn render_string(template: &str, data: &HashMap<String, serde_json::Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = after_open[..end].trim();
        match data.get(key) {
            Some(value) => out.push_str(&value_text(value)),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_template() {
        let mut renderer = TemplateRenderer::new();
        renderer.register(Template::new(
            "test",
            Some("Hello {{name}}"),
            "Registered at {{ gp_practice }}",
        ));

        let result = renderer
            .render(
                "test",
                &data(&[
                    ("name", json!("Sarah Johnson")),
                    ("gp_practice", json!("North Medical Centre")),
                ]),
            )
            .unwrap();
        assert_eq!(result.subject.unwrap(), "Hello Sarah Johnson");
        assert_eq!(result.body, "Registered at North Medical Centre");
    }

    #[test]
    fn test_render_with_numbers_and_missing_keys() {
        let mut renderer = TemplateRenderer::new();
        renderer.register(Template::new("test", None, "Patient {{patient_id}} {{unknown}} {{"));

        let result = renderer
            .render("test", &data(&[("patient_id", json!(5))]))
            .unwrap();
        assert_eq!(result.body, "Patient 5 {{unknown}} {{");
    }

    #[test]
    fn test_values_are_not_re_expanded() {
        let mut renderer = TemplateRenderer::new();
        renderer.register(Template::new("test", None, "{{a}}{{b}}"));

        let result = renderer
            .render("test", &data(&[("a", json!("{{b}}")), ("b", json!("x"))]))
            .unwrap();
        assert_eq!(result.body, "{{b}}x");
    }

    #[test]
    fn test_default_templates_present() {
        let renderer = TemplateRenderer::with_defaults();
        for id in [WELCOME_TEMPLATE, UPDATED_TEMPLATE, CLOSURE_TEMPLATE] {
            assert!(renderer.get(id).is_some(), "missing {id}");
        }
    }

    #[test]
    fn test_template_not_found() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("nonexistent", &HashMap::new());
        assert!(matches!(
            result,
            Err(NotificationError::TemplateNotFound(_))
        ));
    }
}

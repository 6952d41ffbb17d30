//! Template rendering with a restricted placeholder set.
//!
//! Templates use `{name}` placeholders. The allowed variable set is
//! explicit: interpolation never evaluates anything, and a command
//! template referencing a placeholder outside the configured set is a
//! configuration error rejected at load time.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::domain::models::NotificationTemplate;
use crate::domain::ports::RenderedMessage;

/// Errors raised during template validation or rendering.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Unknown placeholder '{placeholder}' in template '{template}'")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("Unbalanced braces in template '{0}'")]
    UnbalancedBraces(String),
}

/// Extract `{name}` placeholders from a template string.
pub fn extract_placeholders(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut placeholders = Vec::new();
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '{' {
            if c == '}' {
                return Err(TemplateError::UnbalancedBraces(template.to_string()));
            }
            continue;
        }
        // "{{" is a literal brace
        if matches!(chars.peek(), Some((_, '{'))) {
            chars.next();
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            name.push(c);
        }
        if !closed {
            return Err(TemplateError::UnbalancedBraces(template.to_string()));
        }
        if !placeholders.contains(&name) {
            placeholders.push(name);
        }
    }

    Ok(placeholders)
}

/// Check a template only references placeholders from the allowed set.
pub fn validate_placeholders(
    template_name: &str,
    template: &str,
    allowed: &[String],
) -> Result<(), TemplateError> {
    for placeholder in extract_placeholders(template)? {
        if !allowed.iter().any(|a| a == &placeholder) {
            return Err(TemplateError::UnknownPlaceholder {
                template: template_name.to_string(),
                placeholder,
            });
        }
    }
    Ok(())
}

/// Substitute `{name}` placeholders from the variable map. A placeholder
/// with no matching variable is a render error (permanent failure).
pub fn render(
    template_name: &str,
    template: &str,
    variables: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        if matches!(chars.peek(), Some('{')) {
            chars.next();
            out.push('{');
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            name.push(c);
        }
        if !closed {
            return Err(TemplateError::UnbalancedBraces(template_name.to_string()));
        }
        match variables.get(&name) {
            Some(value) => out.push_str(value),
            None => {
                return Err(TemplateError::UnknownPlaceholder {
                    template: template_name.to_string(),
                    placeholder: name,
                })
            }
        }
    }

    Ok(out)
}

/// Registry of notification templates, keyed by template ID.
pub struct TemplateRegistry {
    templates: HashMap<String, NotificationTemplate>,
}

/// Built-in template IDs used by the engine.
pub mod builtin {
    pub const ALERT: &str = "alert";
    pub const ESCALATION: &str = "escalation";
    pub const APPROVAL_REQUEST: &str = "approval_request";
    pub const RESOLUTION: &str = "resolution";
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Registry preloaded with the engine's built-in templates.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(NotificationTemplate::new(
            builtin::ALERT,
            "[{severity}] {rule_name} on {source}",
            "{message}\n\nAlert {alert_id} from {source} (severity {severity}).",
        ));
        registry.register(NotificationTemplate::new(
            builtin::ESCALATION,
            "ESCALATED [{severity}] {rule_name} on {source}",
            "{message}\n\nAlert {alert_id} escalated to level {escalation_level}.",
        ));
        registry.register(NotificationTemplate::new(
            builtin::APPROVAL_REQUEST,
            "Approval required: {action_name} for {rule_name}",
            "Remediation '{action_name}' (impact {impact}) requested for alert \
             {alert_id} on {source}.\nCommand: {command}\nApprove or deny to proceed.",
        ));
        registry.register(NotificationTemplate::new(
            builtin::RESOLUTION,
            "Resolved: {rule_name} on {source}",
            "Alert {alert_id} resolved: {reason}",
        ));
        registry
    }

    pub fn register(&mut self, template: NotificationTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, id: &str) -> Option<&NotificationTemplate> {
        self.templates.get(id)
    }

    /// Render a registered template into a deliverable message.
    pub fn render_message(
        &self,
        template_id: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<RenderedMessage, TemplateError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| TemplateError::UnknownTemplate(template_id.to_string()))?;

        Ok(RenderedMessage {
            subject: render(template_id, &template.subject, variables)?,
            body: render(template_id, &template.body, variables)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_extract_placeholders() {
        let found = extract_placeholders("restart {service} for {alert_id} on {service}")
            .unwrap();
        assert_eq!(found, vec!["service".to_string(), "alert_id".to_string()]);
    }

    #[test]
    fn test_extract_rejects_unbalanced() {
        assert!(extract_placeholders("oops {service").is_err());
        assert!(extract_placeholders("oops service}").is_err());
    }

    #[test]
    fn test_literal_braces_pass_through() {
        assert_eq!(extract_placeholders("json {{literal}}").unwrap(), Vec::<String>::new());
        let rendered = render("t", "json {{x}} and {name}", &vars(&[("name", "v")])).unwrap();
        assert_eq!(rendered, "json {x} and v");
    }

    #[test]
    fn test_validate_against_allowed_set() {
        let allowed = vec!["service".to_string(), "alert_id".to_string()];
        assert!(validate_placeholders("a", "restart {service}", &allowed).is_ok());

        let err = validate_placeholders("a", "rm -rf {anything}", &allowed).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownPlaceholder {
                template: "a".to_string(),
                placeholder: "anything".to_string(),
            }
        );
    }

    #[test]
    fn test_render_missing_variable_is_error() {
        let err = render("t", "{present} {missing}", &vars(&[("present", "x")])).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownPlaceholder { .. }));
    }

    #[test]
    fn test_builtin_alert_template_renders() {
        let registry = TemplateRegistry::with_builtins();
        let message = registry
            .render_message(
                builtin::ALERT,
                &vars(&[
                    ("severity", "critical"),
                    ("rule_name", "ServiceDown"),
                    ("source", "svc-a"),
                    ("message", "service unreachable"),
                    ("alert_id", "abc"),
                ]),
            )
            .unwrap();

        assert_eq!(message.subject, "[critical] ServiceDown on svc-a");
        assert!(message.body.contains("service unreachable"));
    }

    #[test]
    fn test_unknown_template() {
        let registry = TemplateRegistry::with_builtins();
        assert!(matches!(
            registry.render_message("nope", &BTreeMap::new()),
            Err(TemplateError::UnknownTemplate(_))
        ));
    }
}

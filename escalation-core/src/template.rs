//! Subject/body rendering for escalation notifications.
//!
//! Templates use `{{placeholder}}` substitution backed by handlebars with
//! HTML escaping turned off. Unknown placeholders render as empty text.

use crate::incident::Incident;
use crate::rules::{EscalationRule, Priority, Severity};
use crate::error::{EscalationError, Result};
use handlebars::Handlebars;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateContext<'a> {
    pub incident_id: &'a str,
    pub rule_id: &'a str,
    pub rule_name: &'a str,
    pub level: u32,
    pub max_level: u32,
    pub severity: Severity,
    pub priority: Priority,
    pub status: &'static str,
    pub triggered_at: String,
    pub payload: &'a serde_json::Value,
}

impl<'a> TemplateContext<'a> {
    pub fn new(rule: &'a EscalationRule, incident: &'a Incident) -> Self {
        Self {
            incident_id: &incident.id,
            rule_id: &rule.id,
            rule_name: rule.name(),
            level: incident.current_level,
            max_level: incident.max_level,
            severity: rule.definition.severity,
            priority: rule.definition.priority,
            status: incident.status().as_str(),
            triggered_at: incident.created_at.to_rfc3339(),
            payload: &incident.payload,
        }
    }
}

pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    pub fn render(&self, source: &str, context: &TemplateContext<'_>) -> Result<String> {
        self.handlebars
            .render_template(source, context)
            .map_err(|err| EscalationError::Template(err.to_string()))
    }

    /// Subject and body for the incident's current level; level templates
    /// take precedence over the rule-wide ones.
    pub fn render_level(
        &self,
        rule: &EscalationRule,
        incident: &Incident,
    ) -> Result<(String, String)> {
        let context = TemplateContext::new(rule, incident);
        let level = rule.level(incident.current_level);

        let subject = level
            .and_then(|l| l.subject_template.as_deref())
            .unwrap_or(&rule.definition.templates.subject);
        let body = level
            .and_then(|l| l.message_template.as_deref())
            .unwrap_or(&rule.definition.templates.body);

        Ok((self.render(subject, &context)?, self.render(body, &context)?))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile-check a template without rendering it.
pub fn check(source: &str) -> std::result::Result<(), String> {
    handlebars::Template::compile(source)
        .map(|_| ())
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::rule;
    use chrono::Utc;

    #[test]
    fn renders_placeholders_and_payload_paths() {
        let rule = rule("r1");
        let incident = Incident::open(
            "inc-42".into(),
            &rule,
            serde_json::json!({"campus": "North & South", "report": {"title": "Title IX"}}),
            Utc::now(),
        );
        let renderer = TemplateRenderer::new();
        let context = TemplateContext::new(&rule, &incident);

        let out = renderer
            .render(
                "{{incidentId}} L{{level}}/{{maxLevel}} {{severity}} {{payload.campus}} {{payload.report.title}}{{missing}}",
                &context,
            )
            .expect("render");
        assert_eq!(out, "inc-42 L1/2 high North & South Title IX");
    }

    #[test]
    fn level_templates_override_rule_templates() {
        let rule = rule("r1");
        let now = Utc::now();
        let incident = Incident::open("inc-1".into(), &rule, serde_json::json!({}), now);
        let renderer = TemplateRenderer::new();

        let (subject, body) = renderer.render_level(&rule, &incident).expect("level 1");
        assert_eq!(subject, format!("[high] {} escalated to level 1", rule.name()));
        assert!(body.contains("inc-1"));

        let escalated = incident.escalate(&rule, now).expect("escalate");
        let (subject, _) = renderer.render_level(&rule, &escalated).expect("level 2");
        assert_eq!(subject, format!("URGENT {}", rule.name()));
    }

    #[test]
    fn check_rejects_unclosed_blocks() {
        assert!(check("{{incidentId}}").is_ok());
        assert!(check("{{#if ready}}never closed").is_err());
    }
}

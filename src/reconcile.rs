//! Reconciliation - Blueprint Paths Against Template References

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::Delimiters;
use crate::engine::{EngineError, TemplateEngine};
use crate::paths::extract_field_paths;
use crate::placeholders::extract_references;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStatus {
    /// Declared by the blueprint and used by the template.
    Present,
    /// Declared by the blueprint, never used by the template.
    Absent,
    /// Used by the template, unknown to the blueprint.
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderAnalysis {
    pub field: String,
    pub status: PlaceholderStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub present: usize,
    pub absent: usize,
    pub does_not_exist: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub placeholders: Vec<PlaceholderAnalysis>,
    pub summary: Summary,
}

impl ReconciliationReport {
    pub fn fields_with(&self, status: PlaceholderStatus) -> Vec<&str> {
        self.placeholders
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.field.as_str())
            .collect()
    }

    /// Every blueprint path is used and the template references nothing else.
    pub fn is_complete(&self) -> bool {
        self.summary.absent == 0 && self.summary.does_not_exist == 0
    }
}

pub fn reconcile(schema_paths: &BTreeSet<String>, template_paths: &BTreeSet<String>) -> ReconciliationReport {
    let mut report = ReconciliationReport::default();

    for field in schema_paths {
        let status = if template_paths.contains(field) {
            report.summary.present += 1;
            PlaceholderStatus::Present
        } else {
            report.summary.absent += 1;
            PlaceholderStatus::Absent
        };
        report.placeholders.push(PlaceholderAnalysis { field: field.clone(), status });
    }

    for field in template_paths.difference(schema_paths) {
        report.summary.does_not_exist += 1;
        report.placeholders.push(PlaceholderAnalysis {
            field: field.clone(),
            status: PlaceholderStatus::DoesNotExist,
        });
    }

    report
}

/// List the template's commands through the engine and reconcile them
/// against the schema.
pub fn analyze(
    engine: &dyn TemplateEngine,
    template: &[u8],
    schema: &Schema,
    delimiters: &Delimiters,
) -> Result<ReconciliationReport, EngineError> {
    let commands = engine.list_commands(template, delimiters)?;
    let template_paths = extract_references(&commands);
    let schema_paths = extract_field_paths(schema);

    tracing::debug!(
        commands = commands.len(),
        template_paths = template_paths.len(),
        schema_paths = schema_paths.len(),
        "reconciling template against blueprint"
    );

    Ok(reconcile(&schema_paths, &template_paths))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_three_way_categorization() {
        let report = reconcile(&set(&["title", "items"]), &set(&["title", "extra"]));

        assert_eq!(report.fields_with(PlaceholderStatus::Present), vec!["title"]);
        assert_eq!(report.fields_with(PlaceholderStatus::Absent), vec!["items"]);
        assert_eq!(report.fields_with(PlaceholderStatus::DoesNotExist), vec!["extra"]);
        assert_eq!(report.summary, Summary { present: 1, absent: 1, does_not_exist: 1 });
        assert!(!report.is_complete());
    }

    #[test]
    fn test_summary_matches_cardinalities() {
        let schema = set(&["a", "b", "c", "d"]);
        let template = set(&["a", "c", "x", "y", "z"]);
        let report = reconcile(&schema, &template);

        assert_eq!(report.summary.present + report.summary.absent, schema.len());
        assert_eq!(report.summary.does_not_exist, template.difference(&schema).count());
        assert_eq!(report.placeholders.len(), 7);
    }

    #[test]
    fn test_complete_template() {
        let report = reconcile(&set(&["a"]), &set(&["a"]));
        assert!(report.is_complete());
    }

    #[test]
    fn test_report_wire_form() {
        let report = reconcile(&set(&["a"]), &set(&["b"]));
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["placeholders"][1]["status"], "does_not_exist");
        assert_eq!(value["summary"]["does_not_exist"], 1);
    }
}

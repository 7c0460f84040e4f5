//! Template rendering over the collected query results.

use std::error::Error as _;

use tera::{Context, Tera};

use crate::error::ProcessingError;
use crate::query::ResultMap;

/// Formats whose output is HTML and therefore rendered with auto-escaping.
fn escapes_html(output_format: &str) -> bool {
    output_format.eq_ignore_ascii_case("html") || output_format.eq_ignore_ascii_case("pdf")
}

/// Renders `template` with each database exposed as a top-level variable, so
/// `{{ onboarding.organization.0.name }}` reads the first row's `name`.
pub fn render_template(
    template: &str,
    results: &ResultMap,
    output_format: &str,
) -> Result<String, ProcessingError> {
    let data = serde_json::to_value(results)
        .map_err(|err| ProcessingError::Render(format!("result map is not serialisable: {err}")))?;
    let context = Context::from_value(data).map_err(|err| ProcessingError::Render(describe(&err)))?;

    Tera::one_off(template, &context, escapes_html(output_format))
        .map_err(|err| ProcessingError::Render(describe(&err)))
}

/// Tera nests the useful message in the source chain.
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use reporter_repository::Row;
    use serde_json::json;
    use std::collections::HashMap;

    fn results(name: &str) -> ResultMap {
        let mut row = Row::new();
        row.insert("name".into(), json!(name));
        let mut tables = HashMap::new();
        tables.insert("organization".to_string(), vec![row]);
        let mut results = ResultMap::new();
        results.insert("onboarding".to_string(), tables);
        results
    }

    #[test]
    fn renders_indexed_rows() {
        let rendered = render_template(
            "Hello {{ onboarding.organization.0.name }}",
            &results("World"),
            "txt",
        )
        .unwrap();
        assert_eq!(rendered, "Hello World");
    }

    #[test]
    fn loops_over_rows() {
        let rendered = render_template(
            "{% for org in onboarding.organization %}[{{ org.name }}]{% endfor %}",
            &results("Mars"),
            "csv",
        )
        .unwrap();
        assert_eq!(rendered, "[Mars]");
    }

    #[test]
    fn html_output_is_escaped() {
        let data = results("<b>Ada</b>");
        let template = "{{ onboarding.organization.0.name }}";
        assert_eq!(render_template(template, &data, "txt").unwrap(), "<b>Ada</b>");
        assert_eq!(
            render_template(template, &data, "HTML").unwrap(),
            "&lt;b&gt;Ada&lt;&#x2F;b&gt;"
        );
    }

    #[test]
    fn empty_results_render_static_templates() {
        assert_eq!(
            render_template("static report", &ResultMap::new(), "txt").unwrap(),
            "static report"
        );
    }

    #[test]
    fn broken_templates_are_render_errors() {
        let err = render_template("{% for %}", &ResultMap::new(), "txt").unwrap_err();
        assert!(matches!(err, ProcessingError::Render(_)));
    }
}

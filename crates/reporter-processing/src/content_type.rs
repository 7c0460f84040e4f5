use uuid::Uuid;

/// MIME type for an output format. Unknown formats, `pdf` included, are
/// stored as `text/plain`.
pub fn get_content_type(extension: &str) -> &'static str {
    match extension {
        "txt" => "text/plain",
        "html" => "text/html",
        "json" => "application/json",
        "csv" => "text/csv",
        _ => "text/plain",
    }
}

/// Object key of a rendered report: `<templateId>/<reportId>.<format>`.
pub fn report_object_key(template_id: Uuid, report_id: Uuid, output_format: &str) -> String {
    format!("{template_id}/{report_id}.{output_format}")
}

/// Whether the rendered HTML must be converted to PDF.
pub fn is_pdf(output_format: &str) -> bool {
    output_format.eq_ignore_ascii_case("pdf")
}

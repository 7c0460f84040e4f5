use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One result row: field name to scalar, nested object or array.
pub type Row = serde_json::Map<String, Value>;

/// `field -> condition` for one table or collection.
pub type FieldFilters = HashMap<String, FilterCondition>;
/// `table key -> field filters` for one database.
pub type TableFilters = HashMap<String, FieldFilters>;
/// `database -> table key -> field -> condition`.
pub type DatabaseFilters = HashMap<String, TableFilters>;
/// `database -> table key -> requested fields`.
pub type DataQueries = HashMap<String, HashMap<String, Vec<String>>>;
/// Legacy equality filter: `field -> accepted values`.
pub type LegacyFilter = HashMap<String, Vec<Value>>;

/// A report-generation request as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub template_id: Uuid,
    pub report_id: Uuid,
    pub output_format: String,
    #[serde(default)]
    pub data_queries: DataQueries,
    #[serde(default)]
    pub filters: DatabaseFilters,
}

impl ReportRequest {
    pub fn database_filters(&self, database: &str) -> Option<&TableFilters> {
        self.filters.get(database)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    Equals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Between,
    In,
    NotIn,
}

impl Predicate {
    pub const ALL: [Predicate; 8] = [
        Predicate::Equals,
        Predicate::GreaterThan,
        Predicate::GreaterOrEqual,
        Predicate::LessThan,
        Predicate::LessOrEqual,
        Predicate::Between,
        Predicate::In,
        Predicate::NotIn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::Equals => "equals",
            Predicate::GreaterThan => "greaterThan",
            Predicate::GreaterOrEqual => "greaterOrEqual",
            Predicate::LessThan => "lessThan",
            Predicate::LessOrEqual => "lessOrEqual",
            Predicate::Between => "between",
            Predicate::In => "in",
            Predicate::NotIn => "notIn",
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relational predicates on a single field. Absent sequences do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greater_than: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greater_or_equal: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub less_than: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub less_or_equal: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<Vec<Value>>,
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub in_: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_in: Option<Vec<Value>>,
}

impl FilterCondition {
    pub fn equals(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            equals: Some(values.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn values(&self, predicate: Predicate) -> Option<&Vec<Value>> {
        match predicate {
            Predicate::Equals => self.equals.as_ref(),
            Predicate::GreaterThan => self.greater_than.as_ref(),
            Predicate::GreaterOrEqual => self.greater_or_equal.as_ref(),
            Predicate::LessThan => self.less_than.as_ref(),
            Predicate::LessOrEqual => self.less_or_equal.as_ref(),
            Predicate::Between => self.between.as_ref(),
            Predicate::In => self.in_.as_ref(),
            Predicate::NotIn => self.not_in.as_ref(),
        }
    }

    pub fn values_mut(&mut self, predicate: Predicate) -> Option<&mut Vec<Value>> {
        match predicate {
            Predicate::Equals => self.equals.as_mut(),
            Predicate::GreaterThan => self.greater_than.as_mut(),
            Predicate::GreaterOrEqual => self.greater_or_equal.as_mut(),
            Predicate::LessThan => self.less_than.as_mut(),
            Predicate::LessOrEqual => self.less_or_equal.as_mut(),
            Predicate::Between => self.between.as_mut(),
            Predicate::In => self.in_.as_mut(),
            Predicate::NotIn => self.not_in.as_mut(),
        }
    }

    /// Populated predicates in declaration order.
    pub fn populated(&self) -> impl Iterator<Item = (Predicate, &[Value])> + '_ {
        Predicate::ALL.into_iter().filter_map(|predicate| {
            self.values(predicate)
                .filter(|values| !values.is_empty())
                .map(|values| (predicate, values.as_slice()))
        })
    }

    /// A condition without populated predicates is the same as no condition.
    pub fn is_empty(&self) -> bool {
        self.populated().next().is_none()
    }
}

/// True when at least one field carries a populated predicate.
pub fn has_active_filters(filters: &FieldFilters) -> bool {
    filters.values().any(|condition| !condition.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInformation {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
}

/// Discovered metadata for one relational table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnInformation>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInformation> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Looks up `(schema, table)` in a discovered schema list.
    pub fn find<'a>(schemas: &'a [TableSchema], schema: &str, table: &str) -> Option<&'a TableSchema> {
        schemas
            .iter()
            .find(|entry| entry.schema_name == schema && entry.table_name == table)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReportStatus {
    Pending,
    Processing,
    Finished,
    Error,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "Pending",
            ReportStatus::Processing => "Processing",
            ReportStatus::Finished => "Finished",
            ReportStatus::Error => "Error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(Self::Pending),
            "Processing" => Some(Self::Processing),
            "Finished" => Some(Self::Finished),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Finished and Error reports are never processed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Finished | ReportStatus::Error)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted status of one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub id: Uuid,
    pub status: ReportStatus,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_decodes_camel_case_and_ignores_unknown_fields() {
        let body = json!({
            "templateId": "00000000-0000-0000-0000-000000000001",
            "reportId": "00000000-0000-0000-0000-000000000002",
            "outputFormat": "txt",
            "dataQueries": {"onboarding": {"organization": ["name"]}},
            "filters": {"onboarding": {"organization": {"id": {"equals": [1, 2, 3]}}}},
            "requestedBy": "someone"
        });

        let request: ReportRequest = serde_json::from_value(body).expect("decode request");
        assert_eq!(request.output_format, "txt");
        assert_eq!(request.data_queries["onboarding"]["organization"], vec!["name"]);
        let condition = &request.filters["onboarding"]["organization"]["id"];
        assert_eq!(condition.equals, Some(vec![json!(1), json!(2), json!(3)]));
        assert!(condition.between.is_none());
    }

    #[test]
    fn missing_queries_and_filters_default_to_empty() {
        let body = json!({
            "templateId": "00000000-0000-0000-0000-000000000001",
            "reportId": "00000000-0000-0000-0000-000000000002",
            "outputFormat": "html"
        });
        let request: ReportRequest = serde_json::from_value(body).expect("decode request");
        assert!(request.data_queries.is_empty());
        assert!(request.filters.is_empty());
    }

    #[test]
    fn in_and_not_in_use_wire_names() {
        let condition: FilterCondition =
            serde_json::from_value(json!({"in": ["a"], "notIn": ["b"], "greaterOrEqual": [3]}))
                .expect("decode condition");
        assert_eq!(condition.in_, Some(vec![json!("a")]));
        assert_eq!(condition.not_in, Some(vec![json!("b")]));

        let populated: Vec<Predicate> = condition.populated().map(|(p, _)| p).collect();
        assert_eq!(
            populated,
            vec![Predicate::GreaterOrEqual, Predicate::In, Predicate::NotIn]
        );
    }

    #[test]
    fn condition_without_values_is_empty() {
        assert!(FilterCondition::default().is_empty());
        let only_empty = FilterCondition {
            equals: Some(Vec::new()),
            ..FilterCondition::default()
        };
        assert!(only_empty.is_empty());

        let mut filters = FieldFilters::new();
        filters.insert("id".into(), only_empty);
        assert!(!has_active_filters(&filters));
        filters.insert("name".into(), FilterCondition::equals([json!("x")]));
        assert!(has_active_filters(&filters));
    }

    #[test]
    fn terminal_statuses() {
        assert!(ReportStatus::Finished.is_terminal());
        assert!(ReportStatus::Error.is_terminal());
        assert!(!ReportStatus::Pending.is_terminal());
        assert!(!ReportStatus::Processing.is_terminal());
        assert_eq!(ReportStatus::parse("Finished"), Some(ReportStatus::Finished));
        assert_eq!(ReportStatus::parse("finished"), None);
    }
}

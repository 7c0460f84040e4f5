//! Postgres datasource: schema discovery and filtered row queries.

use async_trait::async_trait;
use pg_escape::quote_identifier;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row as _};
use tracing::debug;

use crate::model::{
    ColumnInformation, FieldFilters, FilterCondition, LegacyFilter, Predicate, Row, TableSchema,
};
use crate::RepositoryError;

#[async_trait]
pub trait RelationalRepository: Send + Sync {
    /// Lists every table and column visible in `schemas`.
    async fn get_database_schema(
        &self,
        schemas: &[String],
    ) -> Result<Vec<TableSchema>, RepositoryError>;

    async fn query(
        &self,
        schema: &[TableSchema],
        schema_name: &str,
        table: &str,
        fields: &[String],
        filter: Option<&LegacyFilter>,
    ) -> Result<Vec<Row>, RepositoryError>;

    async fn query_with_advanced_filters(
        &self,
        schema: &[TableSchema],
        schema_name: &str,
        table: &str,
        fields: &[String],
        filters: &FieldFilters,
    ) -> Result<Vec<Row>, RepositoryError>;
}

const DISCOVER_SCHEMA_SQL: &str = r#"
    SELECT
        c.table_schema::text AS schema_name,
        c.table_name::text AS table_name,
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        EXISTS (
            SELECT 1
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
                AND tc.table_name = kcu.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
                AND kcu.table_schema = c.table_schema
                AND kcu.table_name = c.table_name
                AND kcu.column_name = c.column_name
        ) AS is_primary_key
    FROM information_schema.columns c
    JOIN information_schema.tables t
        ON t.table_schema = c.table_schema AND t.table_name = c.table_name
    WHERE c.table_schema = ANY($1)
        AND t.table_type IN ('BASE TABLE', 'VIEW')
    ORDER BY c.table_schema, c.table_name, c.ordinal_position
"#;

#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rows(&self, query: SelectQuery) -> Result<Vec<Row>, RepositoryError> {
        let SelectQuery { sql, binds } = query;
        debug!(%sql, binds = binds.len(), "executing relational query");

        let mut statement = sqlx::query_scalar::<sqlx::Postgres, Value>(&sql);
        for bind in binds {
            statement = statement.bind(bind);
        }

        statement
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|value| match value {
                Value::Object(row) => Ok(row),
                other => Err(RepositoryError::Decode(format!(
                    "expected a JSON object per row, got {other}"
                ))),
            })
            .collect()
    }
}

#[async_trait]
impl RelationalRepository for PostgresRepository {
    async fn get_database_schema(
        &self,
        schemas: &[String],
    ) -> Result<Vec<TableSchema>, RepositoryError> {
        let rows = sqlx::query(DISCOVER_SCHEMA_SQL)
            .bind(schemas.to_vec())
            .fetch_all(&self.pool)
            .await?;

        let mut discovered = Vec::with_capacity(rows.len());
        for row in rows {
            discovered.push((
                row.try_get::<String, _>("schema_name")?,
                row.try_get::<String, _>("table_name")?,
                ColumnInformation {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    is_primary_key: row.try_get("is_primary_key")?,
                },
            ));
        }

        Ok(group_columns(discovered))
    }

    async fn query(
        &self,
        schema: &[TableSchema],
        schema_name: &str,
        table: &str,
        fields: &[String],
        filter: Option<&LegacyFilter>,
    ) -> Result<Vec<Row>, RepositoryError> {
        let filters: FieldFilters = filter
            .map(|legacy| {
                legacy
                    .iter()
                    .map(|(field, values)| {
                        (field.clone(), FilterCondition::equals(values.iter().cloned()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let query = build_select(schema, schema_name, table, fields, &filters)?;
        self.fetch_rows(query).await
    }

    async fn query_with_advanced_filters(
        &self,
        schema: &[TableSchema],
        schema_name: &str,
        table: &str,
        fields: &[String],
        filters: &FieldFilters,
    ) -> Result<Vec<Row>, RepositoryError> {
        let query = build_select(schema, schema_name, table, fields, filters)?;
        self.fetch_rows(query).await
    }
}

/// Folds ordered `(schema, table, column)` rows into one entry per table.
fn group_columns(rows: Vec<(String, String, ColumnInformation)>) -> Vec<TableSchema> {
    let mut tables: Vec<TableSchema> = Vec::new();
    for (schema_name, table_name, column) in rows {
        match tables.last_mut() {
            Some(current)
                if current.schema_name == schema_name && current.table_name == table_name =>
            {
                current.columns.push(column);
            }
            _ => tables.push(TableSchema {
                schema_name,
                table_name,
                columns: vec![column],
            }),
        }
    }
    tables
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectQuery {
    pub(crate) sql: String,
    pub(crate) binds: Vec<Option<String>>,
}

/// Builds `SELECT row_to_json(t) FROM (SELECT .. WHERE ..) AS t` with every
/// filter value bound as text and cast to the column's discovered type.
pub(crate) fn build_select(
    schema: &[TableSchema],
    schema_name: &str,
    table: &str,
    fields: &[String],
    filters: &FieldFilters,
) -> Result<SelectQuery, RepositoryError> {
    let mut writer = PredicateWriter {
        table: TableSchema::find(schema, schema_name, table),
        clauses: Vec::new(),
        binds: Vec::new(),
    };

    let mut ordered: Vec<(&String, &FilterCondition)> = filters.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));
    for (field, condition) in ordered {
        writer.write(field, condition)?;
    }

    let columns = if fields.is_empty() {
        "*".to_string()
    } else {
        fields
            .iter()
            .map(|field| quote_identifier(field).into_owned())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!(
        "SELECT row_to_json(t) FROM (SELECT {columns} FROM {}.{}",
        quote_identifier(schema_name),
        quote_identifier(table)
    );
    if !writer.clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&writer.clauses.join(" AND "));
    }
    sql.push_str(") AS t");

    Ok(SelectQuery {
        sql,
        binds: writer.binds,
    })
}

struct PredicateWriter<'a> {
    table: Option<&'a TableSchema>,
    clauses: Vec<String>,
    binds: Vec<Option<String>>,
}

impl<'a> PredicateWriter<'a> {
    fn write(&mut self, field: &str, condition: &FilterCondition) -> Result<(), RepositoryError> {
        for (predicate, values) in condition.populated() {
            match predicate {
                Predicate::Equals if values.len() == 1 => self.equality(field, &values[0]),
                Predicate::Equals | Predicate::In => self.membership(field, values, false),
                Predicate::NotIn => self.membership(field, values, true),
                Predicate::GreaterThan => self.comparison(field, predicate, ">", values)?,
                Predicate::GreaterOrEqual => self.comparison(field, predicate, ">=", values)?,
                Predicate::LessThan => self.comparison(field, predicate, "<", values)?,
                Predicate::LessOrEqual => self.comparison(field, predicate, "<=", values)?,
                Predicate::Between => self.between(field, values)?,
            }
        }
        Ok(())
    }

    fn equality(&mut self, field: &str, value: &Value) {
        if value.is_null() {
            self.clauses
                .push(format!("{} IS NULL", quote_identifier(field)));
            return;
        }
        let column = self.column_expr(field);
        let placeholder = self.bind(field, value);
        self.clauses.push(format!("{column} = {placeholder}"));
    }

    fn membership(&mut self, field: &str, values: &[Value], negate: bool) {
        let column = self.column_expr(field);
        let has_null = values.iter().any(Value::is_null);
        let placeholders: Vec<String> = values
            .iter()
            .filter(|value| !value.is_null())
            .map(|value| self.bind(field, value))
            .collect();

        let mut parts = Vec::new();
        if !placeholders.is_empty() {
            let op = if negate { "NOT IN" } else { "IN" };
            parts.push(format!("{column} {op} ({})", placeholders.join(", ")));
        }
        if has_null {
            let op = if negate { "IS NOT NULL" } else { "IS NULL" };
            parts.push(format!("{} {op}", quote_identifier(field)));
        }

        let clause = parts.join(if negate { " AND " } else { " OR " });
        if parts.len() > 1 {
            self.clauses.push(format!("({clause})"));
        } else {
            self.clauses.push(clause);
        }
    }

    fn comparison(
        &mut self,
        field: &str,
        predicate: Predicate,
        op: &str,
        values: &[Value],
    ) -> Result<(), RepositoryError> {
        let value = &values[0];
        if value.is_null() {
            return Err(RepositoryError::InvalidFilter(format!(
                "{predicate} on '{field}' does not accept null"
            )));
        }
        let column = self.column_expr(field);
        let placeholder = self.bind(field, value);
        self.clauses.push(format!("{column} {op} {placeholder}"));
        Ok(())
    }

    fn between(&mut self, field: &str, values: &[Value]) -> Result<(), RepositoryError> {
        if values.len() != 2 {
            return Err(RepositoryError::InvalidFilter(format!(
                "between on '{field}' requires exactly two values, got {}",
                values.len()
            )));
        }
        if values.iter().any(Value::is_null) {
            return Err(RepositoryError::InvalidFilter(format!(
                "between on '{field}' does not accept null"
            )));
        }
        let column = self.column_expr(field);
        let low = self.bind(field, &values[0]);
        let high = self.bind(field, &values[1]);
        self.clauses
            .push(format!("{column} BETWEEN {low} AND {high}"));
        Ok(())
    }

    fn bind(&mut self, field: &str, value: &Value) -> String {
        self.binds.push(value_as_text(value));
        let position = self.binds.len();
        match self.cast_for(field) {
            Some(data_type) => format!("${position}::{data_type}"),
            None => format!("${position}"),
        }
    }

    /// Columns with an unknown or non-castable type are compared as text.
    fn column_expr(&self, field: &str) -> String {
        let ident = quote_identifier(field);
        if self.cast_for(field).is_some() {
            ident.into_owned()
        } else {
            format!("{ident}::text")
        }
    }

    fn cast_for(&self, field: &str) -> Option<&'a str> {
        let column = self.table?.column(field)?;
        is_castable(&column.data_type).then_some(column.data_type.as_str())
    }
}

fn is_castable(data_type: &str) -> bool {
    let lowered = data_type.to_ascii_lowercase();
    !matches!(
        lowered.as_str(),
        "array" | "user-defined" | "json" | "jsonb" | "xml"
    ) && !lowered.is_empty()
        && lowered
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == ' ' || ch == '_')
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn q(ident: &str) -> String {
        quote_identifier(ident).into_owned()
    }

    fn orders_schema() -> Vec<TableSchema> {
        vec![TableSchema {
            schema_name: "sales".into(),
            table_name: "orders".into(),
            columns: vec![
                ColumnInformation {
                    name: "id".into(),
                    data_type: "integer".into(),
                    is_primary_key: true,
                },
                ColumnInformation {
                    name: "created_at".into(),
                    data_type: "timestamp with time zone".into(),
                    is_primary_key: false,
                },
                ColumnInformation {
                    name: "payload".into(),
                    data_type: "jsonb".into(),
                    is_primary_key: false,
                },
            ],
        }]
    }

    #[test]
    fn select_without_filters_projects_fields() {
        let query = build_select(
            &orders_schema(),
            "sales",
            "orders",
            &["id".to_string(), "created_at".to_string()],
            &FieldFilters::new(),
        )
        .expect("build select");

        assert_eq!(
            query.sql,
            format!(
                "SELECT row_to_json(t) FROM (SELECT {}, {} FROM {}.{}) AS t",
                q("id"),
                q("created_at"),
                q("sales"),
                q("orders")
            )
        );
        assert!(query.binds.is_empty());
    }

    #[test]
    fn filters_cast_to_discovered_column_types() {
        let mut filters = FieldFilters::new();
        filters.insert("id".into(), FilterCondition::equals([json!(1), json!(2), json!(3)]));
        filters.insert(
            "created_at".into(),
            FilterCondition {
                between: Some(vec![json!("2024-01-01"), json!("2024-12-31")]),
                ..FilterCondition::default()
            },
        );

        let query =
            build_select(&orders_schema(), "sales", "orders", &[], &filters).expect("build");

        let expected_where = format!(
            "{} BETWEEN $1::timestamp with time zone AND $2::timestamp with time zone AND {} IN ($3::integer, $4::integer, $5::integer)",
            q("created_at"),
            q("id")
        );
        assert!(query.sql.ends_with(&format!("WHERE {expected_where}) AS t")));
        assert_eq!(
            query.binds,
            vec![
                Some("2024-01-01".to_string()),
                Some("2024-12-31".to_string()),
                Some("1".to_string()),
                Some("2".to_string()),
                Some("3".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_and_json_columns_compare_as_text() {
        let mut filters = FieldFilters::new();
        filters.insert("payload".into(), FilterCondition::equals([json!("x")]));
        filters.insert("status".into(), FilterCondition::equals([json!(true)]));

        let query =
            build_select(&orders_schema(), "sales", "orders", &[], &filters).expect("build");
        assert!(query.sql.contains(&format!("{}::text = $1", q("payload"))));
        assert!(query.sql.contains(&format!("{}::text = $2", q("status"))));
        assert_eq!(query.binds, vec![Some("x".into()), Some("true".into())]);
    }

    #[test]
    fn null_members_become_is_null_checks() {
        let mut filters = FieldFilters::new();
        filters.insert(
            "id".into(),
            FilterCondition {
                not_in: Some(vec![json!(7), Value::Null]),
                ..FilterCondition::default()
            },
        );
        let query =
            build_select(&orders_schema(), "sales", "orders", &[], &filters).expect("build");
        assert!(query.sql.contains(&format!(
            "({id} NOT IN ($1::integer) AND {id} IS NOT NULL)",
            id = q("id")
        )));

        let mut filters = FieldFilters::new();
        filters.insert("id".into(), FilterCondition::equals([Value::Null]));
        let query =
            build_select(&orders_schema(), "sales", "orders", &[], &filters).expect("build");
        assert!(query.sql.contains(&format!("{} IS NULL", q("id"))));
        assert!(query.binds.is_empty());
    }

    #[test]
    fn between_requires_two_values() {
        let mut filters = FieldFilters::new();
        filters.insert(
            "id".into(),
            FilterCondition {
                between: Some(vec![json!(1)]),
                ..FilterCondition::default()
            },
        );
        let err = build_select(&orders_schema(), "sales", "orders", &[], &filters).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidFilter(message) if message.contains("exactly two")));
    }

    #[test]
    fn comparisons_use_first_value() {
        let mut filters = FieldFilters::new();
        filters.insert(
            "id".into(),
            FilterCondition {
                greater_or_equal: Some(vec![json!(10), json!(99)]),
                less_than: Some(vec![json!(20)]),
                ..FilterCondition::default()
            },
        );
        let query =
            build_select(&orders_schema(), "sales", "orders", &[], &filters).expect("build");
        assert!(query.sql.contains(&format!(
            "{id} >= $1::integer AND {id} < $2::integer",
            id = q("id")
        )));
        assert_eq!(query.binds, vec![Some("10".into()), Some("20".into())]);
    }

    #[test]
    fn group_columns_splits_by_table() {
        let column = |name: &str| ColumnInformation {
            name: name.into(),
            data_type: "text".into(),
            is_primary_key: false,
        };
        let grouped = group_columns(vec![
            ("public".into(), "a".into(), column("x")),
            ("public".into(), "a".into(), column("y")),
            ("public".into(), "b".into(), column("x")),
            ("sales".into(), "a".into(), column("z")),
        ]);
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[0].columns.len(), 2);
        assert_eq!(grouped[2].schema_name, "sales");
    }
}

//! Worker configuration read from the process environment.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reporter_bucket::{S3Config, DEFAULT_TEMPLATE_SUFFIX};
use reporter_processing::circuit_breaker::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_TIMEOUT};
use reporter_processing::crm::{ENCRYPT_KEY_ENV, HASH_KEY_ENV};
use reporter_processing::{
    CircuitBreakerConfig, ConnectionConfig, CrmSecrets, DataSource, DatabaseType, PdfPoolConfig,
};

const DATASOURCE_PREFIX: &str = "DATASOURCE_";
const CONFIG_NAME_SUFFIX: &str = "_CONFIG_NAME";

/// One `DATASOURCE_<PREFIX>_*` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceConfig {
    pub prefix: String,
    pub name: String,
    pub database_type: DatabaseType,
    pub url: String,
    pub database: Option<String>,
    pub schemas: Vec<String>,
    pub midaz_organization_id: Option<String>,
}

impl DataSourceConfig {
    /// A declared datasource; it connects on first use.
    pub fn into_datasource(self) -> DataSource {
        let mut source = DataSource::new(
            self.name,
            self.database_type,
            ConnectionConfig {
                url: self.url,
                database: self.database,
                max_connections: None,
            },
        )
        .with_schemas(self.schemas);
        source.midaz_organization_id = self.midaz_organization_id;
        source
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub server_address: SocketAddr,
    pub max_in_flight_reports: usize,
    pub mongo_uri: String,
    pub mongo_db_name: String,
    pub storage: S3Config,
    pub template_bucket: String,
    pub report_bucket: String,
    pub template_suffix: String,
    pub report_ttl: String,
    pub breaker: CircuitBreakerConfig,
    pub pdf: PdfPoolConfig,
    pub crm_secrets: CrmSecrets,
    pub datasources: Vec<DataSourceConfig>,
}

impl WorkerConfig {
    /// Loads `.env` when present, then reads the environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let env = Env(&vars);

        let storage = S3Config {
            bucket: String::new(),
            region: env.or("OBJECT_STORAGE_REGION", "us-east-1"),
            endpoint: env.optional("OBJECT_STORAGE_ENDPOINT"),
            access_key_id: env.optional("OBJECT_STORAGE_ACCESS_KEY_ID"),
            secret_access_key: env.optional("OBJECT_STORAGE_SECRET_KEY"),
            force_path_style: env.parse_or("OBJECT_STORAGE_FORCE_PATH_STYLE", true)?,
        };

        Ok(Self {
            server_address: env.parse_or(
                "SERVER_ADDRESS",
                SocketAddr::from(([0, 0, 0, 0], 4005)),
            )?,
            max_in_flight_reports: env.parse_or("MAX_IN_FLIGHT_REPORTS", 8)?,
            mongo_uri: env.required("MONGO_URI")?,
            mongo_db_name: env.or("MONGO_DB_NAME", "reporter"),
            storage,
            template_bucket: env.or("TEMPLATE_BUCKET", "templates"),
            report_bucket: env.or("REPORT_BUCKET", "reports"),
            template_suffix: env.or("TEMPLATE_SUFFIX", DEFAULT_TEMPLATE_SUFFIX),
            report_ttl: env.or("REPORT_TTL", ""),
            breaker: CircuitBreakerConfig {
                failure_threshold: env
                    .parse_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", DEFAULT_FAILURE_THRESHOLD)?,
                open_timeout: Duration::from_secs(env.parse_or(
                    "CIRCUIT_BREAKER_OPEN_TIMEOUT_SECS",
                    DEFAULT_OPEN_TIMEOUT.as_secs(),
                )?),
            },
            pdf: PdfPoolConfig {
                chrome_path: PathBuf::from(env.or("PDF_CHROME_PATH", "chromium")),
                workers: env.parse_or("PDF_POOL_WORKERS", 2)?,
                timeout: Duration::from_secs(env.parse_or("PDF_TIMEOUT_SECS", 60)?),
            },
            crm_secrets: CrmSecrets {
                hash_secret: env.optional(HASH_KEY_ENV),
                encrypt_secret: env.optional(ENCRYPT_KEY_ENV),
            },
            datasources: discover_datasources(&env)?,
        })
    }
}

/// Finds every `DATASOURCE_<PREFIX>_CONFIG_NAME` and reads its siblings.
fn discover_datasources(env: &Env<'_>) -> Result<Vec<DataSourceConfig>> {
    let mut declared = BTreeMap::new();
    for (key, name) in env.0 {
        let Some(prefix) = key
            .strip_prefix(DATASOURCE_PREFIX)
            .and_then(|rest| rest.strip_suffix(CONFIG_NAME_SUFFIX))
        else {
            continue;
        };
        if prefix.is_empty() || name.trim().is_empty() {
            continue;
        }
        declared.insert(name.trim().to_string(), prefix.to_string());
    }

    let mut sources = Vec::with_capacity(declared.len());
    for (name, prefix) in declared {
        let var = |suffix: &str| format!("{DATASOURCE_PREFIX}{prefix}_{suffix}");
        let database_type = DatabaseType::parse(&env.required(&var("TYPE"))?);
        let url = env.required(&var("URL"))?;
        let schemas = env
            .optional(&var("SCHEMAS"))
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|schema| !schema.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        sources.push(DataSourceConfig {
            database: env.optional(&var("DATABASE")),
            midaz_organization_id: env.optional(&var("MIDAZ_ORGANIZATION_ID")),
            prefix,
            name,
            database_type,
            url,
            schemas,
        });
    }
    Ok(sources)
}

struct Env<'a>(&'a HashMap<String, String>);

impl Env<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .with_context(|| format!("{key} must be set"))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => match raw.parse() {
                Ok(value) => Ok(value),
                Err(err) => bail!("{key}: cannot parse '{raw}': {err}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply() {
        let config = WorkerConfig::from_vars(vars(&[("MONGO_URI", "mongodb://localhost")])).unwrap();
        assert_eq!(config.server_address.to_string(), "0.0.0.0:4005");
        assert_eq!(config.max_in_flight_reports, 8);
        assert_eq!(config.mongo_db_name, "reporter");
        assert_eq!(config.template_bucket, "templates");
        assert_eq!(config.report_bucket, "reports");
        assert_eq!(config.template_suffix, ".tpl");
        assert_eq!(config.report_ttl, "");
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.open_timeout, Duration::from_secs(30));
        assert_eq!(config.pdf.workers, 2);
        assert!(config.storage.force_path_style);
        assert!(config.crm_secrets.hash_secret.is_none());
        assert!(config.datasources.is_empty());
    }

    #[test]
    fn mongo_uri_is_required() {
        let err = WorkerConfig::from_vars(Vec::new()).unwrap_err();
        assert!(err.to_string().contains("MONGO_URI"));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = WorkerConfig::from_vars(vars(&[
            ("MONGO_URI", "mongodb://localhost"),
            ("MAX_IN_FLIGHT_REPORTS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_IN_FLIGHT_REPORTS"));
    }

    #[test]
    fn discovers_datasources_by_prefix() {
        let config = WorkerConfig::from_vars(vars(&[
            ("MONGO_URI", "mongodb://localhost"),
            ("DATASOURCE_ONBOARDING_CONFIG_NAME", "onboarding"),
            ("DATASOURCE_ONBOARDING_TYPE", "postgresql"),
            ("DATASOURCE_ONBOARDING_URL", "postgres://localhost/onboarding"),
            ("DATASOURCE_ONBOARDING_SCHEMAS", "public, sales,"),
            ("DATASOURCE_CRM_CONFIG_NAME", "plugin_crm"),
            ("DATASOURCE_CRM_TYPE", "mongodb"),
            ("DATASOURCE_CRM_URL", "mongodb://localhost"),
            ("DATASOURCE_CRM_DATABASE", "crm"),
            ("DATASOURCE_CRM_MIDAZ_ORGANIZATION_ID", "org-X"),
            ("DATASOURCE_LEDGER_CONFIG_NAME", "ledger"),
            ("DATASOURCE_LEDGER_TYPE", "oracle"),
            ("DATASOURCE_LEDGER_URL", "oracle://somewhere"),
        ]))
        .unwrap();

        let names: Vec<_> = config.datasources.iter().map(|source| source.name.as_str()).collect();
        assert_eq!(names, vec!["ledger", "onboarding", "plugin_crm"]);

        let onboarding = &config.datasources[1];
        assert_eq!(onboarding.database_type, DatabaseType::Postgres);
        assert_eq!(onboarding.schemas, vec!["public", "sales"]);

        let crm = config.datasources[2].clone().into_datasource();
        assert_eq!(crm.database_type, DatabaseType::Mongo);
        assert_eq!(crm.midaz_organization_id.as_deref(), Some("org-X"));
        assert_eq!(crm.connection.database.as_deref(), Some("crm"));
        assert!(!crm.initialized);

        assert_eq!(
            config.datasources[0].database_type,
            DatabaseType::Unsupported("oracle".into())
        );
    }

    #[test]
    fn datasource_without_url_is_an_error() {
        let err = WorkerConfig::from_vars(vars(&[
            ("MONGO_URI", "mongodb://localhost"),
            ("DATASOURCE_X_CONFIG_NAME", "x"),
            ("DATASOURCE_X_TYPE", "postgresql"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DATASOURCE_X_URL"));
    }
}

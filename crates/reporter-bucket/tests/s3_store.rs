use anyhow::{Context, Result};
use bytes::Bytes;
use reporter_bucket::{BucketError, BucketStore, S3BucketStore, S3Config};
use uuid::Uuid;

const REQUIRED_VARS: &[&str] = &[
    "REPORTER_TEST_S3_BUCKET",
    "REPORTER_TEST_S3_ENDPOINT",
    "REPORTER_TEST_S3_ACCESS_KEY_ID",
    "REPORTER_TEST_S3_SECRET_ACCESS_KEY",
];

fn config_from_env() -> Option<S3Config> {
    let mut values = REQUIRED_VARS.iter().map(|name| std::env::var(name).ok());
    let bucket = values.next()??;
    let endpoint = values.next()??;
    let access_key = values.next()??;
    let secret_key = values.next()??;

    Some(S3Config {
        bucket,
        region: std::env::var("REPORTER_TEST_S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
        endpoint: Some(endpoint),
        access_key_id: Some(access_key),
        secret_access_key: Some(secret_key),
        force_path_style: true,
    })
}

#[tokio::test]
async fn s3_store_stores_reports_and_reports_missing_keys() -> Result<()> {
    let Some(config) = config_from_env() else {
        eprintln!(
            "Skipping S3 bucket test; set {} to enable",
            REQUIRED_VARS.join(", ")
        );
        return Ok(());
    };

    let store = S3BucketStore::new(config)
        .await
        .context("failed to build S3 bucket store")?;
    let key = format!("{}/{}.txt", Uuid::new_v4(), Uuid::new_v4());

    store
        .put_object(&key, Bytes::from_static(b"reporter integration test"), "text/plain", Some("1d"))
        .await
        .context("upload to S3 failed")?;

    let fetched = store.get_object(&key).await.context("download failed")?;
    assert_eq!(&fetched[..], b"reporter integration test");

    let missing = format!("{}/missing.txt", Uuid::new_v4());
    assert!(matches!(
        store.get_object(&missing).await,
        Err(BucketError::NotFound(found)) if found == missing
    ));

    Ok(())
}

#[tokio::test]
async fn empty_bucket_name_is_rejected() {
    let config = S3Config {
        bucket: String::new(),
        region: "us-east-1".into(),
        endpoint: None,
        access_key_id: None,
        secret_access_key: None,
        force_path_style: true,
    };
    let err = S3BucketStore::new(config).await.err().expect("must fail");
    assert!(matches!(err, BucketError::Configuration(_)));
}

#[test]
fn with_bucket_keeps_connection_settings() {
    let shared = S3Config {
        bucket: String::new(),
        region: "sa-east-1".into(),
        endpoint: Some("http://localhost:9000".into()),
        access_key_id: Some("minio".into()),
        secret_access_key: Some("minio-secret".into()),
        force_path_style: true,
    };

    let reports = shared.with_bucket("reports");
    assert_eq!(reports.bucket, "reports");
    assert_eq!(reports.region, "sa-east-1");
    assert_eq!(reports.endpoint.as_deref(), Some("http://localhost:9000"));
    assert!(reports.force_path_style);
    assert!(shared.bucket.is_empty());
}

#[test]
fn request_errors_name_the_key() {
    let err = BucketError::request("t/r.txt", "connection reset");
    assert_eq!(
        err.to_string(),
        "object storage request for 't/r.txt' failed: connection reset"
    );
}

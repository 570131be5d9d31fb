use anyhow::Result;
use clap::Parser;
use pretty_assertions::assert_eq;
use tenancy_cli::{
    Command, CommandError, CredentialStore, LogFormat, StoreError, Target, Tenancy, TenancyCli,
    report,
};
use tenancy_core::{
    BackendError, IdentityOperation, MemoryIdentityBackend, MemoryObjectStore, RetryPolicy,
};

fn target(bucket: &str, user: &str) -> Target {
    Target {
        bucket: bucket.to_string(),
        user: user.to_string(),
    }
}

async fn fixture(
    directory: &std::path::Path,
) -> (
    Tenancy<MemoryIdentityBackend, MemoryObjectStore>,
    MemoryIdentityBackend,
    MemoryObjectStore,
) {
    let identity = MemoryIdentityBackend::default();
    let storage = MemoryObjectStore::default();
    storage.create_bucket("shared-bucket").await;
    let tenancy = Tenancy::new(
        identity.clone(),
        storage.clone(),
        CredentialStore::new(directory),
    )
    .with_retry(RetryPolicy::never());
    (tenancy, identity, storage)
}

#[test]
fn it_parses_every_setting_from_flags() -> Result<()> {
    let cli = TenancyCli::try_parse_from([
        "tenancy",
        "--access-key-id",
        "AKIAADMIN",
        "--secret-access-key",
        "admin-secret",
        "--region",
        "eu-west-1",
        "--s3-endpoint",
        "http://localhost:9000",
        "--path-style",
        "true",
        "--read-retries",
        "5",
        "--delete-concurrency",
        "2",
        "--credentials-dir",
        "/tmp/credentials",
        "--log-format",
        "json",
        "deprovision",
        "--bucket",
        "shared-bucket",
        "--user",
        "alex",
    ])?;

    assert_eq!(cli.settings.region, "eu-west-1");
    assert_eq!(cli.settings.path_style, Some(true));
    assert_eq!(cli.settings.retry().attempts, 5);
    assert_eq!(cli.settings.delete_concurrency, 2);
    assert_eq!(cli.log_format, LogFormat::Json);
    assert_eq!(
        cli.settings.s3_endpoint.as_ref().map(|url| url.as_str()),
        Some("http://localhost:9000/")
    );
    let Command::Deprovision(target) = cli.command else {
        panic!("expected the deprovision command");
    };
    assert_eq!(target.bucket, "shared-bucket");
    assert_eq!(target.user, "alex");
    Ok(())
}

#[test]
fn it_requires_a_user() {
    let parsed = TenancyCli::try_parse_from([
        "tenancy",
        "--access-key-id",
        "AKIAADMIN",
        "--secret-access-key",
        "admin-secret",
        "provision",
        "--bucket",
        "shared-bucket",
    ]);
    assert!(parsed.is_err());
}

#[tokio::test]
async fn it_provisions_and_writes_the_credential_file() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let (tenancy, identity, _) = fixture(directory.path()).await;
    let mut out = Vec::new();

    tenancy
        .execute(
            &Command::Provision(target("shared-bucket", "alex")),
            &mut out,
        )
        .await?;

    let line: serde_json::Value = serde_json::from_slice(&out)?;
    let path = directory.path().join("alex_accessKeys.csv");
    assert_eq!(line["user_name"], "alex");
    assert_eq!(
        line["credentials_file"],
        path.display().to_string().as_str()
    );

    let stored = CredentialStore::read(&path).await?;
    assert_eq!(line["access_key_id"], stored.access_key_id.as_str());
    assert_eq!(line["secret_access_key"], stored.secret_access_key.as_str());
    assert_eq!(identity.credentials("alex").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn it_refuses_before_touching_the_backend_when_a_file_exists() -> Result<()> {
    let directory = tempfile::tempdir()?;
    std::fs::write(directory.path().join("alex_accessKeys.csv"), "old")?;
    let (tenancy, identity, _) = fixture(directory.path()).await;

    let error = tenancy
        .provision(&target("shared-bucket", "alex"))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        CommandError::Store(StoreError::AlreadyExists(_))
    ));
    assert_eq!(error.kind(), "AlreadyExists");
    assert_eq!(identity.calls(IdentityOperation::CreateIdentity).await, 0);
    assert_eq!(
        std::fs::read_to_string(directory.path().join("alex_accessKeys.csv"))?,
        "old"
    );
    Ok(())
}

#[tokio::test]
async fn it_prints_the_teardown_outcome() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let (tenancy, identity, storage) = fixture(directory.path()).await;
    tenancy.provision(&target("shared-bucket", "alex")).await?;
    storage
        .put_object("shared-bucket", "alex/file1.txt", "one")
        .await;
    storage
        .put_object("shared-bucket", "jaime/file1.txt", "two")
        .await;
    let mut out = Vec::new();

    tenancy
        .execute(
            &Command::Deprovision(target("shared-bucket", "alex")),
            &mut out,
        )
        .await?;

    let line: serde_json::Value = serde_json::from_slice(&out)?;
    assert_eq!(line["user"], "alex");
    assert_eq!(line["outcome"]["identity_deleted"], true);
    assert_eq!(
        line["outcome"]["deleted_objects"],
        serde_json::json!(["alex/file1.txt"])
    );
    assert!(!identity.identity_exists("alex").await);
    assert_eq!(
        storage.keys("shared-bucket").await,
        vec!["jaime/file1.txt".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn it_reports_what_a_failed_provisioning_left_behind() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let (tenancy, identity, _) = fixture(directory.path()).await;
    identity
        .fail(
            IdentityOperation::CreateCredential,
            BackendError::Unavailable("connection reset".into()),
        )
        .await;

    let error = tenancy
        .provision(&target("shared-bucket", "alex"))
        .await
        .unwrap_err();

    let lines = report(&error);
    assert_eq!(error.kind(), "PartialProvisioning");
    assert!(lines.contains(&"step: create-credential".to_string()));
    assert!(lines.contains(&"  - identity alex".to_string()));
    assert!(!directory.path().join("alex_accessKeys.csv").exists());
    Ok(())
}

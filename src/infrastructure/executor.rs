use crate::application::config::Config;
use crate::core::{
    connector::{ConnectorKind, ConnectorSpec, ConnectorStatus, StatusKind, URL_SETTING},
    error::{ConnectorFailure, NotifierError, NotifierResult},
    notification::{BatchResult, ExecutionResult, NotificationData, NotificationDispatcher},
};
use crate::infrastructure::discovery::{self, is_executable};
use crate::infrastructure::process::ProcessTarget;
use crate::infrastructure::webhook::WebhookTarget;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use reqwest::Client;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Resolved delivery mechanism for one connector.
#[derive(Debug, Clone)]
enum Dispatch {
    Process(ProcessTarget),
    Http(WebhookTarget),
}

impl Dispatch {
    fn for_connector(spec: &ConnectorSpec) -> NotifierResult<Self> {
        match spec.kind {
            ConnectorKind::Script | ConnectorKind::Executable => {
                ProcessTarget::for_connector(spec).map(Dispatch::Process)
            }
            ConnectorKind::Http => WebhookTarget::for_connector(spec).map(Dispatch::Http),
        }
    }

    async fn run(
        &self,
        client: &Client,
        spec: &ConnectorSpec,
        data: &NotificationData,
        payload: &[u8],
    ) -> NotifierResult<()> {
        match self {
            Dispatch::Process(target) => target.run(spec, data, payload).await,
            Dispatch::Http(target) => target.send(client, spec, payload.to_vec()).await,
        }
    }
}

/// What one connector's retry sequence amounted to.
struct Attempted {
    attempts: u32,
    duration: Duration,
    outcome: NotifierResult<()>,
}

impl Attempted {
    fn to_result(&self, name: &str) -> ExecutionResult {
        ExecutionResult {
            connector_name: name.to_string(),
            success: self.outcome.is_ok(),
            error: self.outcome.as_ref().err().map(|e| e.to_string()),
            duration_ms: self.duration.as_millis() as u64,
            timestamp: Utc::now(),
            attempts: self.attempts,
        }
    }
}

/// Runs a connector until it succeeds or its retry budget is spent.
/// Attempts are strictly sequential with a fixed `retry_delay` between them.
async fn run_with_retry(
    client: &Client,
    spec: &ConnectorSpec,
    data: &NotificationData,
) -> Attempted {
    let started = Instant::now();
    let finish = |attempts, outcome| Attempted {
        attempts,
        duration: started.elapsed(),
        outcome,
    };

    // Configuration problems fail before the first attempt
    let dispatch = match Dispatch::for_connector(spec) {
        Ok(dispatch) => dispatch,
        Err(e) => return finish(0, Err(e)),
    };
    let payload = match serde_json::to_vec(data) {
        Ok(payload) => payload,
        Err(e) => return finish(0, Err(e.into())),
    };

    let max_attempts = spec.max_attempts();
    let mut attempt = 0;
    let last_error = loop {
        if attempt > 0 {
            tokio::time::sleep(spec.retry_delay()).await;
            debug!(
                "Retrying connector {} (attempt {}/{})",
                spec.name,
                attempt + 1,
                max_attempts
            );
        }

        let err = match dispatch.run(client, spec, data, &payload).await {
            Ok(()) => return finish(attempt + 1, Ok(())),
            Err(e) => e,
        };

        attempt += 1;
        debug!("Connector {} attempt {} failed: {}", spec.name, attempt, err);
        if attempt > spec.retry_count || !err.is_retryable() {
            break err;
        }
    };

    finish(
        attempt,
        Err(NotifierError::RetriesExhausted {
            connector: spec.name.clone(),
            attempts: attempt,
            source: Box::new(last_error),
        }),
    )
}

/// Loads connectors from a config snapshot and runs them.
pub struct ConnectorManager {
    config: Arc<Config>,
    http_client: Client,
}

impl ConnectorManager {
    pub fn new(config: Arc<Config>) -> NotifierResult<Self> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| NotifierError::HttpClient(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs every enabled connector concurrently, one task each. Returns the
    /// batch only if all of them succeeded; otherwise the error lists every
    /// failing connector, ordered by name.
    pub async fn execute_all(&self, data: &NotificationData) -> NotifierResult<BatchResult> {
        let connectors = self.config.enabled_connectors();
        if connectors.is_empty() {
            return Err(NotifierError::NoConnectorsEnabled);
        }

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            "[{}] Executing {} connectors for IP {}",
            run_id,
            connectors.len(),
            data.ip
        );

        let data = Arc::new(data.clone());
        let handles: Vec<(String, JoinHandle<Attempted>)> = connectors
            .into_iter()
            .map(|spec| {
                let client = self.http_client.clone();
                let data = Arc::clone(&data);
                let name = spec.name.clone();
                let handle =
                    tokio::spawn(async move { run_with_retry(&client, &spec, &data).await });
                (name, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut failures = Vec::new();
        for (name, handle) in handles {
            let attempted = handle.await.unwrap_or_else(|e| Attempted {
                attempts: 0,
                duration: Duration::ZERO,
                outcome: Err(NotifierError::ProcessExecutionFailed {
                    connector: name.clone(),
                    message: format!("connector task aborted: {}", e),
                }),
            });

            match &attempted.outcome {
                Ok(()) => info!("[{}] Connector {} executed successfully", run_id, name),
                Err(e) => {
                    error!("[{}] Connector {} failed: {}", run_id, name, e);
                    failures.push(ConnectorFailure {
                        connector: name.clone(),
                        message: e.to_string(),
                    });
                }
            }
            results.push(attempted.to_result(&name));
        }

        results.sort_by(|a, b| a.connector_name.cmp(&b.connector_name));
        failures.sort_by(|a, b| a.connector.cmp(&b.connector));

        let batch = BatchResult {
            run_id,
            total_connectors: results.len(),
            successful_count: results.len() - failures.len(),
            failed_count: failures.len(),
            total_duration_ms: started.elapsed().as_millis() as u64,
            results,
            timestamp: Utc::now(),
        };
        info!(
            "[{}] {}/{} connectors succeeded in {}ms",
            run_id, batch.successful_count, batch.total_connectors, batch.total_duration_ms
        );

        if failures.is_empty() {
            Ok(batch)
        } else {
            Err(NotifierError::ConnectorFailures(failures))
        }
    }

    /// Runs one named, enabled connector.
    pub async fn execute(
        &self,
        name: &str,
        data: &NotificationData,
    ) -> NotifierResult<ExecutionResult> {
        let spec = self
            .config
            .connector_by_name(name)
            .ok_or_else(|| NotifierError::ConnectorNotFound(name.to_string()))?;
        if !spec.enabled {
            return Err(NotifierError::ConnectorDisabled(name.to_string()));
        }

        self.run_single(spec.clone(), data).await
    }

    /// Runs a connector regardless of its enabled flag, using sample data
    /// when none is given. The config is never touched: the connector runs
    /// from a private copy.
    pub async fn test_connector(
        &self,
        name: &str,
        data: Option<NotificationData>,
    ) -> NotifierResult<ExecutionResult> {
        let spec = self
            .config
            .connector_by_name(name)
            .ok_or_else(|| NotifierError::ConnectorNotFound(name.to_string()))?
            .clone()
            .enabled(true);
        let data = data.unwrap_or_else(NotificationData::sample);

        info!("Testing connector {} with test data", name);
        self.run_single(spec, &data).await
    }

    async fn run_single(
        &self,
        spec: ConnectorSpec,
        data: &NotificationData,
    ) -> NotifierResult<ExecutionResult> {
        let attempted = run_with_retry(&self.http_client, &spec, data).await;
        let result = attempted.to_result(&spec.name);
        attempted.outcome.map(|()| result)
    }

    pub fn discover_connectors(&self) -> NotifierResult<Vec<ConnectorSpec>> {
        discovery::discover_connectors(&self.config.connector_path)
    }

    /// Sample configuration for this manager's connector directory, with
    /// every discovered connector not already named by a sample added. A
    /// failed scan is logged and leaves only the samples.
    pub fn initial_config(&self) -> Config {
        let mut config = Config::sample();
        config.connector_path = self.config.connector_path.clone();

        let discovered = match self.discover_connectors() {
            Ok(discovered) => discovered,
            Err(e) => {
                warn!("Failed to discover connectors: {}", e);
                return config;
            }
        };

        for connector in discovered {
            let name = connector.name.clone();
            match config.add_connector(connector) {
                Ok(()) => info!("Adding discovered connector {}", name),
                Err(e) => debug!("Skipping discovered connector: {}", e),
            }
        }

        config
    }

    /// Structural check of a connector: the file must exist and be
    /// executable for process connectors, http connectors need a `url`.
    pub fn validate_connector(spec: &ConnectorSpec) -> NotifierResult<()> {
        match spec.kind {
            ConnectorKind::Script | ConnectorKind::Executable => {
                if !spec.path.is_absolute() {
                    return Err(NotifierError::PathNotAbsolute(spec.path.clone()));
                }

                let metadata = fs::metadata(&spec.path).map_err(|e| match e.kind() {
                    ErrorKind::NotFound => NotifierError::PathNotFound(spec.path.clone()),
                    _ => NotifierError::FileReadError {
                        path: spec.path.clone(),
                        source: e,
                    },
                })?;

                if !metadata.is_file() || !is_executable(&metadata) {
                    return Err(NotifierError::NotExecutable(spec.path.clone()));
                }
            }
            ConnectorKind::Http => {
                if spec.url().is_none() {
                    return Err(NotifierError::MissingSetting {
                        connector: spec.name.clone(),
                        key: URL_SETTING.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn connector_status(&self) -> BTreeMap<String, ConnectorStatus> {
        self.config
            .connectors
            .iter()
            .map(|spec| {
                let (status, error) = match Self::validate_connector(spec) {
                    Err(e) => (StatusKind::Invalid, Some(e.to_string())),
                    Ok(()) if spec.enabled => (StatusKind::Ready, None),
                    Ok(()) => (StatusKind::Disabled, None),
                };

                let status = ConnectorStatus {
                    name: spec.name.clone(),
                    kind: spec.kind,
                    enabled: spec.enabled,
                    path: spec.path.clone(),
                    description: spec.description.clone(),
                    status,
                    error,
                };
                (spec.name.clone(), status)
            })
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for ConnectorManager {
    async fn dispatch(&self, data: &NotificationData) -> NotifierResult<BatchResult> {
        self.execute_all(data).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/bash\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    fn manager(connectors: Vec<ConnectorSpec>) -> ConnectorManager {
        let config = Config {
            connectors,
            ..Config::default()
        };
        ConnectorManager::new(Arc::new(config)).unwrap()
    }

    #[test]
    fn test_initial_config_uses_current_connector_dir() {
        let dir = TempDir::new().unwrap();
        script(dir.path(), "pager.sh", "exit 0", 0o755);
        script(dir.path(), "slack.sh", "exit 0", 0o755);

        let config = Config {
            connector_path: dir.path().to_path_buf(),
            ..Config::default()
        };
        let manager = ConnectorManager::new(Arc::new(config)).unwrap();
        let initial = manager.initial_config();

        assert_eq!(initial.connector_path, dir.path());
        let pager = initial.connector_by_name("pager").unwrap();
        assert!(!pager.enabled);
        assert!(pager.path.ends_with("pager.sh"));
        // the sample slack connector wins over the discovered one
        let slack = initial.connector_by_name("slack").unwrap();
        assert!(slack.path.ends_with("connectors/slack.sh"));
        assert_eq!(
            initial.connectors.len(),
            Config::sample().connectors.len() + 1
        );
    }

    #[test]
    fn test_initial_config_survives_discovery_error() {
        let dir = TempDir::new().unwrap();
        let not_a_dir = script(dir.path(), "file.sh", "exit 0", 0o644);

        let config = Config {
            connector_path: not_a_dir.clone(),
            ..Config::default()
        };
        let manager = ConnectorManager::new(Arc::new(config)).unwrap();
        assert!(manager.discover_connectors().is_err());

        let initial = manager.initial_config();
        assert_eq!(initial.connector_path, not_a_dir);
        assert_eq!(initial.connectors, Config::sample().connectors);
    }

    #[test]
    fn test_validate_http() {
        let spec = ConnectorSpec::new("hook", ConnectorKind::Http);
        assert!(matches!(
            ConnectorManager::validate_connector(&spec),
            Err(NotifierError::MissingSetting { .. })
        ));

        let spec = spec.with_setting("url", "http://localhost/hook");
        assert!(ConnectorManager::validate_connector(&spec).is_ok());
    }

    #[test]
    fn test_validate_process_paths() {
        let dir = TempDir::new().unwrap();
        let runnable = script(dir.path(), "ok.sh", "exit 0", 0o755);
        let plain = script(dir.path(), "plain.sh", "exit 0", 0o644);

        let ok = ConnectorSpec::new("ok", ConnectorKind::Script).with_path(&runnable);
        assert!(ConnectorManager::validate_connector(&ok).is_ok());

        let plain = ConnectorSpec::new("plain", ConnectorKind::Script).with_path(&plain);
        assert!(matches!(
            ConnectorManager::validate_connector(&plain),
            Err(NotifierError::NotExecutable(_))
        ));

        let missing = ConnectorSpec::new("missing", ConnectorKind::Executable)
            .with_path(dir.path().join("gone"));
        assert!(matches!(
            ConnectorManager::validate_connector(&missing),
            Err(NotifierError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_connector_status() {
        let dir = TempDir::new().unwrap();
        let runnable = script(dir.path(), "ok.sh", "exit 0", 0o755);

        let manager = manager(vec![
            ConnectorSpec::new("ready", ConnectorKind::Script)
                .with_path(&runnable)
                .enabled(true),
            ConnectorSpec::new("idle", ConnectorKind::Script).with_path(&runnable),
            ConnectorSpec::new("broken", ConnectorKind::Http).enabled(true),
        ]);

        let status = manager.connector_status();
        assert_eq!(status.len(), 3);
        assert_eq!(status["ready"].status, StatusKind::Ready);
        assert_eq!(status["idle"].status, StatusKind::Disabled);
        assert_eq!(status["broken"].status, StatusKind::Invalid);
        assert!(status["broken"].error.as_deref().unwrap().contains("url"));
        assert!(status["ready"].error.is_none());
    }

    #[tokio::test]
    async fn test_execute_unknown_and_disabled() {
        let manager = manager(vec![ConnectorSpec::new("off", ConnectorKind::Http)
            .with_setting("url", "http://127.0.0.1:9/")]);
        let data = NotificationData::sample();

        assert!(matches!(
            manager.execute("nope", &data).await,
            Err(NotifierError::ConnectorNotFound(n)) if n == "nope"
        ));
        assert!(matches!(
            manager.execute("off", &data).await,
            Err(NotifierError::ConnectorDisabled(n)) if n == "off"
        ));
        assert!(matches!(
            manager.execute_all(&data).await,
            Err(NotifierError::NoConnectorsEnabled)
        ));
    }

    #[tokio::test]
    async fn test_missing_url_fails_without_retrying() {
        let mut spec = ConnectorSpec::new("hook", ConnectorKind::Http).enabled(true);
        spec.retry_count = 5;
        spec.retry_delay = 10;
        let manager = manager(vec![spec]);

        let started = Instant::now();
        let err = manager
            .execute("hook", &NotificationData::sample())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifierError::MissingSetting { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_count_bounds_attempts() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let path = script(
            dir.path(),
            "fail.sh",
            &format!("echo x >> {}\nexit 1", counter.display()),
            0o755,
        );

        let mut spec = ConnectorSpec::new("flaky", ConnectorKind::Script)
            .with_path(&path)
            .enabled(true);
        spec.retry_count = 2;
        spec.retry_delay = 1;
        let manager = manager(vec![spec]);

        let started = Instant::now();
        let err = manager
            .execute("flaky", &NotificationData::sample())
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(fs::read_to_string(&counter).unwrap().lines().count(), 3);
        match err {
            NotifierError::RetriesExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, NotifierError::ProcessExecutionFailed { .. }));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("seen");
        let path = script(
            dir.path(),
            "second.sh",
            &format!(
                "if [ -f {m} ]; then exit 0; fi\ntouch {m}\nexit 1",
                m = marker.display()
            ),
            0o755,
        );

        let mut spec = ConnectorSpec::new("second", ConnectorKind::Script)
            .with_path(&path)
            .enabled(true);
        spec.retry_count = 1;
        spec.retry_delay = 1;
        let manager = manager(vec![spec]);

        let result = manager
            .execute("second", &NotificationData::sample())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_test_connector_runs_disabled_without_mutation() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let path = script(
            dir.path(),
            "probe.sh",
            &format!("echo \"$F2B_JAIL $F2B_IP\" > {}", out.display()),
            0o755,
        );

        let mut broken = ConnectorSpec::new("broken", ConnectorKind::Script)
            .with_path(dir.path().join("gone.sh"));
        broken.retry_count = 0;
        let manager = manager(vec![
            ConnectorSpec::new("sampled", ConnectorKind::Script).with_path(&path),
            broken,
        ]);

        let result = manager.test_connector("sampled", None).await.unwrap();
        assert!(result.success);
        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "test 192.168.1.100");
        assert!(!manager.config().connector_by_name("sampled").unwrap().enabled);

        let mut quick = NotificationData::sample();
        quick.jail = "nginx".to_string();
        assert!(manager.test_connector("broken", Some(quick)).await.is_err());
        assert!(!manager.config().connector_by_name("broken").unwrap().enabled);

        assert!(matches!(
            manager.test_connector("ghost", None).await,
            Err(NotifierError::ConnectorNotFound(_))
        ));
    }
}

//! Starting applications on behalf of a launcher node.
//!
//! A launcher owns a catalogue of applications it may start. `launchApp`
//! looks the application up, spawns it detached with the requesting node
//! name as its first argument, and reports the first line it prints.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use nimo_core::ApplicationInfo;

use crate::error::LaunchError;

/// How long to wait for a freshly started application's first line.
pub const FIRST_LINE_TIMEOUT: Duration = Duration::from_secs(5);

/// One application a launcher can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchableApp {
    pub name: String,
    pub description: String,
    pub exec_path: String,
    /// Working directory; empty means inherit.
    pub directory: String,
}

/// Applications a launcher offers, by name.
#[derive(Debug, Clone, Default)]
pub struct AppCatalogue {
    apps: BTreeMap<String, LaunchableApp>,
}

impl AppCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, app: LaunchableApp) -> &mut Self {
        self.apps.insert(app.name.clone(), app);
        self
    }

    pub fn get(&self, name: &str) -> Option<&LaunchableApp> {
        self.apps.get(name)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Registry records for every application, owned by `launcher`.
    pub fn records(&self, launcher: &str) -> Vec<ApplicationInfo> {
        self.apps
            .values()
            .map(|app| ApplicationInfo {
                launcher_node: launcher.to_string(),
                app_name: app.name.clone(),
                app_description: app.description.clone(),
            })
            .collect()
    }

    /// The request that starts `app` for node `node_name`.
    pub fn request(
        &self,
        app: &str,
        node_name: &str,
        arguments: &[String],
    ) -> Result<LaunchRequest, LaunchError> {
        let entry = self
            .get(app)
            .ok_or_else(|| LaunchError::UnknownApplication(app.to_string()))?;
        let mut all = Vec::with_capacity(arguments.len() + 1);
        all.push(node_name.to_string());
        all.extend(arguments.iter().cloned());
        Ok(LaunchRequest {
            program: entry.exec_path.clone(),
            directory: (!entry.directory.is_empty()).then(|| entry.directory.clone()),
            arguments: all,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: String,
    pub directory: Option<String>,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub pid: Option<u32>,
    /// `None` when the process printed nothing in time.
    pub first_line: Option<String>,
}

/// Starts external processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, LaunchError>;
}

/// Spawns with `tokio::process` and detaches once the first line is read.
#[derive(Debug, Clone)]
pub struct TokioLauncher {
    first_line_timeout: Duration,
}

impl TokioLauncher {
    pub fn new() -> Self {
        Self::with_timeout(FIRST_LINE_TIMEOUT)
    }

    pub fn with_timeout(first_line_timeout: Duration) -> Self {
        Self { first_line_timeout }
    }
}

impl Default for TokioLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, LaunchError> {
        let program = request.program.clone();
        let mut command = Command::new(&request.program);
        command
            .args(&request.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(directory) = &request.directory {
            command.current_dir(directory);
        }

        let mut child = command.spawn().map_err(|e| LaunchError::Spawn {
            program: program.clone(),
            error: e.to_string(),
        })?;
        let pid = child.id();
        info!(program = %program, pid = ?pid, "Application started");

        let Some(stdout) = child.stdout.take() else {
            return Err(LaunchError::Output {
                program,
                error: "stdout not captured".to_string(),
            });
        };
        let mut lines = BufReader::new(stdout).lines();

        let first_line = match timeout(self.first_line_timeout, lines.next_line()).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                warn!(program = %program, error = %e, "Failed to read application output");
                None
            }
            Err(_) => {
                debug!(program = %program, "No output before timeout");
                None
            }
        };

        // Keep draining so the child never blocks on a full pipe, then reap it.
        tokio::spawn(async move {
            while let Ok(Some(_)) = lines.next_line().await {}
            match child.wait().await {
                Ok(status) => debug!(program = %program, %status, "Application exited"),
                Err(e) => warn!(program = %program, error = %e, "Failed to reap application"),
            }
        });

        Ok(LaunchOutcome { pid, first_line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> AppCatalogue {
        let mut catalogue = AppCatalogue::new();
        catalogue.insert(LaunchableApp {
            name: "echo".to_string(),
            description: "prints its arguments".to_string(),
            exec_path: "echo".to_string(),
            directory: String::new(),
        });
        catalogue
    }

    #[test]
    fn test_request_puts_node_name_first() {
        let request = catalogue()
            .request("echo", "n1", &["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(request.program, "echo");
        assert_eq!(request.directory, None);
        assert_eq!(request.arguments, vec!["n1", "a", "b"]);
    }

    #[test]
    fn test_unknown_application() {
        assert_eq!(
            catalogue().request("nope", "n1", &[]),
            Err(LaunchError::UnknownApplication("nope".to_string()))
        );
    }

    #[test]
    fn test_records_carry_launcher() {
        let records = catalogue().records("launcher");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].launcher_node, "launcher");
        assert_eq!(records[0].app_name, "echo");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_launcher_reads_first_line() {
        let request = catalogue()
            .request("echo", "n1", &["hello".to_string()])
            .unwrap();
        let outcome = TokioLauncher::new().launch(request).await.unwrap();
        assert_eq!(outcome.first_line.as_deref(), Some("n1 hello"));
        assert!(outcome.pid.is_some());
    }

    #[tokio::test]
    async fn test_tokio_launcher_spawn_failure() {
        let request = LaunchRequest {
            program: "/nonexistent/nimo-test-binary".to_string(),
            directory: None,
            arguments: Vec::new(),
        };
        let err = TokioLauncher::new().launch(request).await.unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }
}

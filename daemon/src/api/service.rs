//! Service lifecycle passthrough to the system supervisor

use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

const SUPERVISOR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Status,
}

impl ServiceAction {
    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "start" => Some(ServiceAction::Start),
            "stop" => Some(ServiceAction::Stop),
            "restart" => Some(ServiceAction::Restart),
            "status" => Some(ServiceAction::Status),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Status => "status",
        }
    }

    /// Supervisor arguments, excluding the unit name.
    ///
    /// Lifecycle changes are queued without blocking: stopping the unit
    /// waits for this very process, which is still serving the request.
    fn args(self) -> &'static [&'static str] {
        match self {
            ServiceAction::Start => &["--no-block", "start"],
            ServiceAction::Stop => &["--no-block", "stop"],
            ServiceAction::Restart => &["--no-block", "restart"],
            ServiceAction::Status => &["status", "--no-pager"],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceOutput {
    pub action: &'static str,
    pub unit: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
}

pub struct ServiceController {
    program: String,
    unit: String,
}

impl ServiceController {
    pub fn new(unit: String) -> Self {
        Self::with_program("systemctl".to_string(), unit)
    }

    pub fn with_program(program: String, unit: String) -> Self {
        Self { program, unit }
    }

    pub async fn run(&self, action: ServiceAction) -> anyhow::Result<ServiceOutput> {
        info!("Supervisor request: {} {}", action.as_str(), self.unit);

        let command = Command::new(&self.program)
            .args(action.args())
            .arg(&self.unit)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(SUPERVISOR_TIMEOUT, command).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("{} {} timed out after {:?}", self.program, action.as_str(), SUPERVISOR_TIMEOUT),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        // `status` reports an inactive unit with a non-zero exit; that is data, not failure
        let success = output.status.success() || action == ServiceAction::Status;
        if !success {
            warn!("Supervisor {} failed: {}", action.as_str(), text.trim());
        }

        Ok(ServiceOutput {
            action: action.as_str(),
            unit: self.unit.clone(),
            success,
            exit_code: output.status.code(),
            output: text.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        for action in [ServiceAction::Start, ServiceAction::Stop, ServiceAction::Restart, ServiceAction::Status] {
            assert_eq!(ServiceAction::from_name(action.as_str()), Some(action));
        }
        assert_eq!(ServiceAction::from_name("reload"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_passthrough_arguments() {
        let controller = ServiceController::with_program("echo".to_string(), "netprobe".to_string());
        let output = controller.run(ServiceAction::Restart).await.unwrap();
        assert!(output.success);
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.output, "--no-block restart netprobe");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_reported() {
        let controller = ServiceController::with_program("false".to_string(), "netprobe".to_string());
        let output = controller.run(ServiceAction::Stop).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_missing_supervisor_is_error() {
        let controller = ServiceController::with_program("/nonexistent/systemctl".to_string(), "netprobe".to_string());
        assert!(controller.run(ServiceAction::Status).await.is_err());
    }
}

//! Placeholder substitution for launch requests.
//!
//! Launch requests may reference agent-local directories through `${...}`
//! placeholders; they are resolved here before anything touches the OS.

use std::collections::HashMap;

use taskhost_core::LaunchTaskInstanceRequest;

/// Values the agent substitutes into launch inputs.
#[derive(Debug, Clone)]
pub struct SubstitutionConfig {
    pub home: String,
    pub project_dir: String,
    pub stdout_dir: String,
    pub stderr_dir: String,
}

/// Applies `${HOME}`, `${PROJECT_DIR}`, `${STDOUT_DIR}` and `${STDERR_DIR}`
/// across a launch request's command, working directory, arguments,
/// environment values and stdio paths.
pub struct VariableSubstitution {
    config: SubstitutionConfig,
}

impl VariableSubstitution {
    pub fn new(config: SubstitutionConfig) -> Self {
        Self { config }
    }

    /// Resolve every placeholder in the request.
    pub fn apply(&self, request: LaunchTaskInstanceRequest) -> LaunchTaskInstanceRequest {
        let arguments = request
            .arguments
            .map(|args| args.into_iter().map(|a| self.resolve(&a)).collect());
        let env = request.env.map(|env| {
            env.into_iter()
                .map(|(k, v)| (k, self.resolve(&v)))
                .collect::<HashMap<_, _>>()
        });

        LaunchTaskInstanceRequest {
            task_id: request.task_id,
            version: request.version,
            instance_id: request.instance_id,
            cmd: self.resolve(&request.cmd),
            cwd: self.resolve(&request.cwd),
            arguments,
            env,
            stdout: request.stdout.map(|p| self.resolve(&p)),
            stderr: request.stderr.map(|p| self.resolve(&p)),
            health_check: request.health_check,
        }
    }

    fn resolve(&self, input: &str) -> String {
        input
            .replace("${HOME}", &self.config.home)
            .replace("${PROJECT_DIR}", &self.config.project_dir)
            .replace("${STDOUT_DIR}", &self.config.stdout_dir)
            .replace("${STDERR_DIR}", &self.config.stderr_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskhost_core::{InstanceId, TaskId};

    fn substitution() -> VariableSubstitution {
        VariableSubstitution::new(SubstitutionConfig {
            home: "/srv/agent".to_string(),
            project_dir: "/srv/agent/projects".to_string(),
            stdout_dir: "/srv/agent/stdout".to_string(),
            stderr_dir: "/srv/agent/stderr".to_string(),
        })
    }

    fn request() -> LaunchTaskInstanceRequest {
        LaunchTaskInstanceRequest {
            task_id: TaskId::new("etl"),
            version: 1,
            instance_id: InstanceId::new("i-1"),
            cmd: "${PROJECT_DIR}/run.sh".to_string(),
            cwd: "${HOME}".to_string(),
            arguments: Some(vec!["--data".to_string(), "${PROJECT_DIR}/data".to_string()]),
            env: Some(HashMap::from([(
                "LOG_DIR".to_string(),
                "${STDOUT_DIR}".to_string(),
            )])),
            stdout: Some("${STDOUT_DIR}/i-1.log".to_string()),
            stderr: Some("${STDERR_DIR}/i-1.log".to_string()),
            health_check: None,
        }
    }

    #[test]
    fn test_apply_resolves_every_field() {
        let resolved = substitution().apply(request());

        assert_eq!(resolved.cmd, "/srv/agent/projects/run.sh");
        assert_eq!(resolved.cwd, "/srv/agent");
        assert_eq!(
            resolved.arguments.unwrap()[1],
            "/srv/agent/projects/data"
        );
        assert_eq!(
            resolved.env.unwrap().get("LOG_DIR").unwrap(),
            "/srv/agent/stdout"
        );
        assert_eq!(resolved.stdout.unwrap(), "/srv/agent/stdout/i-1.log");
        assert_eq!(resolved.stderr.unwrap(), "/srv/agent/stderr/i-1.log");
    }

    #[test]
    fn test_apply_leaves_plain_strings_alone() {
        let mut plain = request();
        plain.cmd = "python job.py".to_string();
        plain.cwd = "/tmp".to_string();
        plain.arguments = None;
        plain.env = None;
        plain.stdout = None;
        plain.stderr = None;

        let resolved = substitution().apply(plain.clone());
        assert_eq!(resolved, plain);
    }
}

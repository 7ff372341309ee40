//! Pipeline configuration from YAML

use crate::core::{Pipeline, RetryPolicy};
use crate::runtime::{MountMode, Runtime};
use crate::steps::{ExtractLoadStep, TransformStep};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Host directory containing the dbt project (`custom_postgres/`)
pub const HOST_PROJECT_PATH_ENV: &str = "HOST_PROJECT_PATH";

/// Host directory holding `profiles.yml`
pub const HOST_CREDENTIALS_PATH_ENV: &str = "HOST_CREDENTIALS_PATH";

const DEFAULT_HOST_PROJECT_PATH: &str = "/tmp";

/// Container path the dbt project is mounted at
pub const DBT_PROJECT_TARGET: &str = "/dbt";

/// Container path the credentials directory is mounted at
pub const DBT_PROFILES_TARGET: &str = "/home/airflow/.dbt";

/// Shell sequence run inside the transform container
pub const DBT_RUN_SCRIPT: &str = "apt-get update && apt-get install -y git && \
pip install dbt-postgres==1.4.7 && \
echo '=== Starting dbt transformations ===' && \
cd /dbt && \
dbt run --profiles-dir /home/airflow/.dbt && \
echo '=== dbt transformations completed successfully ==='";

const TEMPLATE_PATTERN: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";
const ENV_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";
const RESOURCE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]*$";

/// Host locations substituted into mount sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub project_path: PathBuf,
    pub credentials_dir: PathBuf,
}

impl HostPaths {
    pub fn new(project_path: impl Into<PathBuf>, credentials_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            credentials_dir: credentials_dir.into(),
        }
    }

    /// Resolve from `HOST_PROJECT_PATH` / `HOST_CREDENTIALS_PATH`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve with a custom variable lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project_path = get(HOST_PROJECT_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_PROJECT_PATH));

        let credentials_dir = get(HOST_CREDENTIALS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_credentials_dir);

        Self {
            project_path,
            credentials_dir,
        }
    }

    /// Built-in template variables
    fn variables(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert(
            "host_project_path".to_string(),
            self.project_path.display().to_string(),
        );
        vars.insert(
            "credentials_dir".to_string(),
            self.credentials_dir.display().to_string(),
        );
        vars
    }
}

fn default_credentials_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_PROJECT_PATH))
        .join(".dbt")
}

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Concurrent runs allowed for this pipeline
    #[serde(default = "default_max_active_runs")]
    pub max_active_runs: usize,

    /// Retry policy applied to steps without their own
    #[serde(default)]
    pub default_args: DefaultArgs,

    /// Values for `{{ name }}` placeholders
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Steps in execution order
    pub steps: Vec<StepConfig>,
}

/// Pipeline-wide step defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultArgs {
    #[serde(default = "default_retries")]
    pub retries: usize,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for DefaultArgs {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl DefaultArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_secs(self.retry_delay_secs))
    }
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepConfig {
    /// Run a script through an interpreter on the local host
    Process(ProcessStepConfig),
    /// Run a command inside a container
    Container(ContainerStepConfig),
}

impl StepConfig {
    pub fn id(&self) -> &str {
        match self {
            StepConfig::Process(p) => &p.id,
            StepConfig::Container(c) => &c.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StepConfig::Process(_) => "process",
            StepConfig::Container(_) => "container",
        }
    }

    fn retry_override(&self) -> (Option<usize>, Option<u64>) {
        match self {
            StepConfig::Process(p) => (p.retries, p.retry_delay_secs),
            StepConfig::Container(c) => (c.retries, c.retry_delay_secs),
        }
    }

    /// Effective retry policy given the pipeline defaults
    pub fn retry_policy(&self, defaults: &DefaultArgs) -> RetryPolicy {
        let (retries, delay) = self.retry_override();
        RetryPolicy::new(
            retries.unwrap_or(defaults.retries),
            Duration::from_secs(delay.unwrap_or(defaults.retry_delay_secs)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStepConfig {
    pub id: String,

    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Script path; may contain placeholders
    pub script: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStepConfig {
    pub id: String,

    pub image: String,

    #[serde(default = "default_docker_url")]
    pub docker_url: String,

    #[serde(default)]
    pub network_mode: Option<String>,

    #[serde(default)]
    pub auto_remove: bool,

    #[serde(default)]
    pub mounts: Vec<MountConfig>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
}

/// Bind mount as written in YAML; `source` may contain placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub mode: MountMode,
}

fn default_max_active_runs() -> usize {
    1
}

fn default_retries() -> usize {
    1
}

fn default_retry_delay_secs() -> u64 {
    5 * 60
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_docker_url() -> String {
    "unix://var/run/docker.sock".to_string()
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid pipeline file {}", path.display()))
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// The `elt_and_dbt` pipeline: load script, then dbt in a container
    pub fn elt_and_dbt() -> Self {
        let mut variables = BTreeMap::new();
        variables.insert(
            "elt_script_path".to_string(),
            "/opt/airflow/elt/elt_script.py".to_string(),
        );

        let mut env = BTreeMap::new();
        env.insert("DBT_PROFILES_DIR".to_string(), DBT_PROFILES_TARGET.to_string());

        Self {
            name: "elt_and_dbt".to_string(),
            description: Some("An ELT workflow with dbt".to_string()),
            max_active_runs: 1,
            default_args: DefaultArgs::default(),
            variables,
            steps: vec![
                StepConfig::Process(ProcessStepConfig {
                    id: "run_elt_script".to_string(),
                    interpreter: default_interpreter(),
                    script: "{{ elt_script_path }}".to_string(),
                    timeout_secs: default_timeout_secs(),
                    retries: None,
                    retry_delay_secs: None,
                }),
                StepConfig::Container(ContainerStepConfig {
                    id: "dbt_run".to_string(),
                    image: "python:3.9-slim".to_string(),
                    docker_url: default_docker_url(),
                    network_mode: Some("elt_elt_network".to_string()),
                    auto_remove: false,
                    mounts: vec![
                        MountConfig {
                            source: "{{ host_project_path }}/custom_postgres".to_string(),
                            target: DBT_PROJECT_TARGET.to_string(),
                            mode: MountMode::ReadWrite,
                        },
                        MountConfig {
                            source: "{{ credentials_dir }}".to_string(),
                            target: DBT_PROFILES_TARGET.to_string(),
                            mode: MountMode::ReadWrite,
                        },
                    ],
                    env,
                    command: vec![
                        "bash".to_string(),
                        "-c".to_string(),
                        DBT_RUN_SCRIPT.to_string(),
                    ],
                    retries: None,
                    retry_delay_secs: None,
                }),
            ],
        }
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        let resource_name = Regex::new(RESOURCE_NAME_PATTERN)?;
        let env_name = Regex::new(ENV_NAME_PATTERN)?;

        if !resource_name.is_match(&self.name) {
            anyhow::bail!(
                "Pipeline name '{}' must start with a letter or digit and contain only letters, digits, '_', '.' or '-'",
                self.name
            );
        }
        if self.max_active_runs == 0 {
            anyhow::bail!("max_active_runs must be at least 1");
        }
        if self.steps.is_empty() {
            anyhow::bail!("Pipeline '{}' has no steps", self.name);
        }

        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            let id = step.id();
            if !seen_ids.insert(id) {
                anyhow::bail!("Duplicate step ID: {}", id);
            }
            if !resource_name.is_match(id) {
                anyhow::bail!(
                    "Step ID '{}' must start with a letter or digit and contain only letters, digits, '_', '.' or '-'",
                    id
                );
            }

            match step {
                StepConfig::Process(p) => {
                    if p.timeout_secs == 0 {
                        anyhow::bail!("Step '{}' timeout_secs must be greater than 0", id);
                    }
                    if p.interpreter.trim().is_empty() {
                        anyhow::bail!("Step '{}' has an empty interpreter", id);
                    }
                    if p.script.trim().is_empty() {
                        anyhow::bail!("Step '{}' has an empty script path", id);
                    }
                }
                StepConfig::Container(c) => {
                    if c.image.trim().is_empty() {
                        anyhow::bail!("Step '{}' has an empty image", id);
                    }
                    if c.command.is_empty() {
                        anyhow::bail!("Step '{}' has an empty command", id);
                    }
                    for mount in &c.mounts {
                        if !mount.target.starts_with('/') {
                            anyhow::bail!(
                                "Step '{}' mount target '{}' must be an absolute container path",
                                id,
                                mount.target
                            );
                        }
                    }
                    for key in c.env.keys() {
                        if !env_name.is_match(key) {
                            anyhow::bail!(
                                "Step '{}' has an invalid environment variable name '{}'",
                                id,
                                key
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Template variables: host paths, then config values, then `overrides`
    pub fn resolved_variables(
        &self,
        host: &HostPaths,
        overrides: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut vars = host.variables();
        vars.extend(self.variables.clone());
        vars.extend(overrides.clone());
        vars
    }

    /// Build an executable pipeline against the given collaborators
    pub fn build(&self, host: &HostPaths, runtime: &Runtime) -> Result<Pipeline> {
        self.build_with_vars(host, runtime, &BTreeMap::new())
    }

    /// Like [`PipelineConfig::build`] with extra variable overrides
    pub fn build_with_vars(
        &self,
        host: &HostPaths,
        runtime: &Runtime,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Pipeline> {
        self.validate()?;
        let vars = self.resolved_variables(host, overrides);

        let mut builder = Pipeline::builder(&self.name)
            .max_active_runs(self.max_active_runs)
            .default_retry(self.default_args.retry_policy());
        if let Some(description) = &self.description {
            builder = builder.description(description);
        }

        for step in &self.steps {
            let retry = step.retry_policy(&self.default_args);
            builder = match step {
                StepConfig::Process(p) => {
                    let script = render_template(&p.script, &vars)
                        .with_context(|| format!("Step '{}' script", p.id))?;
                    let step = ExtractLoadStep::new(&p.id, script, runtime.processes.clone())
                        .with_interpreter(&p.interpreter)
                        .with_timeout(Duration::from_secs(p.timeout_secs));
                    builder.step_with_retry(Arc::new(step), retry)
                }
                StepConfig::Container(c) => {
                    let step = TransformStep::from_config(c, &vars, runtime.containers.clone())?;
                    builder.step_with_retry(Arc::new(step), retry)
                }
            };
        }

        builder.build()
    }

    /// Bind-mount sources and scripts that do not exist on this host
    ///
    /// Informational only: the container engine may run somewhere else.
    pub fn host_path_warnings(&self, host: &HostPaths) -> Vec<String> {
        let vars = self.resolved_variables(host, &BTreeMap::new());
        let mut warnings = Vec::new();

        for step in &self.steps {
            match step {
                StepConfig::Process(p) => {
                    if let Ok(script) = render_template(&p.script, &vars) {
                        if !Path::new(&script).exists() {
                            warnings.push(format!(
                                "Step '{}': script {} does not exist on this host",
                                p.id, script
                            ));
                        }
                    }
                }
                StepConfig::Container(c) => {
                    for mount in &c.mounts {
                        if let Ok(source) = render_template(&mount.source, &vars) {
                            if !Path::new(&source).exists() {
                                warnings.push(format!(
                                    "Step '{}': mount source {} does not exist on this host",
                                    c.id, source
                                ));
                            }
                        }
                    }
                }
            }
        }

        warnings
    }
}

/// Replace `{{ name }}` placeholders; unknown names are an error
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let re = Regex::new(TEMPLATE_PATTERN)?;

    let missing: Vec<&str> = re
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|name| !vars.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("Undefined variable(s): {}", missing.join(", "));
    }

    let rendered = re.replace_all(template, |caps: &regex::Captures| {
        vars.get(&caps[1]).cloned().unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

//! Per-cluster deployment configuration: resources, environment, instance
//! counts, volumes, and startup health checking.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default readiness-check protocol filled in by repair.
pub const DEFAULT_CHECK_READY_PROTOCOL: &str = "HTTP";

/// Default readiness-check path filled in by repair.
pub const DEFAULT_CHECK_READY_PATH: &str = "/health";

/// String-keyed resource map (cpus, memory, ports, ...).
pub type Resources = BTreeMap<String, String>;

/// Opaque metadata for outside applications; compared but not interpreted.
pub type Metadata = BTreeMap<String, String>;

/// Environment variables provisioned into each instance.
pub type Env = BTreeMap<String, String>;

/// Mount mode for a volume mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeMode {
    #[serde(rename = "RO")]
    #[default]
    ReadOnly,
    #[serde(rename = "RW")]
    ReadWrite,
}

/// A host path mounted into the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub host: String,
    pub container: String,
    #[serde(default)]
    pub mode: VolumeMode,
}

/// Startup health checking options for a deploy.
///
/// All checkready fields are optional; repair fills protocol and path
/// defaults when checking is enabled and they are unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Startup {
    pub skip_check: bool,
    pub connect_delay: Option<u32>,
    pub timeout: Option<u32>,
    pub connect_interval: Option<u32>,
    pub check_ready_protocol: Option<String>,
    pub check_ready_uri_path: Option<String>,
    pub check_ready_port_index: Option<u32>,
    pub check_ready_failure_statuses: Vec<u16>,
    pub check_ready_uri_timeout: Option<u32>,
    pub check_ready_interval: Option<u32>,
    pub check_ready_retries: Option<u32>,
}

impl Startup {
    /// Field-by-field differences against another startup config.
    pub fn diff(&self, other: &Startup) -> Vec<String> {
        let mut diffs = Vec::new();
        macro_rules! field {
            ($name:literal, $field:ident) => {
                if self.$field != other.$field {
                    diffs.push(format!(
                        concat!($name, "; this: {:?}; other: {:?}"),
                        self.$field, other.$field
                    ));
                }
            };
        }
        field!("startup skip check", skip_check);
        field!("startup connect delay", connect_delay);
        field!("startup timeout", timeout);
        field!("startup connect interval", connect_interval);
        field!("startup checkready protocol", check_ready_protocol);
        field!("startup checkready uri path", check_ready_uri_path);
        field!("startup checkready port index", check_ready_port_index);
        field!(
            "startup checkready failure statuses",
            check_ready_failure_statuses
        );
        field!("startup checkready uri timeout", check_ready_uri_timeout);
        field!("startup checkready interval", check_ready_interval);
        field!("startup checkready retries", check_ready_retries);
        diffs
    }

    fn needs_defaults(&self) -> bool {
        !self.skip_check
            && (self.check_ready_protocol.is_none() || self.check_ready_uri_path.is_none())
    }

    fn fill_defaults(&mut self) {
        if self.check_ready_protocol.is_none() {
            self.check_ready_protocol = Some(DEFAULT_CHECK_READY_PROTOCOL.to_string());
        }
        if self.check_ready_uri_path.is_none() {
            self.check_ready_uri_path = Some(DEFAULT_CHECK_READY_PATH.to_string());
        }
    }
}

/// A shape problem found by validation.
///
/// Repairable flaws are fixed in place by [`DeployConfig::repair`]; the
/// rest must be surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flaw {
    /// The volume list carries an explicit null entry.
    NilVolume,
    /// A resource entry has an empty key.
    EmptyResourceKey,
    /// The named resource has an empty value.
    EmptyResourceValue(String),
    /// Readiness checking is enabled but protocol/path are unset.
    MissingStartupDefaults,
}

impl Flaw {
    /// Whether [`DeployConfig::repair`] can fix this flaw in place.
    pub fn repairable(&self) -> bool {
        matches!(self, Flaw::NilVolume | Flaw::MissingStartupDefaults)
    }
}

impl fmt::Display for Flaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flaw::NilVolume => write!(f, "volume list contains a null entry"),
            Flaw::EmptyResourceKey => write!(f, "resource map contains an empty key"),
            Flaw::EmptyResourceValue(key) => {
                write!(f, "resource {key:?} has an empty value")
            }
            Flaw::MissingStartupDefaults => {
                write!(f, "startup checking enabled without protocol/path")
            }
        }
    }
}

/// Configuration of a deployment's tasks in one cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeployConfig {
    pub resources: Resources,
    pub metadata: Metadata,
    pub env: Env,
    /// Guide to how many instances to run; zero means intentional absence.
    pub num_instances: u32,
    /// Legacy manifests may carry JSON `null` entries in the volume list;
    /// validation flags them and repair strips them.
    pub volumes: Vec<Option<Volume>>,
    pub startup: Startup,
    pub schedule: Option<String>,
    /// Explicit executor-side request ID override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_request_id: Option<String>,
}

impl DeployConfig {
    /// The volume mappings, skipping any null entries.
    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.iter().flatten()
    }

    /// Shape-check this config, returning every flaw found.
    pub fn validate(&self) -> Vec<Flaw> {
        let mut flaws = Vec::new();
        if self.volumes.iter().any(Option::is_none) {
            flaws.push(Flaw::NilVolume);
        }
        for (key, value) in &self.resources {
            if key.is_empty() {
                flaws.push(Flaw::EmptyResourceKey);
            } else if value.is_empty() {
                flaws.push(Flaw::EmptyResourceValue(key.clone()));
            }
        }
        if self.startup.needs_defaults() {
            flaws.push(Flaw::MissingStartupDefaults);
        }
        flaws
    }

    /// Fix every repairable flaw in place; returns the flaws that remain.
    pub fn repair(&mut self, flaws: Vec<Flaw>) -> Vec<Flaw> {
        let mut remaining = Vec::new();
        for flaw in flaws {
            match flaw {
                Flaw::NilVolume => self.volumes.retain(Option::is_some),
                Flaw::MissingStartupDefaults => self.startup.fill_defaults(),
                other => remaining.push(other),
            }
        }
        remaining
    }

    /// Differences against another config, one string per changed field.
    ///
    /// Empty maps compare equal to absent maps by construction; startup
    /// differences are reported per field.
    pub fn diff(&self, other: &DeployConfig) -> Vec<String> {
        let mut diffs = Vec::new();
        if self.num_instances != other.num_instances {
            diffs.push(format!(
                "number of instances; this: {}; other: {}",
                self.num_instances, other.num_instances
            ));
        }
        if self.env != other.env {
            diffs.push(format!("env; this: {:?}; other: {:?}", self.env, other.env));
        }
        if self.metadata != other.metadata {
            diffs.push(format!(
                "metadata; this: {:?}; other: {:?}",
                self.metadata, other.metadata
            ));
        }
        if self.resources != other.resources {
            diffs.push(format!(
                "resources; this: {:?}; other: {:?}",
                self.resources, other.resources
            ));
        }
        if self.volumes != other.volumes {
            diffs.push(format!(
                "volumes; this: {:?}; other: {:?}",
                self.volumes, other.volumes
            ));
        }
        if self.schedule != other.schedule {
            diffs.push(format!(
                "schedule; this: {:?}; other: {:?}",
                self.schedule, other.schedule
            ));
        }
        if self.scheduler_request_id.is_some() || other.scheduler_request_id.is_some() {
            if self.scheduler_request_id != other.scheduler_request_id {
                diffs.push(format!(
                    "scheduler request id; this: {:?}; other: {:?}",
                    self.scheduler_request_id, other.scheduler_request_id
                ));
            }
        }
        diffs.extend(self.startup.diff(&other.startup));
        diffs
    }

    pub fn equal(&self, other: &DeployConfig) -> bool {
        self.diff(other).is_empty()
    }
}

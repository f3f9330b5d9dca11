//! Run service resource: maps declarative service configuration onto the
//! cloud run API and drives package deploys through the source packager.
//!
//! The vendor SDK stays behind [`CloudRunApi`]; uploads go through
//! [`Uploader`]. Environment id and source root are explicit fields so
//! nothing here reads process-wide state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::default_source_code_exclude;
use crate::engine::{package_source, source_code_hash};
use crate::error::{Error, Result};
use crate::models::{ContentDigest, PackageRequest};
use crate::upload::{UploadOptions, Uploader};

pub const MAX_SERVER_NAME_LEN: usize = 39;
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";
pub const DEFAULT_PORT: i64 = 80;
pub const UPLOAD_METHOD: &str = "PUT";
pub const RELEASE_TYPE_FULL: &str = "FULL";

// -----------------------------------------------------------------------------
// Resource configuration
// -----------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeployType {
    #[default]
    Package,
    Image,
}

impl DeployType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployType::Package => "package",
            DeployType::Image => "image",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessType {
    Public,
    Oa,
    Miniapp,
    Vpc,
}

impl AccessType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessType::Public => "PUBLIC",
            AccessType::Oa => "OA",
            AccessType::Miniapp => "MINIAPP",
            AccessType::Vpc => "VPC",
        }
    }
}

pub const DEFAULT_ACCESS_TYPES: &[AccessType] = &[AccessType::Public, AccessType::Oa];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    Cpu,
    Mem,
}

impl PolicyType {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyType::Cpu => "cpu",
            PolicyType::Mem => "mem",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HpaPolicy {
    pub policy_type: PolicyType,
    pub policy_threshold: u64,
}

fn default_dockerfile() -> String {
    DEFAULT_DOCKERFILE.to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunServiceConfig {
    pub server_name: String,

    #[serde(default)]
    pub deploy_type: DeployType,

    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    #[serde(default)]
    pub build_dir: Option<String>,

    #[serde(default)]
    pub port: Option<i64>,

    /// Cores.
    #[serde(default)]
    pub cpu: Option<f64>,

    /// GB.
    #[serde(default)]
    pub mem: Option<f64>,

    #[serde(default)]
    pub min_num: Option<u64>,

    #[serde(default)]
    pub max_num: Option<u64>,

    #[serde(default)]
    pub custom_logs: Option<String>,

    #[serde(default)]
    pub open_access_types: Vec<AccessType>,

    #[serde(default)]
    pub policy_details: Vec<HpaPolicy>,

    #[serde(default)]
    pub env_params: BTreeMap<String, String>,

    #[serde(default)]
    pub source_code_include: Vec<String>,

    #[serde(default)]
    pub source_code_exclude: Option<Vec<String>>,

    #[serde(default)]
    pub source_code_hash: Option<String>,
}

impl RunServiceConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            deploy_type: DeployType::Package,
            image_url: None,
            dockerfile: default_dockerfile(),
            build_dir: None,
            port: None,
            cpu: None,
            mem: None,
            min_num: None,
            max_num: None,
            custom_logs: None,
            open_access_types: Vec::new(),
            policy_details: Vec::new(),
            env_params: BTreeMap::new(),
            source_code_include: Vec::new(),
            source_code_exclude: None,
            source_code_hash: None,
        }
    }

    pub fn package_request(&self, root: &Path) -> PackageRequest {
        let exclude = self
            .source_code_exclude
            .clone()
            .unwrap_or_else(default_source_code_exclude);
        PackageRequest::new(root)
            .include(self.source_code_include.clone())
            .exclude(exclude)
    }
}

pub fn validate_server_name(name: &str) -> Result<()> {
    let invalid = |reason| Error::InvalidServerName {
        name: name.to_string(),
        reason,
    };

    let len = name.chars().count();
    if len == 0 || len > MAX_SERVER_NAME_LEN {
        return Err(invalid("length must be between 1 and 39 characters"));
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(invalid("must start with a lowercase letter"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(
            "only lowercase letters, numbers and hyphens(-) are allowed",
        ));
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// API request / response shapes
// -----------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DeployParam {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_type: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct HpaPolicyParam {
    pub policy_type: Option<String>,
    pub policy_threshold: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ServerBaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default)]
    pub open_access_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_num: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_num: Option<u64>,
    #[serde(default)]
    pub policy_details: Vec<HpaPolicyParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_logs: Option<String>,
    /// JSON-encoded object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_params: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_dockerfile: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateServerRequest {
    pub env_id: String,
    pub server_name: String,
    pub deploy_info: DeployParam,
    pub server_config: ServerBaseConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateServerRequest {
    pub env_id: String,
    pub server_name: String,
    pub deploy_info: DeployParam,
    pub server_config: ServerBaseConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct UploadHeader {
    pub key: Option<String>,
    pub value: Option<String>,
}

/// Upload target handed out by the build service for one package deploy.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BuildServiceInfo {
    pub upload_url: Option<String>,
    #[serde(default)]
    pub upload_headers: Vec<UploadHeader>,
    pub package_name: Option<String>,
    pub package_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub package_name: String,
    pub package_version: String,
}

/// The slice of the cloud run API this resource needs.
pub trait CloudRunApi {
    fn describe_build_service(&self, env_id: &str, service_name: &str)
        -> Result<BuildServiceInfo>;

    /// `Ok(None)` when the server no longer exists.
    fn describe_server_detail(
        &self,
        env_id: &str,
        server_name: &str,
    ) -> Result<Option<ServerBaseConfig>>;

    fn create_server(&self, request: &CreateServerRequest) -> Result<()>;

    fn update_server(&self, request: &UpdateServerRequest) -> Result<()>;

    fn delete_server(&self, env_id: &str, server_name: &str) -> Result<()>;
}

// -----------------------------------------------------------------------------
// Shared create/update builder
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployFields {
    pub deploy_info: DeployParam,
    pub server_config: ServerBaseConfig,
}

/// Populates the fields both request variants share. On create, unset sizing
/// fields get server defaults; on update they are left out so the service
/// keeps its current values.
pub fn build_deploy_fields(
    config: &RunServiceConfig,
    kind: RequestKind,
    env_id: &str,
    package: Option<&PackageRef>,
) -> Result<DeployFields> {
    let is_create = kind == RequestKind::Create;

    let mut deploy_info = DeployParam {
        deploy_type: Some(config.deploy_type.as_str().to_string()),
        ..DeployParam::default()
    };
    if !is_create {
        deploy_info.release_type = Some(RELEASE_TYPE_FULL.to_string());
    }
    match config.deploy_type {
        DeployType::Package => {
            let package = package.ok_or(Error::MissingField {
                field: "package_name",
            })?;
            deploy_info.package_name = Some(package.package_name.clone());
            deploy_info.package_version = Some(package.package_version.clone());
        }
        DeployType::Image => {
            let image_url = config
                .image_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or(Error::MissingField { field: "image_url" })?;
            deploy_info.image_url = Some(image_url.to_string());
        }
    }

    let or_create_default = |value: Option<f64>| value.or(is_create.then_some(0.0));
    let or_create_zero = |value: Option<u64>| value.or(is_create.then_some(0));

    let access_types: Vec<AccessType> = if !config.open_access_types.is_empty() {
        config.open_access_types.clone()
    } else if is_create {
        DEFAULT_ACCESS_TYPES.to_vec()
    } else {
        Vec::new()
    };

    let env_params = if config.env_params.is_empty() {
        None
    } else {
        let encoded = serde_json::to_string(&config.env_params).map_err(|e| Error::Encode {
            what: "env_params",
            message: e.to_string(),
        })?;
        Some(encoded)
    };

    let server_config = ServerBaseConfig {
        env_id: Some(env_id.to_string()),
        server_name: Some(config.server_name.clone()),
        open_access_types: access_types
            .iter()
            .map(|a| a.as_str().to_string())
            .collect(),
        cpu: or_create_default(config.cpu),
        mem: or_create_default(config.mem),
        min_num: or_create_zero(config.min_num),
        max_num: or_create_zero(config.max_num),
        policy_details: config
            .policy_details
            .iter()
            .map(|p| HpaPolicyParam {
                policy_type: Some(p.policy_type.as_str().to_string()),
                policy_threshold: Some(p.policy_threshold),
            })
            .collect(),
        custom_logs: config
            .custom_logs
            .clone()
            .or(is_create.then(String::new)),
        env_params,
        initial_delay_seconds: Some(0),
        create_time: is_create.then(String::new),
        port: config.port.or(is_create.then_some(DEFAULT_PORT)),
        has_dockerfile: Some(true),
        dockerfile: Some(config.dockerfile.clone()),
        build_dir: Some(config.build_dir.clone().unwrap_or_default()),
        tag: is_create.then(String::new),
    };

    Ok(DeployFields {
        deploy_info,
        server_config,
    })
}

impl CreateServerRequest {
    pub fn new(env_id: &str, server_name: &str, fields: DeployFields) -> Self {
        Self {
            env_id: env_id.to_string(),
            server_name: server_name.to_string(),
            deploy_info: fields.deploy_info,
            server_config: fields.server_config,
        }
    }
}

impl UpdateServerRequest {
    pub fn new(env_id: &str, server_name: &str, fields: DeployFields) -> Self {
        Self {
            env_id: env_id.to_string(),
            server_name: server_name.to_string(),
            deploy_info: fields.deploy_info,
            server_config: fields.server_config,
        }
    }
}

// -----------------------------------------------------------------------------
// Read-back state
// -----------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RunServiceState {
    pub server_name: Option<String>,
    pub dockerfile: Option<String>,
    pub port: Option<i64>,
    pub open_access_types: Vec<String>,
    pub cpu: Option<f64>,
    pub mem: Option<f64>,
    pub min_num: Option<u64>,
    pub max_num: Option<u64>,
    pub custom_logs: Option<String>,
    pub env_params: BTreeMap<String, String>,
    pub policy_details: Vec<HpaPolicyParam>,
}

fn decode_env_params(raw: Option<&str>) -> Result<BTreeMap<String, String>> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Ok(BTreeMap::new());
    };
    let values: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| Error::Api {
            action: "decode env_params",
            message: e.to_string(),
        })?;
    Ok(values
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

impl RunServiceState {
    pub fn from_detail(detail: ServerBaseConfig) -> Result<Self> {
        let env_params = decode_env_params(detail.env_params.as_deref())?;
        Ok(Self {
            server_name: detail.server_name,
            dockerfile: detail.dockerfile,
            port: detail.port,
            open_access_types: detail.open_access_types,
            cpu: detail.cpu,
            mem: detail.mem,
            min_num: detail.min_num,
            max_num: detail.max_num,
            custom_logs: detail.custom_logs,
            env_params,
            policy_details: detail.policy_details,
        })
    }
}

// -----------------------------------------------------------------------------
// Resource
// -----------------------------------------------------------------------------

pub struct RunServiceResource<A, U> {
    api: A,
    uploader: U,
    env_id: String,
    source_root: PathBuf,
}

impl<A: CloudRunApi, U: Uploader> RunServiceResource<A, U> {
    pub fn new(api: A, uploader: U, env_id: impl Into<String>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            api,
            uploader,
            env_id: env_id.into(),
            source_root: source_root.into(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Creates the server and returns its id (the server name).
    pub fn create(&self, config: &RunServiceConfig) -> Result<String> {
        validate_server_name(&config.server_name)?;
        let package = self.prepare_package(config)?;
        let fields =
            build_deploy_fields(config, RequestKind::Create, &self.env_id, package.as_ref())?;
        let request = CreateServerRequest::new(&self.env_id, &config.server_name, fields);
        self.api.create_server(&request)?;
        info!(server = %config.server_name, "run service created");
        Ok(config.server_name.clone())
    }

    pub fn update(&self, id: &str, config: &RunServiceConfig) -> Result<()> {
        let package = self.prepare_package(config)?;
        let fields =
            build_deploy_fields(config, RequestKind::Update, &self.env_id, package.as_ref())?;
        let request = UpdateServerRequest::new(&self.env_id, id, fields);
        self.api.update_server(&request)?;
        info!(server = %id, "run service updated");
        Ok(())
    }

    /// `Ok(None)` means the server is gone and should be dropped from state.
    pub fn read(&self, id: &str) -> Result<Option<RunServiceState>> {
        match self.api.describe_server_detail(&self.env_id, id)? {
            Some(detail) => RunServiceState::from_detail(detail).map(Some),
            None => {
                debug!(server = %id, "run service not found");
                Ok(None)
            }
        }
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.api.delete_server(&self.env_id, id)?;
        info!(server = %id, "run service deleted");
        Ok(())
    }

    /// Source fingerprint for package deploys, `None` for image deploys.
    pub fn plan_source_hash(&self, config: &RunServiceConfig) -> Result<Option<ContentDigest>> {
        if config.deploy_type != DeployType::Package {
            return Ok(None);
        }
        source_code_hash(&config.package_request(&self.source_root)).map(Some)
    }

    /// Whether the hash recorded in `config.source_code_hash` is stale against
    /// the tree on disk. Image deploys never need a repackage.
    pub fn needs_redeploy(&self, config: &RunServiceConfig) -> Result<bool> {
        let Some(current) = self.plan_source_hash(config)? else {
            return Ok(false);
        };
        let stale = config.source_code_hash.as_deref() != Some(current.as_str());
        if stale {
            debug!(server = %config.server_name, hash = %current, "source changed");
        }
        Ok(stale)
    }

    fn prepare_package(&self, config: &RunServiceConfig) -> Result<Option<PackageRef>> {
        if config.deploy_type != DeployType::Package {
            return Ok(None);
        }
        self.package_and_upload(config).map(Some)
    }

    fn package_and_upload(&self, config: &RunServiceConfig) -> Result<PackageRef> {
        let info = self
            .api
            .describe_build_service(&self.env_id, &config.server_name)?;
        let url = info.upload_url.ok_or(Error::IncompleteBuildService {
            missing: "UploadUrl",
        })?;
        let package_name = info.package_name.ok_or(Error::IncompleteBuildService {
            missing: "PackageName",
        })?;
        let package_version = info.package_version.ok_or(Error::IncompleteBuildService {
            missing: "PackageVersion",
        })?;
        let headers = info
            .upload_headers
            .into_iter()
            .filter_map(|h| Some((h.key?, h.value?)))
            .collect();

        let archive = package_source(&config.package_request(&self.source_root))?;
        debug!(path = %archive.path().display(), "source archive path");

        self.uploader.upload(&UploadOptions {
            url,
            file: archive.path().to_path_buf(),
            method: UPLOAD_METHOD.to_string(),
            headers,
        })?;

        Ok(PackageRef {
            package_name,
            package_version,
        })
    }
}

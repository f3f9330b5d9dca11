use std::cell::RefCell;
use std::fs::{self, File};
use std::path::PathBuf;

use srcpack::deploy::{
    BuildServiceInfo, CloudRunApi, CreateServerRequest, DeployType, RunServiceConfig,
    RunServiceResource, ServerBaseConfig, UpdateServerRequest, UploadHeader,
};
use srcpack::{Error, Result, UploadOptions, UploadResult, Uploader};
use tempfile::TempDir;
use zip::ZipArchive;

#[derive(Default)]
struct FakeApi {
    build_service: BuildServiceInfo,
    detail: Option<ServerBaseConfig>,
    created: RefCell<Vec<CreateServerRequest>>,
    updated: RefCell<Vec<UpdateServerRequest>>,
    deleted: RefCell<Vec<(String, String)>>,
}

impl CloudRunApi for FakeApi {
    fn describe_build_service(&self, _env_id: &str, _name: &str) -> Result<BuildServiceInfo> {
        Ok(self.build_service.clone())
    }

    fn describe_server_detail(
        &self,
        _env_id: &str,
        _server_name: &str,
    ) -> Result<Option<ServerBaseConfig>> {
        Ok(self.detail.clone())
    }

    fn create_server(&self, request: &CreateServerRequest) -> Result<()> {
        self.created.borrow_mut().push(request.clone());
        Ok(())
    }

    fn update_server(&self, request: &UpdateServerRequest) -> Result<()> {
        self.updated.borrow_mut().push(request.clone());
        Ok(())
    }

    fn delete_server(&self, env_id: &str, server_name: &str) -> Result<()> {
        self.deleted
            .borrow_mut()
            .push((env_id.to_string(), server_name.to_string()));
        Ok(())
    }
}

struct Upload {
    opts: UploadOptions,
    entries: Vec<String>,
}

#[derive(Default)]
struct FakeUploader {
    fail: bool,
    uploads: RefCell<Vec<Upload>>,
}

impl Uploader for FakeUploader {
    fn upload(&self, opts: &UploadOptions) -> Result<UploadResult> {
        let mut zip = ZipArchive::new(File::open(&opts.file).unwrap()).unwrap();
        let entries = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        self.uploads.borrow_mut().push(Upload {
            opts: opts.clone(),
            entries,
        });
        if self.fail {
            return Err(Error::UploadStatus {
                status: "403 Forbidden".into(),
            });
        }
        Ok(UploadResult {
            status: 200,
            data: None,
        })
    }
}

fn build_service() -> BuildServiceInfo {
    BuildServiceInfo {
        upload_url: Some("https://cos.example.com/pkg.zip".into()),
        upload_headers: vec![
            UploadHeader {
                key: Some("x-cos-security-token".into()),
                value: Some("t0k".into()),
            },
            UploadHeader {
                key: Some("dangling".into()),
                value: None,
            },
        ],
        package_name: Some("api-pkg".into()),
        package_version: Some("20260101".into()),
    }
}

fn source_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
    fs::write(dir.path().join("node_modules/x/index.js"), "x").unwrap();
    fs::write(dir.path().join("main.go"), "package main").unwrap();
    dir
}

fn resource(
    api: FakeApi,
    uploader: FakeUploader,
    root: &TempDir,
) -> RunServiceResource<FakeApi, FakeUploader> {
    RunServiceResource::new(api, uploader, "env-test", root.path())
}

#[test]
fn create_packages_uploads_and_references_package() {
    let root = source_root();
    let api = FakeApi {
        build_service: build_service(),
        ..FakeApi::default()
    };
    let res = resource(api, FakeUploader::default(), &root);

    let id = res.create(&RunServiceConfig::new("api")).unwrap();
    assert_eq!(id, "api");

    let uploads = res.uploader().uploads.borrow();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.opts.method, "PUT");
    assert_eq!(upload.opts.url, "https://cos.example.com/pkg.zip");
    assert_eq!(upload.opts.headers.len(), 1);
    assert_eq!(
        upload.opts.headers.get("x-cos-security-token").map(String::as_str),
        Some("t0k")
    );
    // default baseline excludes node_modules
    assert_eq!(upload.entries, vec!["main.go"]);
    assert!(!upload.opts.file.exists());

    let created = res.api().created.borrow();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].env_id, "env-test");
    assert_eq!(created[0].deploy_info.package_name.as_deref(), Some("api-pkg"));
    assert_eq!(
        created[0].deploy_info.package_version.as_deref(),
        Some("20260101")
    );
}

#[test]
fn failed_upload_aborts_and_cleans_up() {
    let root = source_root();
    let api = FakeApi {
        build_service: build_service(),
        ..FakeApi::default()
    };
    let uploader = FakeUploader {
        fail: true,
        ..FakeUploader::default()
    };
    let res = resource(api, uploader, &root);

    let err = res.create(&RunServiceConfig::new("api")).unwrap_err();
    assert!(err.to_string().contains("403 Forbidden"));
    assert!(res.api().created.borrow().is_empty());

    let uploads = res.uploader().uploads.borrow();
    let path: &PathBuf = &uploads[0].opts.file;
    assert!(!path.exists());
}

#[test]
fn incomplete_build_service_is_rejected() {
    let root = source_root();
    let mut info = build_service();
    info.package_name = None;
    let api = FakeApi {
        build_service: info,
        ..FakeApi::default()
    };
    let res = resource(api, FakeUploader::default(), &root);

    let err = res.create(&RunServiceConfig::new("api")).unwrap_err();
    assert!(matches!(
        err,
        Error::IncompleteBuildService {
            missing: "PackageName"
        }
    ));
    assert!(res.uploader().uploads.borrow().is_empty());
}

#[test]
fn invalid_name_fails_before_any_call() {
    let root = source_root();
    let res = resource(FakeApi::default(), FakeUploader::default(), &root);
    let err = res.create(&RunServiceConfig::new("Bad_Name")).unwrap_err();
    assert!(matches!(err, Error::InvalidServerName { .. }));
    assert!(res.uploader().uploads.borrow().is_empty());
}

#[test]
fn image_update_skips_packaging() {
    let root = source_root();
    let res = resource(FakeApi::default(), FakeUploader::default(), &root);

    let mut config = RunServiceConfig::new("api");
    config.deploy_type = DeployType::Image;
    config.image_url = Some("ccr.example.com/ns/api:2".into());
    res.update("api", &config).unwrap();

    assert!(res.uploader().uploads.borrow().is_empty());
    let updated = res.api().updated.borrow();
    assert_eq!(updated[0].server_name, "api");
    assert_eq!(updated[0].deploy_info.release_type.as_deref(), Some("FULL"));
    assert_eq!(
        updated[0].deploy_info.image_url.as_deref(),
        Some("ccr.example.com/ns/api:2")
    );
    assert!(res.plan_source_hash(&config).unwrap().is_none());
}

#[test]
fn read_maps_detail_and_handles_missing_server() {
    let root = source_root();
    let res = resource(FakeApi::default(), FakeUploader::default(), &root);
    assert_eq!(res.read("api").unwrap(), None);

    let api = FakeApi {
        detail: Some(ServerBaseConfig {
            server_name: Some("api".into()),
            port: Some(8080),
            open_access_types: vec!["PUBLIC".into()],
            env_params: Some(r#"{"MODE":"prod"}"#.into()),
            ..ServerBaseConfig::default()
        }),
        ..FakeApi::default()
    };
    let res = resource(api, FakeUploader::default(), &root);
    let state = res.read("api").unwrap().unwrap();
    assert_eq!(state.port, Some(8080));
    assert_eq!(state.open_access_types, vec!["PUBLIC"]);
    assert_eq!(state.env_params.get("MODE").map(String::as_str), Some("prod"));
}

#[test]
fn delete_uses_explicit_env() {
    let root = source_root();
    let res = resource(FakeApi::default(), FakeUploader::default(), &root);
    res.delete("api").unwrap();
    assert_eq!(
        res.api().deleted.borrow().as_slice(),
        &[("env-test".to_string(), "api".to_string())]
    );
}

#[test]
fn plan_hash_tracks_source_changes() {
    let root = source_root();
    let res = resource(FakeApi::default(), FakeUploader::default(), &root);
    let config = RunServiceConfig::new("api");

    let first = res.plan_source_hash(&config).unwrap().unwrap();
    let again = res.plan_source_hash(&config).unwrap().unwrap();
    assert_eq!(first, again);

    // excluded content does not move the hash
    fs::write(root.path().join("node_modules/x/index.js"), "y").unwrap();
    assert_eq!(res.plan_source_hash(&config).unwrap().unwrap(), first);

    fs::write(root.path().join("main.go"), "package main\n").unwrap();
    assert_ne!(res.plan_source_hash(&config).unwrap().unwrap(), first);
}

#[test]
fn recorded_hash_decides_redeploy() {
    let root = source_root();
    let res = resource(FakeApi::default(), FakeUploader::default(), &root);
    let mut config = RunServiceConfig::new("api");
    assert!(res.needs_redeploy(&config).unwrap());

    let current = res.plan_source_hash(&config).unwrap().unwrap();
    config.source_code_hash = Some(current.as_str().to_string());
    assert!(!res.needs_redeploy(&config).unwrap());

    fs::write(root.path().join("main.go"), "package main\n\nfunc main() {}\n").unwrap();
    assert!(res.needs_redeploy(&config).unwrap());

    config.deploy_type = DeployType::Image;
    assert!(!res.needs_redeploy(&config).unwrap());
}

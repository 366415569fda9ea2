//! End-to-end pipeline runs against fake toolchain, packager and signing
//! service.

#![cfg(unix)]

use kodegen_release_pipeline::cli::RuntimeConfig;
use kodegen_release_pipeline::config::PipelineConfigBuilder;
use kodegen_release_pipeline::pipeline::Pipeline;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TARGET: &str = "x86_64-unknown-linux-gnu";
const RUN_ID: &str = "e2e-run";
const UNSIGNED_APP: &str = "#!/bin/sh\nwhile true; do sleep 1; done\n";
const SIGNED_APP: &str = "#!/bin/sh\n# signed\nwhile true; do sleep 1; done\n";

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file.sync_all().unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Workspace with fake `cargo`, `rustup` and packager, plus a release.toml.
struct Fixture {
    dir: tempfile::TempDir,
    /// Bundle file name; doubles as the smoke-tested process name
    bundle: String,
}

impl Fixture {
    fn new(signing: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let tools = root.join("tools");
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::create_dir_all(root.join("desktop")).unwrap();
        std::fs::create_dir_all(root.join("scratch")).unwrap();
        std::fs::write(root.join("scratch/cache.bin"), vec![7u8; 4096]).unwrap();

        let id = uuid::Uuid::new_v4().simple().to_string();
        let bundle = format!("e2e{}", &id[..8]);

        let cargo = write_script(
            &tools,
            "cargo",
            &format!(
                "mkdir -p target/{TARGET}/release\nprintf 'binary' > target/{TARGET}/release/app\n"
            ),
        );
        let rustup = write_script(&tools, "rustup", &format!("echo {TARGET}\n"));
        let packager = write_script(
            &tools,
            "packager",
            &format!(
                "test -x \"$RELEASE_BINARIES_DIR/app\" || exit 3\n\
                 mkdir -p out\n\
                 printf '#!/bin/sh\\nwhile true; do sleep 1; done\\n' > out/{bundle}\n"
            ),
        );

        let signing = match signing {
            Some(endpoint) => format!(
                "[signing]\nenabled = true\nendpoint = \"{endpoint}\"\npoll_interval_ms = 20\ndeadline_secs = 10\n"
            ),
            None => "[signing]\nenabled = false\n".to_string(),
        };

        let config = format!(
            r#"
product_name = "Demo"
version = "0.3.1"
target = "{TARGET}"

[build]
binaries = ["app"]
cargo = "{cargo}"
rustup = "{rustup}"
timeout_secs = 60

[bundle]
workdir = "desktop"
command = ["{packager}", "{{arch}}"]
output = "out/{bundle}"
clean_dir = "out"
retry_delay_secs = 0

{signing}
[store]
kind = "fs"
root = "store"

[disk]
before_build = ["scratch"]
after_build = []
before_publish = []

[publish]
output_dir = "dist"
upload = true

[smoke]
grace_secs = 1
"#,
            cargo = cargo.display(),
            rustup = rustup.display(),
            packager = packager.display(),
        );
        std::fs::write(root.join("release.toml"), config).unwrap();

        Self { dir, bundle }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn builder(&self) -> PipelineConfigBuilder {
        PipelineConfigBuilder::from_path(&self.root().join("release.toml"))
            .unwrap()
            .run_id(RUN_ID)
    }

    /// Places the bytes the signing service "produced" in the object store.
    fn put_signed(&self) -> String {
        let key = format!("signed/{}", self.bundle);
        let path = self.root().join("store").join(&key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, SIGNED_APP).unwrap();
        key
    }
}

#[tokio::test]
async fn signed_release_is_published_and_smoke_tested() {
    let server = MockServer::start().await;
    let fixture = Fixture::new(Some(&format!("{}/v1", server.uri())));
    let destination = fixture.put_signed();

    Mock::given(method("POST"))
        .and(path("/v1/jobs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"job_id": "job-1", "state": "submitted"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/jobs/job-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"state": "in_progress"})),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/jobs/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"state": "completed", "destination": destination}),
        ))
        .mount(&server)
        .await;

    let config = fixture.builder().build().unwrap();
    let report = Pipeline::new(config, RuntimeConfig::quiet())
        .run()
        .await
        .unwrap();

    let signed = report.signed.expect("signing ran");
    assert_eq!(signed.job_id, "job-1");
    assert_eq!(signed.polls, 3);
    assert_eq!(signed.destination, destination);

    let published = fixture.root().join("dist").join(&fixture.bundle);
    assert_eq!(report.published.path, published);
    assert_eq!(std::fs::read_to_string(&published).unwrap(), SIGNED_APP);
    let checksum =
        std::fs::read_to_string(fixture.root().join("dist").join(format!("{}.sha256", fixture.bundle)))
            .unwrap();
    assert_eq!(
        checksum,
        format!("{}  {}\n", report.published.sha256, fixture.bundle)
    );

    let unsigned_dir = fixture.root().join("store/unsigned").join(RUN_ID);
    assert_eq!(std::fs::read_dir(&unsigned_dir).unwrap().count(), 1);
    let released = fixture
        .root()
        .join("store/releases")
        .join(RUN_ID)
        .join(&fixture.bundle);
    assert_eq!(std::fs::read_to_string(released).unwrap(), SIGNED_APP);

    assert!(!fixture.root().join("scratch").exists());
    assert!(report.reclaimed_bytes >= 4096);
    assert_eq!(report.binaries.len(), 1);
    assert!(report.smoke.is_some());
}

#[tokio::test]
async fn unsigned_release_skips_signing() {
    let fixture = Fixture::new(None);

    let config = fixture.builder().skip_smoke_test(true).build().unwrap();
    let report = Pipeline::new(config, RuntimeConfig::quiet())
        .run()
        .await
        .unwrap();

    assert!(report.signed.is_none());
    assert!(report.smoke.is_none());
    assert_eq!(report.published.sha256, report.unsigned.sha256);
    assert_eq!(
        std::fs::read_to_string(&report.published.path).unwrap(),
        UNSIGNED_APP
    );
    assert!(!fixture.root().join("store/unsigned").exists());
}

#[tokio::test]
async fn signing_timeout_stops_before_publishing() {
    let server = MockServer::start().await;
    let fixture = Fixture::new(Some(&format!("{}/v1", server.uri())));

    Mock::given(method("POST"))
        .and(path("/v1/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"job_id": "job-9"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/jobs/job-9"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"state": "in_progress"})),
        )
        .mount(&server)
        .await;

    let config = fixture
        .builder()
        .signing_deadline(Duration::from_millis(200))
        .build()
        .unwrap();
    let err = Pipeline::new(config, RuntimeConfig::quiet())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 7);
    assert_eq!(err.stage(), "signing");
    assert!(!fixture.root().join("dist").exists());
    assert_eq!(
        std::fs::read_to_string(fixture.root().join("desktop/out").join(&fixture.bundle)).unwrap(),
        UNSIGNED_APP
    );
}

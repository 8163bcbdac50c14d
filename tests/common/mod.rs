//! Shared test infrastructure for integration tests.
//!
//! A fixture is a temp plan directory with a shell-script deployment tool, a
//! shell-script head-object command and a local web server. The fake tool
//! records each call and keeps deployed buckets as files under `state/`.
#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use tempfile::TempDir;

const FAKE_SLS: &str = r#"#!/bin/sh
root="$(cd "$(dirname "$0")/.." && pwd)"
op="$2"
bucket=$(sed -n 's/^ *bucketName: *//p' serverless.yml | head -n 1)
cache=$(sed -n 's/^ *value: *//p' serverless.yml | head -n 1)
echo "$op $bucket $*" >> "$root/calls.log"
mkdir -p "$root/state"
case "$op" in
  deploy)
    if grep -qx "$bucket" "$root/fail-deploy" 2>/dev/null; then
      echo "Serverless Error: could not create bucket $bucket" >&2
      exit 1
    fi
    printf '%s' "$cache" > "$root/state/$bucket"
    ;;
  remove)
    rm -f "$root/state/$bucket"
    ;;
esac
"#;

const FAKE_HEAD_OBJECT: &str = r#"#!/bin/sh
root="$(cd "$(dirname "$0")/.." && pwd)"
echo "$*" >> "$root/head-object.log"
while [ $# -gt 0 ]; do
  case "$1" in
    --bucket) bucket="$2"; shift 2 ;;
    --key) key="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ ! -f "$root/state/$bucket" ]; then
  echo "An error occurred (404) when calling the HeadObject operation: Not Found" >&2
  exit 254
fi
printf '{"ContentType": "text/html", "CacheControl": "%s", "Metadata": {}}\n' "$(cat "$root/state/$bucket")"
"#;

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

pub struct SuiteFixture {
    _temp: TempDir,
    pub root: PathBuf,
    pub base_url: String,
}

impl SuiteFixture {
    /// Build a fixture; `None` (with a note on stderr) when `sh` is unavailable.
    pub fn new() -> Option<Self> {
        if find_in_path("sh").is_none() {
            eprintln!("Skipping: sh not available");
            return None;
        }
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().canonicalize().expect("canonical temp dir");
        std::fs::create_dir_all(root.join("state")).expect("create state dir");
        write_executable(&root.join("bin/fake-sls"), FAKE_SLS);
        write_executable(&root.join("bin/fake-head-object"), FAKE_HEAD_OBJECT);
        let base_url = serve_site(root.join("state"));
        Some(Self {
            _temp: temp,
            root,
            base_url,
        })
    }

    /// Write a serverless-finch style template whose home.html carries `cache_control`.
    pub fn write_template(&self, name: &str, cache_control: &str) {
        let text = format!(
            "service: finch-e2e\nplugins:\n  - serverless-finch\ncustom:\n  client:\n    bucketName: BUCKET1\n    distributionFolder: client/dist\n    objectHeaders:\n      home.html:\n        - name: Cache-Control\n          value: {cache_control}\n"
        );
        let path = self.root.join("config_files").join(name);
        std::fs::create_dir_all(path.parent().expect("template parent"))
            .expect("create template dir");
        std::fs::write(path, text).expect("write template");
    }

    /// A scenario deploying `template` to its own bucket with content and metadata checks.
    pub fn scenario(&self, id: &str, template: &str, expected_cache_control: &str) -> Value {
        json!({
            "id": id,
            "description": format!("Deploy {id}"),
            "template": format!("config_files/{template}"),
            "bindings": {"BUCKET1": format!("finch-{id}-{{run_id}}")},
            "checks": [
                {
                    "kind": "content",
                    "url": format!("{}/BUCKET1/", self.base_url),
                    "contains": "Serverless Finch Test Page"
                },
                {
                    "kind": "metadata",
                    "container": "BUCKET1",
                    "key": "home.html",
                    "equals": expected_cache_control
                }
            ]
        })
    }

    pub fn write_plan(&self, scenarios: Vec<Value>) {
        let plan = json!({
            "schema_version": 1,
            "tool": {"command": ["./bin/fake-sls", "client"]},
            "storage": {"head_object": ["./bin/fake-head-object"]},
            "defaults": {"region": "us-east-1", "request_timeout_seconds": 5},
            "scenarios": scenarios,
            "cleanup_paths": ["node_modules"]
        });
        let text = serde_json::to_string_pretty(&plan).expect("serialize plan");
        std::fs::write(self.plan_path(), text).expect("write plan");
    }

    pub fn plan_path(&self) -> PathBuf {
        self.root.join("deploy-check.json")
    }

    /// Run `dcheck` with `args`, isolated from command overrides in the caller's env.
    pub fn dcheck(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_dcheck"))
            .args(args)
            .current_dir(&self.root)
            .env_remove("DEPLOY_CHECK_TOOL")
            .env_remove("DEPLOY_CHECK_HEAD_OBJECT")
            .env_remove("RUST_LOG")
            .output()
            .expect("run dcheck")
    }

    /// Lines recorded by the fake tool: `<op> <bucket> <argv...>`.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.root.join("calls.log"))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Argument lists the fake head-object command was called with.
    pub fn head_object_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.root.join("head-object.log"))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn is_deployed(&self, bucket: &str) -> bool {
        self.root.join("state").join(bucket).is_file()
    }

    pub fn fail_deploy_of(&self, bucket: &str) {
        std::fs::write(self.root.join("fail-deploy"), format!("{bucket}\n"))
            .expect("write fail-deploy");
    }

    pub fn read_report(&self, rel: &str) -> Value {
        let text = std::fs::read_to_string(self.root.join(rel)).expect("read report");
        serde_json::from_str(&text).expect("parse report")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_executable(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().expect("script parent")).expect("create bin dir");
    std::fs::write(path, contents).expect("write script");
    let mut perms = std::fs::metadata(path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod script");
}

/// Serve `GET /<bucket>/` with the test page while `state/<bucket>` exists.
fn serve_site(state_dir: PathBuf) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            answer(stream, &state_dir);
        }
    });
    format!("http://{addr}")
}

fn answer(mut stream: TcpStream, state_dir: &Path) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let request = String::from_utf8_lossy(&buf);
    let path = request.split_whitespace().nth(1).unwrap_or("/");
    let bucket = path.trim_matches('/');
    let (status, body) = if !bucket.is_empty() && state_dir.join(bucket).is_file() {
        ("200 OK", "<html><h1>Serverless Finch Test Page</h1></html>")
    } else {
        ("404 Not Found", "NoSuchBucket")
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
}

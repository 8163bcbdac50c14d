use super::*;
use crate::plan::{CheckSpec, ScenarioSpec, SuitePlan};
use crate::tool::{ToolError, ToolOperation, ToolRun};
use crate::verify::{CheckFailure, ContentSource, FetchedPage, MetadataSource, ObjectMetadata};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

const RUN_ID: &str = "t1";

/// Shared stand-in for the cloud: buckets with per-object headers.
#[derive(Default)]
struct World {
    buckets: BTreeMap<String, BTreeMap<String, String>>,
    invocations: Vec<(ToolOperation, String)>,
    failing_deploys: BTreeSet<String>,
    failing_removes: bool,
    lookups: usize,
    lookup_regions: Vec<Option<String>>,
}

type SharedWorld = Rc<RefCell<World>>;

/// Reads the active config like the real tool would.
struct FakeTool {
    world: SharedWorld,
}

fn config_value(text: &str, field: &str) -> String {
    text.lines()
        .find_map(|line| line.trim().strip_prefix(field))
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

impl DeploymentTool for FakeTool {
    fn run(
        &mut self,
        operation: ToolOperation,
        slot: &ConfigSlot,
        params: &DeployParams,
    ) -> Result<ToolRun, ToolError> {
        let text = fs::read_to_string(slot.path()).expect("active config");
        let bucket = config_value(&text, "bucketName:");
        let mut world = self.world.borrow_mut();
        world.invocations.push((operation, bucket.clone()));
        let success = match operation {
            ToolOperation::Deploy => {
                if world.failing_deploys.contains(&bucket) {
                    false
                } else {
                    let cache_control = config_value(&text, "cacheControl:");
                    let mut objects = BTreeMap::new();
                    objects.insert("index.html".to_string(), "no-cache".to_string());
                    objects.insert("home.html".to_string(), cache_control);
                    world.buckets.insert(bucket, objects);
                    true
                }
            }
            ToolOperation::Remove => {
                world.buckets.remove(&bucket);
                !world.failing_removes
            }
        };
        Ok(ToolRun {
            operation,
            command_line: format!(
                "sls client {} --region {}",
                operation.subcommand(),
                params.region.as_deref().unwrap_or("-")
            ),
            exit_code: Some(if success { 0 } else { 1 }),
            success,
            duration_ms: 1,
            stdout: String::new(),
            stderr: if success {
                String::new()
            } else {
                "Serverless Error: bucket unavailable".to_string()
            },
        })
    }
}

struct FakeWeb {
    world: SharedWorld,
}

impl ContentSource for FakeWeb {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CheckFailure> {
        let bucket = url
            .trim_start_matches("http://")
            .split(".site.test")
            .next()
            .unwrap_or_default();
        if !self.world.borrow().buckets.contains_key(bucket) {
            return Err(CheckFailure::Transport {
                url: url.to_string(),
                reason: "no such host".to_string(),
            });
        }
        Ok(FetchedPage {
            requested_url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            headers: BTreeMap::new(),
            body: "<h1>Serverless Finch Test Page</h1>".to_string(),
        })
    }
}

struct FakeStorage {
    world: SharedWorld,
}

impl MetadataSource for FakeStorage {
    fn head_object(
        &self,
        container: &str,
        key: &str,
        region: Option<&str>,
    ) -> Result<ObjectMetadata, CheckFailure> {
        let mut world = self.world.borrow_mut();
        world.lookups += 1;
        world.lookup_regions.push(region.map(str::to_string));
        let cache_control = world
            .buckets
            .get(container)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| CheckFailure::ObjectNotFound {
                container: container.to_string(),
                key: key.to_string(),
            })?;
        Ok(ObjectMetadata {
            headers: [("CacheControl".to_string(), cache_control.clone())]
                .into_iter()
                .collect(),
            user_metadata: BTreeMap::new(),
        })
    }
}

fn temp_root(name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("{name}-{}-{now}", std::process::id()));
    fs::create_dir_all(root.join("config_files")).expect("create temp root");
    root
}

fn scenario(id: &str, template: &str) -> ScenarioSpec {
    ScenarioSpec {
        id: id.to_string(),
        description: format!("Deploy {id}"),
        template: format!("config_files/{template}"),
        bindings: [("BUCKET1".to_string(), format!("finch-{id}-{{run_id}}"))]
            .into_iter()
            .collect(),
        region: Some("us-east-1".to_string()),
        verbose: None,
        retry: None,
        checks: vec![
            CheckSpec::Content {
                url: "http://BUCKET1.site.test/".to_string(),
                contains: "Serverless Finch Test Page".to_string(),
            },
            CheckSpec::Metadata {
                container: "BUCKET1".to_string(),
                key: "home.html".to_string(),
                header: "Cache-Control".to_string(),
                equals: "max-age=5".to_string(),
            },
        ],
    }
}

struct Harness {
    root: PathBuf,
    loaded: LoadedPlan,
    slot: ConfigSlot,
    world: SharedWorld,
}

impl Harness {
    /// Scenarios `a`, `b`, `c`; `b` deploys the wrong Cache-Control.
    fn new(name: &str) -> Self {
        let root = temp_root(name);
        fs::write(
            root.join("config_files/standard.yml"),
            "bucketName: BUCKET1\ncacheControl: max-age=5\n",
        )
        .expect("write template");
        fs::write(
            root.join("config_files/wrong-header.yml"),
            "bucketName: BUCKET1\ncacheControl: max-age=6\n",
        )
        .expect("write template");
        fs::create_dir_all(root.join("node_modules")).expect("create artifact");
        let loaded = LoadedPlan {
            plan: SuitePlan {
                schema_version: 1,
                tool: Default::default(),
                storage: Default::default(),
                defaults: Default::default(),
                scenarios: vec![
                    scenario("a", "standard.yml"),
                    scenario("b", "wrong-header.yml"),
                    scenario("c", "standard.yml"),
                ],
                cleanup_paths: vec!["node_modules".to_string()],
            },
            path: root.join("deploy-check.json"),
            root: root.clone(),
        };
        let slot = ConfigSlot::new(root.join("work"), "serverless.yml");
        Self {
            root,
            loaded,
            slot,
            world: SharedWorld::default(),
        }
    }

    fn passing(name: &str) -> Self {
        let mut harness = Self::new(name);
        harness.loaded.plan.scenarios[1].template = "config_files/standard.yml".to_string();
        harness
    }

    fn options(&self) -> SuiteOptions {
        SuiteOptions::from_defaults(&self.loaded.plan.defaults, RUN_ID)
    }

    fn run(&mut self, options: &SuiteOptions) -> Result<SuiteReport> {
        let mut tool = FakeTool {
            world: self.world.clone(),
        };
        let web = FakeWeb {
            world: self.world.clone(),
        };
        let storage = FakeStorage {
            world: self.world.clone(),
        };
        let probes = Probes {
            web: &web,
            storage: &storage,
            region: None,
        };
        run_suite(&self.loaded, &mut self.slot, &mut tool, probes, options)
    }

    fn invocations(&self) -> Vec<(ToolOperation, String)> {
        self.world.borrow().invocations.clone()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn deploy(bucket: &str) -> (ToolOperation, String) {
    (ToolOperation::Deploy, bucket.to_string())
}

fn remove(bucket: &str) -> (ToolOperation, String) {
    (ToolOperation::Remove, bucket.to_string())
}

#[test]
fn passing_suite_tears_everything_down() {
    let mut harness = Harness::passing("suite-pass");
    let report = harness.run(&harness.options()).expect("run suite");

    assert!(report.success(), "{report:?}");
    assert_eq!(report.pass_count, 3);
    assert_eq!(
        harness.invocations(),
        vec![
            deploy("finch-a-t1"),
            remove("finch-a-t1"),
            deploy("finch-b-t1"),
            remove("finch-b-t1"),
            deploy("finch-c-t1"),
            remove("finch-c-t1"),
        ]
    );
    assert_eq!(
        report.scenarios[0].states,
        vec![
            ScenarioState::Setup,
            ScenarioState::Deployed,
            ScenarioState::Verified,
            ScenarioState::TornDown,
        ]
    );
    assert!(report.scenarios[0].config_sha256.is_some());

    // Nothing is left behind, remotely or locally.
    let storage = FakeStorage {
        world: harness.world.clone(),
    };
    let err = storage
        .head_object("finch-a-t1", "home.html", Some("us-east-1"))
        .expect_err("bucket removed");
    assert_eq!(err.kind(), FailureKind::ObjectNotFound);
    assert!(!harness.slot.path().exists());
    assert!(!harness.root.join("node_modules").exists());
}

#[test]
fn failure_halts_before_later_scenarios_deploy() {
    let mut harness = Harness::new("suite-halt");
    let report = harness.run(&harness.options()).expect("run suite");

    assert!(!report.success());
    assert!(report.halted);
    assert_eq!(
        (report.pass_count, report.fail_count, report.not_run_count),
        (1, 1, 1)
    );
    assert!(!harness
        .invocations()
        .iter()
        .any(|(_, bucket)| bucket == "finch-c-t1"));

    let failed = &report.scenarios[1];
    assert_eq!(failed.failure_kind, Some(FailureKind::MetadataMismatch));
    assert_eq!(
        failed.states,
        vec![
            ScenarioState::Setup,
            ScenarioState::Deployed,
            ScenarioState::VerificationFailed,
            ScenarioState::TornDown,
            ScenarioState::Aborted,
        ]
    );
    assert_eq!(report.scenarios[2].state(), Some(ScenarioState::NotRun));
    // Local artifacts stay for inspection after a failed run.
    assert!(harness.root.join("node_modules").exists());
}

#[test]
fn keep_failed_leaves_resources_in_place() {
    let mut harness = Harness::new("suite-keep");
    let mut options = harness.options();
    options.teardown_on_failure = false;
    let report = harness.run(&options).expect("run suite");

    assert!(!harness.invocations().contains(&remove("finch-b-t1")));
    assert!(harness.world.borrow().buckets.contains_key("finch-b-t1"));
    assert_eq!(
        report.scenarios[1].states,
        vec![
            ScenarioState::Setup,
            ScenarioState::Deployed,
            ScenarioState::VerificationFailed,
            ScenarioState::Aborted,
        ]
    );
}

#[test]
fn continue_policy_runs_remaining_scenarios() {
    let mut harness = Harness::new("suite-continue");
    let mut options = harness.options();
    options.failure_policy = FailurePolicy::Continue;
    let report = harness.run(&options).expect("run suite");

    assert!(!report.success());
    assert!(!report.halted);
    assert_eq!(
        (report.pass_count, report.fail_count, report.not_run_count),
        (2, 1, 0)
    );
    assert!(report.scenarios[2].pass);
    assert!(harness.invocations().contains(&remove("finch-c-t1")));
}

#[test]
fn deploy_failure_skips_verification() {
    let mut harness = Harness::passing("suite-deploy-fail");
    harness
        .world
        .borrow_mut()
        .failing_deploys
        .insert("finch-a-t1".to_string());
    let report = harness.run(&harness.options()).expect("run suite");

    let failed = &report.scenarios[0];
    assert_eq!(failed.failure_kind, Some(FailureKind::Deployment));
    assert!(failed
        .failure
        .as_deref()
        .is_some_and(|message| message.contains("bucket unavailable")));
    assert!(failed.checks.is_empty());
    assert_eq!(
        failed.states,
        vec![
            ScenarioState::Setup,
            ScenarioState::DeployFailed,
            ScenarioState::TornDown,
            ScenarioState::Aborted,
        ]
    );
    assert_eq!(harness.world.borrow().lookups, 0);
    assert_eq!(report.not_run_count, 2);
}

#[test]
fn teardown_failure_does_not_mask_a_pass() {
    let mut harness = Harness::passing("suite-teardown-error");
    harness.world.borrow_mut().failing_removes = true;
    let mut options = harness.options();
    options.only = vec!["a".to_string()];
    let report = harness.run(&options).expect("run suite");

    let scenario = &report.scenarios[0];
    assert!(scenario.pass);
    assert!(scenario.teardown_error.is_some());
    assert_eq!(scenario.teardown_failure_kind, Some(FailureKind::Teardown));
    assert_eq!(scenario.failure_kind, None);
    assert_eq!(scenario.state(), Some(ScenarioState::Verified));
    assert!(report.success());
    assert_eq!(report.scenario_count, 1);
}

#[test]
fn pre_clean_removes_every_scenario_first() {
    let mut harness = Harness::passing("suite-pre-clean");
    let mut options = harness.options();
    options.pre_clean = true;
    let report = harness.run(&options).expect("run suite");

    assert!(report.success());
    assert_eq!(
        harness.invocations()[..4].to_vec(),
        vec![
            remove("finch-a-t1"),
            remove("finch-b-t1"),
            remove("finch-c-t1"),
            deploy("finch-a-t1"),
        ]
    );
}

#[test]
fn invalid_plan_deploys_nothing() {
    let mut harness = Harness::passing("suite-invalid");
    harness.loaded.plan.scenarios[2].bindings =
        [("BUCKET1".to_string(), "finch-a-{run_id}".to_string())]
            .into_iter()
            .collect();
    let err = harness
        .run(&harness.options())
        .expect_err("shared bucket");
    assert!(err.to_string().contains("is invalid"), "{err}");
    assert!(harness.invocations().is_empty());
}

#[test]
fn options_follow_plan_defaults() {
    let defaults = PlanDefaults {
        check_policy: Some(CheckPolicy::FailFast),
        failure_policy: Some(FailurePolicy::Continue),
        teardown_on_failure: Some(false),
        ..PlanDefaults::default()
    };
    let options = SuiteOptions::from_defaults(&defaults, "r");
    assert_eq!(options.check_policy, CheckPolicy::FailFast);
    assert_eq!(options.failure_policy, FailurePolicy::Continue);
    assert!(!options.teardown_on_failure);

    let options = SuiteOptions::from_defaults(&PlanDefaults::default(), "r");
    assert_eq!(options.check_policy, CheckPolicy::CollectAll);
    assert_eq!(options.failure_policy, FailurePolicy::Halt);
    assert!(options.teardown_on_failure);
}

#[test]
fn metadata_lookups_follow_each_scenario_region() {
    let mut harness = Harness::passing("suite-regions");
    harness.loaded.plan.scenarios[1].region = Some("us-west-2".to_string());
    harness.loaded.plan.scenarios[2].region = None;
    let mut options = harness.options();
    options.overrides.region = Some("eu-west-1".to_string());
    let report = harness.run(&options).expect("run suite");

    assert!(report.success(), "{report:?}");
    assert_eq!(
        harness.world.borrow().lookup_regions,
        vec![
            Some("us-east-1".to_string()),
            Some("us-west-2".to_string()),
            Some("eu-west-1".to_string()),
        ]
    );
}

//! End-to-end orchestration scenarios.
//!
//! Every collaborator is replaced by an in-process double:
//! - `MockRuntime` records starts and stops instead of running containers
//! - `ScriptedChecker` answers readiness checks per host
//! - `ScriptedAcme` replays canned CA responses
//!
//! Time is paused, so readiness timeouts and retry delays elapse instantly.

use async_trait::async_trait;
use chrono::Utc;
use deploy_core::{
    certs::{AcmeClient, AcmeRequest, AcmeResponse, CertificateStore},
    error::{DeployError, Result},
    graph::DependencyGraph,
    paths,
    probe::ReadinessChecker,
    runtime::{ContainerRuntime, InstanceState, ServiceHandle, StartOutcome},
    types::{FailureStage, ReadinessCheck, RestartPolicy, RunOutcome, RunState, ServiceRole, ServiceSpec},
    Config, DeploymentPlan, Orchestrator, Secrets,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Container runtime that only keeps a name -> state table.
#[derive(Default)]
struct MockRuntime {
    instances: Mutex<HashMap<String, InstanceState>>,
    /// `start:<name>` / `stop:<name>` in call order
    events: Mutex<Vec<String>>,
    refuse: Mutex<HashMap<String, String>>,
}

impl MockRuntime {
    fn set_running(&self, name: &str) {
        self.instances.lock().unwrap().insert(name.to_string(), InstanceState::Running);
    }

    fn refuse_start(&self, name: &str, reason: &str) {
        self.refuse.lock().unwrap().insert(name.to_string(), reason.to_string());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn calls(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{}:", kind);
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn start(&self, name: &str, _spec: &ServiceSpec) -> Result<()> {
        if let Some(reason) = self.refuse.lock().unwrap().get(name) {
            return Err(DeployError::StartFailed { service: name.to_string(), reason: reason.clone() });
        }
        self.instances.lock().unwrap().insert(name.to_string(), InstanceState::Running);
        self.events.lock().unwrap().push(format!("start:{}", name));
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.instances.lock().unwrap().insert(name.to_string(), InstanceState::Exited { code: 0 });
        self.events.lock().unwrap().push(format!("stop:{}", name));
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<InstanceState> {
        Ok(self.instances.lock().unwrap().get(name).cloned().unwrap_or(InstanceState::Missing))
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        Ok(format!("{} last {} lines", name, tail))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Readiness keyed by the host part of a TCP address. Unknown hosts are ready.
#[derive(Default)]
struct ScriptedChecker {
    never: HashSet<String>,
    fail_first: HashMap<String, u32>,
    calls: Mutex<HashMap<String, u32>>,
    /// Simulated check latency
    delay: Option<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedChecker {
    fn never_ready(hosts: &[&str]) -> Self {
        Self { never: hosts.iter().map(|h| h.to_string()).collect(), ..Default::default() }
    }
}

#[async_trait]
impl ReadinessChecker for ScriptedChecker {
    async fn check(&self, check: &ReadinessCheck) -> std::result::Result<(), String> {
        let host = match check {
            ReadinessCheck::Tcp { address } => address.split(':').next().unwrap_or_default().to_string(),
            other => other.to_string(),
        };

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(host.clone()).or_insert(0);
            *n += 1;
            *n
        };

        if self.never.contains(&host) {
            return Err(format!("connection refused ({})", host));
        }
        match self.fail_first.get(&host) {
            Some(&failures) if call <= failures => Err(format!("connection refused ({} #{})", host, call)),
            _ => Ok(()),
        }
    }
}

/// Replays queued responses, then succeeds.
#[derive(Default)]
struct ScriptedAcme {
    responses: Mutex<VecDeque<AcmeResponse>>,
    calls: AtomicU32,
}

impl ScriptedAcme {
    fn with(responses: Vec<AcmeResponse>) -> Self {
        Self { responses: Mutex::new(responses.into()), calls: AtomicU32::new(0) }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcmeClient for ScriptedAcme {
    async fn obtain(&self, request: &AcmeRequest) -> Result<AcmeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AcmeResponse { success: true, output: "Successfully received certificate.".into() });

        // Like certbot, leave the PEM files in the live directory
        if response.success {
            let live = paths::live_cert_dir(&request.cert_dir, request.primary_domain());
            std::fs::create_dir_all(&live).unwrap();
            std::fs::write(live.join("fullchain.pem"), "chain").unwrap();
            std::fs::write(live.join("privkey.pem"), "key").unwrap();
        }
        Ok(response)
    }
}

struct Harness {
    runtime: Arc<MockRuntime>,
    checker: Arc<ScriptedChecker>,
    acme: Arc<ScriptedAcme>,
    dir: TempDir,
}

impl Harness {
    fn new(checker: ScriptedChecker, acme: ScriptedAcme) -> Self {
        Self {
            runtime: Arc::new(MockRuntime::default()),
            checker: Arc::new(checker),
            acme: Arc::new(acme),
            dir: TempDir::new().unwrap(),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.runtime.clone(), self.checker.clone(), self.acme.clone(), &Config::default())
    }

    fn plan(&self, yaml: &str) -> DeploymentPlan {
        DeploymentPlan::parse(yaml, self.dir.path(), &Secrets::default(), &Config::default()).unwrap()
    }

    /// A certificate for example.org that needs no renewal.
    fn seed_certificate(&self) {
        let store = CertificateStore::new(self.dir.path().join("letsencrypt"), 90, 30);
        let record = store.record_issued(&["example.org".to_string()], Utc::now()).unwrap();
        std::fs::write(&record.fullchain_path, "chain").unwrap();
        std::fs::write(&record.privkey_path, "key").unwrap();
    }
}

/// Domain flow: db -> backend -> proxy-temp -> certs -> proxy-final -> frontend.
const DOMAIN_PLAN: &str = r#"
name: pmi
services:
  - name: db
    image: mysql:8.0
    readiness: { kind: tcp, address: "db:3306" }
    timeout_secs: 30
    poll_interval_ms: 1000
    retries: 0
  - name: backend
    image: pmi-backend:latest
    depends_on: [db]
    readiness: { kind: tcp, address: "backend:8000" }
    timeout_secs: 30
    poll_interval_ms: 1000
    retries: 0
  - name: proxy-temp
    image: nginx:alpine
    ports: ["80:80"]
    depends_on: [backend]
    readiness: { kind: tcp, address: "proxy-temp:80" }
    timeout_secs: 10
  - name: certs
    depends_on: [proxy-temp]
    certificate:
      temp_proxy: proxy-temp
      final_proxy: proxy-final
      webroot: www
      cert_dir: letsencrypt
      domains: [example.org]
  - name: proxy-final
    image: nginx:alpine
    ports: ["80:80", "443:443"]
    depends_on: [certs]
    readiness: { kind: tcp, address: "proxy-final:443" }
  - name: frontend
    image: pmi-frontend:latest
    depends_on: [proxy-final]
"#;

fn state_of(report: &deploy_core::DeploymentReport, service: &str) -> RunState {
    report.entry(service).map(|e| e.state).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_full_domain_deployment() {
    let h = Harness::new(ScriptedChecker::default(), ScriptedAcme::default());
    let plan = h.plan(DOMAIN_PLAN);

    let report = h.orchestrator().run(&plan, CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(h.runtime.calls("start"), ["db", "backend", "proxy-temp", "proxy-final", "frontend"]);
    assert_eq!(h.runtime.calls("stop"), ["proxy-temp"]);
    // Temp proxy is gone before the final proxy comes up
    let events = h.runtime.events();
    let stop_temp = events.iter().position(|e| e == "stop:proxy-temp").unwrap();
    let start_final = events.iter().position(|e| e == "start:proxy-final").unwrap();
    assert!(stop_temp < start_final);

    assert_eq!(state_of(&report, "proxy-temp"), RunState::Stopped);
    assert_eq!(state_of(&report, "certs"), RunState::Ready);
    assert_eq!(state_of(&report, "frontend"), RunState::Ready);
    assert_eq!(h.acme.calls(), 1);

    let order: Vec<&str> = report.entries.iter().map(|e| e.service.as_str()).collect();
    assert_eq!(order, ["db", "backend", "proxy-temp", "certs", "proxy-final", "frontend"]);
}

#[tokio::test(start_paused = true)]
async fn test_database_timeout_stops_everything_downstream() {
    let h = Harness::new(ScriptedChecker::never_ready(&["db"]), ScriptedAcme::default());
    let plan = h.plan(DOMAIN_PLAN);

    let report = h.orchestrator().run(&plan, CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.exit_code(), 1);

    let db = report.entry("db").unwrap();
    assert_eq!(db.state, RunState::Failed);
    assert_eq!(db.attempts, 1);
    let detail = db.error.as_ref().unwrap();
    assert_eq!(detail.stage, FailureStage::ReadinessTimeout);
    assert!(detail.message.contains("connection refused"), "{}", detail.message);

    for service in ["backend", "proxy-temp", "certs", "proxy-final", "frontend"] {
        let entry = report.entry(service).unwrap();
        assert_eq!(entry.state, RunState::Pending, "{}", service);
        assert_eq!(entry.attempts, 0);
    }
    assert_eq!(
        report.entry("backend").unwrap().note.as_deref(),
        Some("blocked: dependency 'db' failed")
    );
    assert_eq!(h.runtime.calls("start"), ["db"]);
    assert_eq!(h.acme.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_acme_failure_is_retried_once() {
    let acme = ScriptedAcme::with(vec![AcmeResponse {
        success: false,
        output: "Challenge failed for domain example.org: DNS problem: SERVFAIL looking up A".into(),
    }]);
    let h = Harness::new(ScriptedChecker::default(), acme);
    let plan = h.plan(DOMAIN_PLAN);

    let report = h.orchestrator().run(&plan, CancellationToken::new()).await.unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(h.acme.calls(), 2);
    let certs = report.entry("certs").unwrap();
    assert_eq!(certs.state, RunState::Ready);
    assert_eq!(certs.attempts, 2);
    assert_eq!(certs.retries(), 1);
    assert!(certs.note.as_deref().unwrap().starts_with("certificate issued"));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_acme_failure_aborts_after_retiring_temp_proxy() {
    let acme = ScriptedAcme::with(vec![AcmeResponse {
        success: false,
        output: "urn:ietf:params:acme:error:unauthorized: Invalid response from http://example.org/.well-known/acme-challenge/x: 404".into(),
    }]);
    let h = Harness::new(ScriptedChecker::default(), acme);
    let plan = h.plan(DOMAIN_PLAN);

    let report = h.orchestrator().run(&plan, CancellationToken::new()).await.unwrap();

    assert_eq!(report.exit_code(), 1);
    assert_eq!(h.acme.calls(), 1);
    let certs = report.entry("certs").unwrap();
    assert_eq!(certs.state, RunState::Failed);
    let detail = certs.error.as_ref().unwrap();
    assert_eq!(detail.stage, FailureStage::ChallengeFailed);
    assert!(detail.message.contains("unauthorized"));

    assert_eq!(h.runtime.calls("stop"), ["proxy-temp"]);
    assert_eq!(state_of(&report, "proxy-final"), RunState::Pending);
    assert_eq!(state_of(&report, "frontend"), RunState::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_leaves_running_services_alone() {
    let h = Harness::new(ScriptedChecker::never_ready(&["backend"]), ScriptedAcme::default());
    let plan = h.plan(DOMAIN_PLAN);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let report = h.orchestrator().run(&plan, cancel).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(state_of(&report, "db"), RunState::Ready);

    let backend = report.entry("backend").unwrap();
    assert_eq!(backend.state, RunState::Starting);
    assert_eq!(backend.error.as_ref().unwrap().stage, FailureStage::Cancelled);
    for service in ["proxy-temp", "certs", "proxy-final", "frontend"] {
        assert_eq!(state_of(&report, service), RunState::Pending, "{}", service);
    }

    // Nothing is torn down on cancel
    assert!(h.runtime.calls("stop").is_empty());
    assert_eq!(h.runtime.calls("start"), ["db", "backend"]);
}

#[tokio::test(start_paused = true)]
async fn test_valid_certificate_skips_acme_and_temp_proxy() {
    let h = Harness::new(ScriptedChecker::default(), ScriptedAcme::default());
    h.seed_certificate();
    // Re-run over a live stack: the final proxy already holds port 80
    h.runtime.set_running("proxy-final");
    let plan = h.plan(DOMAIN_PLAN);

    let report = h.orchestrator().run(&plan, CancellationToken::new()).await.unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(h.acme.calls(), 0);

    let temp = report.entry("proxy-temp").unwrap();
    assert_eq!(temp.state, RunState::Stopped);
    assert_eq!(temp.attempts, 0);
    assert!(temp.note.as_deref().unwrap().starts_with("not needed"));

    let certs = report.entry("certs").unwrap();
    assert_eq!(certs.state, RunState::Ready);
    assert!(certs.note.as_deref().unwrap().starts_with("certificate reused"));

    let final_proxy = report.entry("proxy-final").unwrap();
    assert_eq!(final_proxy.state, RunState::Ready);
    assert_eq!(final_proxy.note.as_deref(), Some("already running"));
    assert_eq!(h.runtime.calls("start"), ["db", "backend", "frontend"]);
}

#[tokio::test(start_paused = true)]
async fn test_final_proxy_on_port_blocks_issuance() {
    let h = Harness::new(ScriptedChecker::default(), ScriptedAcme::default());
    h.runtime.set_running("proxy-final");
    let plan = h.plan(DOMAIN_PLAN);

    let report = h.orchestrator().run(&plan, CancellationToken::new()).await.unwrap();

    assert_eq!(report.exit_code(), 1);
    assert_eq!(h.acme.calls(), 0);
    let temp = report.entry("proxy-temp").unwrap();
    assert_eq!(temp.state, RunState::Failed);
    let detail = temp.error.as_ref().unwrap();
    assert_eq!(detail.stage, FailureStage::StartFailed);
    assert!(detail.message.contains("Port 80 is already bound by proxy-final"));
    assert!(!h.runtime.calls("start").contains(&"proxy-temp".to_string()));
}

const SPLIT_PLAN: &str = r#"
name: split
services:
  - name: api-db
    image: postgres:16
    readiness: { kind: tcp, address: "api-db:5432" }
    timeout_secs: 5
    poll_interval_ms: 500
    retries: 0
  - name: api
    image: api:latest
    depends_on: [api-db]
  - name: cache
    image: redis:7
    readiness: { kind: tcp, address: "cache:6379" }
  - name: worker
    image: worker:latest
    depends_on: [cache]
"#;

#[tokio::test(start_paused = true)]
async fn test_independent_subtree_completes_after_failure() {
    let h = Harness::new(ScriptedChecker::never_ready(&["api-db"]), ScriptedAcme::default());
    let plan = h.plan(SPLIT_PLAN);

    let report = h.orchestrator().run(&plan, CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(state_of(&report, "api-db"), RunState::Failed);
    assert_eq!(state_of(&report, "api"), RunState::Pending);
    assert_eq!(state_of(&report, "cache"), RunState::Ready);
    assert_eq!(state_of(&report, "worker"), RunState::Ready);
    assert_eq!(report.failures().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_refusal_keeps_runtime_diagnostic() {
    let h = Harness::new(ScriptedChecker::default(), ScriptedAcme::default());
    h.runtime.refuse_start("cache", "pull access denied for redis:7, repository does not exist");
    let plan = h.plan(SPLIT_PLAN);

    let report = h.orchestrator().run(&plan, CancellationToken::new()).await.unwrap();

    let cache = report.entry("cache").unwrap();
    assert_eq!(cache.state, RunState::Failed);
    let detail = cache.error.as_ref().unwrap();
    assert_eq!(detail.stage, FailureStage::StartFailed);
    assert_eq!(detail.message, "pull access denied for redis:7, repository does not exist");
    assert_eq!(state_of(&report, "api"), RunState::Ready);
    assert_eq!(state_of(&report, "worker"), RunState::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_is_retried_with_restart() {
    let checker = ScriptedChecker {
        fail_first: HashMap::from([("flaky".to_string(), 5)]),
        ..Default::default()
    };
    let h = Harness::new(checker, ScriptedAcme::default());
    let plan = h.plan(
        r#"
name: retry
services:
  - name: flaky
    image: flaky:latest
    readiness: { kind: tcp, address: "flaky:9000" }
    timeout_secs: 3
    poll_interval_ms: 1000
    retries: 1
"#,
    );

    let report = h.orchestrator().run(&plan, CancellationToken::new()).await.unwrap();

    let flaky = report.entry("flaky").unwrap();
    assert_eq!(flaky.state, RunState::Ready);
    assert_eq!(flaky.attempts, 2);
    assert_eq!(flaky.retries(), 1);
    assert!(flaky.error.is_none());
    assert_eq!(h.runtime.events(), ["start:flaky", "stop:flaky", "start:flaky"]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_is_respected() {
    let checker = ScriptedChecker { delay: Some(Duration::from_secs(1)), ..Default::default() };
    let h = Harness::new(checker, ScriptedAcme::default());
    let services: String = (0..6)
        .map(|i| {
            format!(
                "  - name: svc{i}\n    image: svc:latest\n    readiness: {{ kind: tcp, address: \"svc{i}:80\" }}\n"
            )
        })
        .collect();
    let plan = h.plan(&format!("name: wide\nservices:\n{}", services));

    let orchestrator = h.orchestrator().with_max_concurrency(2);
    let report = orchestrator.run(&plan, CancellationToken::new()).await.unwrap();

    assert_eq!(report.exit_code(), 0);
    assert_eq!(h.checker.max_active.load(Ordering::SeqCst), 2);
    assert_eq!(h.runtime.calls("start").len(), 6);
}

fn bare_spec(name: &str, depends_on: &[&str]) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        image: Some(format!("{}:latest", name)),
        command: vec![],
        ports: vec![],
        environment: BTreeMap::new(),
        volumes: vec![],
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        readiness: None,
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(100),
        retries: 0,
        restart: RestartPolicy::No,
        role: ServiceRole::Service,
    }
}

#[tokio::test(start_paused = true)]
async fn test_cycle_fails_before_any_start() {
    let h = Harness::new(ScriptedChecker::default(), ScriptedAcme::default());
    let graph = DependencyGraph::from_specs(vec![
        bare_spec("a", &["c"]),
        bare_spec("b", &["a"]),
        bare_spec("c", &["b"]),
        bare_spec("standalone", &[]),
    ])
    .unwrap();
    let plan = DeploymentPlan::from_graph("loop", graph);

    let result = h.orchestrator().run(&plan, CancellationToken::new()).await;

    match result {
        Err(err @ DeployError::CycleDetected { .. }) => assert!(err.is_plan_error()),
        other => panic!("expected cycle error, got {:?}", other.map(|r| r.outcome)),
    }
    assert!(h.runtime.events().is_empty());
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let runtime = Arc::new(MockRuntime::default());
    let handle = ServiceHandle::new(runtime.clone());
    let spec = bare_spec("backend", &[]);

    assert_eq!(handle.start(&spec).await, StartOutcome::Started);
    assert_eq!(handle.start(&spec).await, StartOutcome::AlreadyRunning);
    assert_eq!(runtime.calls("start"), ["backend"]);
    assert_eq!(handle.status(&spec).await.unwrap(), RunState::Ready);

    assert_eq!(handle.stop(&spec).await.unwrap(), RunState::Stopped);
    assert_eq!(handle.start(&spec).await, StartOutcome::Started);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_runs_in_reverse_order() {
    let h = Harness::new(ScriptedChecker::default(), ScriptedAcme::default());
    let plan = h.plan(DOMAIN_PLAN);
    let orchestrator = h.orchestrator();
    orchestrator.run(&plan, CancellationToken::new()).await.unwrap();

    let results = orchestrator.teardown(&plan).await.unwrap();

    let names: Vec<&str> = results.iter().map(|r| r.service.as_str()).collect();
    assert_eq!(names, ["frontend", "proxy-final", "proxy-temp", "backend", "db"]);
    assert!(results.iter().all(|r| r.state == Some(RunState::Stopped)));

    let status = orchestrator.status(&plan).await.unwrap();
    let certs = status.iter().find(|s| s.service == "certs").unwrap();
    assert_eq!(certs.state, Some(RunState::Ready));
    let db = status.iter().find(|s| s.service == "db").unwrap();
    assert_eq!(db.state, Some(RunState::Stopped));
}

#[tokio::test]
async fn test_logs_rejects_unknown_service() {
    let h = Harness::new(ScriptedChecker::default(), ScriptedAcme::default());
    let plan = h.plan(SPLIT_PLAN);
    let orchestrator = h.orchestrator();

    assert_eq!(orchestrator.logs(&plan, "cache", 20).await.unwrap(), "cache last 20 lines");
    assert!(matches!(
        orchestrator.logs(&plan, "nope", 20).await,
        Err(DeployError::PlanInvalid { .. })
    ));
}

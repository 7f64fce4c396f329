//! In-memory collaborators for exercising the job processor and worker loop
//! without PostgreSQL or a browser.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use relist_worker::{
    app_state::AppState,
    browser::{manager::BrowserManager, BrowserEngine, BrowserError, BrowserPage, EngineLauncher},
    models::{
        account::{AccountStatus, SessionCookie, SessionPayload},
        event::{EventLevel, JobEvent},
        job::{Job, JobProgress, JobResult, JobStatus},
        listing::{ListingPayload, Platform},
    },
    platforms::{PlatformError, PlatformProcessor, ProcessorFactory, Step},
    services::{
        accounts::AccountStore,
        events::{EventSink, JobEventLogger},
        images::ImageStager,
        processor::JobProcessor,
        queue::{JobQueue, QueueError},
        vault::{CredentialVault, VaultError},
    },
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A queued job for `platforms` owned by a fresh user.
pub fn queued_job(platforms: &[&str], payload: Value) -> Job {
    Job {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        platforms: platforms.iter().map(|p| p.to_string()).collect(),
        payload,
        status: JobStatus::Queued,
        progress: JobProgress::new(0, "Queued"),
        result: None,
        error: None,
        created_at: Utc::now(),
        started_at: None,
    }
}

/// A payload every adapter accepts.
pub fn listing_payload(images: &[PathBuf]) -> Value {
    let images: Vec<String> = images
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    json!({
        "title": "Vintage denim jacket",
        "description": "Size M, barely worn",
        "price": 45.0,
        "condition": "like_new",
        "category": "Men > Jackets",
        "images": images,
        "platform_fields": {"facebook": {"location": "Austin, TX"}}
    })
}

/// Write a file that sniffs as PNG into a fresh scratch directory.
pub fn png_fixture() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("relist-fixture-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("photo.png");
    std::fs::write(&path, PNG_HEADER).unwrap();
    path
}

#[derive(Default)]
struct QueueInner {
    order: VecDeque<Uuid>,
    jobs: HashMap<Uuid, Job>,
    progress: HashMap<Uuid, Vec<JobProgress>>,
    result_writes: HashMap<Uuid, usize>,
}

/// Job table held in memory. Claiming happens under one lock, so it is
/// exclusive the same way the `SKIP LOCKED` claim is.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<QueueInner>,
    pub claim_calls: AtomicUsize,
    pub claim_delay_ms: AtomicU64,
    pub fail_claims: AtomicBool,
    pub fail_progress: AtomicBool,
}

impl MemoryJobQueue {
    pub fn push(&self, job: Job) -> Uuid {
        let id = job.id;
        let mut inner = self.inner.lock();
        inner.order.push_back(id);
        inner.jobs.insert(id, job);
        id
    }

    pub fn job(&self, id: Uuid) -> Job {
        self.inner.lock().jobs[&id].clone()
    }

    pub fn progress_history(&self, id: Uuid) -> Vec<JobProgress> {
        self.inner.lock().progress.get(&id).cloned().unwrap_or_default()
    }

    pub fn result_writes(&self, id: Uuid) -> usize {
        self.inner.lock().result_writes.get(&id).copied().unwrap_or(0)
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.inner
            .lock()
            .jobs
            .values()
            .filter(|job| job.status == status)
            .count()
    }

    fn finish(&self, job_id: Uuid, status: JobStatus, error: Option<&str>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .filter(|job| job.status == JobStatus::Running)
            .ok_or(QueueError::NotRunning(job_id))?;
        job.status = status;
        job.error = error.map(str::to_string);
        job.progress.percent = 100;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn claim(&self) -> Result<Option<Job>, QueueError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.claim_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(QueueError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut inner = self.inner.lock();
        let next = inner
            .order
            .iter()
            .copied()
            .find(|id| inner.jobs[id].status == JobStatus::Queued);
        let Some(id) = next else {
            return Ok(None);
        };

        let job = inner.jobs.get_mut(&id).unwrap();
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn update_progress(&self, job_id: Uuid, progress: &JobProgress) -> Result<(), QueueError> {
        if self.fail_progress.load(Ordering::SeqCst) {
            return Err(QueueError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut inner = self.inner.lock();
        inner.progress.entry(job_id).or_default().push(progress.clone());
        if let Some(job) = inner
            .jobs
            .get_mut(&job_id)
            .filter(|job| job.status == JobStatus::Running)
        {
            job.progress.percent = job.progress.percent.max(progress.percent);
            job.progress.message = progress.message.clone();
        }
        Ok(())
    }

    async fn update_result(&self, job_id: Uuid, result: &JobResult) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        *inner.result_writes.entry(job_id).or_default() += 1;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(QueueError::NotRunning(job_id))?;
        job.result
            .get_or_insert_with(JobResult::new)
            .extend(result.clone());
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.finish(job_id, JobStatus::Completed, None)
    }

    async fn mark_failed(&self, job_id: Uuid, reason: &str) -> Result<(), QueueError> {
        self.finish(job_id, JobStatus::Failed, Some(reason))
    }
}

// ---------------------------------------------------------------------------
// Events, credentials, accounts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<JobEvent>>,
    pub fail: AtomicBool,
}

impl MemoryEventSink {
    pub fn for_job(&self, job_id: Uuid) -> Vec<JobEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn messages(&self, job_id: Uuid, level: EventLevel) -> Vec<String> {
        self.for_job(job_id)
            .into_iter()
            .filter(|event| event.level == level)
            .map(|event| event.message)
            .collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn append(&self, event: &JobEvent) -> Result<(), sqlx::Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

pub fn session() -> SessionPayload {
    SessionPayload {
        cookies: vec![SessionCookie {
            name: "sid".to_string(),
            value: "secret".to_string(),
            domain: ".example.com".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
        }],
        user_agent: None,
    }
}

/// Every user has a connected session unless the platform is marked
/// disconnected or corrupt.
#[derive(Default)]
pub struct MemoryVault {
    disconnected: Mutex<HashSet<Platform>>,
    corrupt: Mutex<HashSet<Platform>>,
}

impl MemoryVault {
    pub fn disconnect(&self, platform: Platform) {
        self.disconnected.lock().insert(platform);
    }

    pub fn corrupt(&self, platform: Platform) {
        self.corrupt.lock().insert(platform);
    }
}

#[async_trait]
impl CredentialVault for MemoryVault {
    async fn get_decrypted_session(
        &self,
        _user_id: Uuid,
        platform: Platform,
    ) -> Result<SessionPayload, VaultError> {
        if self.disconnected.lock().contains(&platform) {
            return Err(VaultError::AccountNotConnected(platform));
        }
        if self.corrupt.lock().contains(&platform) {
            return Err(VaultError::Decryption(platform, "aead::Error".to_string()));
        }
        Ok(session())
    }
}

#[derive(Default)]
pub struct MemoryAccounts {
    updates: Mutex<Vec<(Uuid, Platform, AccountStatus)>>,
}

impl MemoryAccounts {
    pub fn updates(&self) -> Vec<(Uuid, Platform, AccountStatus)> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccounts {
    async fn set_status(
        &self,
        user_id: Uuid,
        platform: Platform,
        status: AccountStatus,
    ) -> Result<(), sqlx::Error> {
        self.updates.lock().push((user_id, platform, status));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

/// A page on which every element exists and every action succeeds.
pub struct FakePage {
    url: Mutex<String>,
    closed: AtomicBool,
    closes: Arc<AtomicUsize>,
    matches: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        *self.url.lock() = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.url.lock().clone())
    }

    async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn exists(&self, _selector: &str) -> Result<bool, BrowserError> {
        Ok(false)
    }

    async fn count(&self, _selector: &str) -> Result<usize, BrowserError> {
        Ok(self.matches.load(Ordering::SeqCst))
    }

    async fn click(&self, _selector: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn type_text(&self, _selector: &str, _text: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn text(&self, _selector: &str) -> Result<Option<String>, BrowserError> {
        Ok(None)
    }

    async fn attribute(&self, _selector: &str, _name: &str) -> Result<Option<String>, BrowserError> {
        Ok(None)
    }

    async fn set_files(&self, _selector: &str, _files: &[PathBuf]) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct FakeEngine {
    pub alive: AtomicBool,
    pub pages_opened: AtomicUsize,
    pub pages_closed: Arc<AtomicUsize>,
    /// How many elements every selector matches on pages this engine opens.
    pub matches: Arc<AtomicUsize>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            alive: AtomicBool::new(true),
            pages_opened: AtomicUsize::new(0),
            pages_closed: Arc::new(AtomicUsize::new(0)),
            matches: Arc::new(AtomicUsize::new(64)),
        }
    }
}

#[async_trait]
impl BrowserEngine for FakeEngine {
    async fn new_page(&self, _session: &SessionPayload) -> Result<Box<dyn BrowserPage>, BrowserError> {
        if !self.is_alive() {
            return Err(BrowserError::Unavailable("engine exited".to_string()));
        }
        self.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            url: Mutex::new("about:blank".to_string()),
            closed: AtomicBool::new(false),
            closes: self.pages_closed.clone(),
            matches: self.matches.clone(),
        }))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    pub engine: Arc<FakeEngine>,
    pub launches: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserEngine>, BrowserError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BrowserError::Launch("chrome not found".to_string()));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.engine.alive.store(true, Ordering::SeqCst);
        Ok(self.engine.clone() as Arc<dyn BrowserEngine>)
    }
}

// ---------------------------------------------------------------------------
// Scripted platform processors
// ---------------------------------------------------------------------------

/// Behaviour of one scripted platform run.
#[derive(Clone, Default)]
pub struct Script {
    pub fail_at: Option<(Step, PlatformError)>,
    pub listing_url: Option<String>,
    /// When set, `initialize` waits for a notification before continuing.
    pub gate: Option<Arc<Notify>>,
    /// Panic inside `fill_form`, as an adapter bug would.
    pub panic: bool,
}

impl Script {
    pub fn listing(url: &str) -> Self {
        Self {
            listing_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn failing(step: Step, error: PlatformError) -> Self {
        Self {
            fail_at: Some((step, error)),
            ..Default::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Default::default()
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }
}

/// Processor factory that records every lifecycle call.
#[derive(Default)]
pub struct ScriptedProcessors {
    scripts: Mutex<HashMap<Platform, Script>>,
    calls: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedProcessors {
    pub fn with(self, platform: Platform, script: Script) -> Self {
        self.scripts.lock().insert(platform, script);
        self
    }

    /// Calls as `"<platform>:<step>"`, plus `"<platform>:cleanup"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn cleanups(&self, platform: Platform) -> usize {
        let wanted = format!("{}:cleanup", platform);
        self.calls.lock().iter().filter(|call| **call == wanted).count()
    }

    /// Most platform runs that were ever between `initialize` and `cleanup` at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl ProcessorFactory for ScriptedProcessors {
    fn create(
        &self,
        platform: Platform,
        _engine: Arc<dyn BrowserEngine>,
        _session: SessionPayload,
    ) -> Box<dyn PlatformProcessor> {
        let script = self.scripts.lock().get(&platform).cloned().unwrap_or_default();
        Box::new(ScriptedProcessor {
            platform,
            script,
            calls: self.calls.clone(),
            active: self.active.clone(),
            max_active: self.max_active.clone(),
            entered: false,
        })
    }
}

struct ScriptedProcessor {
    platform: Platform,
    script: Script,
    calls: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    entered: bool,
}

impl ScriptedProcessor {
    fn step(&self, step: Step) -> Result<(), PlatformError> {
        self.calls.lock().push(format!("{}:{}", self.platform, step));
        match &self.script.fail_at {
            Some((at, error)) if *at == step => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PlatformProcessor for ScriptedProcessor {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn initialize(&mut self) -> Result<(), PlatformError> {
        self.entered = true;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if let Some(gate) = &self.script.gate {
            gate.notified().await;
        }
        self.step(Step::Initialize)
    }

    async fn upload_images(&mut self, _images: &[PathBuf]) -> Result<(), PlatformError> {
        self.step(Step::UploadImages)
    }

    async fn fill_form(&mut self, _payload: &ListingPayload) -> Result<(), PlatformError> {
        if self.script.panic {
            panic!("scripted {} adapter panicked", self.platform);
        }
        self.step(Step::FillForm)
    }

    async fn submit(&mut self) -> Result<(), PlatformError> {
        self.step(Step::Submit)
    }

    async fn get_listing_url(&mut self) -> Result<String, PlatformError> {
        self.step(Step::GetListingUrl)?;
        Ok(self
            .script
            .listing_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.example/listing/1", self.platform)))
    }

    async fn cleanup(&mut self) {
        self.calls.lock().push(format!("{}:cleanup", self.platform));
        if std::mem::take(&mut self.entered) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Factory whose adapters cannot even be built: a panic outside any
/// platform step.
pub struct PanickingFactory;

impl ProcessorFactory for PanickingFactory {
    fn create(
        &self,
        platform: Platform,
        _engine: Arc<dyn BrowserEngine>,
        _session: SessionPayload,
    ) -> Box<dyn PlatformProcessor> {
        panic!("no adapter could be built for {}", platform);
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub queue: Arc<MemoryJobQueue>,
    pub events: Arc<MemoryEventSink>,
    pub vault: Arc<MemoryVault>,
    pub accounts: Arc<MemoryAccounts>,
    pub launcher: Arc<FakeLauncher>,
    pub state: AppState,
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

impl Harness {
    pub fn new(processors: Arc<dyn ProcessorFactory>) -> Self {
        let queue = Arc::new(MemoryJobQueue::default());
        let events = Arc::new(MemoryEventSink::default());
        let vault = Arc::new(MemoryVault::default());
        let accounts = Arc::new(MemoryAccounts::default());
        let launcher = Arc::new(FakeLauncher::default());

        let state = AppState {
            queue: queue.clone(),
            events: JobEventLogger::new(events.clone()),
            vault: vault.clone(),
            accounts: accounts.clone(),
            browsers: Arc::new(BrowserManager::new(launcher.clone())),
            processors,
            images: Arc::new(
                ImageStager::new(std::env::temp_dir().join("relist-test-staging")).unwrap(),
            ),
        };

        Self {
            queue,
            events,
            vault,
            accounts,
            launcher,
            state,
        }
    }

    pub fn processor(&self) -> JobProcessor {
        JobProcessor::new(self.state.clone())
    }

    /// Queue `job` and claim it, as the worker loop would before processing.
    pub async fn claimed(&self, job: Job) -> Job {
        let id = self.queue.push(job);
        let claimed = self.queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        claimed
    }
}

//! The pipeline context.

use crate::capture::CaptureSource;
use crate::crash::CrashReporter;
use crate::delivery::SessionDelivery;
use crate::device_id::{DeviceIdStore, FileDeviceIdStore};
use crate::options::VigilOptions;
use crate::processor::{CurrentSession, StorageSpanProcessor};
use crate::reconciler::{ReconcileReport, UnsentDataReconciler};
use crate::session::{Heartbeat, SessionController};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use vigil_core::prelude::*;
use vigil_upload::{DispatchReport, Uploader};

/// Name of the span covering process launch until the first session starts.
pub const PROCESS_LAUNCH_SPAN_NAME: &str = "emb-process-launch";

/// External collaborators supplied by the host integration.
#[derive(Default)]
pub struct Collaborators {
    crash_reporter: Option<Arc<dyn CrashReporter>>,
    device_id_store: Option<Arc<dyn DeviceIdStore>>,
    clock: Option<Arc<dyn ClockProvider>>,
}

impl Collaborators {
    /// No collaborators: no crash collector, a file-backed device id and the
    /// system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlate sessions with crashes from `reporter`.
    pub fn with_crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = Some(reporter);
        self
    }

    /// Read the device id from `store`.
    pub fn with_device_id_store(mut self, store: Arc<dyn DeviceIdStore>) -> Self {
        self.device_id_store = Some(store);
        self
    }

    /// Use `clock` for span and session timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn ClockProvider>) -> Self {
        self.clock = Some(clock);
        self
    }
}

/// One running telemetry pipeline.
///
/// Built once with [`setup`](Self::setup) and shared by the host. Nothing in
/// here panics or propagates a failure into the host beyond the returned
/// `Result`s: delivery problems are logged and retried on the next launch.
pub struct Vigil {
    options: VigilOptions,
    storage: Storage,
    tracer: Tracer,
    delivery: Option<SessionDelivery>,
    controller: Arc<SessionController>,
    processor: Arc<StorageSpanProcessor>,
    crash_reporter: Option<Arc<dyn CrashReporter>>,
    capture_sources: RwLock<Vec<Arc<dyn CaptureSource>>>,
    heartbeat: Mutex<Option<(Arc<Heartbeat>, JoinHandle<()>)>>,
    device_id: String,
    started: AtomicBool,
}

impl Vigil {
    /// Build the pipeline.
    ///
    /// Fails with a setup error if the options are invalid, the storage
    /// engine cannot open or the device id cannot be read. If the upload
    /// layer cannot be built the pipeline still runs, recording into storage
    /// without delivering anything.
    pub fn setup(options: VigilOptions, collaborators: Collaborators) -> Result<Self> {
        options.validate()?;

        let storage = Storage::open(options.storage_config()).setup_context("storage")?;

        let device_id_store = collaborators
            .device_id_store
            .unwrap_or_else(|| Arc::new(FileDeviceIdStore::new(options.device_id_path())));
        let device_id = device_id_store.device_id().setup_context("device id")?;

        let clock = collaborators
            .clock
            .unwrap_or_else(|| Arc::new(RealClock::new()));
        let current = CurrentSession::default();
        let processor = Arc::new(StorageSpanProcessor::new(storage.clone(), current.clone()));
        let tracer = Tracer::new(processor.clone()).with_clock(clock);

        let delivery = match options.upload_options(&device_id).and_then(Uploader::new) {
            Ok(uploader) => Some(SessionDelivery::new(storage.clone(), uploader)),
            Err(e) => {
                tracing::warn!(error = %e, "Upload unavailable, telemetry will not be delivered");
                None
            }
        };

        let mut controller = SessionController::new(storage.clone(), tracer.clone(), current);
        if let Some(reporter) = &collaborators.crash_reporter {
            controller = controller.with_crash_reporter(reporter.clone());
        }

        tracing::info!(
            app_id = %options.app_id,
            data_directory = %options.data_directory().display(),
            delivery = delivery.is_some(),
            "Vigil set up"
        );

        Ok(Self {
            options,
            storage,
            tracer,
            delivery,
            controller: Arc::new(controller),
            processor,
            crash_reporter: collaborators.crash_reporter,
            capture_sources: RwLock::new(Vec::new()),
            heartbeat: Mutex::new(None),
            device_id,
            started: AtomicBool::new(false),
        })
    }

    /// Options the pipeline was built with.
    pub fn options(&self) -> &VigilOptions {
        &self.options
    }

    /// Tracer recording into the current session.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Backing storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Uploader, when delivery is available.
    pub fn uploader(&self) -> Option<&Uploader> {
        self.delivery.as_ref().map(SessionDelivery::uploader)
    }

    /// Session controller.
    pub fn session_controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Device identifier sent with every upload.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The active session as stored.
    pub fn current_session(&self) -> Option<SessionRecord> {
        self.controller.current_session()
    }

    /// Whether [`start`](Self::start) ran and [`shutdown`](Self::shutdown)
    /// has not.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Register a capture source. Sources registered after
    /// [`start`](Self::start) start immediately.
    pub fn register_capture_source(&self, source: Arc<dyn CaptureSource>) {
        if self.is_started() {
            source.start();
        }
        tracing::debug!(source = source.name(), "Capture source registered");
        self.capture_sources.write().push(source);
    }

    /// Recover unsent data from previous launches.
    ///
    /// Returns `Ok(None)` when delivery is unavailable.
    pub async fn reconcile(&self) -> Result<Option<ReconcileReport>> {
        let Some(delivery) = &self.delivery else {
            return Ok(None);
        };
        let mut reconciler =
            UnsentDataReconciler::new(self.storage.clone(), delivery.uploader().clone());
        if let Some(reporter) = &self.crash_reporter {
            reconciler = reconciler.with_crash_reporter(reporter.clone());
        }
        reconciler.reconcile().await.map(Some)
    }

    /// Start recording.
    ///
    /// Reconciles data left by previous launches, then starts a foreground
    /// session, the heartbeat and the registered capture sources. A failed
    /// reconciliation is logged and retried on the next launch.
    pub async fn start(&self) -> Result<SessionRecord> {
        if self.started.swap(true, Ordering::SeqCst) {
            if let Some(session) = self.current_session() {
                tracing::debug!(session_id = %session.id, "Vigil already started");
                return Ok(session);
            }
        }

        let launch = self.launch_span();

        if let Err(e) = self.reconcile().await {
            tracing::warn!(error = %e, code = e.code(), "Reconciliation skipped for this launch");
        }

        let session = match self.controller.start_session(SessionState::Foreground) {
            Ok(session) => session,
            Err(e) => {
                launch.end_with(EndOptions::default().with_error_code(SpanErrorCode::Failure));
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.start_heartbeat();
        for source in self.capture_sources.read().iter() {
            source.start();
        }

        launch.end();
        tracing::info!(session_id = %session.id, "Vigil started");
        Ok(session)
    }

    fn launch_span(&self) -> RecordingSpan {
        let builder = self
            .tracer
            .span_builder(PROCESS_LAUNCH_SPAN_NAME, SpanType::Performance);
        match self.options.process_start_time {
            Some(start) => builder.with_start_time(start).start(),
            None => builder.with_error_code(SpanErrorCode::Unknown).start(),
        }
    }

    fn start_heartbeat(&self) {
        let mut slot = self.heartbeat.lock();
        if slot.is_some() {
            return;
        }
        let heartbeat = Arc::new(Heartbeat::new(
            self.controller.clone(),
            self.options.heartbeat_interval,
        ));
        let handle = heartbeat.clone().spawn();
        *slot = Some((heartbeat, handle));
    }

    fn stop_heartbeat(&self) {
        if let Some((heartbeat, handle)) = self.heartbeat.lock().take() {
            heartbeat.stop();
            handle.abort();
        }
    }

    /// Move the app between foreground and background.
    pub fn update_state(&self, state: SessionState) -> Result<Option<SessionRecord>> {
        self.controller.update_state(state)
    }

    /// End the current session and hand it to the upload cache.
    ///
    /// Returns the dispatch summary, or `None` when no session was active or
    /// delivery is unavailable.
    pub async fn end_session(&self) -> Result<Option<DispatchReport>> {
        match self.controller.end_session()? {
            Some(session) => Ok(self.deliver(&session).await),
            None => Ok(None),
        }
    }

    /// End the current session, deliver it and start a fresh foreground
    /// session.
    pub async fn start_new_session(&self) -> Result<SessionRecord> {
        self.end_session().await?;
        self.controller.start_session(SessionState::Foreground)
    }

    /// Dispatch everything in the upload cache.
    pub async fn retry_cached_data(&self) -> Option<DispatchReport> {
        match self.uploader() {
            Some(uploader) => Some(uploader.dispatch().await),
            None => None,
        }
    }

    async fn deliver(&self, session: &SessionRecord) -> Option<DispatchReport> {
        self.processor.release_session(session.id);
        let delivery = self.delivery.as_ref()?;
        if let Err(e) = delivery.stage(session, None) {
            tracing::warn!(
                session_id = %session.id,
                error = %e,
                "Failed to stage session, it stays in storage for the next launch"
            );
        }
        Some(delivery.uploader().dispatch().await)
    }

    /// Stop capture and the heartbeat, end the session as terminated and
    /// flush storage.
    pub async fn shutdown(&self) -> Result<Option<DispatchReport>> {
        for source in self.capture_sources.read().iter() {
            source.stop();
        }
        self.stop_heartbeat();

        let dispatch = match self.controller.end_session_with(true)? {
            Some(session) => self.deliver(&session).await,
            None => None,
        };

        if let Err(e) = self.storage.flush() {
            tracing::warn!(error = %e, "Failed to flush storage on shutdown");
        }
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("Vigil shut down");
        Ok(dispatch)
    }
}

//! Debug session coordinator.
//!
//! Wires the configuration resolver, cache manager, bundler session and debug
//! server session together and drives them through one state machine:
//!
//! ```text
//! Idle → ConfigResolved → CacheChecked → BundlerConstructed
//!      → ServerStarting → ServerOpen → Bundling ⟲ → Closing → Closed
//! ```
//!
//! The server's close event is the only way a running session ends. Failures
//! before the server is up go straight to `Closed` and reject [`DebugSession::run`].

use crate::bundler::{
    Bundle, BundleFeed, BundlePublisher, Bundled, BundlerHandle, BundlerSession, EngineBuilder,
    EngineOptions, PiletHeader, PostProcess,
};
use crate::cache::CacheManager;
use crate::config::{SessionConfig, SessionOptions};
use crate::error::{BuildError, ServerError, SessionError};
use crate::externals::ExternalsSet;
use crate::manifest::ProjectData;
use crate::server::{
    MockServerConfig, PiletInjector, ServerAddress, ServerBuilder, ServerEvent, PILET_API,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Pending build outcomes between the bundler task and the coordinator.
const BUNDLED_CAPACITY: usize = 8;

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ConfigResolved,
    CacheChecked,
    BundlerConstructed,
    ServerStarting,
    ServerOpen,
    Bundling,
    Closing,
    Closed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ConfigResolved => "config-resolved",
            Self::CacheChecked => "cache-checked",
            Self::BundlerConstructed => "bundler-constructed",
            Self::ServerStarting => "server-starting",
            Self::ServerOpen => "server-open",
            Self::Bundling => "bundling",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported once the server is listening.
#[derive(Debug, Clone)]
pub struct SessionOpened {
    pub address: ServerAddress,
    /// Full URL of the management API.
    pub management_url: String,
    /// Whether a browser should be opened on `address`.
    pub open_browser: bool,
}

/// Hooks into a running session. Every method defaults to a no-op.
pub trait SessionObserver: Send + Sync {
    fn transition(&self, _from: SessionState, _to: SessionState) {}

    fn opened(&self, _opened: &SessionOpened) {}

    /// The first build was requested.
    fn bundle_requested(&self) {}

    /// A build finished and was post-processed.
    fn bundled(&self, _bundle: &Bundle) {}

    fn build_failed(&self, _error: &BuildError) {}

    /// Connected clients were told to reload.
    fn reload_emitted(&self, _bundle: &Bundle, _clients: usize) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

struct StateMachine {
    state: SessionState,
    observer: Arc<dyn SessionObserver>,
}

impl StateMachine {
    fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            state: SessionState::Idle,
            observer,
        }
    }

    fn advance(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "session transition");
        self.state = to;
        self.observer.transition(from, to);
    }
}

/// One debug session: a single entry, bundler and server.
pub struct DebugSession<E, S> {
    base_dir: PathBuf,
    options: SessionOptions,
    engine: E,
    server: S,
    observer: Arc<dyn SessionObserver>,
    post_process: Arc<dyn PostProcess>,
}

impl<E, S> DebugSession<E, S>
where
    E: EngineBuilder,
    S: ServerBuilder,
{
    /// `options` are resolved against `base_dir` when the session runs.
    pub fn new(base_dir: impl Into<PathBuf>, options: SessionOptions, engine: E, server: S) -> Self {
        Self {
            base_dir: base_dir.into(),
            options,
            engine,
            server,
            observer: Arc::new(NoopObserver),
            post_process: Arc::new(PiletHeader),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the default [`PiletHeader`] post-processing.
    pub fn with_post_process(mut self, post_process: Arc<dyn PostProcess>) -> Self {
        self.post_process = post_process;
        self
    }

    /// Run the session until the server closes.
    ///
    /// Resolves with the server's close result. Configuration, cache, bundler
    /// construction and server start failures reject before any build runs.
    pub async fn run(self) -> Result<(), SessionError> {
        let mut machine = StateMachine::new(self.observer.clone());
        let result = self.drive(&mut machine).await;
        if let Err(e) = &result {
            error!(error = %e, state = %machine.state, "debug session ended with an error");
        }
        machine.advance(SessionState::Closed);
        result
    }

    async fn drive(self, machine: &mut StateMachine) -> Result<(), SessionError> {
        let Self {
            base_dir,
            options,
            engine,
            server,
            observer,
            post_process,
        } = self;

        let config = SessionConfig::resolve(&base_dir, options)?;
        let project = ProjectData::retrieve(&config.target_dir, config.app.as_deref())?;
        debug!(
            entry = %config.entry_module.display(),
            root = %project.root.display(),
            port = config.port,
            "configuration resolved"
        );
        machine.advance(SessionState::ConfigResolved);

        CacheManager::new(&project.root, &config.cache_dir)
            .prepare(config.fresh)
            .await?;
        machine.advance(SessionState::CacheChecked);

        let externals = ExternalsSet::from_project(&project);
        debug!(externals = %externals.join(","), "shared dependencies");
        let engine_config = externals.apply(
            EngineOptions::from_session(&config, &project),
            project.host_name(),
        );
        let (bundler, handle) = BundlerSession::construct(engine, engine_config)?;
        machine.advance(SessionState::BundlerConstructed);

        let (publisher, feed) = BundleFeed::channel();
        let mut server_config =
            MockServerConfig::from_options(&config.server, config.port, &config.target_dir);
        server_config
            .injectors
            .merge_session_injector(session_injector(&config, &project, feed));
        let management_api = server_config.api.clone();

        machine.advance(SessionState::ServerStarting);
        let mut server = server.build(server_config)?;

        let (bundled_tx, mut bundled_rx) = mpsc::channel(BUNDLED_CAPACITY);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let bundler_task = tokio::spawn(bundler.run(bundled_tx));

        if let Err(e) = server.start(events_tx).await {
            bundler_task.abort();
            return Err(e.into());
        }

        let running = Running {
            machine,
            observer,
            post_process,
            publisher,
            handle,
            hmr: config.hmr,
            open_browser: config.open,
            management_api,
            opened: false,
        };
        let closed = running.serve(&mut events_rx, &mut bundled_rx).await;

        bundler_task.abort();
        drop(server);
        closed.map_err(SessionError::from)
    }
}

fn session_injector(config: &SessionConfig, project: &ProjectData, feed: BundleFeed) -> PiletInjector {
    PiletInjector {
        active: true,
        bundler: feed,
        port: config.port,
        root: project.root.clone(),
        app: project.app_dir(),
        handle: vec!["/".to_string(), PILET_API.to_string()],
        api: PILET_API.to_string(),
        name: project.manifest.name.clone(),
        version: project.manifest.version.clone(),
    }
}

/// State owned by the event loop once the server is starting.
struct Running<'m> {
    machine: &'m mut StateMachine,
    observer: Arc<dyn SessionObserver>,
    post_process: Arc<dyn PostProcess>,
    publisher: BundlePublisher,
    handle: BundlerHandle,
    hmr: bool,
    open_browser: bool,
    management_api: String,
    opened: bool,
}

impl Running<'_> {
    async fn serve(
        mut self,
        events: &mut mpsc::UnboundedReceiver<ServerEvent>,
        bundled: &mut mpsc::Receiver<Bundled>,
    ) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ServerEvent::Open(address)) => self.on_open(address),
                    Some(ServerEvent::Close(result)) => {
                        self.machine.advance(SessionState::Closing);
                        info!("server closed");
                        return result;
                    }
                    None => {
                        self.machine.advance(SessionState::Closing);
                        return Err(ServerError::Crashed(
                            "server stopped without a close event".to_string(),
                        ));
                    }
                },
                Some(outcome) = bundled.recv() => self.on_bundled(outcome).await,
            }
        }
    }

    fn on_open(&mut self, address: ServerAddress) {
        if self.opened {
            warn!(%address, "server reported open twice, ignoring");
            return;
        }
        self.opened = true;
        self.machine.advance(SessionState::ServerOpen);

        let url = address.url();
        let management_url = format!("{url}{}", self.management_api);
        debug!(%url, %management_url, "server open");
        self.observer.opened(&SessionOpened {
            address,
            management_url,
            open_browser: self.open_browser,
        });

        if self.handle.bundle() {
            self.observer.bundle_requested();
        }
        self.machine.advance(SessionState::Bundling);
    }

    async fn on_bundled(&mut self, outcome: Bundled) {
        let mut bundle = match outcome {
            Ok(bundle) => bundle,
            Err(e) => {
                error!(error = %e, "build failed, waiting for changes");
                self.observer.build_failed(&e);
                return;
            }
        };

        if let Err(e) = self.post_process.process(&mut bundle).await {
            error!(error = %e, "post-processing failed");
            self.observer.build_failed(&e);
            return;
        }

        info!(
            entry = %bundle.entry_name(),
            files = bundle.files.len(),
            duration_ms = bundle.duration.as_millis(),
            "bundled"
        );
        self.observer.bundled(&bundle);
        self.publisher.publish(bundle.clone());

        if self.hmr {
            let clients = self.publisher.signal_ready();
            debug!(clients, "reload signalled");
            self.observer.reload_emitted(&bundle, clients);
        }
    }
}

//! End-to-end tests of the debug session coordinator with scripted
//! collaborators standing in for the build engine and the server.

use futures::future::BoxFuture;
use pilet_core::bundler::{Bundle, BuildEngine, BundleFeed, Bundled, EngineBuilder, EngineConfig, PILET_HEADER};
use pilet_core::error::{BuildError, ConfigError, ServerError, SessionError};
use pilet_core::server::{
    DebugServer, Injector, MockServerConfig, ServerAddress, ServerBuilder, ServerEvent,
    SCRIPT_INJECTOR, SESSION_INJECTOR,
};
use pilet_core::session::{DebugSession, SessionObserver, SessionOpened, SessionState};
use pilet_core::SessionOptions;
use serde_json::json;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn project(peers: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let peer_deps: serde_json::Map<String, serde_json::Value> = peers
        .iter()
        .map(|name| ((*name).to_string(), json!("*")))
        .collect();
    fs::write(
        dir.path().join("package.json"),
        json!({ "name": "my-pilet", "version": "1.0.0", "peerDependencies": peer_deps }).to_string(),
    )
    .unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src").join("index.tsx"), "export function setup() {}").unwrap();
    dir
}

fn options(port: u16) -> SessionOptions {
    SessionOptions {
        entry: Some("./src/index".to_string()),
        port: Some(port),
        ..SessionOptions::default()
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Spy {
    log: Log,
    transitions: Mutex<Vec<SessionState>>,
    opened: Mutex<Option<SessionOpened>>,
    failures: AtomicUsize,
    reloads: AtomicUsize,
}

impl Spy {
    fn with_log(log: Log) -> Arc<Self> {
        Arc::new(Self {
            log,
            ..Self::default()
        })
    }

    fn states(&self) -> Vec<SessionState> {
        self.transitions.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

impl SessionObserver for Spy {
    fn transition(&self, _from: SessionState, to: SessionState) {
        self.transitions.lock().unwrap().push(to);
    }

    fn opened(&self, opened: &SessionOpened) {
        self.log.lock().unwrap().push("opened");
        *self.opened.lock().unwrap() = Some(opened.clone());
    }

    fn bundle_requested(&self) {
        self.log.lock().unwrap().push("bundle_requested");
    }

    fn bundled(&self, _bundle: &Bundle) {
        self.log.lock().unwrap().push("bundled");
    }

    fn build_failed(&self, _error: &BuildError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("build_failed");
    }

    fn reload_emitted(&self, _bundle: &Bundle, _clients: usize) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push("reload");
    }
}

// ---------------------------------------------------------------------------
// Build engine
// ---------------------------------------------------------------------------

/// What the engine saw when it was constructed.
struct Constructed {
    config: EngineConfig,
    cache_existed: bool,
}

type ConstructedSlot = Arc<Mutex<Option<Constructed>>>;

/// Produces the scripted outcomes in order. After each build it triggers
/// the next one itself, like a file watcher would.
struct ScriptedEngine {
    out_dir: PathBuf,
    log: Log,
    outcomes: VecDeque<Result<(), &'static str>>,
    trigger_tx: Option<mpsc::Sender<Vec<PathBuf>>>,
    trigger_rx: Option<mpsc::Receiver<Vec<PathBuf>>>,
    builds: usize,
}

impl BuildEngine for ScriptedEngine {
    fn build(&mut self) -> BoxFuture<'_, Bundled> {
        Box::pin(async move {
            self.builds += 1;
            self.log.lock().unwrap().push("build");
            let outcome = self.outcomes.pop_front().unwrap_or(Ok(()));

            if self.outcomes.is_empty() {
                self.trigger_tx = None;
            } else if let Some(tx) = &self.trigger_tx {
                tx.try_send(vec![PathBuf::from("src/index.tsx")]).unwrap();
            }

            match outcome {
                Ok(()) => {
                    fs::create_dir_all(&self.out_dir).unwrap();
                    let entry = self.out_dir.join("index.js");
                    fs::write(&entry, format!("export const build = {};", self.builds)).unwrap();
                    Ok(Bundle {
                        entry: entry.clone(),
                        out_dir: self.out_dir.clone(),
                        files: vec![entry],
                        hash: String::new(),
                        duration: Duration::from_millis(1),
                    })
                }
                Err(message) => Err(BuildError::failed(message)),
            }
        })
    }

    fn take_triggers(&mut self) -> Option<mpsc::Receiver<Vec<PathBuf>>> {
        self.trigger_rx.take()
    }
}

fn scripted_engine(
    outcomes: Vec<Result<(), &'static str>>,
    log: Log,
    slot: ConstructedSlot,
) -> impl EngineBuilder {
    move |config: EngineConfig| -> Result<Box<dyn BuildEngine>, BuildError> {
        let (tx, rx) = mpsc::channel(4);
        let engine = ScriptedEngine {
            out_dir: config.options.out_dir.clone(),
            log,
            outcomes: outcomes.into(),
            trigger_tx: Some(tx),
            trigger_rx: Some(rx),
            builds: 0,
        };
        *slot.lock().unwrap() = Some(Constructed {
            cache_existed: config.options.cache_dir.exists(),
            config,
        });
        Ok(Box::new(engine))
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// When a scripted server closes.
#[derive(Clone, Copy)]
enum CloseWhen {
    /// After this many reload signals.
    Reloads(usize),
    /// Once a bundle has been published, reload or not.
    Published,
}

/// Opens immediately and closes as scripted.
struct ScriptedServer {
    port: u16,
    feed: BundleFeed,
    close_when: CloseWhen,
    fail_start: bool,
}

impl DebugServer for ScriptedServer {
    fn start(
        &mut self,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> BoxFuture<'_, Result<(), ServerError>> {
        Box::pin(async move {
            if self.fail_start {
                return Err(ServerError::Bind {
                    port: self.port,
                    message: "address in use".to_string(),
                });
            }

            let feed = self.feed.clone();
            let mut ready = feed.subscribe();
            let port = self.port;
            let close_when = self.close_when;
            tokio::spawn(async move {
                let _ = events.send(ServerEvent::Open(ServerAddress::http(port)));
                match close_when {
                    CloseWhen::Reloads(count) => {
                        for _ in 0..count {
                            if ready.recv().await.is_err() {
                                break;
                            }
                        }
                    }
                    CloseWhen::Published => {
                        while feed.latest().is_none() {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                    }
                }
                let _ = events.send(ServerEvent::Close(Ok(())));
            });
            Ok(())
        })
    }
}

#[derive(Default)]
struct ServerProbe {
    built: AtomicBool,
    config: Mutex<Option<MockServerConfig>>,
}

fn scripted_server(close_after: usize, fail_start: bool, probe: Arc<ServerProbe>) -> impl ServerBuilder {
    closing_server(CloseWhen::Reloads(close_after), fail_start, probe)
}

fn closing_server(close_when: CloseWhen, fail_start: bool, probe: Arc<ServerProbe>) -> impl ServerBuilder {
    move |config: MockServerConfig| -> Result<Box<dyn DebugServer>, ServerError> {
        probe.built.store(true, Ordering::SeqCst);
        let feed = config
            .injectors
            .session()
            .map(|injector| injector.bundler.clone())
            .ok_or_else(|| ServerError::Crashed("no session injector".to_string()))?;
        let port = config.port;
        *probe.config.lock().unwrap() = Some(config);
        Ok(Box::new(ScriptedServer {
            port,
            feed,
            close_when,
            fail_start,
        }))
    }
}

async fn run_session<E: EngineBuilder, S: ServerBuilder>(
    base_dir: &Path,
    options: SessionOptions,
    engine: E,
    server: S,
    spy: Arc<Spy>,
) -> Result<(), SessionError> {
    let session = DebugSession::new(base_dir, options, engine, server).with_observer(spy);
    tokio::time::timeout(Duration::from_secs(10), session.run())
        .await
        .expect("session did not finish")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_first_bundle() {
    let dir = project(&[]);
    let log = Log::default();
    let spy = Spy::with_log(log.clone());
    let slot = ConstructedSlot::default();
    let probe = Arc::new(ServerProbe::default());

    run_session(
        dir.path(),
        options(1234),
        scripted_engine(vec![Ok(())], log, slot),
        scripted_server(1, false, probe),
        spy.clone(),
    )
    .await
    .unwrap();

    let opened = spy.opened.lock().unwrap().clone().unwrap();
    assert_eq!(opened.address.url(), "http://localhost:1234");
    assert_eq!(opened.management_url, "http://localhost:1234/manage-mock-server");
    assert!(!opened.open_browser);
    assert_eq!(spy.reloads.load(Ordering::SeqCst), 1);
    assert_eq!(spy.failures.load(Ordering::SeqCst), 0);

    assert_eq!(
        spy.states(),
        vec![
            SessionState::ConfigResolved,
            SessionState::CacheChecked,
            SessionState::BundlerConstructed,
            SessionState::ServerStarting,
            SessionState::ServerOpen,
            SessionState::Bundling,
            SessionState::Closing,
            SessionState::Closed,
        ]
    );

    let script = fs::read_to_string(dir.path().join("dist").join("index.js")).unwrap();
    assert!(script.starts_with(PILET_HEADER));
}

#[tokio::test]
async fn test_server_opens_before_first_build() {
    let dir = project(&[]);
    let log = Log::default();
    let spy = Spy::with_log(log.clone());

    run_session(
        dir.path(),
        options(1234),
        scripted_engine(vec![Ok(())], log, ConstructedSlot::default()),
        scripted_server(1, false, Arc::default()),
        spy.clone(),
    )
    .await
    .unwrap();

    assert_eq!(
        spy.events(),
        vec!["opened", "bundle_requested", "build", "bundled", "reload"]
    );
}

#[tokio::test]
async fn test_externals_in_place_at_construction() {
    let dir = project(&["A", "B"]);
    let log = Log::default();
    let slot = ConstructedSlot::default();

    run_session(
        dir.path(),
        options(1234),
        scripted_engine(vec![Ok(())], log.clone(), slot.clone()),
        scripted_server(1, false, Arc::default()),
        Spy::with_log(log),
    )
    .await
    .unwrap();

    let constructed = slot.lock().unwrap().take().unwrap();
    let externals: Vec<&str> = constructed.config.externals.iter().collect();
    assert_eq!(externals, vec!["A", "B"]);
    assert_eq!(constructed.config.env["PILET_EXTERNALS"], "A,B");
    assert_eq!(constructed.config.env["NODE_ENV"], "development");
}

#[tokio::test]
async fn test_fresh_clears_cache_before_construction() {
    let dir = project(&[]);
    let cache = dir.path().join(".cache");
    fs::create_dir_all(cache.join("deps")).unwrap();
    fs::write(cache.join("deps").join("react.json"), "{}").unwrap();

    let log = Log::default();
    let slot = ConstructedSlot::default();
    let mut fresh = options(1234);
    fresh.fresh = Some(true);

    run_session(
        dir.path(),
        fresh,
        scripted_engine(vec![Ok(())], log.clone(), slot.clone()),
        scripted_server(1, false, Arc::default()),
        Spy::with_log(log),
    )
    .await
    .unwrap();

    assert!(!slot.lock().unwrap().as_ref().unwrap().cache_existed);
    assert!(!cache.exists());
}

#[tokio::test]
async fn test_cache_kept_without_fresh() {
    let dir = project(&[]);
    let cache = dir.path().join(".cache");
    fs::create_dir_all(&cache).unwrap();

    let log = Log::default();
    let slot = ConstructedSlot::default();

    run_session(
        dir.path(),
        options(1234),
        scripted_engine(vec![Ok(())], log.clone(), slot.clone()),
        scripted_server(1, false, Arc::default()),
        Spy::with_log(log),
    )
    .await
    .unwrap();

    assert!(slot.lock().unwrap().as_ref().unwrap().cache_existed);
    assert!(cache.exists());
}

#[tokio::test]
async fn test_user_injector_preserved() {
    let dir = project(&[]);
    fs::write(
        dir.path().join(".piletrc"),
        json!({
            "server": {
                "injectors": {
                    "X": { "active": true, "directory": "fixtures" },
                    "json": { "active": false }
                }
            }
        })
        .to_string(),
    )
    .unwrap();

    let log = Log::default();
    let probe = Arc::new(ServerProbe::default());

    run_session(
        dir.path(),
        options(1234),
        scripted_engine(vec![Ok(())], log.clone(), ConstructedSlot::default()),
        scripted_server(1, false, probe.clone()),
        Spy::with_log(log),
    )
    .await
    .unwrap();

    let config = probe.config.lock().unwrap().take().unwrap();
    let names: Vec<&str> = config.injectors.names().collect();
    assert_eq!(names, vec![SCRIPT_INJECTOR, SESSION_INJECTOR, "X", "json"]);

    match config.injectors.get("X").unwrap() {
        Injector::User(value) => {
            assert_eq!(value, &json!({ "active": true, "directory": "fixtures" }));
        }
        Injector::Session(_) => panic!("user injector was replaced"),
    }

    let session = config.injectors.session().unwrap();
    assert!(session.active);
    assert_eq!(session.port, 1234);
    assert_eq!(session.api, "/$pilet-api");
    assert_eq!(session.handle, vec!["/", "/$pilet-api"]);
    assert_eq!(session.name, "my-pilet");
    assert_eq!(session.version, "1.0.0");
}

#[tokio::test]
async fn test_no_reload_without_hmr() {
    let dir = project(&[]);
    let log = Log::default();
    let spy = Spy::with_log(log.clone());
    let probe = Arc::new(ServerProbe::default());

    let mut no_hmr = options(1234);
    no_hmr.hmr = Some(false);

    run_session(
        dir.path(),
        no_hmr,
        scripted_engine(vec![Ok(())], log, ConstructedSlot::default()),
        closing_server(CloseWhen::Published, false, probe.clone()),
        spy.clone(),
    )
    .await
    .unwrap();

    assert_eq!(spy.reloads.load(Ordering::SeqCst), 0);
    assert_eq!(
        spy.events(),
        vec!["opened", "bundle_requested", "build", "bundled"]
    );

    let config = probe.config.lock().unwrap().take().unwrap();
    let published = config.injectors.session().unwrap().bundler.latest().unwrap();
    assert!(published.entry.ends_with("dist/index.js"));
    assert_eq!(published.hash.len(), 64);
}

#[tokio::test]
async fn test_build_failure_keeps_session_alive() {
    let dir = project(&[]);
    let log = Log::default();
    let spy = Spy::with_log(log.clone());

    run_session(
        dir.path(),
        options(1234),
        scripted_engine(vec![Ok(()), Err("unexpected token"), Ok(())], log, ConstructedSlot::default()),
        scripted_server(2, false, Arc::default()),
        spy.clone(),
    )
    .await
    .unwrap();

    assert_eq!(spy.failures.load(Ordering::SeqCst), 1);
    assert_eq!(spy.reloads.load(Ordering::SeqCst), 2);

    let events = spy.events();
    assert_eq!(events.iter().filter(|e| **e == "build").count(), 3);
    assert_eq!(events.iter().filter(|e| **e == "build_failed").count(), 1);

    // The failure does not leave Bundling
    let states = spy.states();
    assert_eq!(
        &states[states.len() - 3..],
        &[SessionState::Bundling, SessionState::Closing, SessionState::Closed]
    );

    let script = fs::read_to_string(dir.path().join("dist").join("index.js")).unwrap();
    assert_eq!(script, format!("{PILET_HEADER}\nexport const build = 3;"));
}

#[tokio::test]
async fn test_malformed_entry_rejects_before_server() {
    let dir = project(&[]);
    let log = Log::default();
    let spy = Spy::with_log(log.clone());
    let probe = Arc::new(ServerProbe::default());

    let mut bad = options(1234);
    bad.entry = Some(String::new());

    let err = run_session(
        dir.path(),
        bad,
        scripted_engine(vec![Ok(())], log, ConstructedSlot::default()),
        scripted_server(1, false, probe.clone()),
        spy.clone(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SessionError::Config(ConfigError::InvalidOption { .. })));
    assert!(!probe.built.load(Ordering::SeqCst));
    assert!(spy.opened.lock().unwrap().is_none());
    assert_eq!(spy.states(), vec![SessionState::Closed]);
}

#[tokio::test]
async fn test_missing_entry_rejects_before_server() {
    let dir = project(&[]);
    let log = Log::default();
    let spy = Spy::with_log(log.clone());
    let probe = Arc::new(ServerProbe::default());

    let mut missing = options(1234);
    missing.entry = Some("./src/missing".to_string());

    let err = run_session(
        dir.path(),
        missing,
        scripted_engine(vec![Ok(())], log, ConstructedSlot::default()),
        scripted_server(1, false, probe.clone()),
        spy.clone(),
    )
    .await
    .unwrap_err();

    assert!(err.is_config());
    assert!(matches!(err, SessionError::Config(ConfigError::EntryNotFound { .. })));
    assert!(!probe.built.load(Ordering::SeqCst));
    assert!(spy.events().is_empty());
}

#[tokio::test]
async fn test_server_start_failure_rejects() {
    let dir = project(&[]);
    let log = Log::default();
    let spy = Spy::with_log(log.clone());

    let err = run_session(
        dir.path(),
        options(1234),
        scripted_engine(vec![Ok(())], log, ConstructedSlot::default()),
        scripted_server(1, true, Arc::default()),
        spy.clone(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SessionError::Server(ServerError::Bind { port: 1234, .. })));
    assert!(!spy.events().contains(&"build"));
    assert_eq!(spy.states().last(), Some(&SessionState::Closed));
}

#[tokio::test]
async fn test_construct_failure_rejects() {
    let dir = project(&[]);
    let spy = Arc::new(Spy::default());
    let probe = Arc::new(ServerProbe::default());

    let engine = |_config: EngineConfig| -> Result<Box<dyn BuildEngine>, BuildError> {
        Err(BuildError::Construct("engine binary missing".to_string()))
    };

    let err = run_session(
        dir.path(),
        options(1234),
        engine,
        scripted_server(1, false, probe.clone()),
        spy.clone(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SessionError::Build(BuildError::Construct(_))));
    assert!(!probe.built.load(Ordering::SeqCst));
    assert_eq!(
        spy.states(),
        vec![
            SessionState::ConfigResolved,
            SessionState::CacheChecked,
            SessionState::Closed,
        ]
    );
}

mod brain;
mod dom;
mod face;
mod hands;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use headless_chrome::Tab;
use navguide::{
    Completion, Document, GuideConfig, GuidanceStep, HeuristicPlanner, LlmConfig,
    NavigationWatcher, OverlayController, PageData, PageModelExtractor, PlannerMode, SessionState,
};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use brain::RemotePlanner;
use dom::{capture_document, get_current_url};
use hands::{BrowserSession, ChromeNavigation, ChromeSurface, Observed, drain_events};
use types::{Command, NAVIGATION_DELAY, PanelEvent, SKIP_DELAY, settle_delay};

/// Live step-by-step guidance in a Chrome window, driven from a local
/// control panel.
#[derive(Parser)]
#[command(name = "guide", version)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Page to open once the browser is up
    #[arg(long)]
    url: Option<String>,
    /// First port to try for the control panel
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let mut config = GuideConfig::load(args.config.as_deref()).context("loading config")?;
    config.apply_env()?;

    // Panel first, so the user sees something while Chrome starts.
    let (cmd_rx, event_tx) = face::start_server(args.port).await?;

    let runtime = Handle::current();
    tokio::task::spawn_blocking(move || -> Result<()> {
        info!("launching Chrome");
        let browser = BrowserSession::launch()?;
        if let Some(url) = &args.url {
            browser.open(url).with_context(|| format!("opening {url}"))?;
        }
        let guide = Guide::new(browser.tab.clone(), config, event_tx, runtime)?;
        info!("ready, waiting for a goal");
        guide.run(cmd_rx);
        Ok(())
    })
    .await
    .map_err(|e| anyhow!("guidance loop panicked: {e}"))?
}

/// Owns the page-side components and the session. Runs on a blocking
/// thread because every browser call is synchronous.
struct Guide {
    tab: Arc<Tab>,
    config: GuideConfig,
    extractor: PageModelExtractor,
    overlay: OverlayController<ChromeSurface>,
    watcher: NavigationWatcher<ChromeNavigation>,
    planner: Option<RemotePlanner>,
    session: SessionState,
    session_path: Option<PathBuf>,
    events: broadcast::Sender<PanelEvent>,
    runtime: Handle,
    /// Last captured page; event paths and fallback geometry refer to it.
    doc: Option<Document>,
    completion: Option<oneshot::Receiver<Completion>>,
    rescan_at: Option<Instant>,
}

impl Guide {
    fn new(
        tab: Arc<Tab>,
        config: GuideConfig,
        events: broadcast::Sender<PanelEvent>,
        runtime: Handle,
    ) -> Result<Self> {
        let extractor = PageModelExtractor::new(&config)?;
        let overlay = OverlayController::new(ChromeSurface::new(tab.clone()), &config);
        let watcher = NavigationWatcher::new(
            ChromeNavigation::new(tab.clone()),
            config.navigation_debounce(),
        );
        let planner = config
            .llm
            .clone()
            .filter(LlmConfig::is_usable)
            .map(RemotePlanner::new);
        if planner.is_none() {
            debug!("no remote planner configured");
        }

        let session_path = SessionState::default_path();
        let session = match &session_path {
            Some(path) => SessionState::load(path).unwrap_or_else(|e| {
                warn!(error = %e, "could not read saved session, starting fresh");
                SessionState::default()
            }),
            None => SessionState::default(),
        };
        let rescan_at = session.is_active.then(Instant::now);
        if session.is_active {
            info!(goal = %session.goal, step = session.current_step_number, "resuming session");
        }

        Ok(Self {
            tab,
            config,
            extractor,
            overlay,
            watcher,
            planner,
            session,
            session_path,
            events,
            runtime,
            doc: None,
            completion: None,
            rescan_at,
        })
    }

    fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            loop {
                match commands.try_recv() {
                    Ok(command) => self.on_command(command),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        info!("control panel closed, shutting down");
                        self.overlay.destroy();
                        return;
                    }
                }
            }

            let now = Instant::now();
            self.pump(now);
            if self.rescan_at.is_some_and(|at| now >= at) {
                self.rescan_at = None;
                self.run_cycle();
            }

            std::thread::sleep(self.config.poll_interval());
        }
    }

    fn on_command(&mut self, command: Command) {
        info!(?command, "command");
        let now = Instant::now();
        match command {
            Command::Start { goal, mode } => {
                if goal.trim().is_empty() {
                    self.report("Enter a goal first");
                    return;
                }
                self.abandon_step();
                self.session.start(&goal, mode);
                self.persist();
                self.emit_state();
                self.rescan_at = Some(now);
            }
            Command::Stop => {
                self.abandon_step();
                self.rescan_at = None;
                self.session.stop();
                self.persist();
                self.emit_state();
            }
            Command::Rescan => {
                if self.session.is_active {
                    self.abandon_step();
                    self.rescan_at = Some(now);
                }
            }
            Command::Skip => {
                if self.session.is_active {
                    self.abandon_step();
                    self.session.skip();
                    self.persist();
                    self.emit_state();
                    self.rescan_at = Some(now + SKIP_DELAY);
                }
            }
        }
    }

    /// Move queued page events into the overlay and the watcher, then act
    /// on whatever they produced.
    fn pump(&mut self, now: Instant) {
        match drain_events(&self.tab) {
            Ok(events) => {
                for event in events {
                    match event {
                        Observed::Nav(nav) => self.watcher.source_mut().push(nav),
                        Observed::Page(page) => {
                            if let Some(doc) = &self.doc {
                                self.overlay.handle_event(doc, &page, now);
                            }
                        }
                    }
                }
            }
            Err(e) => debug!(error = %e, "could not drain page events"),
        }
        self.overlay.tick(now);

        if let Some(rx) = self.completion.as_mut() {
            match rx.try_recv() {
                Ok(done) => {
                    self.completion = None;
                    self.on_completed(done, now);
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => self.completion = None,
            }
        }

        if let Some(signal) = self.watcher.poll(now) {
            self.emit(PanelEvent::Navigation {
                url: signal.url.clone(),
            });
            if self.session.is_active {
                self.abandon_step();
                self.rescan_at = Some(now + NAVIGATION_DELAY);
            }
        }
    }

    fn on_completed(&mut self, done: Completion, now: Instant) {
        let url = get_current_url(&self.tab)
            .unwrap_or_else(|_| self.watcher.last_url().to_string());
        self.session.complete(done.action, &url);
        self.persist();
        self.emit(PanelEvent::Completed {
            action: done.action,
        });
        self.emit_state();
        self.rescan_at = Some(now + settle_delay(done.action));
    }

    /// Capture, extract, plan, show.
    fn run_cycle(&mut self) {
        if !self.session.is_active {
            return;
        }
        let doc = match capture_document(&self.tab) {
            Ok(doc) => doc,
            Err(e) => {
                self.report(format!("Could not read the page: {e:#}"));
                return;
            }
        };
        let page = self.extractor.extract(&doc);
        info!(url = %page.url, elements = page.elements.len(), "page extracted");

        let step = self.plan(&page);
        let doc = self.doc.insert(doc);
        let Some(step) = step else {
            self.report("No actionable element found on this page");
            return;
        };

        let number = self.session.current_step_number;
        let shown = self.overlay.show(doc, &step, number, Instant::now());
        self.session.current_step = Some(step.clone());
        self.persist();
        self.emit(PanelEvent::Step { number, step });
        match shown {
            Ok(rx) => self.completion = Some(rx),
            Err(e) => {
                self.completion = None;
                self.report(e.to_string());
            }
        }
    }

    fn plan(&self, page: &PageData) -> Option<GuidanceStep> {
        if self.session.planner_mode == PlannerMode::Llm {
            match &self.planner {
                Some(planner) => match self.runtime.block_on(planner.plan(page, &self.session)) {
                    Ok(step) => return Some(step),
                    Err(e) => warn!(error = %e, "remote planner failed, using heuristic"),
                },
                None => warn!("llm mode without a configured planner, using heuristic"),
            }
        }
        HeuristicPlanner::plan(page, &self.session)
    }

    fn abandon_step(&mut self) {
        self.overlay.hide();
        self.completion = None;
    }

    fn persist(&self) {
        if let Some(path) = &self.session_path {
            if let Err(e) = self.session.save(path) {
                warn!(path = %path.display(), error = %e, "could not save session");
            }
        }
    }

    fn emit_state(&self) {
        self.emit(PanelEvent::State {
            state: self.session.clone(),
        });
    }

    fn report(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "guidance error");
        self.emit(PanelEvent::Error { message });
    }

    fn emit(&self, event: PanelEvent) {
        if self.events.send(event).is_err() {
            debug!("no panel listening");
        }
    }
}

//! Pipeline session controller.
//!
//! Owns the poller lifecycle for watch/follow/console runs, turns accepted triggers into
//! pending phases, and emits events for presentation layers.

use super::dispatcher::{ActionDispatcher, ActionError, CacheCleared};
use super::poller::StatusPoller;
use super::state::SharedPipeline;
use crate::backend::{Ack, BackendClient};
use crate::config::ClientConfig;
use crate::model::{Phase, PollEvent, PollTrack, ScrapeParams, ValidationConfig};
use crate::projection::{project, Projection};
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Commands read from the interactive console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UiCommand {
    Scrape,
    Enrich,
    Validate,
    ClearCache,
    Status,
    Help,
    Quit,
}

impl FromStr for UiCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scrape" | "s" => Ok(UiCommand::Scrape),
            "enrich" | "e" => Ok(UiCommand::Enrich),
            "validate" | "v" => Ok(UiCommand::Validate),
            "clear-cache" | "clear" => Ok(UiCommand::ClearCache),
            "status" | "" => Ok(UiCommand::Status),
            "help" | "?" => Ok(UiCommand::Help),
            "quit" | "exit" | "q" => Ok(UiCommand::Quit),
            other => Err(format!("unknown command `{other}` (try `help`)")),
        }
    }
}

pub(crate) const CONSOLE_HELP: &str =
    "commands: scrape, enrich, validate, clear-cache, status, help, quit";

/// Events for presentation layers.
#[derive(Debug, Clone)]
pub(crate) enum SessionEvent {
    Update(Box<Projection>),
    Message(String),
    Failed(String),
}

/// When a watch run ends on its own (Ctrl-C always ends it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchUntil {
    Interrupted,
    AllIdle,
    PhaseDone(Phase),
}

impl WatchUntil {
    fn reached(self, p: &Projection, snapshots_applied: u64) -> bool {
        if snapshots_applied == 0 {
            return false;
        }
        match self {
            WatchUntil::Interrupted => false,
            WatchUntil::AllIdle => !p.any_active(),
            WatchUntil::PhaseDone(phase) => p
                .phase(phase)
                .map_or(true, |ph| !ph.running && !ph.pending),
        }
    }
}

/// A phase trigger with everything it needs besides the current result set.
#[derive(Debug, Clone)]
pub(crate) enum Trigger {
    Scrape(ScrapeParams),
    Enrich { api_key: String },
    Validate(ValidationConfig),
}

impl Trigger {
    pub(crate) fn phase(&self) -> Phase {
        match self {
            Trigger::Scrape(_) => Phase::Scrape,
            Trigger::Enrich { .. } => Phase::Enrich,
            Trigger::Validate(_) => Phase::Validate,
        }
    }
}

/// One client session against the backend: a shared pipeline state plus the means to
/// observe and drive it.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    client: BackendClient,
    shared: SharedPipeline,
    dispatcher: ActionDispatcher,
    poll_interval: Duration,
}

impl Session {
    pub(crate) fn new(cfg: &ClientConfig) -> Result<Self> {
        let client = BackendClient::new(cfg).context("build HTTP client")?;
        Ok(Self {
            dispatcher: ActionDispatcher::new(client.clone()),
            client,
            shared: SharedPipeline::new(),
            poll_interval: cfg.poll_interval,
        })
    }

    pub(crate) fn client(&self) -> &BackendClient {
        &self.client
    }

    pub(crate) fn projection(&self, now: Instant) -> Projection {
        project(&self.shared.view(), self.shared.cache_stats(), now)
    }

    /// Fetch status and cache stats once, outside any polling loop.
    pub(crate) async fn refresh(&self) -> Result<()> {
        let snapshot = self
            .client
            .status()
            .await
            .context("fetch pipeline status")?;
        self.shared.apply_untracked(&snapshot, Instant::now());
        let stats = self
            .client
            .cache_stats()
            .await
            .context("fetch cache stats")?;
        self.shared.refresh_cache_stats(stats);
        Ok(())
    }

    /// Fire a trigger with the current result set. On acceptance the phase turns pending
    /// until a status snapshot confirms or refutes it.
    pub(crate) async fn trigger(&self, trigger: &Trigger) -> Result<Ack, ActionError> {
        let ack = match trigger {
            Trigger::Scrape(params) => self.dispatcher.start_scrape(params).await?,
            Trigger::Enrich { api_key } => {
                let leads = self.shared.results();
                self.dispatcher.start_enrich(&leads, api_key).await?
            }
            Trigger::Validate(config) => {
                let leads = self.shared.results();
                self.dispatcher.start_validate(&leads, config).await?
            }
        };
        self.shared.mark_pending(trigger.phase(), Instant::now());
        Ok(ack)
    }

    pub(crate) async fn clear_cache(&self) -> Result<CacheCleared, ActionError> {
        let cleared = self.dispatcher.clear_cache().await?;
        if let Some(stats) = cleared.stats {
            self.shared.refresh_cache_stats(stats);
        }
        Ok(cleared)
    }
}

/// Surfaces the first failed status poll of a streak, and the recovery after it.
/// Every failure is logged by the poller regardless.
#[derive(Debug, Default)]
struct OutageNotice {
    failing: bool,
}

impl OutageNotice {
    fn observe(&mut self, ev: &PollEvent) -> Option<SessionEvent> {
        match ev {
            PollEvent::StatusApplied if self.failing => {
                self.failing = false;
                Some(SessionEvent::Message("backend reachable again".into()))
            }
            PollEvent::TickFailed {
                track: PollTrack::Status,
                message,
            } if !self.failing => {
                self.failing = true;
                Some(SessionEvent::Failed(message.clone()))
            }
            _ => None,
        }
    }
}

/// Poll and emit a projection whenever it changes, until `until` holds or Ctrl-C.
pub(crate) async fn watch(
    session: &Session,
    until: WatchUntil,
    event_tx: UnboundedSender<SessionEvent>,
) -> Result<()> {
    let (poll_tx, mut poll_rx) = mpsc::unbounded_channel::<PollEvent>();
    let handle = StatusPoller::new(session.client.clone(), session.shared.clone(), poll_tx)
        .start(session.poll_interval);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last: Option<Projection> = None;
    let mut outage = OutageNotice::default();

    let res = loop {
        tokio::select! {
            ev = poll_rx.recv() => {
                if let Some(notice) = ev.as_ref().and_then(|ev| outage.observe(ev)) {
                    let _ = event_tx.send(notice);
                }
                match ev {
                    Some(PollEvent::StatusApplied | PollEvent::CacheApplied) => {
                        let p = session.projection(Instant::now());
                        let done = until.reached(&p, session.shared.view().snapshots_applied);
                        if last.as_ref() != Some(&p) {
                            let _ = event_tx.send(SessionEvent::Update(Box::new(p.clone())));
                            last = Some(p);
                        }
                        if done {
                            debug!(?until, "watch condition reached");
                            break Ok(());
                        }
                    }
                    Some(PollEvent::StaleDiscarded | PollEvent::TickFailed { .. }) => {}
                    None => break Ok(()),
                }
            }
            r = &mut ctrl_c => {
                break r.context("listen for Ctrl-C");
            }
        }
    };

    handle.stop();
    res
}

/// Settings the interactive console uses for its triggers.
#[derive(Debug, Clone)]
pub(crate) struct ConsoleSettings {
    pub scrape: ScrapeParams,
    pub api_key: Option<String>,
    pub validation: ValidationConfig,
}

/// Phase activity flags; the console re-renders only when these change.
fn activity(p: &Projection) -> Vec<(bool, bool)> {
    p.phases.iter().map(|ph| (ph.running, ph.pending)).collect()
}

/// Drive the pipeline from console commands while the poller runs in the background.
pub(crate) async fn run_controller(
    session: &Session,
    settings: ConsoleSettings,
    event_tx: UnboundedSender<SessionEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let (poll_tx, mut poll_rx) = mpsc::unbounded_channel::<PollEvent>();
    let handle = StatusPoller::new(session.client.clone(), session.shared.clone(), poll_tx)
        .start(session.poll_interval);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut shown: Option<Vec<(bool, bool)>> = None;
    let mut outage = OutageNotice::default();

    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Quit) | None => break Ok(()),
                    Some(UiCommand::Help) => {
                        let _ = event_tx.send(SessionEvent::Message(CONSOLE_HELP.into()));
                    }
                    Some(UiCommand::Status) => {
                        let p = session.projection(Instant::now());
                        shown = Some(activity(&p));
                        let _ = event_tx.send(SessionEvent::Update(Box::new(p)));
                    }
                    Some(UiCommand::ClearCache) => {
                        // Actions run detached so polling output keeps flowing.
                        let session = session.clone();
                        let event_tx = event_tx.clone();
                        tokio::spawn(async move {
                            let ev = match session.clear_cache().await {
                                Ok(c) => SessionEvent::Message(c.message),
                                Err(e) => SessionEvent::Failed(format!("clear cache: {e}")),
                            };
                            let _ = event_tx.send(ev);
                        });
                    }
                    Some(cmd) => {
                        let trigger = match cmd {
                            UiCommand::Scrape => Trigger::Scrape(settings.scrape.clone()),
                            UiCommand::Enrich => Trigger::Enrich {
                                api_key: settings.api_key.clone().unwrap_or_default(),
                            },
                            _ => Trigger::Validate(settings.validation),
                        };
                        let session = session.clone();
                        let event_tx = event_tx.clone();
                        tokio::spawn(async move {
                            let phase = trigger.phase();
                            let ev = match session.trigger(&trigger).await {
                                Ok(ack) => SessionEvent::Message(
                                    ack.message.unwrap_or_else(|| format!("{phase} started")),
                                ),
                                Err(e) => SessionEvent::Failed(format!("{phase}: {e}")),
                            };
                            let _ = event_tx.send(ev);
                        });
                    }
                }
            }
            ev = poll_rx.recv() => {
                if let Some(notice) = ev.as_ref().and_then(|ev| outage.observe(ev)) {
                    let _ = event_tx.send(notice);
                }
                match ev {
                    Some(PollEvent::StatusApplied) => {
                        let p = session.projection(Instant::now());
                        let flags = activity(&p);
                        if shown.as_ref() != Some(&flags) {
                            shown = Some(flags);
                            let _ = event_tx.send(SessionEvent::Update(Box::new(p)));
                        }
                    }
                    Some(_) => {}
                    None => break Ok(()),
                }
            }
            r = &mut ctrl_c => {
                break r.context("listen for Ctrl-C");
            }
        }
    };

    handle.stop();
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_for(server: &MockServer) -> Session {
        let cfg = ClientConfig {
            base_url: format!("{}/api", server.uri()),
            poll_interval: Duration::from_millis(25),
            ..Default::default()
        };
        Session::new(&cfg).unwrap()
    }

    async fn mount_status(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/cache/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entries": 0, "size_kb": 0})))
            .mount(server)
            .await;
    }

    #[test]
    fn parses_console_commands() {
        assert_eq!("scrape".parse::<UiCommand>(), Ok(UiCommand::Scrape));
        assert_eq!(" Clear-Cache ".parse::<UiCommand>(), Ok(UiCommand::ClearCache));
        assert_eq!("".parse::<UiCommand>(), Ok(UiCommand::Status));
        assert_eq!("q".parse::<UiCommand>(), Ok(UiCommand::Quit));
        assert!("launch".parse::<UiCommand>().is_err());
    }

    #[tokio::test]
    async fn watch_until_idle_ends_on_idle_backend() {
        let server = MockServer::start().await;
        mount_status(
            &server,
            json!({"scraping": {"is_running": false, "progress": 0, "total": 0, "results": []},
                   "agent": {"is_running": false, "progress": 0, "total": 0}}),
        )
        .await;
        let session = session_for(&server);
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::time::timeout(Duration::from_secs(5), watch(&session, WatchUntil::AllIdle, tx))
            .await
            .expect("watch returns")
            .unwrap();

        match rx.recv().await {
            Some(SessionEvent::Update(p)) => assert!(!p.any_active()),
            other => panic!("expected an update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepted_trigger_marks_phase_pending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/scrape"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"message": "Scraping started", "status": "running"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let session = session_for(&server);

        let ack = session
            .trigger(&Trigger::Scrape(ScrapeParams::default()))
            .await
            .unwrap();
        assert_eq!(ack.message.as_deref(), Some("Scraping started"));

        let p = session.projection(Instant::now());
        let scrape = p.phase(Phase::Scrape).unwrap();
        assert!(scrape.pending);
        assert!(!scrape.running);
        assert_eq!(scrape.eta, None);
    }

    #[tokio::test]
    async fn rejected_trigger_leaves_phase_idle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/validate"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "Validation already in progress"})),
            )
            .mount(&server)
            .await;
        mount_status(
            &server,
            json!({"scraping": {"is_running": false, "progress": 1, "total": 1,
                                "results": [{"business_id": "1", "name": "Acme Oy"}]}}),
        )
        .await;
        let session = session_for(&server);
        session.refresh().await.unwrap();

        let err = session
            .trigger(&Trigger::Validate(ValidationConfig::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::Network(BackendError::Status { .. })
        ));
        let p = session.projection(Instant::now());
        assert!(!p.phase(Phase::Validate).unwrap().pending);
        assert_eq!(p.results.total, 1);
    }

    #[tokio::test]
    async fn follow_ends_when_phase_stops_running() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "scraping": {"is_running": true, "progress": 1, "total": 2,
                             "current_company": "Acme Oy", "results": []}
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount_status(
            &server,
            json!({"scraping": {"is_running": false, "progress": 2, "total": 2,
                                "results": [{"business_id": "1"}, {"business_id": "2"}]}}),
        )
        .await;
        let session = session_for(&server);
        session.shared.mark_pending(Phase::Scrape, Instant::now());
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::time::timeout(
            Duration::from_secs(5),
            watch(&session, WatchUntil::PhaseDone(Phase::Scrape), tx),
        )
        .await
        .expect("follow returns")
        .unwrap();

        let mut saw_running = false;
        while let Ok(ev) = rx.try_recv() {
            if let SessionEvent::Update(p) = ev {
                saw_running |= p.phase(Phase::Scrape).is_some_and(|s| s.running);
            }
        }
        assert!(saw_running);
        let p = session.projection(Instant::now());
        assert_eq!(p.results.total, 2);
        assert!(!p.any_active());
    }

    #[tokio::test]
    async fn console_quit_stops_polling() {
        let server = MockServer::start().await;
        mount_status(&server, json!({})).await;
        let session = session_for(&server);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        cmd_tx.send(UiCommand::Help).unwrap();
        cmd_tx.send(UiCommand::Quit).unwrap();

        let settings = ConsoleSettings {
            scrape: ScrapeParams::default(),
            api_key: None,
            validation: ValidationConfig::default(),
        };
        tokio::time::timeout(
            Duration::from_secs(5),
            run_controller(&session, settings, event_tx, cmd_rx),
        )
        .await
        .expect("console returns")
        .unwrap();

        let mut saw_help = false;
        while let Ok(ev) = event_rx.try_recv() {
            if let SessionEvent::Message(m) = ev {
                saw_help |= m == CONSOLE_HELP;
            }
        }
        assert!(saw_help);
    }

    #[tokio::test]
    async fn status_outage_is_reported_once_per_streak() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"error": "backend restarting"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/cache/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entries": 0, "size_kb": 0})))
            .mount(&server)
            .await;
        let session = session_for(&server);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let res = tokio::time::timeout(
            Duration::from_millis(300),
            watch(&session, WatchUntil::AllIdle, tx),
        )
        .await;
        assert!(res.is_err(), "watch must keep polling through failures");

        let mut failures = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let SessionEvent::Failed(msg) = ev {
                failures.push(msg);
            }
        }
        assert_eq!(failures.len(), 1, "{failures:?}");
        assert!(failures[0].contains("backend restarting"));
    }

    #[test]
    fn outage_notice_resets_on_recovery() {
        let mut outage = OutageNotice::default();
        let failed = PollEvent::TickFailed {
            track: PollTrack::Status,
            message: "status poll failed".into(),
        };
        let cache_failed = PollEvent::TickFailed {
            track: PollTrack::Cache,
            message: "cache stats poll failed".into(),
        };
        assert!(outage.observe(&cache_failed).is_none());
        assert!(matches!(outage.observe(&failed), Some(SessionEvent::Failed(_))));
        assert!(outage.observe(&failed).is_none());
        assert!(matches!(
            outage.observe(&PollEvent::StatusApplied),
            Some(SessionEvent::Message(_))
        ));
        assert!(outage.observe(&PollEvent::StatusApplied).is_none());
        assert!(matches!(outage.observe(&failed), Some(SessionEvent::Failed(_))));
    }
}

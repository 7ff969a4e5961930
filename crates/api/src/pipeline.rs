//! Live pipeline driver
//!
//! One task owns the session, the sampling scheduler, the router and the
//! reconnect backoff, and multiplexes ticks, inbound traffic, pings,
//! reconnect deadlines and shutdown with `tokio::select!`.

use crate::service::AlertService;
use alerting::{AlertMetadata, AlertSource};
use frame_source::{CaptureError, FrameSource};
use metrics::counter;
use result_router::{ResultRouter, Routed, RouterStats, SharedTally, TallySnapshot};
use sampling_scheduler::{BackoffPolicy, SamplingScheduler, SchedulerStats, TickOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use stream_session::{SessionEvent, SessionState, StreamSession};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Operator requests to a running pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveCommand {
    /// Reopen a session that was abandoned or closed
    Reconnect,
}

/// Snapshot published after every loop iteration
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub state: SessionState,
    pub endpoint: String,
    pub sampling: bool,
    pub reconnect_attempts: u32,
    pub reconnect_pending: bool,
    pub scheduler: SchedulerStats,
    pub router: RouterStats,
    pub results: TallySnapshot,
}

/// Handles for observing and steering a spawned pipeline
#[derive(Clone)]
pub struct LiveHandle {
    pub status: watch::Receiver<LiveStatus>,
    pub commands: mpsc::Sender<LiveCommand>,
}

enum Step {
    Continue,
    Shutdown,
}

pub struct LivePipeline<S: FrameSource> {
    session: StreamSession,
    scheduler: SamplingScheduler<S>,
    router: ResultRouter,
    backoff: BackoffPolicy,
    service: Arc<AlertService>,
    endpoint: String,
    location: Option<String>,
    tally: SharedTally,
    reconnect_at: Option<Instant>,
    status: watch::Sender<LiveStatus>,
    commands: mpsc::Receiver<LiveCommand>,
}

impl<S: FrameSource> LivePipeline<S> {
    pub fn new(
        session: StreamSession,
        scheduler: SamplingScheduler<S>,
        backoff: BackoffPolicy,
        service: Arc<AlertService>,
        endpoint: impl Into<String>,
        location: Option<String>,
    ) -> (Self, LiveHandle) {
        let tally = SharedTally::default();
        let mut router = ResultRouter::new();
        router.add_observer(Box::new(tally.clone()));

        let endpoint = endpoint.into();
        let (status_tx, status_rx) = watch::channel(LiveStatus {
            state: session.state(),
            endpoint: endpoint.clone(),
            sampling: false,
            reconnect_attempts: 0,
            reconnect_pending: false,
            scheduler: SchedulerStats::default(),
            router: RouterStats::default(),
            results: TallySnapshot::default(),
        });
        let (command_tx, command_rx) = mpsc::channel(8);

        let pipeline = Self {
            session,
            scheduler,
            router,
            backoff,
            service,
            endpoint,
            location,
            tally,
            reconnect_at: None,
            status: status_tx,
            commands: command_rx,
        };
        let handle = LiveHandle {
            status: status_rx,
            commands: command_tx,
        };
        (pipeline, handle)
    }

    /// Run until `shutdown` becomes `true` or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CaptureError> {
        self.scheduler.start()?;
        info!("Live pipeline starting against {}", self.endpoint);

        let mut ticks = interval(self.scheduler.interval());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pings = interval(Duration::from_millis(
            self.session.config().ping_interval_ms.max(1),
        ));
        pings.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut step = if *shutdown.borrow() {
            Step::Shutdown
        } else {
            self.connect(&mut shutdown).await
        };

        while let Step::Continue = step {
            self.publish_status();
            let reconnect_at = self.reconnect_at;
            step = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        Step::Shutdown
                    } else {
                        Step::Continue
                    }
                }
                event = self.session.recv(), if self.session.is_open() => {
                    self.handle_event(event);
                    Step::Continue
                }
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    counter!("session_reconnects_total").increment(1);
                    self.connect(&mut shutdown).await
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command, &mut shutdown).await
                }
                _ = ticks.tick() => {
                    self.on_tick();
                    Step::Continue
                }
                _ = pings.tick() => {
                    if self.session.is_open() {
                        self.session.ping();
                    }
                    Step::Continue
                }
            };
        }

        self.reconnect_at = None;
        self.session.close();
        self.scheduler.stop();
        self.publish_status();
        info!("Live pipeline stopped");
        Ok(())
    }

    /// Attempt to open the session, giving up early on shutdown
    async fn connect(&mut self, shutdown: &mut watch::Receiver<bool>) -> Step {
        let opened = tokio::select! {
            result = self.session.open(&self.endpoint) => result,
            _ = shutdown.changed() => return Step::Shutdown,
        };

        match opened {
            Ok(()) => {
                if self.backoff.attempts() > 0 {
                    info!("Stream reopened after {} attempt(s)", self.backoff.attempts());
                }
                self.backoff.reset();
                self.scheduler.session_replaced();
            }
            Err(e) => {
                warn!("Failed to open stream: {}", e);
                self.schedule_reconnect();
            }
        }
        Step::Continue
    }

    fn schedule_reconnect(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) => {
                info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay,
                    self.backoff.attempts(),
                    self.backoff.max_attempts
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                warn!(
                    "Giving up on the stream after {} attempts",
                    self.backoff.max_attempts
                );
                self.session.abandon();
                self.scheduler.stop();
            }
        }
    }

    async fn handle_command(
        &mut self,
        command: LiveCommand,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Step {
        match command {
            LiveCommand::Reconnect => {
                if !self.session.state().can_open() {
                    debug!("Reconnect ignored while {}", self.session.state());
                    return Step::Continue;
                }
                info!("Manual reconnect requested");
                self.reconnect_at = None;
                self.backoff.reset();
                if let Err(e) = self.scheduler.start() {
                    warn!("Cannot restart sampling: {}", e);
                    return Step::Continue;
                }
                self.connect(shutdown).await
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message(text) => self.route(&text),
            SessionEvent::Failed(e) => {
                debug!("Session failure: {}", e);
                self.scheduler.session_replaced();
                self.schedule_reconnect();
            }
        }
    }

    fn route(&mut self, text: &str) {
        match self.router.route(text, self.scheduler.ledger_mut()) {
            Routed::Accident(result) => {
                counter!("results_routed_total", "class" => "accident").increment(1);
                let metadata = AlertMetadata {
                    location: self.location.clone(),
                    ..Default::default()
                };
                // Delivery runs detached; history and banner update when it completes.
                let _ = self.service.report(result, AlertSource::Live, metadata);
            }
            Routed::Normal(_) => {
                counter!("results_routed_total", "class" => "normal").increment(1);
            }
            Routed::Rejected(_) => {
                counter!("protocol_errors_total").increment(1);
            }
            Routed::Stale(_) | Routed::Control(_) => {}
        }
    }

    fn on_tick(&mut self) {
        match self.scheduler.tick(&self.session) {
            TickOutcome::Submitted(_) => counter!("frames_submitted_total").increment(1),
            TickOutcome::SessionNotOpen => {
                counter!("frames_skipped_total", "reason" => "not_open").increment(1)
            }
            TickOutcome::Busy(_) => counter!("frames_skipped_total", "reason" => "busy").increment(1),
            TickOutcome::CaptureFailed | TickOutcome::SendFailed | TickOutcome::Stopped => {}
        }
    }

    fn publish_status(&self) {
        let status = LiveStatus {
            state: self.session.state(),
            endpoint: self.endpoint.clone(),
            sampling: self.scheduler.is_running(),
            reconnect_attempts: self.backoff.attempts(),
            reconnect_pending: self.reconnect_at.is_some(),
            scheduler: self.scheduler.stats().clone(),
            router: self.router.stats().clone(),
            results: self.tally.snapshot(),
        };
        self.status.send_replace(status);
    }
}

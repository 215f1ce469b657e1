use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::audio::{best_effort, route_connected};
use crate::{
    AudioFlags, AudioRouter, CallDirection, CallDurationTimer, CallEvent, CallId, CallState,
    EngineCommand, EngineTransport, EventDispatcher, IncomingCallOrchestrator, PhoneEvent, Result,
    TimingConfig,
};

// Session details for the call in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub remote_party: String,
    pub direction: CallDirection,
    pub call_id: Option<CallId>,
    pub connected_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
}

impl CallSession {
    fn new(remote_party: &str, direction: CallDirection) -> Self {
        CallSession {
            remote_party: remote_party.to_string(),
            direction,
            call_id: None,
            connected_at: None,
            duration_seconds: 0,
        }
    }

    fn record_call_id(&mut self, call_id: Option<CallId>) {
        if let Some(call_id) = call_id.filter(|id| !id.0.is_empty()) {
            self.call_id = Some(call_id);
        }
    }
}

// Commands still owed to the engine after a local hangup
struct HangupTeardown {
    stagger: JoinHandle<()>,
    reload: Option<JoinHandle<()>>,
}

impl HangupTeardown {
    fn abort(self) {
        self.stagger.abort();
        if let Some(reload) = self.reload {
            reload.abort();
        }
    }

    /// The engine confirmed the teardown: the forced reload is no longer needed.
    fn confirm(&mut self) -> bool {
        match self.reload.take() {
            Some(reload) => {
                let pending = !reload.is_finished();
                reload.abort();
                pending
            }
            None => false,
        }
    }
}

struct CallInner {
    state: CallState,
    session: Option<CallSession>,
    flags: AudioFlags,
    teardown: Option<HangupTeardown>,
    audio_task: Option<JoinHandle<()>>,
}

impl CallInner {
    fn new() -> Self {
        CallInner {
            state: CallState::Idle,
            session: None,
            flags: AudioFlags::default(),
            teardown: None,
            audio_task: None,
        }
    }

    fn replace_audio_task(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.audio_task.replace(task) {
            previous.abort();
        }
    }
}

/// Single source of truth for the call lifecycle.
///
/// Every transition happens under one lock; side effects (audio routing,
/// engine commands, timers, events) run after it is released so they never
/// block another transition.
pub struct CallStateMachine {
    inner: Mutex<CallInner>,
    incoming: IncomingCallOrchestrator,
    timer: CallDurationTimer,
    transport: Arc<dyn EngineTransport>,
    audio: Arc<dyn AudioRouter>,
    dispatcher: Arc<EventDispatcher>,
    timing: TimingConfig,
}

impl CallStateMachine {
    pub fn new(
        transport: Arc<dyn EngineTransport>,
        audio: Arc<dyn AudioRouter>,
        dispatcher: Arc<EventDispatcher>,
        timing: TimingConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|calls| CallStateMachine {
            inner: Mutex::new(CallInner::new()),
            incoming: IncomingCallOrchestrator::new(
                calls.clone(),
                audio.clone(),
                dispatcher.clone(),
                timing.auto_decline,
            ),
            timer: CallDurationTimer::new(timing.duration_tick),
            transport,
            audio,
            dispatcher,
            timing,
        })
    }

    pub fn state(&self) -> CallState {
        self.inner.lock().state
    }

    pub fn is_call_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn session(&self) -> Option<CallSession> {
        let mut session = self.inner.lock().session.clone()?;
        session.duration_seconds = self.timer.elapsed_seconds();
        Some(session)
    }

    pub fn flags(&self) -> AudioFlags {
        self.inner.lock().flags
    }

    pub fn duration_seconds(&self) -> u64 {
        self.timer.elapsed_seconds()
    }

    pub fn formatted_duration(&self) -> String {
        self.timer.formatted()
    }

    pub fn incoming(&self) -> &IncomingCallOrchestrator {
        &self.incoming
    }

    /// Claim the machine for a new outgoing call. This is the dial guard:
    /// it fails while any call is in flight.
    pub fn begin_outgoing(&self, target: &str) -> bool {
        let (from, stale) = {
            let mut inner = self.inner.lock();
            if inner.state.is_active() {
                return false;
            }
            let from = inner.state;
            inner.state = CallState::Outgoing;
            inner.session = Some(CallSession::new(target, CallDirection::Outgoing));
            inner.flags = AudioFlags::default();
            (from, inner.teardown.take())
        };

        if let Some(teardown) = stale {
            teardown.abort();
        }
        info!(number = %target, "placing call");
        self.emit_transition(from, CallState::Outgoing);
        true
    }

    /// Engine reported the outgoing session. Ignored unless a dial is in
    /// progress or the machine is idle.
    pub fn on_outgoing(&self, call_id: Option<CallId>) {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            match from {
                CallState::Outgoing => {}
                CallState::Idle => {
                    inner.state = CallState::Outgoing;
                    inner.session = Some(CallSession::new("unknown", CallDirection::Outgoing));
                }
                _ => {
                    debug!(state = %from, "ignoring outgoing event");
                    return;
                }
            }
            if let Some(session) = inner.session.as_mut() {
                session.record_call_id(call_id);
            }
            from
        };
        self.emit_transition(from, CallState::Outgoing);
    }

    pub fn on_progress(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state != CallState::Outgoing {
                debug!(state = %inner.state, "ignoring progress event");
                return;
            }
            inner.state = CallState::Ringing;
        }
        self.emit_transition(CallState::Outgoing, CallState::Ringing);
    }

    /// Handles both `connected` and `confirmed`. Repeats are no-ops.
    pub fn on_connected(&self, call_id: Option<CallId>) {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            match from {
                CallState::Outgoing | CallState::Ringing | CallState::Incoming => {
                    Self::mark_connected(&mut inner, call_id);
                    from
                }
                CallState::Connected => {
                    if let Some(session) = inner.session.as_mut() {
                        if session.call_id.is_none() {
                            session.record_call_id(call_id);
                        }
                    }
                    return;
                }
                _ => {
                    debug!(state = %from, "ignoring connected event");
                    return;
                }
            }
        };
        self.enter_connected(from);
    }

    pub(crate) fn enter_incoming(&self, from: &str, call_id: &CallId) -> bool {
        let (previous, stale) = {
            let mut inner = self.inner.lock();
            if inner.state.is_active() {
                return false;
            }
            let previous = inner.state;
            let mut session = CallSession::new(from, CallDirection::Incoming);
            session.record_call_id(Some(call_id.clone()));
            inner.state = CallState::Incoming;
            inner.session = Some(session);
            inner.flags = AudioFlags::default();
            (previous, inner.teardown.take())
        };

        // a staggered rejectCall from the previous hangup would hit this invite
        if let Some(teardown) = stale {
            teardown.abort();
        }
        self.emit_transition(previous, CallState::Incoming);
        true
    }

    pub(crate) fn accept_incoming(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != CallState::Incoming {
                return false;
            }
            Self::mark_connected(&mut inner, None);
        }
        self.enter_connected(CallState::Incoming);
        true
    }

    pub(crate) fn decline_incoming(&self) -> bool {
        if self.state() != CallState::Incoming {
            return false;
        }
        self.finish(CallState::Idle, None)
    }

    pub fn on_ended(&self) {
        if !self.finish(CallState::Ended, None) {
            self.confirm_teardown();
        }
    }

    pub fn on_failed(&self, error: Option<String>) {
        let reason = error.unwrap_or_else(|| "call failed".to_string());
        if !self.finish(CallState::Failed, Some(reason)) {
            self.confirm_teardown();
        }
    }

    /// Fail the active call from outside the engine (registration trouble).
    pub fn fail(&self, reason: &str) -> bool {
        self.finish(CallState::Failed, Some(reason.to_string()))
    }

    /// Return a terminated call to idle once it has been shown.
    pub fn settle(&self) -> bool {
        let from = {
            let mut inner = self.inner.lock();
            if !inner.state.is_terminal() {
                return false;
            }
            let from = inner.state;
            inner.state = CallState::Idle;
            from
        };
        self.emit_transition(from, CallState::Idle);
        true
    }

    /// Local hangup. Sends `hangup` now and the remaining teardown commands
    /// staggered; the engine is reloaded unless it confirms the teardown.
    pub fn hangup(&self) -> bool {
        if !self.is_call_active() {
            debug!("hangup without an active call");
            return false;
        }

        if self.state() == CallState::Incoming {
            if !self.incoming.decline_detached() {
                self.decline_incoming();
            }
            return true;
        }

        info!("hanging up");
        if let Err(e) = self.transport.send(&EngineCommand::Hangup) {
            warn!(error = %e, "failed to send hangup");
        }
        if !self.finish(CallState::Ended, None) {
            return false;
        }

        let teardown = self.spawn_teardown();
        let stale = self.inner.lock().teardown.replace(teardown);
        if let Some(stale) = stale {
            stale.abort();
        }
        true
    }

    pub fn mute(&self, mute: bool) -> Result<bool> {
        let state = self.state();
        if !matches!(state, CallState::Outgoing | CallState::Ringing | CallState::Connected) {
            debug!(%state, "mute without a call");
            return Ok(false);
        }

        self.transport.send(&EngineCommand::Mute { mute })?;
        self.inner.lock().flags.muted = mute;
        best_effort("set_microphone_mute", self.audio.set_microphone_mute(mute));
        Ok(true)
    }

    pub fn hold(&self) -> Result<bool> {
        {
            let inner = self.inner.lock();
            if inner.state != CallState::Connected || inner.flags.on_hold {
                return Ok(false);
            }
        }
        self.transport.send(&EngineCommand::Hold)?;
        self.inner.lock().flags.on_hold = true;
        info!("call on hold");
        Ok(true)
    }

    pub fn resume(&self) -> Result<bool> {
        {
            let inner = self.inner.lock();
            if inner.state != CallState::Connected || !inner.flags.on_hold {
                return Ok(false);
            }
        }
        self.transport.send(&EngineCommand::Resume)?;
        self.inner.lock().flags.on_hold = false;
        info!("call resumed");
        Ok(true)
    }

    /// Speaker routing is local; the engine is not involved.
    pub fn set_speaker(&self, on: bool) -> bool {
        {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, CallState::Outgoing | CallState::Ringing | CallState::Connected) {
                return false;
            }
            inner.flags.speaker_on = on;
        }
        best_effort("set_speakerphone_on", self.audio.set_speakerphone_on(on));
        true
    }

    /// Blind transfer. The outcome arrives later as `dtmfTransferSent` or
    /// `transferFailed`.
    pub fn transfer(&self, target: &str, domain: &str) -> Result<bool> {
        if self.state() != CallState::Connected {
            return Ok(false);
        }
        self.transport.send(&EngineCommand::Transfer {
            target: target.to_string(),
            domain: domain.to_string(),
        })?;
        info!(number = %target, "transfer requested");
        Ok(true)
    }

    pub fn on_transfer_sent(&self, message: Option<String>) {
        info!(detail = message.as_deref().unwrap_or(""), "transfer sent");
        self.emit(CallEvent::TransferSent { message });
    }

    pub fn on_transfer_failed(&self, error: Option<String>) {
        warn!(error = error.as_deref().unwrap_or(""), "transfer failed");
        self.emit(CallEvent::TransferFailed { error });
    }

    /// Restart the audio session after the engine lost it.
    pub fn on_audio_failed(&self) {
        best_effort("stop", self.audio.stop());

        let audio = self.audio.clone();
        let delay = self.timing.audio_restart;
        let task = tokio::spawn(async move {
            sleep(delay).await;
            info!("restarting audio session");
            best_effort("start", audio.start());
            best_effort("set_speakerphone_on", audio.set_speakerphone_on(true));
        });
        self.inner.lock().replace_audio_task(task);
    }

    /// The engine's media stack needs an audio session before it can play.
    pub fn on_needs_audio_activation(&self) {
        best_effort("stop", self.audio.stop());

        let audio = self.audio.clone();
        let transport = self.transport.clone();
        let pause = self.timing.audio_activation_pause;
        let ack = self.timing.audio_activation_ack;
        let task = tokio::spawn(async move {
            sleep(pause).await;
            best_effort("start", audio.start());
            best_effort("set_speakerphone_on", audio.set_speakerphone_on(true));
            best_effort("set_microphone_mute", audio.set_microphone_mute(false));

            sleep(ack).await;
            if let Err(e) = transport.send(&EngineCommand::ActivateAudio) {
                warn!(error = %e, "failed to acknowledge audio activation");
            }
        });
        self.inner.lock().replace_audio_task(task);
    }

    fn mark_connected(inner: &mut CallInner, call_id: Option<CallId>) {
        inner.state = CallState::Connected;
        inner.flags = AudioFlags::connected();
        if let Some(session) = inner.session.as_mut() {
            session.connected_at = Some(Utc::now());
            session.record_call_id(call_id);
        }
    }

    fn enter_connected(&self, from: CallState) {
        route_connected(self.audio.as_ref());
        if !self.timer.start() {
            debug!("duration timer already running");
        }
        self.incoming.hide_incoming_call();
        self.emit_transition(from, CallState::Connected);
    }

    // Shared exit path for ended, failed and declined calls.
    fn finish(&self, to: CallState, reason: Option<String>) -> bool {
        let (from, session, audio_task) = {
            let mut inner = self.inner.lock();
            if !inner.state.is_active() {
                return false;
            }
            let from = inner.state;
            inner.state = to;
            inner.flags = AudioFlags::default();
            (from, inner.session.take(), inner.audio_task.take())
        };

        if let Some(task) = audio_task {
            task.abort();
        }
        best_effort("stop", self.audio.stop());
        best_effort("set_speakerphone_on", self.audio.set_speakerphone_on(false));
        self.incoming.hide_incoming_call();
        let duration_seconds = self.timer.reset();

        self.emit_transition(from, to);

        if let Some(session) = session {
            if from == CallState::Incoming && to != CallState::Idle {
                info!(from = %session.remote_party, "missed call");
                self.emit(CallEvent::Missed {
                    from: session.remote_party,
                    call_id: session.call_id.unwrap_or_default(),
                });
            } else if to == CallState::Ended {
                info!(remote = %session.remote_party, duration_seconds, "call ended");
                self.emit(CallEvent::Ended {
                    remote_party: session.remote_party,
                    direction: session.direction,
                    duration_seconds,
                });
            }
        }

        if let Some(reason) = reason {
            warn!(%reason, "call failed");
            self.emit(CallEvent::Failed { reason });
        }
        true
    }

    fn confirm_teardown(&self) {
        let confirmed = match self.inner.lock().teardown.as_mut() {
            Some(teardown) => teardown.confirm(),
            None => false,
        };
        if confirmed {
            info!("engine confirmed teardown, reload cancelled");
        }
    }

    fn spawn_teardown(&self) -> HangupTeardown {
        let transport = self.transport.clone();
        let stagger = self.timing.hangup_stagger;
        let stagger_task = tokio::spawn(async move {
            for command in [EngineCommand::RejectCall, EngineCommand::Terminate, EngineCommand::EndCall] {
                sleep(stagger).await;
                if let Err(e) = transport.send(&command) {
                    debug!(command = command.kind(), error = %e, "teardown command not delivered");
                }
            }
        });

        let transport = self.transport.clone();
        let delay = self.timing.forced_reload;
        let reload_task = tokio::spawn(async move {
            sleep(delay).await;
            warn!("engine did not confirm teardown, reloading");
            if let Err(e) = transport.reload() {
                error!(error = %e, "engine reload failed");
            }
        });

        HangupTeardown {
            stagger: stagger_task,
            reload: Some(reload_task),
        }
    }

    fn emit_transition(&self, from: CallState, to: CallState) {
        if from == to {
            return;
        }
        info!(%from, %to, "call state changed");
        self.emit(CallEvent::StateChanged { from, to });
    }

    fn emit(&self, event: CallEvent) {
        self.dispatcher.dispatch(PhoneEvent::Call(event));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::Harness;

    fn connected(harness: &Harness, target: &str) {
        assert!(harness.calls.begin_outgoing(target));
        harness.calls.on_connected(Some(CallId("c-1".to_string())));
        assert_eq!(harness.calls.state(), CallState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_refused_in_every_active_state() {
        let harness = Harness::new().await;

        assert!(harness.calls.begin_outgoing("100"));
        assert!(!harness.calls.begin_outgoing("101"));

        harness.calls.on_progress();
        assert_eq!(harness.calls.state(), CallState::Ringing);
        assert!(!harness.calls.begin_outgoing("101"));

        harness.calls.on_connected(None);
        assert_eq!(harness.calls.state(), CallState::Connected);
        assert!(!harness.calls.begin_outgoing("101"));

        harness.calls.hangup();
        assert!(harness.calls.enter_incoming("200", &CallId::default()));
        assert!(!harness.calls.begin_outgoing("101"));

        assert_eq!(harness.calls.session().unwrap().remote_party, "200");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_twice_starts_timer_once() {
        let harness = Harness::new().await;
        connected(&harness, "100");
        sleep(Duration::from_millis(1500)).await;

        harness.calls.on_connected(None);
        harness.calls.on_connected(Some(CallId("other".to_string())));
        sleep(Duration::from_millis(1000)).await;

        assert_eq!(harness.calls.duration_seconds(), 2);
        assert_eq!(harness.calls.formatted_duration(), "00:02");
        assert_eq!(harness.audio.count("start"), 1);
        assert_eq!(
            harness.calls.session().unwrap().call_id,
            Some(CallId("c-1".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_routes_audio() {
        let harness = Harness::new().await;
        connected(&harness, "100");

        assert_eq!(harness.audio.calls(), vec!["start", "mic:false", "speaker:true"]);
        assert_eq!(harness.calls.flags(), AudioFlags::connected());
        assert!(harness.calls.session().unwrap().connected_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hangup_tears_down_and_reloads() {
        let harness = Harness::new().await;
        connected(&harness, "100");
        sleep(Duration::from_millis(2500)).await;

        assert!(harness.calls.hangup());
        assert_eq!(harness.calls.state(), CallState::Ended);
        assert_eq!(harness.calls.duration_seconds(), 0);
        assert_eq!(harness.transport.kinds(), vec!["hangup"]);

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            harness.transport.kinds(),
            vec!["hangup", "rejectCall", "terminate", "endCall"]
        );
        assert_eq!(harness.transport.reloads(), 1);
        assert!(harness.audio.calls().contains(&"stop".to_string()));

        let ended = harness.events.call_events().into_iter().find_map(|e| match e {
            CallEvent::Ended { remote_party, duration_seconds, direction } => {
                Some((remote_party, duration_seconds, direction))
            }
            _ => None,
        });
        assert_eq!(ended, Some(("100".to_string(), 2, CallDirection::Outgoing)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_confirmation_cancels_reload() {
        let harness = Harness::new().await;
        connected(&harness, "100");

        harness.calls.hangup();
        sleep(Duration::from_millis(300)).await;
        harness.calls.on_ended();

        sleep(Duration::from_secs(2)).await;
        assert_eq!(harness.transport.reloads(), 0);
        assert_eq!(harness.transport.count("endCall"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hangup_when_idle_is_noop() {
        let harness = Harness::new().await;
        assert!(!harness.calls.hangup());

        sleep(Duration::from_secs(2)).await;
        assert!(harness.transport.kinds().is_empty());
        assert_eq!(harness.transport.reloads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_dial_cancels_pending_teardown() {
        let harness = Harness::new().await;
        connected(&harness, "100");
        harness.calls.hangup();

        sleep(Duration::from_millis(130)).await;
        assert!(harness.calls.begin_outgoing("101"));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(harness.transport.kinds(), vec!["hangup", "rejectCall"]);
        assert_eq!(harness.transport.reloads(), 0);
        assert_eq!(harness.calls.state(), CallState::Outgoing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_hangup_while_ringing_is_missed() {
        let harness = Harness::new().await;
        assert!(harness.calls.enter_incoming("200", &CallId("c-7".to_string())));

        harness.calls.on_ended();
        assert_eq!(harness.calls.state(), CallState::Ended);
        assert!(harness.calls.settle());
        assert_eq!(harness.calls.state(), CallState::Idle);

        sleep(Duration::from_millis(10)).await;
        let events = harness.events.call_events();
        assert!(events.contains(&CallEvent::Missed {
            from: "200".to_string(),
            call_id: CallId("c-7".to_string()),
        }));
        assert!(!events.iter().any(|e| matches!(e, CallEvent::Ended { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ignored_when_idle() {
        let harness = Harness::new().await;
        harness.calls.on_failed(Some("486 Busy".to_string()));
        assert_eq!(harness.calls.state(), CallState::Idle);

        assert!(harness.calls.begin_outgoing("100"));
        harness.calls.on_failed(Some("486 Busy".to_string()));
        assert_eq!(harness.calls.state(), CallState::Failed);

        sleep(Duration::from_millis(10)).await;
        assert!(harness.events.call_events().contains(&CallEvent::Failed {
            reason: "486 Busy".to_string()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_events_after_end_are_ignored() {
        let harness = Harness::new().await;
        connected(&harness, "100");
        harness.calls.on_ended();

        harness.calls.on_progress();
        harness.calls.on_outgoing(None);
        harness.calls.on_connected(None);
        assert_eq!(harness.calls.state(), CallState::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_call_controls() {
        let harness = Harness::new().await;
        assert!(!harness.calls.mute(true).unwrap());
        assert!(!harness.calls.hold().unwrap());

        connected(&harness, "100");
        assert!(harness.calls.mute(true).unwrap());
        assert!(harness.calls.hold().unwrap());
        assert!(!harness.calls.hold().unwrap());
        assert!(harness.calls.set_speaker(false));

        let flags = harness.calls.flags();
        assert!(flags.muted);
        assert!(flags.on_hold);
        assert!(!flags.speaker_on);

        assert!(harness.calls.resume().unwrap());
        assert!(harness.calls.transfer("300", "pbx.example.com").unwrap());
        assert_eq!(
            harness.transport.kinds(),
            vec!["mute", "hold", "resume", "transfer"]
        );

        harness.calls.on_ended();
        assert_eq!(harness.calls.flags(), AudioFlags::default());
        assert!(!harness.calls.transfer("300", "pbx.example.com").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_activation_sequence() {
        let harness = Harness::new().await;
        harness.calls.on_needs_audio_activation();
        assert_eq!(harness.audio.calls(), vec!["stop"]);

        sleep(Duration::from_millis(150)).await;
        assert_eq!(
            harness.audio.calls(),
            vec!["stop", "start", "speaker:true", "mic:false"]
        );
        assert!(harness.transport.kinds().is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.transport.kinds(), vec!["activateAudio"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_restart_cancelled_by_teardown() {
        let harness = Harness::new().await;
        connected(&harness, "100");
        harness.calls.on_audio_failed();
        harness.calls.on_ended();

        let before = harness.audio.count("start");
        sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.audio.count("start"), before);
    }
}

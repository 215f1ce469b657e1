//! SIP registration with the engine, retry scheduling, and calls queued while
//! the account is still registering.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::credentials::SipConfig;
use crate::{
    CallEvent, CallState, CallStateMachine, CredentialStore, EngineCommand, EngineTransport,
    EventDispatcher, PhoneConfig, PhoneError, PhoneEvent, RegistrationEvent, RegistrationState,
    Result, validate_ws_server,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Sent,
    MissingCredentials,
    InsecureServer,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    /// The call command went to the engine.
    Placed,
    /// Waiting for registration; see [`RegistrationManager::pending_call`].
    Queued,
    /// Another call is in flight.
    Rejected(CallState),
}

// Call waiting for registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub target: String,
}

#[derive(Default)]
struct RegistrationInner {
    flags: RegistrationState,
    pending: Option<PendingCall>,
    pending_timer: Option<JoinHandle<()>>,
    dial_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
    boot_task: Option<JoinHandle<()>>,
}

fn abort_all(tasks: impl IntoIterator<Item = Option<JoinHandle<()>>>) {
    for task in tasks.into_iter().flatten() {
        task.abort();
    }
}

// Registration manager
pub struct RegistrationManager {
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn EngineTransport>,
    calls: Arc<CallStateMachine>,
    dispatcher: Arc<EventDispatcher>,
    config: PhoneConfig,
    inner: Mutex<RegistrationInner>,
    attempts: AtomicU32,
    engine_ready: AtomicBool,
}

impl RegistrationManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn EngineTransport>,
        calls: Arc<CallStateMachine>,
        dispatcher: Arc<EventDispatcher>,
        config: PhoneConfig,
    ) -> Arc<Self> {
        Arc::new(RegistrationManager {
            store,
            transport,
            calls,
            dispatcher,
            config,
            inner: Mutex::new(RegistrationInner::default()),
            attempts: AtomicU32::new(0),
            engine_ready: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> RegistrationState {
        self.inner.lock().flags
    }

    pub fn is_registered(&self) -> bool {
        self.state().registered
    }

    pub fn pending_call(&self) -> Option<PendingCall> {
        self.inner.lock().pending.clone()
    }

    pub fn has_retry_scheduled(&self) -> bool {
        self.inner
            .lock()
            .retry_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Send a `register` command built from the stored credentials.
    ///
    /// Without credentials, or with a signaling URL that is not `wss://`,
    /// nothing is sent and no retry is armed.
    pub async fn register(self: &Arc<Self>) -> Result<RegisterOutcome> {
        let sip = match SipConfig::load(self.store.as_ref(), &self.config).await {
            Ok(sip) => sip,
            Err(e) => {
                self.inner.lock().flags.registering = false;
                return Err(e);
            }
        };

        let Some((username, password)) = sip.credentials() else {
            info!("no stored extension credentials, skipping registration");
            self.inner.lock().flags.registering = false;
            self.emit(RegistrationEvent::Skipped {
                reason: "missing credentials".to_string(),
            });
            return Ok(RegisterOutcome::MissingCredentials);
        };

        if let Err(e) = validate_ws_server(&sip.ws_server) {
            warn!(error = %e, "refusing to register over an insecure signaling URL");
            self.inner.lock().flags.registering = false;
            self.emit(RegistrationEvent::Skipped { reason: e.to_string() });
            return Ok(RegisterOutcome::InsecureServer);
        }

        {
            let mut inner = self.inner.lock();
            if inner.flags.registered {
                debug!("already registered");
                return Ok(RegisterOutcome::AlreadyRegistered);
            }
            inner.flags.registering = true;
        }

        let command = EngineCommand::Register {
            username: username.to_string(),
            password: password.to_string(),
            ws_server: sip.ws_server.clone(),
            domain: sip.domain.clone(),
            authorization_user: sip.auth_user.clone(),
            realm: sip.realm.clone(),
        };
        if let Err(e) = self.transport.send(&command) {
            self.inner.lock().flags.registering = false;
            return Err(e);
        }

        info!(username, domain = %sip.domain, "registering");
        self.emit(RegistrationEvent::Registering);
        Ok(RegisterOutcome::Sent)
    }

    pub fn on_registered(self: &Arc<Self>) {
        let (pending, tasks) = {
            let mut inner = self.inner.lock();
            inner.flags = RegistrationState {
                registered: true,
                registering: false,
            };
            let tasks = [
                inner.retry_task.take(),
                inner.pending_timer.take(),
                inner.boot_task.take(),
            ];
            (inner.pending.take(), tasks)
        };
        abort_all(tasks);
        self.attempts.store(0, Ordering::SeqCst);

        info!("registered");
        self.emit(RegistrationEvent::Registered);

        if let Some(pending) = pending {
            let manager = self.clone();
            let task = tokio::spawn(async move {
                sleep(manager.config.timing.registered_settle_delay).await;
                manager.place_pending(pending).await;
            });
            if let Some(previous) = self.inner.lock().dial_task.replace(task) {
                previous.abort();
            }
        }
    }

    pub async fn on_registration_failed(self: &Arc<Self>, error: Option<String>) {
        let (pending, tasks) = {
            let mut inner = self.inner.lock();
            inner.flags = RegistrationState::default();
            let dial_in_flight = inner.dial_task.as_ref().is_some_and(|task| !task.is_finished());
            let tasks = [inner.pending_timer.take(), inner.dial_task.take()];
            (inner.pending.take().is_some() || dial_in_flight, tasks)
        };
        abort_all(tasks);

        warn!(error = error.as_deref().unwrap_or("unknown"), "registration failed");
        self.emit(RegistrationEvent::RegistrationFailed { error });

        if pending {
            self.calls.fail("registration failed");
        }

        let sip = match SipConfig::load(self.store.as_ref(), &self.config).await {
            Ok(sip) => sip,
            Err(e) => {
                error!(error = %e, "cannot read credentials after registration failure");
                return;
            }
        };
        if !sip.has_credentials() {
            info!("no credentials, not retrying registration");
            return;
        }

        self.schedule_retry();
    }

    /// Place a call, registering first if needed.
    pub async fn dial(self: &Arc<Self>, target: &str) -> Result<DialOutcome> {
        let target = target.trim();
        if target.is_empty() {
            return Err(PhoneError::InvalidState("empty dial target".to_string()));
        }

        if !self.calls.begin_outgoing(target) {
            let state = self.calls.state();
            warn!(number = %target, %state, "call already in progress, dial ignored");
            self.dispatcher.dispatch(PhoneEvent::Call(CallEvent::DialRejected {
                target: target.to_string(),
                state,
            }));
            return Ok(DialOutcome::Rejected(state));
        }

        let needs_register = {
            let mut inner = self.inner.lock();
            if inner.flags.registered {
                None
            } else {
                inner.pending = Some(PendingCall {
                    target: target.to_string(),
                });
                let timer = self.spawn_pending_timer(target.to_string());
                if let Some(previous) = inner.pending_timer.replace(timer) {
                    previous.abort();
                }
                Some(!inner.flags.registering)
            }
        };

        match needs_register {
            None => {
                self.send_call(target).await?;
                Ok(DialOutcome::Placed)
            }
            Some(register) => {
                info!(number = %target, "not registered yet, call queued");
                if register {
                    if let Err(e) = self.register().await {
                        warn!(error = %e, "register for queued call failed");
                    }
                }
                Ok(DialOutcome::Queued)
            }
        }
    }

    /// Drop a queued call and its timers.
    pub fn cancel_pending(&self) -> bool {
        let (pending, tasks) = {
            let mut inner = self.inner.lock();
            let tasks = [inner.pending_timer.take(), inner.dial_task.take()];
            (inner.pending.take(), tasks)
        };
        abort_all(tasks);
        pending.is_some()
    }

    /// First `ready` from the engine triggers one delayed register.
    pub fn on_engine_ready(self: &Arc<Self>) {
        if self.engine_ready.swap(true, Ordering::SeqCst) {
            debug!("engine ready again, registration already initialized");
            return;
        }
        self.schedule_register(self.config.timing.ready_register_delay);
    }

    /// Startup registration, in case the engine never reports `ready`.
    pub fn start(self: &Arc<Self>) {
        self.schedule_register(self.config.timing.initial_register_delay);
    }

    /// The app came back to the foreground.
    pub async fn on_foreground(self: &Arc<Self>) -> Result<Option<RegisterOutcome>> {
        let flags = self.state();
        if flags.registered || flags.registering {
            return Ok(None);
        }
        self.register().await.map(Some)
    }

    fn schedule_register(self: &Arc<Self>, delay: Duration) {
        let manager = self.clone();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            manager.register_if_idle().await;
        });
        if let Some(previous) = self.inner.lock().boot_task.replace(task) {
            previous.abort();
        }
    }

    fn schedule_retry(self: &Arc<Self>) {
        let delay = self.config.timing.retry_delay(rand::random::<f64>());
        let attempt = {
            let mut inner = self.inner.lock();
            // `registered` may have landed while credentials were being read.
            if inner.flags.registered {
                debug!("registered while handling failure, retry not armed");
                return;
            }
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let manager = self.clone();
            let task = tokio::spawn(async move {
                sleep(delay).await;
                manager.register_if_idle().await;
            });
            if let Some(previous) = inner.retry_task.replace(task) {
                previous.abort();
            }
            attempt
        };

        info!(attempt, delay_ms = delay.as_millis() as u64, "registration retry scheduled");
        self.emit(RegistrationEvent::RetryScheduled { attempt, delay });
    }

    async fn register_if_idle(self: &Arc<Self>) {
        let flags = self.state();
        if flags.registered || flags.registering {
            debug!(?flags, "registration in progress, skipping scheduled register");
            return;
        }
        if let Err(e) = self.register().await {
            warn!(error = %e, "scheduled register failed");
        }
    }

    fn spawn_pending_timer(self: &Arc<Self>, target: String) -> JoinHandle<()> {
        let manager = self.clone();
        let timeout = self.config.timing.pending_call_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let expired = {
                let mut inner = manager.inner.lock();
                let same_call = inner.pending.as_ref().is_some_and(|p| p.target == target);
                if !inner.flags.registered && same_call {
                    inner.pending = None;
                    inner.pending_timer = None;
                    true
                } else {
                    false
                }
            };
            if expired {
                warn!(number = %target, "registration did not complete in time, failing queued call");
                manager.calls.fail("registration timeout");
            }
        })
    }

    async fn place_pending(&self, pending: PendingCall) {
        if self.calls.state() != CallState::Outgoing {
            info!(number = %pending.target, state = %self.calls.state(), "queued call no longer wanted");
            return;
        }
        if let Err(e) = self.send_call(&pending.target).await {
            error!(error = %e, "failed to place queued call");
        }
    }

    async fn send_call(&self, target: &str) -> Result<()> {
        let sip = match SipConfig::load(self.store.as_ref(), &self.config).await {
            Ok(sip) => sip,
            Err(e) => {
                self.calls.fail("credentials unavailable");
                return Err(e);
            }
        };
        let command = EngineCommand::call(target, &sip.domain);
        if let Err(e) = self.transport.send(&command) {
            self.calls.fail("engine unavailable");
            return Err(e);
        }
        info!(number = %target, domain = %sip.domain, "call sent to engine");
        Ok(())
    }

    fn emit(&self, event: RegistrationEvent) {
        self.dispatcher.dispatch(PhoneEvent::Registration(event));
    }
}

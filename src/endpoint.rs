use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::credentials::SipConfig;
use crate::incoming::{InviteCallback, InviteExtras, InviteInfo, ShowOutcome};
use crate::{
    AudioFlags, AudioRouter, CallSession, CallState, CallStateMachine, CallSummary,
    CredentialStore, DialOutcome, EngineCommand, EngineEvent, EngineMessageHandler,
    EngineStatusEvent, EngineTransport, IncomingCall, LoggingAudioRouter, MemoryCredentialStore,
    PhoneConfig, PhoneError, PhoneEvent, RegisterOutcome, RegistrationManager, RegistrationState,
    Result,
};

// Event dispatching
pub struct EventDispatcher {
    handlers: Arc<RwLock<Vec<Box<dyn EventHandler>>>>,
    event_tx: mpsc::UnboundedSender<PhoneEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<PhoneEvent>>>,
}

pub trait EventHandler: Send + Sync {
    fn on_event<'a>(&'a self, event: PhoneEvent) -> BoxFuture<'a, ()>;
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        EventDispatcher {
            handlers: Arc::new(RwLock::new(Vec::new())),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    pub async fn add_handler(&self, handler: Box<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Queue an event. Never blocks, so it is safe from inside a transition.
    ///
    /// Events are held until [`EventDispatcher::start`] runs the delivery
    /// loop; an owner that never starts it keeps growing the queue.
    pub fn dispatch(&self, event: PhoneEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Spawn the delivery loop. Only the first call has an effect.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.event_rx.lock().take()?;
        let handlers = self.handlers.clone();

        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handlers = handlers.read().await;
                for handler in handlers.iter() {
                    handler.on_event(event.clone()).await;
                }
            }
        }))
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Call-control surface handed to screens that place or drive calls.
pub trait VoipService: Send + Sync {
    fn make_call<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<DialOutcome>>;
    fn hangup_call(&self) -> bool;
    fn mute_call(&self, mute: bool) -> Result<bool>;
    fn hold_call(&self) -> Result<bool>;
    fn resume_call(&self) -> Result<bool>;
    fn transfer_call<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<bool>>;
    fn send_register(&self) -> BoxFuture<'_, Result<RegisterOutcome>>;
}

// Softphone builder
pub struct SoftphoneBuilder {
    config: PhoneConfig,
    transport: Option<Arc<dyn EngineTransport>>,
    store: Option<Arc<dyn CredentialStore>>,
    audio: Option<Arc<dyn AudioRouter>>,
}

impl SoftphoneBuilder {
    pub fn new() -> Self {
        SoftphoneBuilder {
            config: PhoneConfig::default(),
            transport: None,
            store: None,
            audio: None,
        }
    }

    pub fn config(mut self, config: PhoneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn EngineTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audio(mut self, audio: Arc<dyn AudioRouter>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn build(self) -> Result<Arc<Softphone>> {
        let transport = self
            .transport
            .ok_or_else(|| PhoneError::Configuration("an engine transport is required".to_string()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let audio = self.audio.unwrap_or_else(|| Arc::new(LoggingAudioRouter));

        let dispatcher = Arc::new(EventDispatcher::new());
        let calls = CallStateMachine::new(
            transport.clone(),
            audio,
            dispatcher.clone(),
            self.config.timing.clone(),
        );
        let registration = RegistrationManager::new(
            store.clone(),
            transport.clone(),
            calls.clone(),
            dispatcher.clone(),
            self.config.clone(),
        );

        Ok(Arc::new(Softphone {
            config: self.config,
            store,
            transport,
            calls,
            registration,
            dispatcher,
        }))
    }
}

impl Default for SoftphoneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Call-state bridge between the UI and the embedded calling engine.
pub struct Softphone {
    config: PhoneConfig,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn EngineTransport>,
    calls: Arc<CallStateMachine>,
    registration: Arc<RegistrationManager>,
    dispatcher: Arc<EventDispatcher>,
}

impl Softphone {
    pub fn builder() -> SoftphoneBuilder {
        SoftphoneBuilder::new()
    }

    /// Start event delivery and the startup registration.
    ///
    /// Must be called once after [`SoftphoneBuilder::build`]. Until then
    /// every event stays queued in memory and no handler sees it.
    pub fn start(&self) {
        self.dispatcher.start();
        self.registration.start();
        info!("softphone started");
    }

    pub async fn add_event_handler(&self, handler: Box<dyn EventHandler>) {
        self.dispatcher.add_handler(handler).await;
    }

    pub fn calls(&self) -> &Arc<CallStateMachine> {
        &self.calls
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        &self.registration
    }

    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn call_state(&self) -> CallState {
        self.calls.state()
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration.state()
    }

    pub fn session(&self) -> Option<CallSession> {
        self.calls.session()
    }

    pub fn audio_flags(&self) -> AudioFlags {
        self.calls.flags()
    }

    pub fn formatted_duration(&self) -> String {
        self.calls.formatted_duration()
    }

    pub fn incoming_invite(&self) -> Option<InviteInfo> {
        self.calls.incoming().current()
    }

    pub async fn dial(&self, target: &str) -> Result<DialOutcome> {
        self.registration.dial(target).await
    }

    /// Local hangup; also drops a call still waiting for registration.
    pub fn hangup(&self) -> bool {
        let dropped = self.registration.cancel_pending();
        if dropped {
            debug!("queued call dropped by hangup");
        }
        self.calls.hangup()
    }

    pub async fn answer(&self) -> bool {
        self.calls.incoming().accept().await
    }

    pub async fn decline(&self) -> bool {
        self.calls.incoming().decline().await
    }

    pub fn mute(&self, mute: bool) -> Result<bool> {
        self.calls.mute(mute)
    }

    pub fn hold(&self) -> Result<bool> {
        self.calls.hold()
    }

    pub fn resume(&self) -> Result<bool> {
        self.calls.resume()
    }

    pub fn set_speaker(&self, on: bool) -> bool {
        self.calls.set_speaker(on)
    }

    pub async fn transfer(&self, target: &str) -> Result<bool> {
        let sip = SipConfig::load(self.store.as_ref(), &self.config).await?;
        self.calls.transfer(target, &sip.domain)
    }

    pub async fn register(&self) -> Result<RegisterOutcome> {
        self.registration.register().await
    }

    pub async fn on_foreground(&self) -> Result<Option<RegisterOutcome>> {
        self.registration.on_foreground().await
    }

    /// Parse and route one raw engine message. Bad input is logged and dropped.
    pub async fn handle_engine_message(&self, raw: &str) {
        match EngineEvent::parse(raw) {
            Ok(event) => self.handle_engine_event(event).await,
            Err(PhoneError::UnknownEvent(kind)) => {
                info!(event = %kind, "unhandled engine event");
            }
            Err(e) => {
                warn!(error = %e, "dropping engine message");
            }
        }
    }

    pub async fn handle_engine_event(&self, event: EngineEvent) {
        debug!(event = event.kind(), "engine event");
        match event {
            EngineEvent::Ready => {
                self.emit(EngineStatusEvent::Ready);
                self.registration.on_engine_ready();
            }
            EngineEvent::Registered => self.registration.on_registered(),
            EngineEvent::RegistrationFailed { error } => {
                self.registration.on_registration_failed(error).await;
            }
            EngineEvent::Incoming(incoming) => {
                self.present_incoming(incoming);
            }
            EngineEvent::Progress => self.calls.on_progress(),
            EngineEvent::Outgoing { call_id } => self.calls.on_outgoing(call_id),
            EngineEvent::Connected { call_id } => self.calls.on_connected(call_id),
            EngineEvent::Confirmed => self.calls.on_connected(None),
            EngineEvent::Ended => self.calls.on_ended(),
            EngineEvent::Failed { error } => self.calls.on_failed(error),
            EngineEvent::CallTimerUpdate { duration } => {
                self.emit(EngineStatusEvent::TimerUpdate { duration });
            }
            EngineEvent::DtmfTransferSent { message } => self.calls.on_transfer_sent(message),
            EngineEvent::TransferFailed { error } => self.calls.on_transfer_failed(error),
            EngineEvent::AudioStarted => self.emit(EngineStatusEvent::AudioStarted),
            EngineEvent::AudioFailed { error } => {
                warn!(error = error.as_deref().unwrap_or(""), "engine audio failed");
                self.emit(EngineStatusEvent::AudioFailed { error });
                self.calls.on_audio_failed();
            }
            EngineEvent::NeedsAudioActivation => self.calls.on_needs_audio_activation(),
            EngineEvent::ConnectedWs => {
                info!("signaling socket connected");
                self.emit(EngineStatusEvent::SocketConnected);
            }
            EngineEvent::Disconnected => {
                warn!("signaling socket disconnected");
                self.emit(EngineStatusEvent::SocketDisconnected);
            }
        }
    }

    fn present_incoming(&self, incoming: IncomingCall) -> ShowOutcome {
        let from = incoming
            .from
            .filter(|from| !from.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let extras = InviteExtras {
            call_id: incoming.call_id,
            contact_name: incoming.contact_name.filter(|name| !name.is_empty()),
            contact_avatar: incoming.contact_avatar.filter(|avatar| !avatar.is_empty()),
            token: incoming.token.filter(|token| !token.is_empty()),
        };

        let accept = self.accept_callback(&from, &extras);
        let transport = self.transport.clone();
        let decline: InviteCallback = Box::new(move || -> BoxFuture<'static, Result<()>> {
            Box::pin(async move { transport.send(&EngineCommand::RejectCall) })
        });

        self.calls
            .incoming()
            .show_incoming_call(&from, accept, decline, extras)
    }

    // Answer, then hand the call over to the full call screen.
    fn accept_callback(&self, from: &str, extras: &InviteExtras) -> InviteCallback {
        let transport = self.transport.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let dispatcher = self.dispatcher.clone();
        let number_to_call = from.to_string();
        let contact_name = extras.contact_name.clone().unwrap_or_else(|| from.to_string());
        let contact_avatar = extras.contact_avatar.clone();
        let token = extras.token.clone();

        Box::new(move || -> BoxFuture<'static, Result<()>> {
            Box::pin(async move {
                transport.send(&EngineCommand::Answer)?;

                let sip = SipConfig::load(store.as_ref(), &config).await?;
                let Some(sip_credentials) = sip.sip_credentials(Utc::now().timestamp_millis()) else {
                    warn!("answered without stored credentials, call screen not presented");
                    return Ok(());
                };

                dispatcher.dispatch(PhoneEvent::PresentCall(CallSummary {
                    number_to_call,
                    contact_name: Some(contact_name),
                    contact_avatar,
                    token,
                    is_incoming: true,
                    sip_credentials,
                }));
                Ok(())
            })
        })
    }

    fn emit(&self, event: EngineStatusEvent) {
        self.dispatcher.dispatch(PhoneEvent::Engine(event));
    }
}

impl EngineMessageHandler for Softphone {
    fn handle_message<'a>(&'a self, raw: String) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.handle_engine_message(&raw).await;
        })
    }
}

impl VoipService for Softphone {
    fn make_call<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<DialOutcome>> {
        Box::pin(self.dial(target))
    }

    fn hangup_call(&self) -> bool {
        self.hangup()
    }

    fn mute_call(&self, mute: bool) -> Result<bool> {
        self.mute(mute)
    }

    fn hold_call(&self) -> Result<bool> {
        self.hold()
    }

    fn resume_call(&self) -> Result<bool> {
        self.resume()
    }

    fn transfer_call<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(self.transfer(target))
    }

    fn send_register(&self) -> BoxFuture<'_, Result<RegisterOutcome>> {
        Box::pin(self.register())
    }
}

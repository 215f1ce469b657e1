// Recording doubles shared by the unit tests
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::credentials::{KEY_PASSWORD, KEY_USERNAME};
use crate::incoming::InviteCallback;
use crate::{
    AudioRouter, CallEvent, CallStateMachine, CredentialStore, EngineCommand, EngineTransport,
    EventDispatcher, EventHandler, MemoryCredentialStore, PhoneConfig, PhoneError, PhoneEvent, RegistrationEvent,
    RegistrationManager, Result,
};

#[derive(Default)]
pub struct RecordingTransport {
    commands: Mutex<Vec<EngineCommand>>,
    reloads: AtomicU64,
}

impl RecordingTransport {
    pub fn commands(&self) -> Vec<EngineCommand> {
        self.commands.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.commands.lock().iter().map(EngineCommand::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.commands.lock().iter().filter(|c| c.kind() == kind).count()
    }

    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl EngineTransport for RecordingTransport {
    fn send(&self, command: &EngineCommand) -> Result<()> {
        self.commands.lock().push(command.clone());
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAudio {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingAudio {
    pub fn failing() -> Self {
        RecordingAudio {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().push(call);
        if self.fail {
            return Err(PhoneError::Audio("device unavailable".to_string()));
        }
        Ok(())
    }
}

impl AudioRouter for RecordingAudio {
    fn start(&self) -> Result<()> {
        self.record("start".to_string())
    }

    fn stop(&self) -> Result<()> {
        self.record("stop".to_string())
    }

    fn set_microphone_mute(&self, mute: bool) -> Result<()> {
        self.record(format!("mic:{}", mute))
    }

    fn set_speakerphone_on(&self, on: bool) -> Result<()> {
        self.record(format!("speaker:{}", on))
    }

    fn start_ringtone(&self) -> Result<()> {
        self.record("ringtone:start".to_string())
    }

    fn stop_ringtone(&self) -> Result<()> {
        self.record("ringtone:stop".to_string())
    }
}

/// Collects every dispatched event.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<PhoneEvent>>>,
}

impl EventLog {
    pub fn all(&self) -> Vec<PhoneEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn call_events(&self) -> Vec<CallEvent> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                PhoneEvent::Call(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn registration_events(&self) -> Vec<RegistrationEvent> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                PhoneEvent::Registration(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for EventLog {
    fn on_event<'a>(&'a self, event: PhoneEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.events.lock().push(event);
        })
    }
}

pub fn counting_callback() -> (InviteCallback, Arc<AtomicU64>) {
    let count = Arc::new(AtomicU64::new(0));
    let counter = count.clone();
    let callback: InviteCallback = Box::new(move || -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });
    (callback, count)
}

pub fn failing_callback() -> InviteCallback {
    Box::new(|| -> BoxFuture<'static, Result<()>> {
        Box::pin(async { Err(PhoneError::Transport("engine link closed".to_string())) })
    })
}

/// Memory store whose reads park on the timer, so engine events can land
/// while credentials are being loaded.
pub struct SlowStore {
    inner: MemoryCredentialStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(inner: MemoryCredentialStore, delay: Duration) -> Self {
        SlowStore { inner, delay }
    }
}

impl CredentialStore for SlowStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        self.inner.set(key, value)
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        self.inner.remove(key)
    }
}

pub fn extension_store() -> MemoryCredentialStore {
    MemoryCredentialStore::with_values([(KEY_USERNAME, "1001"), (KEY_PASSWORD, "secret")])
}

/// Call machine and registration manager wired to recording doubles.
pub struct Harness {
    pub transport: Arc<RecordingTransport>,
    pub audio: Arc<RecordingAudio>,
    pub events: EventLog,
    pub calls: Arc<CallStateMachine>,
    pub registration: Arc<RegistrationManager>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(MemoryCredentialStore::new()).await
    }

    pub async fn with_credentials() -> Self {
        Self::with_store(extension_store()).await
    }

    pub async fn with_store(store: impl CredentialStore + 'static) -> Self {
        let config = PhoneConfig::default();
        let transport = Arc::new(RecordingTransport::default());
        let audio = Arc::new(RecordingAudio::default());
        let dispatcher = Arc::new(EventDispatcher::new());
        let events = EventLog::default();
        dispatcher.add_handler(Box::new(events.clone())).await;
        dispatcher.start();

        let calls = CallStateMachine::new(
            transport.clone(),
            audio.clone(),
            dispatcher.clone(),
            config.timing.clone(),
        );
        let registration = RegistrationManager::new(
            Arc::new(store),
            transport.clone(),
            calls.clone(),
            dispatcher,
            config,
        );

        Harness {
            transport,
            audio,
            events,
            calls,
            registration,
        }
    }
}

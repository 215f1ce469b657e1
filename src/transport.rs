use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{EngineCommand, PhoneError, Result};

// Transport trait towards the embedded calling engine
pub trait EngineTransport: Send + Sync {
    /// Deliver one command. Fire-and-forget: the engine answers, if at all,
    /// with asynchronous events.
    fn send(&self, command: &EngineCommand) -> Result<()>;

    /// Tear down and reinitialize the engine, dropping any lingering session.
    fn reload(&self) -> Result<()>;
}

// Frames leaving through a channel transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A serialized command.
    Message(String),
    /// The engine should be reloaded.
    Reload,
}

/// In-process transport: commands are serialized onto an unbounded channel
/// whose receiving end drives the real engine (a web view bridge, a child
/// process, a socket...).
pub struct ChannelTransport {
    outbound_tx: mpsc::UnboundedSender<OutboundFrame>,
    reloads: AtomicU64,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ChannelTransport {
            outbound_tx,
            reloads: AtomicU64::new(0),
        });
        (transport, outbound_rx)
    }

    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl EngineTransport for ChannelTransport {
    fn send(&self, command: &EngineCommand) -> Result<()> {
        let frame = command.to_json()?;
        debug!(command = command.kind(), "sending engine command");
        self.outbound_tx
            .send(OutboundFrame::Message(frame))
            .map_err(|_| PhoneError::Transport("engine link closed".to_string()))
    }

    fn reload(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        self.outbound_tx
            .send(OutboundFrame::Reload)
            .map_err(|_| PhoneError::Transport("engine link closed".to_string()))
    }
}

// Sink for raw engine messages
pub trait EngineMessageHandler: Send + Sync {
    fn handle_message<'a>(&'a self, raw: String) -> futures::future::BoxFuture<'a, ()>;
}

/// Pump raw engine messages into `handler` until the channel closes.
pub async fn run_event_pump(
    mut inbound_rx: mpsc::Receiver<String>,
    handler: Arc<dyn EngineMessageHandler>,
) {
    while let Some(raw) = inbound_rx.recv().await {
        handler.handle_message(raw).await;
    }
    warn!("engine event channel closed");
}

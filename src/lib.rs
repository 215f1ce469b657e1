// lib.rs - Call-state bridge between a softphone UI and its calling engine

#[path = "audio.rs"]
mod audio;
#[path = "call.rs"]
mod call;
#[path = "config.rs"]
mod config;
#[path = "core.rs"]
mod core;
#[path = "endpoint.rs"]
mod endpoint;
#[path = "message.rs"]
mod message;
#[path = "registration.rs"]
mod registration;
#[path = "timer.rs"]
mod timer;
#[path = "transport.rs"]
mod transport;

pub mod credentials;
pub mod incoming;

#[cfg(test)]
mod test_support;

// Re-export core types
pub use crate::audio::*;
pub use crate::call::*;
pub use crate::config::*;
pub use crate::core::*;
pub use crate::credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use crate::endpoint::*;
pub use crate::incoming::IncomingCallOrchestrator;
pub use crate::message::*;
pub use crate::registration::*;
pub use crate::timer::*;
pub use crate::transport::*;

// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        // Main API
        Softphone,
        SoftphoneBuilder,
        VoipService,
        // Collaborators
        AudioRouter,
        CredentialStore,
        EngineTransport,
        ChannelTransport,
        OutboundFrame,
        // States
        CallState,
        CallDirection,
        RegistrationState,
        AudioFlags,
        // Events
        PhoneEvent,
        CallEvent,
        RegistrationEvent,
        EngineStatusEvent,
        EventHandler,
        // Outcomes
        DialOutcome,
        RegisterOutcome,
        // Configuration
        PhoneConfig,
        TimingConfig,
        // Core types
        PhoneError,
        Result,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

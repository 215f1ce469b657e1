use tracing::{debug, warn};

use crate::Result;

// Audio routing capability (platform in-call audio manager)
pub trait AudioRouter: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn set_microphone_mute(&self, mute: bool) -> Result<()>;
    fn set_speakerphone_on(&self, on: bool) -> Result<()>;
    fn start_ringtone(&self) -> Result<()>;
    fn stop_ringtone(&self) -> Result<()>;
}

/// Per-call audio flags as shown by the call screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioFlags {
    pub muted: bool,
    pub on_hold: bool,
    pub speaker_on: bool,
}

impl AudioFlags {
    /// Flags right after a call connects: unmuted, on speaker.
    pub fn connected() -> Self {
        AudioFlags {
            muted: false,
            on_hold: false,
            speaker_on: true,
        }
    }
}

/// Log a failed routing call. Hardware side effects never abort a transition.
pub(crate) fn best_effort(operation: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(operation, error = %e, "audio routing failed");
    }
}

/// Bring audio up for a live call: session started, mic open, speaker on.
pub(crate) fn route_connected(audio: &dyn AudioRouter) {
    best_effort("start", audio.start());
    best_effort("set_microphone_mute", audio.set_microphone_mute(false));
    best_effort("set_speakerphone_on", audio.set_speakerphone_on(true));
}

/// Router for hosts without an audio manager; it only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAudioRouter;

impl AudioRouter for LoggingAudioRouter {
    fn start(&self) -> Result<()> {
        debug!("audio session started");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        debug!("audio session stopped");
        Ok(())
    }

    fn set_microphone_mute(&self, mute: bool) -> Result<()> {
        debug!(mute, "microphone");
        Ok(())
    }

    fn set_speakerphone_on(&self, on: bool) -> Result<()> {
        debug!(on, "speakerphone");
        Ok(())
    }

    fn start_ringtone(&self) -> Result<()> {
        debug!("ringtone started");
        Ok(())
    }

    fn stop_ringtone(&self) -> Result<()> {
        debug!("ringtone stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PhoneError;
    use crate::test_support::RecordingAudio;

    #[test]
    fn test_route_connected_order() {
        let audio = RecordingAudio::default();
        route_connected(&audio);
        assert_eq!(audio.calls(), vec!["start", "mic:false", "speaker:true"]);
    }

    #[test]
    fn test_best_effort_swallows_errors() {
        best_effort("start", Err(PhoneError::Audio("no device".to_string())));
    }

    #[test]
    fn test_failing_router_does_not_stop_routing() {
        let audio = RecordingAudio::failing();
        route_connected(&audio);
        assert_eq!(audio.calls().len(), 3);
    }
}

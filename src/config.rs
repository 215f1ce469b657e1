use std::time::Duration;

use url::Url;

use crate::{PhoneError, Result};

pub const DEFAULT_SIP_DOMAIN: &str = "pbx2.telxio.com.sg";
pub const DEFAULT_WS_SERVER: &str = "wss://pbx2.telxio.com.sg:8089/ws";

// Configuration types
#[derive(Debug, Clone)]
pub struct PhoneConfig {
    pub default_ws_server: String,
    pub default_domain: String,
    pub timing: TimingConfig,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        PhoneConfig {
            default_ws_server: DEFAULT_WS_SERVER.to_string(),
            default_domain: DEFAULT_SIP_DOMAIN.to_string(),
            timing: TimingConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Delay before the first register after startup.
    pub initial_register_delay: Duration,
    /// Delay between the engine's `ready` and the first register.
    pub ready_register_delay: Duration,
    /// Settle time between `registered` and dispatching a queued call.
    pub registered_settle_delay: Duration,
    /// How long a queued call may wait for registration.
    pub pending_call_timeout: Duration,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub auto_decline: Duration,
    pub hangup_stagger: Duration,
    pub forced_reload: Duration,
    pub audio_restart: Duration,
    pub audio_activation_pause: Duration,
    pub audio_activation_ack: Duration,
    pub duration_tick: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            initial_register_delay: Duration::from_millis(1000),
            ready_register_delay: Duration::from_millis(500),
            registered_settle_delay: Duration::from_millis(200),
            pending_call_timeout: Duration::from_millis(5000),
            retry_base: Duration::from_millis(5000),
            retry_cap: Duration::from_millis(30000),
            auto_decline: Duration::from_secs(30),
            hangup_stagger: Duration::from_millis(120),
            forced_reload: Duration::from_millis(800),
            audio_restart: Duration::from_millis(500),
            audio_activation_pause: Duration::from_millis(100),
            audio_activation_ack: Duration::from_millis(200),
            duration_tick: Duration::from_secs(1),
        }
    }
}

impl TimingConfig {
    /// Registration retry delay: `min(base * 2^jitter, cap)` with `jitter` in `[0, 1]`.
    pub fn retry_delay(&self, jitter: f64) -> Duration {
        let jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };
        let scaled = self.retry_base.as_secs_f64() * 2f64.powf(jitter);
        Duration::from_secs_f64(scaled).min(self.retry_cap)
    }
}

/// Only secure WebSocket signaling servers are accepted.
pub fn validate_ws_server(ws_server: &str) -> Result<Url> {
    let url = Url::parse(ws_server)
        .map_err(|e| PhoneError::Configuration(format!("invalid signaling URL {}: {}", ws_server, e)))?;
    if url.scheme() != "wss" {
        return Err(PhoneError::Configuration(format!(
            "signaling URL must use wss://, got {}",
            ws_server
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_bounds() {
        let timing = TimingConfig::default();
        for step in 0..=100 {
            let delay = timing.retry_delay(step as f64 / 100.0);
            assert!(delay >= Duration::from_millis(5000), "{:?} below floor", delay);
            assert!(delay <= Duration::from_millis(30000), "{:?} above cap", delay);
        }
        assert_eq!(timing.retry_delay(0.0), Duration::from_millis(5000));
        assert_eq!(timing.retry_delay(1.0), Duration::from_millis(10000));
    }

    #[test]
    fn test_retry_delay_clamps_jitter() {
        let timing = TimingConfig {
            retry_base: Duration::from_secs(20),
            ..TimingConfig::default()
        };
        assert_eq!(timing.retry_delay(1.0), Duration::from_secs(30));
        assert_eq!(timing.retry_delay(7.5), Duration::from_secs(30));
        assert_eq!(timing.retry_delay(-3.0), Duration::from_secs(20));
        assert_eq!(timing.retry_delay(f64::NAN), Duration::from_secs(20));
    }

    #[test]
    fn test_validate_ws_server() {
        assert!(validate_ws_server(DEFAULT_WS_SERVER).is_ok());
        assert!(matches!(
            validate_ws_server("ws://pbx.example.com/ws"),
            Err(PhoneError::Configuration(_))
        ));
        assert!(validate_ws_server("not a url").is_err());
        assert!(validate_ws_server("").is_err());
    }
}

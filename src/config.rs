//! # Configuration Module
//!
//! Engine configuration: match-time options (redirect recovery, panic
//! recovery, 404/405 overrides), streaming tuning, and environment-derived
//! runtime settings.
//!
//! ## Environment Variables
//!
//! ### `SWBD_STACK_SIZE`
//!
//! Stack size for handler coroutines. Accepts decimal (`65536`) or
//! hexadecimal (`0x10000`) values. Default: `0x10000` (64 KiB).
//!
//! Handler coroutines are long-lived and pre-spawned, so the stack size is
//! a startup-time knob: total memory is roughly
//! `stack_size × registered_handlers` plus one stack per live connection.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::HandlerResponse;

/// Override hook for the not-found response.
pub type NotFoundResponder =
    Arc<dyn Fn(&http::Method, &str) -> HandlerResponse + Send + Sync>;

/// Override hook for the method-not-allowed response. Receives the methods
/// that would have matched the path.
pub type MethodNotAllowedResponder =
    Arc<dyn Fn(&http::Method, &str, &[http::Method]) -> HandlerResponse + Send + Sync>;

/// Tuning for duplex and push streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Socket read deadline applied at upgrade.
    pub read_deadline: Duration,
    /// Socket write deadline applied at upgrade.
    pub write_deadline: Duration,
    /// Interval between server-initiated pings / heartbeat comments.
    pub ping_interval: Duration,
    /// A duplex peer that has not answered a ping within this window is
    /// closed with code 1011.
    pub pong_deadline: Duration,
    /// Bounded outbox capacity; a full queue fails the send and closes the
    /// connection as a slow consumer.
    pub write_queue_depth: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_deadline: Duration::from_secs(60),
            write_deadline: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            pong_deadline: Duration::from_secs(60),
            write_queue_depth: 256,
        }
    }
}

/// Match-time and dispatch options for a [`crate::router::Router`].
#[derive(Clone, Default)]
pub struct RouterConfig {
    /// Emit a 301 to the canonical form when the only difference is a
    /// trailing slash.
    pub trailing_slash_redirect: bool,
    /// Emit a 301 to the canonical-case path when a case-folded lookup of a
    /// fixed (static) path hits exactly one registered route.
    pub fixed_path_redirect: bool,
    /// Catch handler panics and convert them to 500 envelopes.
    pub recoverer: bool,
    /// Replacement for the default 404 handler.
    pub not_found: Option<NotFoundResponder>,
    /// Replacement for the default 405 handler.
    pub method_not_allowed: Option<MethodNotAllowedResponder>,
    /// Streaming tuning shared by all duplex/push routes.
    pub stream: StreamConfig,
}

impl RouterConfig {
    /// The stock configuration: trailing-slash recovery and panic recovery
    /// on, case-insensitive recovery off.
    pub fn new() -> Self {
        Self {
            trailing_slash_redirect: true,
            fixed_path_redirect: false,
            recoverer: true,
            not_found: None,
            method_not_allowed: None,
            stream: StreamConfig::default(),
        }
    }
}

impl std::fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterConfig")
            .field("trailing_slash_redirect", &self.trailing_slash_redirect)
            .field("fixed_path_redirect", &self.fixed_path_redirect)
            .field("recoverer", &self.recoverer)
            .field("not_found", &self.not_found.is_some())
            .field("method_not_allowed", &self.method_not_allowed.is_some())
            .field("stream", &self.stream)
            .finish()
    }
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for handler coroutines in bytes (default 64 KiB).
    pub stack_size: usize,
}

const DEFAULT_STACK_SIZE: usize = 0x10000;

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        RuntimeConfig {
            stack_size: stack_size_from_env(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// Parse `SWBD_STACK_SIZE`, accepting decimal or `0x`-prefixed hex.
pub(crate) fn stack_size_from_env() -> usize {
    match env::var("SWBD_STACK_SIZE") {
        Ok(val) => {
            if let Some(hex) = val.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).unwrap_or(DEFAULT_STACK_SIZE)
            } else {
                val.parse().unwrap_or(DEFAULT_STACK_SIZE)
            }
        }
        Err(_) => DEFAULT_STACK_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_defaults_match_documented_values() {
        let s = StreamConfig::default();
        assert_eq!(s.read_deadline, Duration::from_secs(60));
        assert_eq!(s.write_deadline, Duration::from_secs(10));
        assert_eq!(s.ping_interval, Duration::from_secs(30));
        assert_eq!(s.write_queue_depth, 256);
    }

    #[test]
    fn stock_config_enables_tsr_and_recoverer() {
        let c = RouterConfig::new();
        assert!(c.trailing_slash_redirect);
        assert!(!c.fixed_path_redirect);
        assert!(c.recoverer);
    }
}

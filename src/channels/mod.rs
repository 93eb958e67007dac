//! Channel registry
//!
//! A channel is a named feed with a fixed push interval and a payload
//! generator. Channel ids are the request path below the stream prefix,
//! e.g. `vulnerability-score` for `/ws/vulnerability-score`. Ids are
//! `/`-separated segments, each matching `[a-zA-Z0-9_-]+`.
//!
//! Resolution is an exact id match. Anything else, including the bare
//! prefix, gets the registry's default channel instead of an error.

pub mod generators;

use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub use generators::{GeneratorError, PayloadGenerator};

/// Valid characters for a channel id segment
fn is_valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_valid_segment_char)
}

/// Strip the surrounding slashes a router may leave on a captured path
fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel id cannot be empty")]
    EmptyId,

    #[error("invalid segment '{0}': must match [a-zA-Z0-9_-]+")]
    InvalidSegment(String),

    #[error("channel '{0}' has a zero push interval")]
    ZeroInterval(String),

    #[error("channel '{0}' is registered twice")]
    Duplicate(String),

    #[error("registry has no default channel")]
    MissingDefault,
}

/// A statically configured feed
pub struct Channel {
    id: String,
    interval: Duration,
    generator: Arc<dyn PayloadGenerator>,
}

impl Channel {
    pub fn new(
        id: &str,
        interval: Duration,
        generator: impl PayloadGenerator + 'static,
    ) -> Result<Self, ChannelError> {
        let id = normalize(id);
        if id.is_empty() {
            return Err(ChannelError::EmptyId);
        }
        if let Some(bad) = id.split('/').find(|segment| !is_valid_segment(segment)) {
            return Err(ChannelError::InvalidSegment(bad.to_string()));
        }
        if interval.is_zero() {
            return Err(ChannelError::ZeroInterval(id.to_string()));
        }

        Ok(Self {
            id: id.to_string(),
            interval,
            generator: Arc::new(generator),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Produce one serialized payload.
    ///
    /// A panicking generator is caught here and reported as
    /// [`GeneratorError::Panicked`]; it never unwinds into the caller.
    pub fn render(&self) -> Result<String, GeneratorError> {
        let generator = &self.generator;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| generator.generate(Utc::now())));

        let value = match outcome {
            Ok(result) => result?,
            Err(payload) => {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "panic".to_string()
                };
                return Err(GeneratorError::Panicked(msg));
            }
        };

        Ok(serde_json::to_string(&value)?)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Outcome of resolving a request path
#[derive(Debug, Clone)]
pub struct Resolution {
    pub channel: Arc<Channel>,
    /// True when the path matched nothing and the default channel was used
    pub fallback: bool,
}

/// Fixed table of channels plus the default
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<Channel>>,
    default: Arc<Channel>,
}

impl ChannelRegistry {
    pub fn builder() -> ChannelRegistryBuilder {
        ChannelRegistryBuilder::default()
    }

    /// The built-in security dashboard feeds
    pub fn standard() -> Self {
        let secs = Duration::from_secs;

        // Ids and intervals below are constants that satisfy Channel::new.
        let build = || -> Result<Self, ChannelError> {
            Self::builder()
                .channel(Channel::new("vulnerability-score", secs(2), generators::VulnerabilityScore)?)
                .channel(Channel::new("top-vulnerabilities", secs(5), generators::TopVulnerabilities)?)
                .channel(Channel::new("threat-activity", secs(3), generators::ThreatActivity)?)
                .default_channel(Channel::new("pulse", secs(1), generators::Pulse)?)
                .build()
        };
        build().expect("built-in channel table is valid")
    }

    /// Resolve a request path to exactly one channel
    pub fn resolve(&self, path: &str) -> Resolution {
        let id = normalize(path);

        match self.channels.get(id) {
            Some(channel) => Resolution {
                channel: channel.clone(),
                fallback: false,
            },
            None => {
                info!(
                    requested = id,
                    channel = %self.default,
                    "Unknown channel path, falling back to default channel"
                );
                Resolution {
                    channel: self.default.clone(),
                    fallback: true,
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.get(normalize(id)).cloned()
    }

    pub fn default_channel(&self) -> &Arc<Channel> {
        &self.default
    }

    /// Ids of the named (non-default) channels, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Default)]
pub struct ChannelRegistryBuilder {
    channels: Vec<Channel>,
    default: Option<Channel>,
}

impl ChannelRegistryBuilder {
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn default_channel(mut self, channel: Channel) -> Self {
        self.default = Some(channel);
        self
    }

    pub fn build(self) -> Result<ChannelRegistry, ChannelError> {
        let default = Arc::new(self.default.ok_or(ChannelError::MissingDefault)?);

        let mut channels = HashMap::new();
        for channel in self.channels {
            if channel.id == default.id || channels.contains_key(&channel.id) {
                return Err(ChannelError::Duplicate(channel.id));
            }
            channels.insert(channel.id.clone(), Arc::new(channel));
        }

        Ok(ChannelRegistry { channels, default })
    }
}

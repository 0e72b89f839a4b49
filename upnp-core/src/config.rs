//! Configuration types for the SDK core
//!
//! This module defines the configuration that controls the handle table
//! capacity, the three worker pools, and the advertisement and subscription
//! defaults applied to registered devices.

use std::time::Duration;

use crate::error::{Result, UpnpError};

/// Configuration for one worker thread pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads
    /// Default: 2
    pub workers: usize,

    /// Maximum number of queued jobs before submissions are rejected
    /// Default: 100
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 100,
        }
    }
}

/// Configuration for the SDK session
///
/// This struct controls all aspects of the resource-management core: handle
/// capacity, pool sizing, timer defaults, and the limits applied to device
/// description documents and GENA subscriptions.
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// Network interface to bind to; `None` selects the first usable one
    /// Default: None
    pub interface: Option<String>,

    /// Maximum number of simultaneously live handles
    /// Default: 200
    pub max_handles: usize,

    /// Pool for inbound request processing
    pub recv_pool: PoolConfig,

    /// Pool for outbound sends (advertisements, dispatched operations)
    pub send_pool: PoolConfig,

    /// Pool for the mini web/SSDP server accept/dispatch loop
    pub miniserver_pool: PoolConfig,

    /// Default advertisement max-age applied when a device does not set one
    /// Default: 1800 seconds (30 minutes)
    pub default_max_age: Duration,

    /// Timeout applied to dispatched protocol operations that do not
    /// carry their own
    /// Default: 30 seconds
    pub default_timeout: Duration,

    /// Maximum GENA subscriptions accepted per registered device
    /// Default: 100
    pub max_subscriptions: usize,

    /// Longest subscription duration granted to a subscriber
    /// Default: 1800 seconds
    pub max_subscription_timeout: Duration,

    /// Largest SOAP/description body the SDK will accept
    /// Default: 16000 bytes, capped at 32000
    pub max_content_length: usize,
}

/// Hard upper bound on `max_content_length`.
pub const MAX_CONTENT_LENGTH: usize = 32000;

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            max_handles: 200,
            recv_pool: PoolConfig::default(),
            send_pool: PoolConfig::default(),
            miniserver_pool: PoolConfig::default(),
            default_max_age: Duration::from_secs(1800), // 30 minutes
            default_timeout: Duration::from_secs(30),
            max_subscriptions: 100,
            max_subscription_timeout: Duration::from_secs(1800),
            max_content_length: 16000,
        }
    }
}

impl SdkConfig {
    /// Create a new SdkConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an SdkConfig sized for small embedded deployments
    pub fn resource_efficient() -> Self {
        Self {
            max_handles: 16,
            recv_pool: PoolConfig {
                workers: 1,
                queue_capacity: 16,
            },
            send_pool: PoolConfig {
                workers: 1,
                queue_capacity: 16,
            },
            miniserver_pool: PoolConfig {
                workers: 1,
                queue_capacity: 16,
            },
            max_subscriptions: 16,
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.max_handles == 0 {
            return Err(UpnpError::Configuration(
                "max_handles must be greater than 0".to_string(),
            ));
        }
        // Handles are slot + 1 as i32, so the capacity must fit in i32.
        if self.max_handles > i32::MAX as usize {
            return Err(UpnpError::Configuration(format!(
                "max_handles must be at most {}",
                i32::MAX
            )));
        }

        for (name, pool) in [
            ("recv_pool", &self.recv_pool),
            ("send_pool", &self.send_pool),
            ("miniserver_pool", &self.miniserver_pool),
        ] {
            if pool.workers == 0 {
                return Err(UpnpError::Configuration(format!(
                    "{name} must have at least one worker"
                )));
            }
            if pool.queue_capacity == 0 {
                return Err(UpnpError::Configuration(format!(
                    "{name} queue capacity must be greater than 0"
                )));
            }
        }

        if self.default_max_age == Duration::ZERO {
            return Err(UpnpError::Configuration(
                "default_max_age must be greater than 0".to_string(),
            ));
        }

        if self.max_subscriptions == 0 {
            return Err(UpnpError::Configuration(
                "max_subscriptions must be greater than 0".to_string(),
            ));
        }

        if self.max_content_length == 0 || self.max_content_length > MAX_CONTENT_LENGTH {
            return Err(UpnpError::Configuration(format!(
                "max_content_length must be in 1..={MAX_CONTENT_LENGTH}"
            )));
        }

        Ok(())
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.interface = Some(name.into());
        self
    }

    pub fn with_max_handles(mut self, max: usize) -> Self {
        self.max_handles = max;
        self
    }

    pub fn with_send_pool(mut self, pool: PoolConfig) -> Self {
        self.send_pool = pool;
        self
    }

    pub fn with_recv_pool(mut self, pool: PoolConfig) -> Self {
        self.recv_pool = pool;
        self
    }

    pub fn with_miniserver_pool(mut self, pool: PoolConfig) -> Self {
        self.miniserver_pool = pool;
        self
    }

    pub fn with_default_max_age(mut self, max_age: Duration) -> Self {
        self.default_max_age = max_age;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

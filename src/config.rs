// ABOUTME: Typed configuration for the gateway and its subsystems
// ABOUTME: Defaults plus consuming with_* setters, overridden by the smscd command line

use std::time::Duration;

/// Credentials a bind must present, and the identity the gateway answers with.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Expected ESME system_id (default: "smppclient1")
    pub system_id: String,

    /// Expected ESME password (default: "password")
    pub password: String,

    /// Accept any credentials (default: false)
    pub test_mode: bool,

    /// system_id reported in bind responses (default: "SMSC")
    pub server_system_id: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            system_id: "smppclient1".to_string(),
            password: "password".to_string(),
            test_mode: false,
            server_system_id: "SMSC".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn new(system_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_server_system_id(mut self, server_system_id: impl Into<String>) -> Self {
        self.server_system_id = server_system_id.into();
        self
    }
}

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a fresh connection may take to bind (default: 10 seconds)
    pub bind_timeout: Duration,

    /// Ceiling for handling one inbound request (default: 30 seconds)
    pub request_timeout: Duration,

    /// Ceiling for one socket write (default: 10 seconds)
    pub write_timeout: Duration,

    /// Outbound PDUs that may queue for one session (default: 20)
    pub window_size: usize,

    /// Concurrent connections per listening port (default: 10)
    pub max_connections: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            window_size: 20,
            max_connections: 10,
        }
    }
}

impl SessionConfig {
    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }
}

/// Event pipeline sizing and retry policy.
///
/// # Example
///
/// ```rust
/// use smsc_gateway::config::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig::default()
///     .with_queue_capacity(1_000)
///     .with_workers(4, 16)
///     .with_retries(true)
///     .with_monitor_interval(Duration::from_secs(30));
/// assert_eq!(config.max_workers, 16);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Units that may wait for a worker (default: 10,000)
    pub queue_capacity: usize,

    /// Workers kept running for the pipeline's lifetime (default: 4)
    pub core_workers: usize,

    /// Upper bound on workers, core included (default: 8)
    ///
    /// Workers above the core count are only started when the queue is full.
    pub max_workers: usize,

    /// Idle time after which an extra worker retires (default: 60 seconds)
    pub keep_alive: Duration,

    /// Workers serving rejected units when retries are on (default: 2)
    pub alternate_workers: usize,

    /// Resubmit rejected units to the alternate pool (default: false)
    pub enable_retries: bool,

    /// Tasks relaying completed events downstream (default: 1)
    pub consumers: usize,

    /// Period of the health log line (default: 60 seconds)
    pub monitor_interval: Duration,

    /// Wait for in-flight units at shutdown before aborting them (default: 5 seconds)
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            core_workers: 4,
            max_workers: 8,
            keep_alive: Duration::from_secs(60),
            alternate_workers: 2,
            enable_retries: false,
            consumers: 1,
            monitor_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets core and max worker counts; max is raised to core if lower.
    pub fn with_workers(mut self, core: usize, max: usize) -> Self {
        self.core_workers = core.max(1);
        self.max_workers = max.max(self.core_workers);
        self
    }

    /// Applies the same floors as the builders to values set directly on the
    /// public fields.
    pub(crate) fn normalized(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(1);
        self.core_workers = self.core_workers.max(1);
        self.max_workers = self.max_workers.max(self.core_workers);
        self.alternate_workers = self.alternate_workers.max(1);
        self.consumers = self.consumers.max(1);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_alternate_workers(mut self, workers: usize) -> Self {
        self.alternate_workers = workers.max(1);
        self
    }

    pub fn with_retries(mut self, enable: bool) -> Self {
        self.enable_retries = enable;
        self
    }

    pub fn with_consumers(mut self, consumers: usize) -> Self {
        self.consumers = consumers.max(1);
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Delivery receipt timing.
///
/// A receipt fires `min_delay + uniform(0..=delta)` after the submission
/// was accepted.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed part of the receipt delay (default: 5 seconds)
    pub min_delay: Duration,

    /// Width of the random jitter added on top (default: 5 seconds)
    pub delta: Duration,

    /// Time allowed for a PDU to enter a session's outbound window (default: 10 seconds)
    pub send_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(5000),
            delta: Duration::from_millis(5000),
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    pub fn new(min_delay: Duration, delta: Duration) -> Self {
        Self {
            min_delay,
            delta,
            ..Self::default()
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageIdConfig {
    /// Last id considered issued; the first submission gets `initial + 1`
    pub initial: u64,
}

/// Everything a [`Gateway`](crate::server::Gateway) needs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Ports to listen on, one listener each
    pub ports: Vec<u16>,

    /// Interface the listeners bind to (default: 0.0.0.0)
    pub host: String,

    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
    pub message_id: MessageIdConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ports: vec![2775],
            host: "0.0.0.0".to_string(),
            auth: AuthConfig::default(),
            session: SessionConfig::default(),
            pipeline: PipelineConfig::default(),
            scheduler: SchedulerConfig::default(),
            message_id: MessageIdConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_initial_message_id(mut self, initial: u64) -> Self {
        self.message_id.initial = initial;
        self
    }
}

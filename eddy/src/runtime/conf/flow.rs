use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{flow::FlowState, runtime::conf::conf_serde::duration};

/// Flow table sizing and expiry settings.
///
/// Idle timeouts are measured in packet time: a flow expires when the newest
/// packet timestamp seen by any worker is more than the timeout past the
/// flow's last packet. Replaying an old capture therefore expires flows the
/// same way live traffic would.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowConf {
    /// Number of flow slots. When every slot is in use, packets of unknown
    /// flows are dropped.
    /// - Default Value: `65536`
    #[serde(default = "defaults::max_flows")]
    pub max_flows: usize,

    /// How often the flow manager scans the active queues.
    /// - Default Value: `1s`
    #[serde(default = "defaults::manager_interval", with = "duration")]
    pub manager_interval: Duration,

    /// Idle timeout of flows that have only seen traffic in one direction.
    /// - Default Value: `30s`
    #[serde(default = "defaults::new_timeout", with = "duration")]
    pub new_timeout: Duration,

    /// Idle timeout of flows that have seen traffic in both directions.
    /// - Default Value: `300s`
    #[serde(default = "defaults::established_timeout", with = "duration")]
    pub established_timeout: Duration,

    /// Idle timeout of TCP flows after a FIN or RST.
    /// - Default Value: `10s`
    #[serde(default = "defaults::closed_timeout", with = "duration")]
    pub closed_timeout: Duration,

    /// How long a worker waits for the manager to free a slot when the flow
    /// table is full before dropping the packet.
    /// - Default Value: `100ms`
    #[serde(default = "defaults::wait_timeout", with = "duration")]
    pub wait_timeout: Duration,
}

impl FlowConf {
    pub fn timeout_for(&self, state: FlowState) -> Duration {
        match state {
            FlowState::New => self.new_timeout,
            FlowState::Established => self.established_timeout,
            FlowState::Closed => self.closed_timeout,
        }
    }
}

impl Default for FlowConf {
    fn default() -> FlowConf {
        FlowConf {
            max_flows: defaults::max_flows(),
            manager_interval: defaults::manager_interval(),
            new_timeout: defaults::new_timeout(),
            established_timeout: defaults::established_timeout(),
            closed_timeout: defaults::closed_timeout(),
            wait_timeout: defaults::wait_timeout(),
        }
    }
}

mod defaults {
    use std::time::Duration;

    pub fn max_flows() -> usize {
        65536
    }
    pub fn manager_interval() -> Duration {
        Duration::from_secs(1)
    }
    pub fn new_timeout() -> Duration {
        Duration::from_secs(30)
    }
    pub fn established_timeout() -> Duration {
        Duration::from_secs(300)
    }
    pub fn closed_timeout() -> Duration {
        Duration::from_secs(10)
    }
    pub fn wait_timeout() -> Duration {
        Duration::from_millis(100)
    }
}

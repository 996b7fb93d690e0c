use std::sync::Arc;

use crossbeam::channel::Receiver;
use tracing::{debug, info, warn};

use crate::{
    engine::{EngineStats, FlowEngine},
    exporters::FlowExporter,
    flow::{ReleaseReason, ReleasedFlow},
    runtime::conf::flow::FlowConf,
};

/// Outcome of one pass over the active queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    /// Flows skipped because a worker held their payload lock.
    pub busy: usize,
    pub released: usize,
}

/// Ages out idle flows and returns their slots to the spare queue.
pub struct FlowManager {
    engine: Arc<FlowEngine>,
    conf: FlowConf,
    exporter: Arc<dyn FlowExporter>,
}

impl FlowManager {
    pub fn new(engine: Arc<FlowEngine>, conf: FlowConf, exporter: Arc<dyn FlowExporter>) -> Self {
        Self {
            engine,
            conf,
            exporter,
        }
    }

    /// Sweeps every `manager_interval`, or right away when a worker runs out
    /// of spare slots, until `shutdown` is disconnected. Then releases every
    /// remaining flow.
    pub fn run(self, shutdown: Receiver<()>, wake: Receiver<()>) {
        info!(
            event.name = "flow_manager.started",
            flow_manager.interval = %humantime::format_duration(self.conf.manager_interval),
            "flow manager started"
        );
        loop {
            crossbeam::select! {
                recv(shutdown) -> _ => break,
                recv(wake) -> _ => {
                    self.sweep(ReleaseReason::Timeout);
                }
                default(self.conf.manager_interval) => {
                    self.sweep(ReleaseReason::Timeout);
                }
            }
        }
        self.flush();
    }

    /// Releases every flow still tracked. Call only after the workers have
    /// stopped.
    pub fn flush(&self) {
        let stats = self.sweep(ReleaseReason::Shutdown);
        let remaining = self.engine.tracked();
        let bound = self.engine.pool.active_count();
        if remaining != 0 || bound != 0 {
            warn!(
                event.name = "flow_manager.flush_incomplete",
                flows.remaining = remaining,
                flows.bound = bound,
                "flows still tracked after the shutdown flush"
            );
        }
        if let Err(e) = self.exporter.shutdown() {
            warn!(
                event.name = "flow_manager.exporter_shutdown_failed",
                error = %e,
                "flow exporter failed to shut down"
            );
        }
        info!(
            event.name = "flow_manager.stopped",
            flows.flushed = stats.released,
            "flow manager stopped"
        );
    }

    /// Visits each active queue once from the bottom. With
    /// [`ReleaseReason::Timeout`] only flows idle past their state's timeout
    /// are released; with [`ReleaseReason::Shutdown`] every flow is.
    ///
    /// The queue lock is held while a flow's payload is inspected, so the
    /// payload is only `try_lock`ed. Busy and live flows are rotated to the
    /// top so the next flow can be reached.
    pub fn sweep(&self, reason: ReleaseReason) -> SweepStats {
        let FlowEngine {
            pool,
            queues,
            clock,
            stats,
        } = &*self.engine;
        let now = clock.now();
        let mut sweep = SweepStats::default();
        let mut released = Vec::new();

        for (state, queue) in queues.active() {
            let timeout = self.conf.timeout_for(state);

            for _ in 0..queue.len() {
                let mut guard = queue.lock();
                let Some(flow) = guard.bottom() else {
                    break;
                };
                sweep.examined += 1;

                let Some(mut slot) = pool.try_lock(flow) else {
                    sweep.busy += 1;
                    guard.rotate();
                    continue;
                };
                if let Some(record) = slot.as_ref() {
                    debug_assert_eq!(record.state, state, "{flow} is queued under the wrong state");
                    if reason == ReleaseReason::Timeout && !record.is_idle(now, timeout) {
                        guard.rotate();
                        continue;
                    }
                }

                let record = slot.take();
                if let Some(record) = &record {
                    pool.unbind(&record.key(), flow);
                }
                guard.requeue(flow, &queues.spare);
                drop(slot);

                if let Some(record) = record {
                    released.push(ReleasedFlow { reason, record });
                }
            }
        }

        sweep.released = released.len();
        if sweep.released != 0 {
            queues.spare.notify_all();
        }
        let counter = match reason {
            ReleaseReason::Timeout => &stats.flows_timed_out,
            ReleaseReason::Shutdown => &stats.flows_flushed,
        };
        for flow in &released {
            EngineStats::incr(counter);
            self.exporter.export(flow);
        }

        debug!(
            event.name = "flow_manager.sweep",
            sweep.reason = ?reason,
            sweep.now = now.as_micros(),
            sweep.examined = sweep.examined,
            sweep.busy = sweep.busy,
            sweep.released = sweep.released,
            "flow queues swept"
        );
        sweep
    }
}

//! Thread layout of a replay.
//!
//! ```text
//! reader (caller thread) --bounded channel--> eddy-worker-N  --+
//!                                                              |  lifecycle queues
//!                                      eddy-flow-manager  <----+
//! ```
//!
//! Shutdown runs in dependency order: the packet channel is closed, workers
//! drain it and are joined, the manager is told to stop and flushes every
//! remaining flow, and only then are the queues destroyed.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Sender};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    engine::{EngineReport, FlowEngine},
    error::EngineError,
    exporters::FlowExporter,
    flow_manager::FlowManager,
    runtime::conf::Conf,
    source::{Packet, PacketSource, SourceError, SourceStats},
    worker::PacketWorker,
};

const MANAGER_THREAD_NAME: &str = "eddy-flow-manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub source_packets: u64,
    pub source_bytes: u64,
    #[serde(flatten)]
    pub engine: EngineReport,
}

/// Replays `source` through the flow engine until it is exhausted.
///
/// A source error still shuts everything down in order and flushes the
/// tracked flows before it is returned.
pub fn run<S: PacketSource>(
    source: &mut S,
    conf: &Conf,
    exporter: Arc<dyn FlowExporter>,
) -> Result<PipelineReport, EngineError> {
    let engine = Arc::new(FlowEngine::new(conf.flow.max_flows));
    let (packet_tx, packet_rx) = channel::bounded(conf.packet_channel_capacity);
    let (wake_tx, wake_rx) = channel::bounded(1);
    let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

    info!(
        event.name = "pipeline.started",
        pipeline.workers = conf.worker_count,
        flows.max = engine.pool.capacity(),
        "starting replay"
    );

    let mut failure: Option<EngineError> = None;

    let mut workers = Vec::with_capacity(conf.worker_count);
    for id in 0..conf.worker_count {
        let name = format!("eddy-worker-{id}");
        let worker = PacketWorker::new(id, engine.clone(), wake_tx.clone(), conf.flow.wait_timeout);
        let packets = packet_rx.clone();
        match thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run(packets))
        {
            Ok(handle) => workers.push((name, handle)),
            Err(source) => {
                failure = Some(EngineError::ThreadSpawn { name, source });
                break;
            }
        }
    }
    drop(packet_rx);

    let mut manager = None;
    if failure.is_none() {
        let flow_manager = FlowManager::new(engine.clone(), conf.flow.clone(), exporter.clone());
        match thread::Builder::new()
            .name(MANAGER_THREAD_NAME.to_string())
            .spawn(move || flow_manager.run(shutdown_rx, wake_rx))
        {
            Ok(handle) => manager = Some(handle),
            Err(source) => {
                failure = Some(EngineError::ThreadSpawn {
                    name: MANAGER_THREAD_NAME.to_string(),
                    source,
                });
            }
        }
    }

    if failure.is_none() {
        if let Err(e) = feed(source, &packet_tx) {
            error!(
                event.name = "pipeline.source_failed",
                error = %e,
                "packet source failed, shutting down"
            );
            failure = Some(EngineError::Source(e));
        }
    }

    drop(packet_tx);
    for (name, handle) in workers {
        record_join(name, handle, &mut failure);
    }

    drop(shutdown_tx);
    match manager {
        Some(handle) => record_join(MANAGER_THREAD_NAME.to_string(), handle, &mut failure),
        // Without a manager thread the flush still has to happen.
        None => FlowManager::new(engine.clone(), conf.flow.clone(), exporter).flush(),
    }
    drop(wake_tx);

    let source_stats: SourceStats = source.stats();
    let report = PipelineReport {
        source_packets: source_stats.packets,
        source_bytes: source_stats.bytes,
        engine: engine.stats.snapshot(),
    };

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.queues.destroy(),
        Err(_) => warn!(
            event.name = "pipeline.engine_still_shared",
            "flow engine still referenced after shutdown, queues not destroyed"
        ),
    }

    match failure {
        Some(e) => Err(e),
        None => {
            info!(
                event.name = "pipeline.finished",
                packets = report.engine.packets,
                flows.created = report.engine.flows_created,
                flows.timed_out = report.engine.flows_timed_out,
                flows.flushed = report.engine.flows_flushed,
                "replay finished"
            );
            Ok(report)
        }
    }
}

/// Pulls packets from `source` into the worker channel until end of input.
fn feed<S: PacketSource>(source: &mut S, packets: &Sender<Packet>) -> Result<(), SourceError> {
    while let Some(packet) = source.next_packet()? {
        if packets.send(packet).is_err() {
            // Every worker is gone; the join below reports why.
            break;
        }
    }
    Ok(())
}

fn record_join(name: String, handle: JoinHandle<()>, failure: &mut Option<EngineError>) {
    if handle.join().is_err() {
        error!(
            event.name = "pipeline.thread_panicked",
            thread.name = %name,
            "thread panicked"
        );
        failure.get_or_insert(EngineError::ThreadPanic { name });
    }
}

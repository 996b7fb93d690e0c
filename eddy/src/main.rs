mod engine;
mod error;
mod exporters;
mod flow;
mod flow_manager;
mod packet;
mod pipeline;
mod runtime;
mod source;
mod worker;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::{
    error::EngineError,
    exporters::create_exporter,
    runtime::{cli::Cli, conf::Conf, logging::init_logging},
    source::erf::ErfFileSource,
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let conf = Conf::new(&cli).map_err(EngineError::from)?;
    init_logging(conf.log_level);

    info!(
        event.name = "eddy.starting",
        config.path = ?conf.config_path,
        workers = conf.worker_count,
        flow.max_flows = conf.flow.max_flows,
        "eddy starting"
    );

    let input = conf.input.as_deref().ok_or(EngineError::NoInput)?;
    let mut source = ErfFileSource::open(input).map_err(EngineError::from)?;
    let exporter = Arc::from(create_exporter(&conf.exporter));

    let report = pipeline::run(&mut source, &conf, exporter)?;
    info!(
        event.name = "eddy.finished",
        source.packets = report.source_packets,
        source.bytes = report.source_bytes,
        packet.avg_len = report.engine.avg_packet_len,
        packet.max_len = report.engine.max_packet_len,
        undecodable = report.engine.undecodable,
        table_full_drops = report.engine.table_full_drops,
        source.skipped = source.skipped(),
        "eddy finished"
    );
    Ok(())
}

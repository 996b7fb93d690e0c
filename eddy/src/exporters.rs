use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{flow::ReleasedFlow, runtime::conf::ExporterConf};

pub mod stdout;
use stdout::StdoutExporter;

/// Receives every flow that leaves the flow table.
///
/// Called from the flow manager thread after the flow's slot has been
/// returned to the spare queue, so an exporter never holds up a worker.
pub trait FlowExporter: Send + Sync {
    fn export(&self, flow: &ReleasedFlow);

    /// Flushes anything buffered. Called once after the last export.
    fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    Json,
    #[default]
    JsonCompact,
    Pretty,
    Debug,
    None,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportFormat::Json => "json",
            ExportFormat::JsonCompact => "json-compact",
            ExportFormat::Pretty => "pretty",
            ExportFormat::Debug => "debug",
            ExportFormat::None => "none",
        };
        f.write_str(name)
    }
}

/// Discards every flow.
#[derive(Debug, Default)]
pub struct NullExporter;

impl FlowExporter for NullExporter {
    fn export(&self, _flow: &ReleasedFlow) {}
}

pub fn create_exporter(conf: &ExporterConf) -> Box<dyn FlowExporter> {
    info!(
        event.name = "exporter.created",
        exporter.format = %conf.format,
        "flow exporter configured"
    );
    match conf.format {
        ExportFormat::None => Box::new(NullExporter),
        format => Box::new(StdoutExporter::new(format)),
    }
}

use std::io::{self, Write};

use tracing::warn;

use crate::{
    exporters::{ExportFormat, FlowExporter},
    flow::ReleasedFlow,
};

/// Writes one rendered flow per export to standard output.
pub struct StdoutExporter {
    format: ExportFormat,
}

impl StdoutExporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    fn render(&self, flow: &ReleasedFlow) -> Result<String, serde_json::Error> {
        match self.format {
            ExportFormat::Json => serde_json::to_string_pretty(flow),
            ExportFormat::JsonCompact => serde_json::to_string(flow),
            ExportFormat::Pretty => Ok(format!("{flow:#?}")),
            ExportFormat::Debug | ExportFormat::None => Ok(format!("{flow:?}")),
        }
    }
}

impl FlowExporter for StdoutExporter {
    fn export(&self, flow: &ReleasedFlow) {
        let line = match self.render(flow) {
            Ok(line) => line,
            Err(e) => {
                warn!(
                    event.name = "exporter.stdout.serialize_failed",
                    error.message = %e,
                    "failed to serialize flow"
                );
                return;
            }
        };
        if let Err(e) = writeln!(io::stdout().lock(), "{line}") {
            warn!(
                event.name = "exporter.stdout.write_failed",
                error.message = %e,
                "failed to write flow to stdout"
            );
        }
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        io::stdout().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::{
        flow::{FlowRecord, ReleaseReason},
        packet::types::{FiveTuple, IpProto, ParsedPacket},
        source::Timestamp,
    };

    fn released() -> ReleasedFlow {
        let packet = ParsedPacket {
            five_tuple: FiveTuple {
                src_ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
                dst_ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)),
                src_port: 5000,
                dst_port: 53,
                protocol: IpProto::Udp,
            },
            tcp_flags: 0,
        };
        ReleasedFlow {
            reason: ReleaseReason::Shutdown,
            record: FlowRecord::new(&packet, Timestamp::new(7, 5), 90),
        }
    }

    #[test]
    fn test_json_compact_is_single_line() {
        let line = StdoutExporter::new(ExportFormat::JsonCompact)
            .render(&released())
            .unwrap();

        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["reason"], "shutdown");
        assert_eq!(value["tuple"]["dst_port"], 53);
        assert_eq!(value["first_seen"]["sec"], 7);
        assert_eq!(value["bytes_toserver"], 90);
    }

    #[test]
    fn test_json_pretty_spans_lines() {
        let text = StdoutExporter::new(ExportFormat::Json)
            .render(&released())
            .unwrap();
        assert!(text.lines().count() > 1);
        assert!(serde_json::from_str::<serde_json::Value>(&text).is_ok());
    }

    #[test]
    fn test_debug_formats() {
        let flow = released();
        let debug = StdoutExporter::new(ExportFormat::Debug).render(&flow).unwrap();
        let pretty = StdoutExporter::new(ExportFormat::Pretty).render(&flow).unwrap();

        assert!(debug.starts_with("ReleasedFlow {"));
        assert!(!debug.contains('\n'));
        assert!(pretty.contains("reason: Shutdown"));
    }
}

//! Plain-text report lines written to stdout.
//!
//! Every numeric line uses fixed `name=value` labels. Lines that end in a
//! comma-space keep it; existing log scrapers split on ", " and depend on the
//! trailing separator. Values that are unavailable print as `-1`.

use std::fmt::Display;
use std::io::{self, Write};
use std::net::SocketAddr;

use crate::affinity::CoreProbe;
use crate::histogram::Histogram;
use crate::jitter::JitterStats;
use crate::metrics::{ReceiveCounts, SendMetrics};

/// Printed in place of a value that could not be computed
pub const UNAVAILABLE: i64 = -1;

fn or_unavailable(value: Option<u64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => UNAVAILABLE.to_string(),
    }
}

fn source_label(source: Option<SocketAddr>) -> String {
    source.map_or_else(|| "local".to_string(), |addr| addr.to_string())
}

/// Ordered `name=value` pairs echoed before a run starts
#[derive(Debug, Default, Clone)]
pub struct ParamLine {
    fields: Vec<(&'static str, String)>,
}

impl ParamLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &'static str, value: impl Display) -> Self {
        self.fields.push((name, value.to_string()));
        self
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (name, value) in &self.fields {
            write!(out, "{name}={value}, ")?;
        }
        writeln!(out)
    }
}

/// Bucket counts, then the summary, mean and percentile lines
pub fn write_histogram<W: Write>(out: &mut W, histogram: &Histogram) -> io::Result<()> {
    for count in histogram.buckets() {
        writeln!(out, "{count}")?;
    }

    let summary = histogram.summary();
    writeln!(
        out,
        "o_histogram={}, hist_overflows={}, hist_min_sample={}, hist_max_sample={},",
        histogram.spec(),
        summary.overflow_count,
        or_unavailable(summary.min_ns),
        or_unavailable(summary.max_ns),
    )?;
    writeln!(
        out,
        "hist_num_samples={}, average_sample={},",
        summary.sample_count,
        or_unavailable(summary.mean_ns),
    )?;

    let percentiles: Vec<String> = summary
        .percentiles
        .iter()
        .map(|p| format!("{}={}", p.percentile, or_unavailable(p.value_ns)))
        .collect();
    writeln!(out, "Percentiles: {}", percentiles.join(", "))
}

pub fn write_send_metrics<W: Write>(out: &mut W, metrics: &SendMetrics) -> io::Result<()> {
    writeln!(
        out,
        "actual_sends={}, duration_ns={}, result_rate={:.6}, global_max_tight_sends={}, max_flight_size={}",
        metrics.actual_sends,
        metrics.duration_ns,
        metrics.result_rate,
        metrics.max_tight_sends,
        metrics.max_flight_size,
    )
}

pub fn write_receive_counts<W: Write>(out: &mut W, counts: &ReceiveCounts) -> io::Result<()> {
    writeln!(
        out,
        "Rcv: num_rcv_msgs={}, num_rx_msgs={}, num_unrec_loss={}, ",
        counts.num_rcv_msgs, counts.num_rx_msgs, counts.num_unrec_loss,
    )
}

pub fn write_jitter_stats<W: Write>(out: &mut W, stats: &JitterStats) -> io::Result<()> {
    writeln!(
        out,
        "ts_min_ns={}, ts_max_ns={}, ",
        or_unavailable(stats.ts_min_ns),
        or_unavailable(stats.ts_max_ns),
    )
}

pub fn write_core_probe<W: Write>(out: &mut W, probe: &CoreProbe) -> io::Result<()> {
    writeln!(out, "cpu={}, num_sends={}", probe.core, probe.sends)
}

pub fn write_begin_of_stream<W: Write>(out: &mut W, source: Option<SocketAddr>) -> io::Result<()> {
    writeln!(out, "rcv event BOS, source={}, ", source_label(source))
}

pub fn write_end_of_stream<W: Write>(
    out: &mut W,
    source: Option<SocketAddr>,
    counts: &ReceiveCounts,
) -> io::Result<()> {
    writeln!(
        out,
        "rcv event EOS, source={}, num_rcv_msgs={}, num_rx_msgs={}, num_unrec_loss={}, ",
        source_label(source),
        counts.num_rcv_msgs,
        counts.num_rx_msgs,
        counts.num_unrec_loss,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_histogram_report() {
        let mut histogram = Histogram::new(10, 100).unwrap();
        for sample in [50, 150, 250, 950, 1500] {
            histogram.record(sample);
        }

        let text = render(|out| write_histogram(out, &histogram));
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 13);
        assert_eq!(&lines[..10], ["1", "1", "1", "0", "0", "0", "0", "0", "0", "1"]);
        assert_eq!(
            lines[10],
            "o_histogram=10,100, hist_overflows=1, hist_min_sample=50, hist_max_sample=1500,"
        );
        assert_eq!(lines[11], "hist_num_samples=5, average_sample=580,");
        assert_eq!(
            lines[12],
            "Percentiles: 90=-1, 99=-1, 99.9=-1, 99.99=-1, 99.999=-1"
        );
    }

    #[test]
    fn test_empty_histogram_uses_sentinel() {
        let histogram = Histogram::new(2, 10).unwrap();
        let text = render(|out| write_histogram(out, &histogram));

        assert!(text.contains("hist_min_sample=-1, hist_max_sample=-1,"));
        assert!(text.contains("hist_num_samples=0, average_sample=-1,"));
    }

    #[test]
    fn test_percentile_line_in_range() {
        let mut histogram = Histogram::new(100, 10).unwrap();
        for sample in 0..1000 {
            histogram.record(sample);
        }
        let text = render(|out| write_histogram(out, &histogram));
        assert!(text.ends_with("Percentiles: 90=910, 99=1000, 99.9=1000, 99.99=1000, 99.999=1000\n"));
    }

    #[test]
    fn test_param_line_keeps_trailing_separator() {
        let line = ParamLine::new()
            .field("o_rate", 1000)
            .field("o_histogram", "10,100");
        let text = render(|out| line.write_to(out));
        assert_eq!(text, "o_rate=1000, o_histogram=10,100, \n");
    }

    #[test]
    fn test_trailer_lines() {
        let metrics = SendMetrics::new(1001, 1_000_000_000, 2, 7);
        assert_eq!(
            render(|out| write_send_metrics(out, &metrics)),
            "actual_sends=1001, duration_ns=1000000000, result_rate=1000.000000, global_max_tight_sends=2, max_flight_size=7\n"
        );

        let counts = ReceiveCounts {
            num_rcv_msgs: 10,
            num_rx_msgs: 0,
            num_unrec_loss: 0,
            ..Default::default()
        };
        assert_eq!(
            render(|out| write_receive_counts(out, &counts)),
            "Rcv: num_rcv_msgs=10, num_rx_msgs=0, num_unrec_loss=0, \n"
        );

        let stats = JitterStats {
            ts_min_ns: Some(18),
            ts_max_ns: Some(4200),
        };
        assert_eq!(
            render(|out| write_jitter_stats(out, &stats)),
            "ts_min_ns=18, ts_max_ns=4200, \n"
        );

        let probe = CoreProbe { core: 3, sends: 812 };
        assert_eq!(
            render(|out| write_core_probe(out, &probe)),
            "cpu=3, num_sends=812\n"
        );
    }

    #[test]
    fn test_stream_event_lines() {
        let source: SocketAddr = "10.0.0.5:12000".parse().unwrap();
        assert_eq!(
            render(|out| write_begin_of_stream(out, Some(source))),
            "rcv event BOS, source=10.0.0.5:12000, \n"
        );
        assert_eq!(
            render(|out| write_end_of_stream(out, None, &ReceiveCounts::default())),
            "rcv event EOS, source=local, num_rcv_msgs=0, num_rx_msgs=0, num_unrec_loss=0, \n"
        );
    }
}

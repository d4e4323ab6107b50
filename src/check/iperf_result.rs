//! iperf3 JSON report (`iperf3 -J`) to [`CheckOutcome`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::CheckError;
use crate::settings::IperfMode;

const GIGA: f64 = 1_000_000_000.0;

/// Normalized result of one bandwidth check.
///
/// A failed run is always the all-zero record from [`CheckOutcome::failed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub succeeded: bool,
    pub sent_throughput_gbps: f64,
    pub received_throughput_gbps: f64,
    pub sent_bytes_gb: f64,
    pub received_bytes_gb: f64,
    pub retransmits: i64,
}

impl CheckOutcome {
    pub fn failed() -> Self {
        Self {
            succeeded: false,
            sent_throughput_gbps: 0.0,
            received_throughput_gbps: 0.0,
            sent_bytes_gb: 0.0,
            received_bytes_gb: 0.0,
            retransmits: 0,
        }
    }

    /// Value of the `iperf_result` field: 1 for success, 0 for failure.
    pub fn primary_value(&self) -> f64 {
        if self.succeeded { 1.0 } else { 0.0 }
    }

    /// Remaining fields keyed by their metric field names.
    pub fn extra_values(&self) -> Map<String, Value> {
        let mut values = Map::new();
        values.insert("sum_sent_bps".into(), Value::from(self.sent_throughput_gbps));
        values.insert("sum_rec_bps".into(), Value::from(self.received_throughput_gbps));
        values.insert("sum_sent_bytes".into(), Value::from(self.sent_bytes_gb));
        values.insert("sum_rec_bytes".into(), Value::from(self.received_bytes_gb));
        values.insert("sum_sent_retransmits".into(), Value::from(self.retransmits));
        values
    }
}

#[derive(Deserialize, Debug)]
struct IperfReport {
    start: Option<StartSection>,
    end: Option<EndSection>,
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StartSection {
    test_start: Option<TestStart>,
}

#[derive(Deserialize, Debug)]
struct TestStart {
    protocol: Option<String>,
}

#[derive(Deserialize, Debug)]
struct EndSection {
    sum_sent: Option<StreamSummary>,
    sum_received: Option<StreamSummary>,
}

#[derive(Deserialize, Debug)]
struct StreamSummary {
    bytes: Option<f64>,
    bits_per_second: Option<f64>,
    retransmits: Option<i64>,
}

/// Parses a TCP report.
pub fn parse(raw: &str) -> Result<CheckOutcome, CheckError> {
    parse_with_mode(raw, IperfMode::Tcp)
}

pub fn parse_with_mode(raw: &str, mode: IperfMode) -> Result<CheckOutcome, CheckError> {
    ensure_supported(mode)?;

    let report: IperfReport = serde_json::from_str(raw)
        .map_err(|e| CheckError::MalformedOutput(format!("invalid JSON: {e}")))?;

    if let Some(error) = report.error {
        return Err(CheckError::MalformedOutput(format!(
            "iperf3 reported an error: {error}"
        )));
    }

    let protocol = report
        .start
        .and_then(|start| start.test_start)
        .and_then(|test_start| test_start.protocol);
    if let Some(protocol) = protocol {
        if !protocol.eq_ignore_ascii_case("tcp") {
            return Err(CheckError::UnsupportedMode(protocol.to_ascii_lowercase()));
        }
    }

    let end = require(report.end, "end")?;
    let sent = require(end.sum_sent, "end.sum_sent")?;
    let received = require(end.sum_received, "end.sum_received")?;

    Ok(CheckOutcome {
        succeeded: true,
        sent_throughput_gbps: to_giga(require(
            sent.bits_per_second,
            "end.sum_sent.bits_per_second",
        )?),
        received_throughput_gbps: to_giga(require(
            received.bits_per_second,
            "end.sum_received.bits_per_second",
        )?),
        sent_bytes_gb: to_giga(require(sent.bytes, "end.sum_sent.bytes")?),
        received_bytes_gb: to_giga(require(received.bytes, "end.sum_received.bytes")?),
        retransmits: require(sent.retransmits, "end.sum_sent.retransmits")?,
    })
}

/// UDP reports carry jitter and loss instead of retransmits; not implemented.
pub fn ensure_supported(mode: IperfMode) -> Result<(), CheckError> {
    match mode {
        IperfMode::Tcp => Ok(()),
        IperfMode::Udp => Err(CheckError::UnsupportedMode(mode.to_string())),
    }
}

fn require<T>(value: Option<T>, path: &str) -> Result<T, CheckError> {
    value.ok_or_else(|| CheckError::MalformedOutput(format!("missing {path}")))
}

fn to_giga(value: f64) -> f64 {
    round2(value / GIGA)
}

// Correctly rounded through decimal formatting; `(x * 100.0).round()` drifts
// on values like 0.125.
fn round2(value: f64) -> f64 {
    format!("{value:.2}").parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(sent_bps: u64, sent_bytes: u64, retransmits: u64, rec_bps: u64, rec_bytes: u64) -> String {
        format!(
            r#"{{
                "start": {{
                    "connecting_to": {{"host": "192.168.5.109", "port": 5201}},
                    "test_start": {{"protocol": "TCP", "num_streams": 1, "duration": 10}}
                }},
                "intervals": [],
                "end": {{
                    "sum_sent": {{
                        "start": 0, "end": 10.0, "seconds": 10.0,
                        "bytes": {sent_bytes}, "bits_per_second": {sent_bps},
                        "retransmits": {retransmits}, "sender": true
                    }},
                    "sum_received": {{
                        "start": 0, "end": 10.0, "seconds": 10.0,
                        "bytes": {rec_bytes}, "bits_per_second": {rec_bps}, "sender": true
                    }},
                    "cpu_utilization_percent": {{"host_total": 3.1, "remote_total": 1.2}}
                }}
            }}"#
        )
    }

    #[test]
    fn test_parse_reference_report() {
        let raw = report(950_000_000, 118_750_000, 3, 940_000_000, 117_500_000);
        let outcome = parse(&raw).unwrap();
        assert_eq!(
            outcome,
            CheckOutcome {
                succeeded: true,
                sent_throughput_gbps: 0.95,
                received_throughput_gbps: 0.94,
                sent_bytes_gb: 0.12,
                received_bytes_gb: 0.12,
                retransmits: 3,
            }
        );
    }

    #[test]
    fn test_values_stay_within_a_hundredth() {
        let samples = [
            (9_412_345_678u64, 11_765_432_100u64),
            (1_234_567u64, 987_654u64),
            (25_000_000_000u64, 31_250_000_000u64),
            (0u64, 0u64),
        ];
        for (bps, bytes) in samples {
            let outcome = parse(&report(bps, bytes, 0, bps, bytes)).unwrap();
            assert!(outcome.succeeded);
            for (got, raw) in [
                (outcome.sent_throughput_gbps, bps),
                (outcome.received_throughput_gbps, bps),
                (outcome.sent_bytes_gb, bytes),
                (outcome.received_bytes_gb, bytes),
            ] {
                assert!((got - raw as f64 / 1e9).abs() <= 0.01, "{got} vs {raw}");
            }
        }
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.11875), 0.12);
        assert_eq!(round2(9.412345678), 9.41);
        assert_eq!(round2(2.675), 2.67);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_missing_sum_received() {
        let raw = r#"{"end": {"sum_sent": {"bytes": 1, "bits_per_second": 1, "retransmits": 0}}}"#;
        match parse(raw) {
            Err(CheckError::MalformedOutput(msg)) => assert_eq!(msg, "missing end.sum_received"),
            other => panic!("expected malformed output, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_nested_fields() {
        let raw = r#"{"end": {
            "sum_sent": {"bytes": 1, "bits_per_second": 1},
            "sum_received": {"bytes": 1, "bits_per_second": 1}
        }}"#;
        match parse(raw) {
            Err(CheckError::MalformedOutput(msg)) => {
                assert_eq!(msg, "missing end.sum_sent.retransmits")
            }
            other => panic!("expected malformed output, got {other:?}"),
        }

        assert!(matches!(parse("{}"), Err(CheckError::MalformedOutput(_))));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            parse("iperf3: error - unable to connect to server"),
            Err(CheckError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_error_report() {
        let raw = r#"{"start": {}, "intervals": [], "end": {}, "error": "unable to connect to server: Connection refused"}"#;
        match parse(raw) {
            Err(CheckError::MalformedOutput(msg)) => assert!(msg.contains("Connection refused")),
            other => panic!("expected malformed output, got {other:?}"),
        }
    }

    #[test]
    fn test_udp_is_unsupported() {
        let raw = report(1, 1, 0, 1, 1);
        assert!(matches!(
            parse_with_mode(&raw, IperfMode::Udp),
            Err(CheckError::UnsupportedMode(_))
        ));

        let udp_report = raw.replace("\"TCP\"", "\"UDP\"");
        match parse(&udp_report) {
            Err(CheckError::UnsupportedMode(mode)) => assert_eq!(mode, "udp"),
            other => panic!("expected unsupported mode, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_record_is_all_zero() {
        let failed = CheckOutcome::failed();
        assert!(!failed.succeeded);
        assert_eq!(failed.primary_value(), 0.0);
        let extra = failed.extra_values();
        assert_eq!(extra["sum_sent_bps"], Value::from(0.0));
        assert_eq!(extra["sum_rec_bps"], Value::from(0.0));
        assert_eq!(extra["sum_sent_bytes"], Value::from(0.0));
        assert_eq!(extra["sum_rec_bytes"], Value::from(0.0));
        assert_eq!(extra["sum_sent_retransmits"], Value::from(0));
    }
}

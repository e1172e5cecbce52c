mod common;

use common::{SharedBuffer, ScriptedReader, parse_rows};
use plc_logger_lib::clock::Clock;
use plc_logger_lib::{
    CsvSink, LoggerConfig, LoggerError, SampleAssembler, Session, StopReason, StopToken, TagSpec, TagValue, Trigger,
    WritePolicy,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Clock that advances a fixed step every time it is read.
struct SteppingClock {
    ticks: Arc<AtomicU64>,
    step: Duration,
}

impl Clock for SteppingClock {
    fn now(&self) -> Duration {
        let n = self.ticks.fetch_add(1, Ordering::SeqCst);
        self.step * n as u32
    }
}

fn change_config(print_timestamp: bool) -> LoggerConfig {
    let text = format!(
        r#"{{
            "ip": "10.0.0.5",
            "tags": ["Count", "Label"],
            "headers": ["count", "label"],
            "trigger_type": "change",
            "trigger_tag": "Trig",
            "print_timestamp": {print_timestamp}
        }}"#
    );
    LoggerConfig::from_json_str(&text).unwrap()
}

#[tokio::test]
async fn header_written_once_before_rows_and_interrupt_closes_sink_once() {
    let cfg = change_config(false);
    let stop = StopToken::new();
    let buffer = SharedBuffer::new();

    // Reads per iteration: Trig, then Count + Label when it fires.
    // seed(1) + [Trig f] + [Trig t, Count, Label] + [Trig t, Count, Label] = 8
    let reader = ScriptedReader::new()
        .with_values("Trig", [1, 1, 2, 3].map(TagValue::Int))
        .with_values("Count", [10, 20].map(TagValue::Int))
        .with_value("Label", TagValue::Text("a,b".into()))
        .stop_after(8, stop.clone());
    let closed = reader.closed.clone();

    let session = Session::new(
        reader,
        Trigger::from_config(&cfg).unwrap(),
        SampleAssembler::from_config(&cfg),
        CsvSink::from_writer("run.csv", buffer.writer()),
        stop.clone(),
    );
    let report = session.run().await.unwrap();

    assert_eq!(report.reason, StopReason::Interrupt);
    assert_eq!(report.samples, 2);
    assert_eq!(report.output.to_str(), Some("run.csv"));
    assert_eq!(buffer.drop_count(), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let rows = parse_rows(&buffer.contents());
    assert_eq!(
        rows,
        vec![
            vec!["count".to_string(), "label".to_string()],
            vec!["10".to_string(), "a,b".to_string()],
            vec!["20".to_string(), "a,b".to_string()],
        ]
    );
    assert!(buffer.contents().contains("|a,b|"));
}

#[tokio::test]
async fn failed_read_ends_session_after_cleanup() {
    let cfg = change_config(true);
    let buffer = SharedBuffer::new();
    let reader = ScriptedReader::new()
        .with_values("Trig", [1, 2].map(TagValue::Int))
        .with_value("Count", TagValue::Int(5))
        .failing("Label");
    let closed = reader.closed.clone();
    let log = reader.log.clone();

    let session = Session::new(
        reader,
        Trigger::from_config(&cfg).unwrap(),
        SampleAssembler::from_config(&cfg),
        CsvSink::from_writer("run.csv", buffer.writer()),
        StopToken::new(),
    );
    let err = session.run().await.unwrap_err();

    assert!(matches!(err, LoggerError::TagRead { ref tag, .. } if tag == "Label"));
    assert_eq!(buffer.drop_count(), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    // Only the header made it to the file.
    assert_eq!(parse_rows(&buffer.contents()), vec![vec!["Timestamp", "count", "label"]]);
    assert_eq!(log.lock().unwrap().as_slice(), ["Trig", "Trig", "Count", "Label"]);
}

#[tokio::test]
async fn stop_before_first_iteration_still_writes_header() {
    let cfg = change_config(false);
    let stop = StopToken::new();
    stop.cancel(StopReason::QuitKey);
    let buffer = SharedBuffer::new();
    let reader = ScriptedReader::new().with_value("Trig", TagValue::Int(0));

    let report = Session::new(
        reader,
        Trigger::from_config(&cfg).unwrap(),
        SampleAssembler::from_config(&cfg),
        CsvSink::from_writer("run.csv", buffer.writer()),
        stop,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.reason, StopReason::QuitKey);
    assert_eq!(report.samples, 0);
    assert_eq!(buffer.contents(), "count,label\r\n");
}

#[tokio::test]
async fn periodic_session_with_live_policy_persists_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("periodic.csv");
    let stop = StopToken::new();
    let tags = vec![TagSpec::scalar("Count")];

    // Clock steps 0.4s per check with a 1s period: fires at 0.0, 1.2, 2.4.
    // Stop lands on the third sample's read.
    let reader = ScriptedReader::new()
        .with_values("Count", [1, 2, 3].map(TagValue::Int))
        .stop_after(3, stop.clone());
    let clock = SteppingClock {
        ticks: Arc::new(AtomicU64::new(0)),
        step: Duration::from_millis(400),
    };

    let report = Session::new(
        reader,
        Trigger::Periodic(plc_logger_lib::trigger::PeriodicTrigger::new(Duration::from_secs(1))),
        SampleAssembler::new(tags, vec!["count".to_string()], false),
        CsvSink::open(&path, WritePolicy::Live).unwrap(),
        stop,
    )
    .with_clock(clock)
    .run()
    .await
    .unwrap();

    assert_eq!(report.samples, 3);
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(parse_rows(&text), vec![vec!["count"], vec!["1"], vec!["2"], vec!["3"]]);
}

#[tokio::test]
async fn batched_file_sink_appends_to_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batched.csv");
    std::fs::write(&path, "earlier\r\n").unwrap();

    let mut sink = CsvSink::open(&path, WritePolicy::Batched).unwrap();
    assert_eq!(sink.policy(), WritePolicy::Batched);
    sink.write_header(&["x".to_string()]).unwrap();
    sink.close().unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\r\nx\r\n");
}

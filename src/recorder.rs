use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use std::time::{Duration, SystemTime};

/// Persists per-step summaries and free-form annotations.
///
/// Implementations may stream each record immediately or buffer everything
/// until `flush`; the controllers call `flush` exactly once, after the last
/// record of a successful run.
pub trait ResultRecorder: Send {
    fn record(
        &mut self,
        client_count: usize,
        limit_percentile: u8,
        rtt_percentile: Duration,
        rtt_min: Duration,
        rtt_median: Duration,
        rtt_max: Duration,
    ) -> Result<()>;

    fn message(&mut self, msg: &str);

    fn flush(&mut self) -> Result<()>;
}

/// Rounds half-up to whole milliseconds.
pub fn round_to_ms(d: Duration) -> u64 {
    (d + Duration::from_micros(500)).as_millis() as u64
}

fn rfc3339_now() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}

#[derive(Debug, Serialize)]
struct StepRecord {
    time: String,
    clients: usize,
    limit_per: u8,
    #[serde(rename = "per-rtt")]
    per_rtt: u64,
    #[serde(rename = "min-rtt")]
    min_rtt: u64,
    #[serde(rename = "median-rtt")]
    median_rtt: u64,
    #[serde(rename = "max-rtt")]
    max_rtt: u64,
}

/// Buffers all steps and messages and emits one JSON object at flush.
pub struct JsonResultRecorder<W: Write> {
    w: W,
    steps: Vec<StepRecord>,
    messages: Vec<String>,
}

impl<W: Write> JsonResultRecorder<W> {
    pub fn new(w: W) -> Self {
        JsonResultRecorder {
            w,
            steps: Vec::new(),
            messages: Vec::new(),
        }
    }
}

impl<W: Write + Send> ResultRecorder for JsonResultRecorder<W> {
    fn record(
        &mut self,
        client_count: usize,
        limit_percentile: u8,
        rtt_percentile: Duration,
        rtt_min: Duration,
        rtt_median: Duration,
        rtt_max: Duration,
    ) -> Result<()> {
        self.steps.push(StepRecord {
            time: rfc3339_now(),
            clients: client_count,
            limit_per: limit_percentile,
            per_rtt: round_to_ms(rtt_percentile),
            min_rtt: round_to_ms(rtt_min),
            median_rtt: round_to_ms(rtt_median),
            max_rtt: round_to_ms(rtt_max),
        });
        Ok(())
    }

    fn message(&mut self, msg: &str) {
        self.messages.push(msg.to_string());
    }

    fn flush(&mut self) -> Result<()> {
        #[derive(Serialize)]
        struct Run<'a> {
            steps: &'a [StepRecord],
            messages: &'a [String],
        }

        serde_json::to_writer(
            &mut self.w,
            &Run {
                steps: &self.steps,
                messages: &self.messages,
            },
        )?;
        self.w.flush()?;
        Ok(())
    }
}

/// Writes one line per step as soon as the step completes.
pub struct TextResultRecorder<W: Write> {
    w: W,
}

impl<W: Write> TextResultRecorder<W> {
    pub fn new(w: W) -> Self {
        TextResultRecorder { w }
    }
}

impl<W: Write + Send> ResultRecorder for TextResultRecorder<W> {
    fn record(
        &mut self,
        client_count: usize,
        limit_percentile: u8,
        rtt_percentile: Duration,
        rtt_min: Duration,
        rtt_median: Duration,
        rtt_max: Duration,
    ) -> Result<()> {
        writeln!(
            self.w,
            "[{}] clients: {:5}    {}per-rtt: {:3}ms    min-rtt: {:3}ms    median-rtt: {:3}ms    max-rtt: {:3}ms",
            rfc3339_now(),
            client_count,
            limit_percentile,
            round_to_ms(rtt_percentile),
            round_to_ms(rtt_min),
            round_to_ms(rtt_median),
            round_to_ms(rtt_max),
        )?;
        Ok(())
    }

    fn message(&mut self, msg: &str) {
        let _ = writeln!(self.w, "{msg}");
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

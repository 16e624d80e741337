//! Bench scenarios
//!
//! A scenario composes the database, the codec and a bus channel into one
//! test: inject fixed values, watch a response, assert or just report.
//! Scenario descriptions deserialize straight from a scenario file.
//!
//! Report lines (`[0x50B] VCU_LaunchControl_SlipRatioScaled = 12`, `PASS ...`)
//! go to the runner's output sink, stdout unless replaced.

use crate::bus::{BusChannel, ChannelGuard};
use crate::codec::FrameCodec;
use crate::config::{self, TransceiverConfig};
use crate::signals::database::{MessageDefinition, SignalDatabase};
use crate::transceiver::{CancelToken, RunReport, ScheduledTransceiver};
use crate::types::{Frame, HarnessError, Result, SignalValue};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Pack words big-endian, two bytes each (`>HHHH` for four wheel speeds)
pub fn pack_be_u16(words: &[u16]) -> Vec<u8> {
    let mut data = vec![0u8; words.len() * 2];
    BigEndian::write_u16_into(words, &mut data);
    data
}

/// A DBC message plus the physical values to encode into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageValues {
    pub message: String,
    #[serde(default)]
    pub signals: BTreeMap<String, f64>,
}

impl MessageValues {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            signals: BTreeMap::new(),
        }
    }

    /// Builder method: set one signal value
    pub fn with(mut self, signal: impl Into<String>, value: f64) -> Self {
        self.signals.insert(signal.into(), value);
        self
    }

    fn encode(&self, db: &SignalDatabase) -> Result<Frame> {
        let message = db.message_by_name(&self.message)?;
        FrameCodec::encode_values(message, &self.signals)
    }
}

/// A frame that bypasses the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub id: u32,
    #[serde(default)]
    pub extended: bool,
    /// Payload bytes
    #[serde(default)]
    pub data: Vec<u8>,
    /// Payload as big-endian 16-bit words, alternative to `data`
    #[serde(default)]
    pub be_u16: Vec<u16>,
}

impl RawFrame {
    pub fn to_frame(&self) -> Result<Frame> {
        let data = match (self.data.is_empty(), self.be_u16.is_empty()) {
            (_, true) => self.data.clone(),
            (true, false) => pack_be_u16(&self.be_u16),
            (false, false) => {
                return Err(HarnessError::InvalidConfig(format!(
                    "raw frame 0x{:X} sets both data and be_u16",
                    self.id
                )))
            }
        };
        let frame = Frame {
            id: self.id,
            is_extended: self.extended,
            data,
        };
        frame.validate()?;
        Ok(frame)
    }
}

/// One frame sent on every injection tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InjectFrame {
    Encoded(MessageValues),
    Raw(RawFrame),
}

impl InjectFrame {
    fn to_frame(&self, db: &SignalDatabase) -> Result<Frame> {
        match self {
            InjectFrame::Encoded(values) => values.encode(db),
            InjectFrame::Raw(raw) => raw.to_frame(),
        }
    }
}

/// Message whose signals are reported while injecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSpec {
    pub message: String,
    pub signals: Vec<String>,
}

fn default_response_timeout() -> f64 {
    0.2
}

fn default_poll() -> f64 {
    0.02
}

fn default_recv_timeout() -> f64 {
    0.001
}

fn default_listen_timeout() -> f64 {
    1.0
}

fn default_burst_count() -> usize {
    10
}

fn default_burst_interval() -> f64 {
    0.1
}

/// Send one request, wait for one response, check one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResponseScenario {
    pub name: String,
    pub request: MessageValues,
    /// Name of the response message
    pub response: String,
    /// Signal of the response to check
    pub signal: String,
    pub expected: f64,
    /// Accepted deviation for scaled signals; half a raw step when unset
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default = "default_response_timeout")]
    pub timeout_s: f64,
    #[serde(default = "default_poll")]
    pub poll_s: f64,
}

/// Inject fixed frames periodically and report a watched message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionScenario {
    pub name: String,
    pub period_s: f64,
    pub duration_s: f64,
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_s: f64,
    pub inject: Vec<InjectFrame>,
    #[serde(default)]
    pub watch: Option<WatchSpec>,
}

/// Send one raw frame repeatedly, then dump whatever comes back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstScenario {
    #[serde(default = "BurstScenario::default_name")]
    pub name: String,
    pub id: u32,
    #[serde(default)]
    pub extended: bool,
    pub data: Vec<u8>,
    #[serde(default = "default_burst_count")]
    pub count: usize,
    #[serde(default = "default_burst_interval")]
    pub interval_s: f64,
    #[serde(default)]
    pub listen_count: usize,
    #[serde(default = "default_listen_timeout")]
    pub listen_timeout_s: f64,
}

impl BurstScenario {
    fn default_name() -> String {
        "burst".to_string()
    }
}

/// Print every received frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorScenario {
    #[serde(default = "MonitorScenario::default_name")]
    pub name: String,
    #[serde(default = "default_listen_timeout")]
    pub recv_timeout_s: f64,
    /// Stop after this many seconds; run until cancelled when unset
    #[serde(default)]
    pub duration_s: Option<f64>,
}

impl MonitorScenario {
    fn default_name() -> String {
        "monitor".to_string()
    }
}

/// Any scenario, tagged by `kind` in scenario files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scenario {
    RequestResponse(RequestResponseScenario),
    Injection(InjectionScenario),
    Burst(BurstScenario),
    Monitor(MonitorScenario),
}

impl Scenario {
    pub fn name(&self) -> &str {
        match self {
            Scenario::RequestResponse(s) => &s.name,
            Scenario::Injection(s) => &s.name,
            Scenario::Burst(s) => &s.name,
            Scenario::Monitor(s) => &s.name,
        }
    }
}

/// How a scenario ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Passed,
    Failed {
        reason: String,
    },
    /// Observation only. `samples` counts reported frames; `last_values`
    /// holds the latest value of each watched signal.
    Observed {
        samples: usize,
        last_values: BTreeMap<String, SignalValue>,
    },
}

impl ScenarioOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ScenarioOutcome::Failed { .. })
    }
}

/// Result of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: ScenarioOutcome,
    pub run: RunReport,
}

type OutputSink<'a> = Box<dyn Fn(&str) + 'a>;

/// Runs scenarios against one signal database
pub struct ScenarioRunner<'a> {
    db: &'a SignalDatabase,
    cancel: CancelToken,
    output: OutputSink<'a>,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(db: &'a SignalDatabase) -> Self {
        Self {
            db,
            cancel: CancelToken::new(),
            output: Box::new(|line: &str| println!("{}", line)),
        }
    }

    /// Builder method: share a cancel token with every run
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Builder method: send report lines somewhere other than stdout
    pub fn with_output(mut self, output: impl Fn(&str) + 'a) -> Self {
        self.output = Box::new(output);
        self
    }

    fn report(&self, line: &str) {
        (self.output)(line);
    }

    /// Run any scenario; the channel is closed when this returns
    pub fn run<C: BusChannel>(&self, channel: C, scenario: &Scenario) -> Result<ScenarioReport> {
        log::info!("Running scenario '{}'", scenario.name());
        match scenario {
            Scenario::RequestResponse(s) => self.run_request_response(channel, s),
            Scenario::Injection(s) => self.run_injection(channel, s),
            Scenario::Burst(s) => self.run_burst(channel, s),
            Scenario::Monitor(s) => self.run_monitor(channel, s),
        }
    }

    /// Send the request once, then poll for the response until the timeout.
    ///
    /// Setup faults (unknown names, encode range) are errors. A missing or
    /// wrong response is a `Failed` outcome.
    pub fn run_request_response<C: BusChannel>(
        &self,
        channel: C,
        scenario: &RequestResponseScenario,
    ) -> Result<ScenarioReport> {
        if !(scenario.timeout_s > 0.0 && scenario.poll_s > 0.0) {
            return Err(HarnessError::InvalidConfig(format!(
                "scenario '{}': timeout and poll interval must be > 0 s",
                scenario.name
            )));
        }
        let request = scenario.request.encode(self.db)?;
        let response = self.db.message_by_name(&scenario.response)?;
        let checked = response
            .signal(&scenario.signal)
            .ok_or_else(|| HarnessError::UnknownSignal {
                message: response.name.clone(),
                signal: scenario.signal.clone(),
            })?;
        let tolerance = scenario.tolerance.unwrap_or(checked.factor.abs() / 2.0);
        let timeout = scenario_seconds(&scenario.name, "timeout", scenario.timeout_s)?;
        let poll = scenario_seconds(&scenario.name, "poll interval", scenario.poll_s)?;

        let mut channel = ChannelGuard::new(channel);
        let mut run = RunReport::default();
        let start = Instant::now();

        channel.send(&request)?;
        run.ticks = 1;
        run.frames_sent = 1;
        run.tick_offsets.push(Duration::ZERO);
        log::debug!("Request sent: {}", request);

        let deadline = config::deadline("timeout", start, timeout)?;
        let mut outcome = None;
        while outcome.is_none() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }
            let Some(frame) = channel.recv(poll.min(deadline - now))? else {
                continue;
            };
            run.frames_received += 1;
            if !is_message_frame(response, &frame) {
                continue;
            }

            let decoded = match FrameCodec::decode(response, &frame.data) {
                Ok(decoded) => decoded,
                Err(e) if e.is_per_frame() => {
                    run.frame_errors += 1;
                    log::warn!("Response 0x{:X} rejected: {}", frame.id, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            for signal in decoded.iter() {
                if let Some(line) = decoded.report_line(&signal.name) {
                    self.report(&line);
                }
            }

            outcome = Some(match decoded.get(&scenario.signal) {
                Some(value) if value.approx_eq(scenario.expected, tolerance) => ScenarioOutcome::Passed,
                Some(value) => ScenarioOutcome::Failed {
                    reason: format!(
                        "{} = {}, expected {}",
                        scenario.signal, value, scenario.expected
                    ),
                },
                None => ScenarioOutcome::Failed {
                    reason: format!("{} not present in response", scenario.signal),
                },
            });
        }
        run.elapsed = start.elapsed();

        let outcome = outcome.unwrap_or_else(|| ScenarioOutcome::Failed {
            reason: format!(
                "no {} (0x{:X}) within {} s",
                response.name, response.id, scenario.timeout_s
            ),
        });
        self.report_verdict(&scenario.name, &outcome);

        Ok(ScenarioReport {
            name: scenario.name.clone(),
            outcome,
            run,
        })
    }

    /// Pre-encode the injected frames, then hand them to the transceiver
    /// every tick while decoding the watched message.
    pub fn run_injection<C: BusChannel>(
        &self,
        channel: C,
        scenario: &InjectionScenario,
    ) -> Result<ScenarioReport> {
        let frames = scenario
            .inject
            .iter()
            .map(|inject| inject.to_frame(self.db))
            .collect::<Result<Vec<_>>>()?;

        let watched = match &scenario.watch {
            Some(watch) => Some(self.resolve_watch(watch)?),
            None => None,
        };

        let config = TransceiverConfig::new(scenario.period_s, scenario.duration_s)
            .with_recv_timeout(scenario.recv_timeout_s);
        let transceiver = ScheduledTransceiver::new(config)?.with_cancel_token(self.cancel.clone());

        let ids: Vec<String> = frames.iter().map(|f| format!("0x{:X}", f.id)).collect();
        self.report(&format!(
            "Injecting {} every {} s for {} s",
            ids.join(", "),
            scenario.period_s,
            scenario.duration_s
        ));
        if let Some((message, signals)) = &watched {
            self.report(&format!(
                "Waiting for {} on 0x{:X}...",
                signals.join(", "),
                message.id
            ));
        }

        let mut samples = 0;
        let mut last_values = BTreeMap::new();
        let run = transceiver.run(
            channel,
            || Ok(frames.clone()),
            |frame| {
                let Some((message, signals)) = &watched else {
                    return Ok(());
                };
                if !is_message_frame(message, frame) {
                    return Ok(());
                }
                let decoded = FrameCodec::decode(message, &frame.data)?;
                samples += 1;
                for name in signals {
                    if let (Some(line), Some(value)) = (decoded.report_line(name), decoded.get(name)) {
                        self.report(&line);
                        last_values.insert(name.clone(), *value);
                    }
                }
                Ok(())
            },
        )?;
        self.report("Done.");

        Ok(ScenarioReport {
            name: scenario.name.clone(),
            outcome: ScenarioOutcome::Observed {
                samples,
                last_values,
            },
            run,
        })
    }

    /// Send `count` copies of a raw frame, then print up to `listen_count`
    /// received frames.
    pub fn run_burst<C: BusChannel>(&self, channel: C, scenario: &BurstScenario) -> Result<ScenarioReport> {
        if !(scenario.interval_s >= 0.0 && scenario.listen_timeout_s >= 0.0) {
            return Err(HarnessError::InvalidConfig(format!(
                "scenario '{}': interval and listen timeout must be >= 0 s",
                scenario.name
            )));
        }
        let frame = Frame {
            id: scenario.id,
            is_extended: scenario.extended,
            data: scenario.data.clone(),
        };
        frame.validate()?;
        let interval = scenario_seconds(&scenario.name, "interval", scenario.interval_s)?;
        let listen_timeout = scenario_seconds(&scenario.name, "listen timeout", scenario.listen_timeout_s)?;

        let mut channel = ChannelGuard::new(channel);
        let mut run = RunReport::default();
        let start = Instant::now();

        for i in 0..scenario.count {
            if self.cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }
            channel.send(&frame)?;
            run.ticks += 1;
            run.frames_sent += 1;
            run.tick_offsets.push(start.elapsed());
            self.report(&format!("Sent {}", frame));
            if i + 1 < scenario.count {
                std::thread::sleep(interval);
            }
        }

        for _ in 0..scenario.listen_count {
            if run.cancelled || self.cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }
            if let Some(received) = channel.recv(listen_timeout)? {
                run.frames_received += 1;
                self.report(&received.to_string());
            }
        }
        run.elapsed = start.elapsed();

        Ok(ScenarioReport {
            name: scenario.name.clone(),
            outcome: ScenarioOutcome::Observed {
                samples: run.frames_received,
                last_values: BTreeMap::new(),
            },
            run,
        })
    }

    /// Print received frames until the duration ends or the token trips
    pub fn run_monitor<C: BusChannel>(&self, channel: C, scenario: &MonitorScenario) -> Result<ScenarioReport> {
        if !(scenario.recv_timeout_s > 0.0) {
            return Err(HarnessError::InvalidConfig(format!(
                "scenario '{}': receive timeout must be > 0 s",
                scenario.name
            )));
        }
        let deadline = match scenario.duration_s {
            Some(d) if d > 0.0 => {
                let span = scenario_seconds(&scenario.name, "duration", d)?;
                Some(config::deadline("duration", Instant::now(), span)?)
            }
            Some(d) => {
                return Err(HarnessError::InvalidConfig(format!(
                    "scenario '{}': duration must be > 0 s, got {}",
                    scenario.name, d
                )))
            }
            None => None,
        };
        let recv_timeout = scenario_seconds(&scenario.name, "receive timeout", scenario.recv_timeout_s)?;

        let mut channel = ChannelGuard::new(channel);
        let mut run = RunReport::default();
        let start = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }
            let timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    recv_timeout.min(deadline - now)
                }
                None => recv_timeout,
            };
            if let Some(frame) = channel.recv(timeout)? {
                run.frames_received += 1;
                self.report(&frame.to_string());
            }
        }
        run.elapsed = start.elapsed();

        Ok(ScenarioReport {
            name: scenario.name.clone(),
            outcome: ScenarioOutcome::Observed {
                samples: run.frames_received,
                last_values: BTreeMap::new(),
            },
            run,
        })
    }

    fn resolve_watch(&self, watch: &WatchSpec) -> Result<(&'a MessageDefinition, Vec<String>)> {
        let message = self.db.message_by_name(&watch.message)?;
        for name in &watch.signals {
            if message.signal(name).is_none() {
                return Err(HarnessError::UnknownSignal {
                    message: message.name.clone(),
                    signal: name.clone(),
                });
            }
        }
        Ok((message, watch.signals.clone()))
    }

    fn report_verdict(&self, name: &str, outcome: &ScenarioOutcome) {
        match outcome {
            ScenarioOutcome::Passed => self.report(&format!("PASS {}", name)),
            ScenarioOutcome::Failed { reason } => self.report(&format!("FAIL {}: {}", name, reason)),
            ScenarioOutcome::Observed { .. } => {}
        }
    }
}

fn scenario_seconds(scenario: &str, what: &str, secs: f64) -> Result<Duration> {
    config::seconds(&format!("scenario '{}': {}", scenario, what), secs)
}

fn is_message_frame(message: &MessageDefinition, frame: &Frame) -> bool {
    frame.id == message.id && frame.is_extended == message.is_extended
}

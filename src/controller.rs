use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{bounded, Receiver, SendTimeoutError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error, info, info_span, trace, warn, Span};

use crate::config::{ControllerConfig, OutputFormat};
use crate::control::{
    ConnectionType, ControlChannel, ControlRequest, GpsInfo, Group, RxDataSettings, RxSettings,
    RxStatus, Settings,
};
use crate::data::{DataChannel, Received};
use crate::error::{Error, Result};
use crate::lock;
use crate::sequence::{FrameSequenceTracker, SequenceGap, SequenceStatus};
use crate::timestamp::{MasterClock, Timestamp};
use crate::vita49::{decode_frames, decode_samples, ByteOrder, WIRE_FRAME_LEN};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceControllerState {
    Uninitialized,
    Configured,
    Enabled,
    Disabled,
    TornDown,
}

/// Tuning most recently accepted by the daemon.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TuningState {
    pub center_frequency: f64,
    pub sample_rate: f64,
    /// Not used by the device.
    pub bandwidth: Option<f64>,
    pub output_format: OutputFormat,
}

/// A block of samples returned by [DeviceController::pull_block].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    /// Interleaved I/Q samples.
    pub samples: Vec<i16>,
    pub timestamp: Timestamp,
    /// Tuning or format changed since the previous block.
    pub format_changed: bool,
    /// Frame sequence discontinuities detected in this block, VITA-49 mode only.
    pub gaps: Vec<SequenceGap>,
}

impl SampleBlock {
    /// Number of complex (I/Q) samples.
    #[must_use]
    pub fn complex_len(&self) -> usize {
        self.samples.len() / 2
    }
}

struct Status {
    state: DeviceControllerState,
    tuning: Option<TuningState>,
    master: Option<MasterClock>,
    output_format: OutputFormat,
    byte_order: ByteOrder,
    owns_data_socket: bool,
}

impl Status {
    fn transition(&mut self, to: DeviceControllerState) {
        if self.state != to {
            debug!(from = ?self.state, to = ?to, "state transition");
            self.state = to;
        }
    }
}

/// Client for a single AVS4000 receiver.
///
/// Lifecycle operations ([setup](Self::setup), [tune](Self::tune), [enable](Self::enable),
/// [disable](Self::disable), [teardown](Self::teardown)) are serialized on the control channel.
/// [pull_block](Self::pull_block) only touches the data channel so it can be called in a loop
/// from another thread, see [spawn_reader](Self::spawn_reader).
///
/// ```no_run
/// use avs4000::{ControllerConfig, DeviceController, OutputFormat};
///
/// let config = ControllerConfig::builder()
///     .device_number(1)
///     .output_format(OutputFormat::Vita49)
///     .build();
/// let controller = DeviceController::new(config).unwrap();
/// controller.setup().unwrap();
/// controller.tune(915e6, None, 2e6).unwrap();
/// controller.enable().unwrap();
/// if let Some(block) = controller.pull_block().unwrap() {
///     println!("{} samples at {:?}", block.complex_len(), block.timestamp);
/// }
/// controller.teardown().unwrap();
/// ```
pub struct DeviceController {
    device_number: u16,
    data_port: u16,
    /// Bytes per VITA-49 read, `frames_per_read` whole wire frames.
    vita49_read_len: usize,
    raw_read_len: usize,
    idle_interval: Duration,
    span: Span,
    control: Mutex<ControlChannel>,
    data: DataChannel,
    status: Mutex<Status>,
    tracker: Mutex<FrameSequenceTracker>,
    format_changed: AtomicBool,
}

impl DeviceController {
    /// # Errors
    /// [Error::Configuration] if `config` does not validate.
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let control_port = config.control_port()?;
        let data_port = config.data_port()?;
        let span = config
            .span
            .clone()
            .unwrap_or_else(|| info_span!("avs4000", device = config.device_number));
        let data_timeout = config.data_timeout();

        Ok(DeviceController {
            device_number: config.device_number,
            data_port,
            vita49_read_len: config.frames_per_read * WIRE_FRAME_LEN,
            raw_read_len: config.raw_read_len,
            idle_interval: data_timeout,
            span,
            control: Mutex::new(ControlChannel::new(
                config.host.clone(),
                control_port,
                config.control_timeout(),
            )),
            data: DataChannel::new(config.host.clone(), data_port, data_timeout),
            status: Mutex::new(Status {
                state: DeviceControllerState::Uninitialized,
                tuning: None,
                master: None,
                output_format: config.output_format,
                byte_order: config.byte_order,
                owns_data_socket: config.owns_data_socket,
            }),
            tracker: Mutex::new(FrameSequenceTracker::new()),
            format_changed: AtomicBool::new(false),
        })
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        lock(&self.status)
    }

    fn require_not_torn_down(&self) -> Result<()> {
        if self.state() == DeviceControllerState::TornDown {
            return Err(Error::Configuration("controller has been torn down".into()));
        }
        Ok(())
    }

    /// Connect the control channel and force the receiver idle, data stopped and the data
    /// connection disabled.
    ///
    /// # Errors
    /// [Error::Configuration] if enabled or torn down, otherwise any control channel error.
    pub fn setup(&self) -> Result<()> {
        let _enter = self.span.enter();
        let mut control = lock(&self.control);
        self.require_not_torn_down()?;
        if self.state() == DeviceControllerState::Enabled {
            return Err(Error::Configuration("disable() before setup()".into()));
        }

        control.connect()?;
        control.command(&set_rxdata(RxDataSettings::idle()))?;
        self.status().transition(DeviceControllerState::Configured);
        info!(port = control.port(), "device configured");
        Ok(())
    }

    /// Tune the receiver and configure its data connection for the current output format.
    ///
    /// On success the master clock is queried and cached, the frame sequence tracker reset and
    /// the format changed flag raised. `bandwidth` is recorded but not sent; the device does not
    /// support it.
    ///
    /// # Errors
    /// [Error::Configuration] if a parameter is negative or not finite, or if the controller is
    /// not configured or is enabled. Re-tuning requires [disable](Self::disable) first.
    /// Otherwise any control channel error from the tune request or master clock query.
    pub fn tune(
        &self,
        center_frequency: f64,
        bandwidth: Option<f64>,
        sample_rate: f64,
    ) -> Result<()> {
        let _enter = self.span.enter();
        check_non_negative("center frequency", center_frequency)?;
        check_non_negative("sample rate", sample_rate)?;

        let mut control = lock(&self.control);
        let output_format = {
            let status = self.status();
            match status.state {
                DeviceControllerState::Configured | DeviceControllerState::Disabled => {
                    status.output_format
                }
                DeviceControllerState::Enabled => {
                    return Err(Error::Configuration("disable() before re-tuning".into()));
                }
                state => {
                    return Err(Error::Configuration(format!("cannot tune from {state:?}")));
                }
            }
        };

        let request = ControlRequest::Set(
            Settings::builder()
                .rxdata(
                    RxDataSettings::builder()
                        .con_enable(false)
                        .run(false)
                        .con_type(ConnectionType::Tcp)
                        .con_port(self.data_port)
                        .use_v49(output_format.is_vita49())
                        .build(),
                )
                .rx(
                    RxSettings::builder()
                        .sample_rate(sample_rate)
                        .freq(center_frequency)
                        .build(),
                )
                .build(),
        );
        control.command(&request)?;

        {
            let mut status = self.status();
            status.tuning = Some(TuningState {
                center_frequency,
                sample_rate,
                bandwidth,
                output_format,
            });
            status.master = None;
        }
        lock(&self.tracker).reset();
        self.format_changed.store(true, Ordering::SeqCst);
        info!(center_frequency, sample_rate, ?output_format, "tuned");

        let master: MasterClock = query(&mut control, Group::Master)?;
        debug!(sample_rate = master.sample_rate, mode = ?master.sample_rate_mode, "master clock");
        self.status().master = Some(master);
        Ok(())
    }

    /// Start the data flow: enable the daemon data connection, connect to it (unless another
    /// consumer owns the data socket), then start the receiver. A no-op if already enabled.
    ///
    /// On failure the daemon is returned to idle, the data connection closed and the
    /// controller left [Disabled](DeviceControllerState::Disabled).
    ///
    /// # Errors
    /// [Error::Configuration] if not tuned or torn down, otherwise the first control or data
    /// channel error.
    pub fn enable(&self) -> Result<()> {
        let _enter = self.span.enter();
        let mut control = lock(&self.control);
        let owns_data_socket = {
            let status = self.status();
            match status.state {
                DeviceControllerState::Enabled => return Ok(()),
                DeviceControllerState::Uninitialized | DeviceControllerState::TornDown => {
                    return Err(Error::Configuration(format!(
                        "cannot enable from {:?}",
                        status.state
                    )));
                }
                _ if status.tuning.is_none() => {
                    return Err(Error::Configuration(
                        "tune() must be called before enable()".into(),
                    ));
                }
                _ => status.owns_data_socket,
            }
        };

        let zult = control
            .command(&set_rxdata(RxDataSettings::builder().con_enable(true).build()))
            .and_then(|_| {
                if owns_data_socket {
                    self.data.connect()?;
                }
                lock(&self.tracker).reset();
                control.command(&set_rxdata(RxDataSettings::builder().run(true).build()))
            });

        if let Err(err) = zult {
            error!("enable failed, device left disabled: {err}");
            self.data.disconnect();
            if let Err(idle_err) = control.command(&set_rxdata(RxDataSettings::idle())) {
                debug!("failed to return device to idle: {idle_err}");
            }
            self.status().transition(DeviceControllerState::Disabled);
            return Err(err);
        }

        self.status().transition(DeviceControllerState::Enabled);
        info!(owns_data_socket, "enabled");
        Ok(())
    }

    /// Stop the receiver and disable the daemon data connection. The data connection is
    /// always closed and the controller left [Disabled](DeviceControllerState::Disabled),
    /// even if a command fails.
    ///
    /// # Errors
    /// [Error::Configuration] if not set up or torn down, otherwise the first control channel
    /// error.
    pub fn disable(&self) -> Result<()> {
        let _enter = self.span.enter();
        let mut control = lock(&self.control);
        match self.state() {
            state @ (DeviceControllerState::Uninitialized | DeviceControllerState::TornDown) => {
                return Err(Error::Configuration(format!("cannot disable from {state:?}")));
            }
            _ => {}
        }

        let run = control.command(&set_rxdata(RxDataSettings::builder().run(false).build()));
        let con = control.command(&set_rxdata(
            RxDataSettings::builder().con_enable(false).build(),
        ));
        self.data.disconnect();
        self.status().transition(DeviceControllerState::Disabled);

        match run.and(con) {
            Ok(_) => {
                info!("disabled");
                Ok(())
            }
            Err(err) => {
                warn!("disable failed: {err}");
                Err(err)
            }
        }
    }

    /// Stop data flow and close both connections. Calling it again does nothing.
    ///
    /// The connections are closed and the controller is
    /// [TornDown](DeviceControllerState::TornDown) even if stopping the device fails.
    ///
    /// # Errors
    /// The control channel error, if the device could not be returned to idle.
    pub fn teardown(&self) -> Result<()> {
        let _enter = self.span.enter();
        let mut control = lock(&self.control);
        let state = self.state();
        if state == DeviceControllerState::TornDown {
            return Ok(());
        }

        let zult = if state == DeviceControllerState::Uninitialized && !control.is_connected() {
            Ok(())
        } else {
            control
                .command(&set_rxdata(RxDataSettings::idle()))
                .map(|_| ())
        };
        self.data.disconnect();
        control.disconnect();
        self.status().transition(DeviceControllerState::TornDown);
        info!("torn down");
        zult
    }

    /// Read the next block of samples.
    ///
    /// Data is decoded in the format the daemon was last tuned with.
    ///
    /// Returns `None` if this controller does not own the data socket, is not connected,
    /// the read timed out before a full block arrived, the connection closed or failed, or
    /// the block failed VITA-49 framing checks. Partial reads are kept and completed by later
    /// calls.
    ///
    /// # Errors
    /// [Error::Configuration] in VITA-49 mode while the master clock is unknown. No data is
    /// read in that case.
    pub fn pull_block(&self) -> Result<Option<SampleBlock>> {
        let _enter = self.span.enter();
        let (output_format, byte_order, master) = {
            let status = self.status();
            if !status.owns_data_socket {
                return Ok(None);
            }
            let output_format = status
                .tuning
                .map_or(status.output_format, |tuning| tuning.output_format);
            (output_format, status.byte_order, status.master)
        };

        match output_format {
            OutputFormat::RawComplex => {
                let received = self.data.fill(self.raw_read_len, |buf| {
                    let mut samples = Vec::with_capacity(buf.len() / 2);
                    decode_samples(buf, byte_order, &mut samples);
                    samples
                });
                let Some(samples) = self.received(received) else {
                    return Ok(None);
                };
                Ok(Some(SampleBlock {
                    samples,
                    timestamp: Timestamp::now(),
                    format_changed: self.format_changed(),
                    gaps: Vec::new(),
                }))
            }
            OutputFormat::Vita49 => {
                let Some(master) = master else {
                    return Err(Error::Configuration(
                        "master clock must be known to timestamp VITA-49 data".into(),
                    ));
                };
                let received = self
                    .data
                    .fill(self.vita49_read_len, |buf| decode_frames(buf, byte_order));
                let packet = match self.received(received) {
                    Some(Ok(packet)) => packet,
                    Some(Err(err)) => {
                        warn!("discarding block: {err}");
                        return Ok(None);
                    }
                    None => return Ok(None),
                };
                let gaps = self.track_sequence(&packet.frame_counts);
                let timestamp = Timestamp::from_vrt(&packet.vrt, Some(&master))?;
                trace!(
                    frames = packet.num_frames(),
                    seconds = timestamp.seconds,
                    "vita49 block"
                );
                Ok(Some(SampleBlock {
                    samples: packet.payload,
                    timestamp,
                    format_changed: self.format_changed(),
                    gaps,
                }))
            }
        }
    }

    fn received<T>(&self, received: Result<Option<Received<T>>>) -> Option<T> {
        match received {
            Ok(Some(Received::Data(data))) => Some(data),
            Ok(Some(Received::Pending) | None) => None,
            Ok(Some(Received::Closed)) => {
                warn!(port = self.data_port, "data connection closed by daemon");
                None
            }
            Err(err) => {
                warn!(port = self.data_port, "data read failed: {err}");
                None
            }
        }
    }

    fn track_sequence(&self, frame_counts: &[u16]) -> Vec<SequenceGap> {
        let mut tracker = lock(&self.tracker);
        let mut gaps = Vec::new();
        for &count in frame_counts {
            if let SequenceStatus::Gap(gap) = tracker.observe(count, 1) {
                warn!(
                    expected = gap.expected,
                    actual = gap.actual,
                    missing = gap.missing(),
                    "frame sequence gap"
                );
                gaps.push(gap);
            }
        }
        gaps
    }

    /// Whether tuning or format changed since the last call. Reading clears the flag, as
    /// does returning a [SampleBlock].
    pub fn format_changed(&self) -> bool {
        self.format_changed.swap(false, Ordering::SeqCst)
    }

    /// Output format requested by the next [tune](Self::tune). Data keeps being decoded in
    /// the tuned format until then.
    ///
    /// # Errors
    /// [Error::Configuration] while enabled; [disable](Self::disable) first.
    pub fn set_output_format(&self, format: OutputFormat) -> Result<()> {
        let _enter = self.span.enter();
        let mut status = self.status();
        if status.state == DeviceControllerState::Enabled {
            return Err(Error::Configuration(
                "disable() before changing the output format".into(),
            ));
        }
        if status.output_format != format {
            debug!(from = ?status.output_format, to = ?format, "output format changed");
            status.output_format = format;
        }
        Ok(())
    }

    pub fn set_byte_order(&self, order: ByteOrder) {
        self.status().byte_order = order;
    }

    /// Whether this controller reads the data port itself. When set to `false` an open data
    /// connection is closed and [pull_block](Self::pull_block) returns `None`.
    pub fn set_owns_data_socket(&self, owns: bool) {
        let _enter = self.span.enter();
        self.status().owns_data_socket = owns;
        if !owns {
            self.data.disconnect();
        }
        debug!(owns, "data socket ownership");
    }

    /// Query and cache the master clock.
    ///
    /// # Errors
    /// Any control channel error, [Error::Configuration] if torn down.
    pub fn query_master(&self) -> Result<MasterClock> {
        let master: MasterClock = self.query(Group::Master)?;
        self.status().master = Some(master);
        Ok(master)
    }

    /// # Errors
    /// Any control channel error, [Error::Configuration] if torn down.
    pub fn query_rx(&self) -> Result<RxSettings> {
        self.query(Group::Rx)
    }

    /// # Errors
    /// Any control channel error, [Error::Configuration] if torn down.
    pub fn query_rxstat(&self) -> Result<RxStatus> {
        self.query(Group::RxStat)
    }

    /// # Errors
    /// Any control channel error, [Error::Configuration] if torn down.
    pub fn query_gps(&self) -> Result<GpsInfo> {
        self.query(Group::Gps)
    }

    fn query<T: DeserializeOwned>(&self, group: Group) -> Result<T> {
        let _enter = self.span.enter();
        let mut control = lock(&self.control);
        self.require_not_torn_down()?;
        query(&mut control, group)
    }

    /// Spawn a thread calling [pull_block](Self::pull_block) in a loop, delivering blocks over
    /// a channel holding at most `capacity` blocks.
    ///
    /// # Errors
    /// [Error::Transport] if the thread cannot be spawned.
    pub fn spawn_reader(self: &Arc<Self>, capacity: usize) -> Result<BlockReader> {
        let (tx, rx) = bounded(capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let controller = Arc::clone(self);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("avs4000_{:03}_reader", self.device_number))
            .spawn(move || {
                let interval = controller.idle_interval;
                while !thread_stop.load(Ordering::SeqCst) {
                    let mut block = match controller.pull_block() {
                        Ok(Some(block)) => block,
                        Ok(None) => {
                            if !controller.data.is_connected() {
                                thread::sleep(interval);
                            }
                            continue;
                        }
                        Err(err) => {
                            let _enter = controller.span.enter();
                            warn!("reader: {err}");
                            thread::sleep(interval);
                            continue;
                        }
                    };
                    loop {
                        match tx.send_timeout(block, interval) {
                            Ok(()) => break,
                            Err(SendTimeoutError::Timeout(unsent)) => {
                                if thread_stop.load(Ordering::SeqCst) {
                                    return;
                                }
                                block = unsent;
                            }
                            Err(SendTimeoutError::Disconnected(_)) => return,
                        }
                    }
                }
            })?;

        Ok(BlockReader {
            blocks: rx,
            stop,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn device_number(&self) -> u16 {
        self.device_number
    }

    #[must_use]
    pub fn stream_id(&self) -> String {
        format!("avs4000_{:03}_{:03}", self.device_number, 0)
    }

    #[must_use]
    pub fn state(&self) -> DeviceControllerState {
        self.status().state
    }

    #[must_use]
    pub fn tuning(&self) -> Option<TuningState> {
        self.status().tuning
    }

    #[must_use]
    pub fn center_frequency(&self) -> Option<f64> {
        self.tuning().map(|t| t.center_frequency)
    }

    #[must_use]
    pub fn sample_rate(&self) -> Option<f64> {
        self.tuning().map(|t| t.sample_rate)
    }

    #[must_use]
    pub fn master_clock(&self) -> Option<MasterClock> {
        self.status().master
    }

    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        self.status().output_format
    }

    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.status().byte_order
    }

    #[must_use]
    pub fn owns_data_socket(&self) -> bool {
        self.status().owns_data_socket
    }

    #[must_use]
    pub fn data_port(&self) -> u16 {
        self.data_port
    }

    #[must_use]
    pub fn is_data_connected(&self) -> bool {
        self.data.is_connected()
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::Configuration(format!("{name} must be >= 0, got {value}")));
    }
    Ok(())
}

fn set_rxdata(settings: RxDataSettings) -> ControlRequest {
    ControlRequest::Set(Settings::builder().rxdata(settings).build())
}

fn query<T: DeserializeOwned>(control: &mut ControlChannel, group: Group) -> Result<T> {
    control
        .command(&ControlRequest::Get(vec![group]))?
        .group(group)
}

/// Handle to a reader thread started by [DeviceController::spawn_reader]. Dropping it stops
/// the thread.
pub struct BlockReader {
    blocks: Receiver<SampleBlock>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BlockReader {
    #[must_use]
    pub fn blocks(&self) -> &Receiver<SampleBlock> {
        &self.blocks
    }

    /// Stop the reader thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }
}

impl Drop for BlockReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

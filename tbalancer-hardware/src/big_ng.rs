//! bigNG device - frame acquisition, decode, and sensor maintenance
//!
//! Implements the T-Balancer status protocol over an opaque serial byte
//! stream. One `update()` call per poll cycle drains buffered frames,
//! decodes them into the sensor tree, requests the next status frame, and
//! schedules the delayed alternative request for the miniNG sub-units.

use crate::protocol::{
    u16_le, FrameKind, ALTERNATIVE_REQUEST_DELAY, ANALOG_TEMP_COUNT, ANALOG_TEMP_OFFSET,
    DIGITAL_TEMP_COUNT, DIGITAL_TEMP_OFFSET, END_FLAG, FAN_ANALOG_DUTY_OFFSET, FAN_COUNT,
    FAN_MAX_RPM_OFFSET, FAN_MODE_MASK_OFFSET, FAN_PWM_DUTY_OFFSET, FRAME_LENGTH, HUB_FLOW_COUNT,
    HUB_FLOW_OFFSET, HUB_FLOW_TIMEBASE_OFFSET, HUB_TEMP_COUNT, HUB_TEMP_OFFSET,
    MINI_NG_BLOCK_LENGTH, MINI_NG_CHANNELS, MINI_NG_CONTROL_OFFSET, MINI_NG_COUNT,
    MINI_NG_END_FLAG_OFFSET, MINI_NG_FAN_OFFSET, MINI_NG_MARKER, MINI_NG_NESTED_MARKER_OFFSET,
    MINI_NG_TEMP_OFFSET, PROTOCOL_VERSION_OFFSET, REQUEST_ALTERNATIVE, REQUEST_STATUS, START_FLAG,
};
use crate::serial_driver::{SerialDriver, SerialTransport};
use std::fmt::Write as _;
use std::sync::Arc;
use tbalancer_core::{
    DeviceConfig, Hardware, HardwareKind, Parameter, Result, SensorKey, SensorKind,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Per-channel temperature offset parameter
const OFFSET_PARAMETER: &str = "Offset";
/// Flow meter impulse rate parameter
const PULSES_PER_LITER_PARAMETER: &str = "PulsesPerLiter";
/// Derived maximum fan speed parameter
const MAX_RPM_PARAMETER: &str = "MaxRPM";

/// Default flow meter impulse rate (pulses per liter)
const DEFAULT_PULSES_PER_LITER: f32 = 509.0;

fn offset_parameter() -> Parameter {
    Parameter::new(
        OFFSET_PARAMETER,
        "Temperature offset in degrees Celsius.",
        0.0,
    )
}

/// T-Balancer bigNG controller
///
/// Owns the sensor tree for one controller and the transport it is polled
/// through. The transport is shared with the deferred alternative-request
/// task, which only ever writes to it; all sensor state is owned by the
/// poll task calling [`BigNg::update`].
pub struct BigNg {
    transport: Arc<Mutex<Box<dyn SerialTransport>>>,
    hardware: Hardware,
    port_index: usize,
    protocol_version: u8,

    digital_temperatures: [SensorKey; DIGITAL_TEMP_COUNT],
    analog_temperatures: [SensorKey; ANALOG_TEMP_COUNT],
    hub_temperatures: [SensorKey; HUB_TEMP_COUNT],
    hub_flows: [SensorKey; HUB_FLOW_COUNT],
    fans: [SensorKey; FAN_COUNT],
    controls: [SensorKey; FAN_COUNT],
    // MaxRPM is derived from the first frame that shows the channel
    fan_max_rpm_seen: [bool; FAN_COUNT],

    // miniNG sensors exist only once their block has been seen valid
    mini_ng_temperatures: [Option<SensorKey>; MINI_NG_COUNT * MINI_NG_CHANNELS],
    mini_ng_fans: [Option<SensorKey>; MINI_NG_COUNT * MINI_NG_CHANNELS],
    mini_ng_controls: [Option<SensorKey>; MINI_NG_COUNT * MINI_NG_CHANNELS],

    // Raw copies of the last valid frames, kept for diagnostic reporting
    primary_frame: Option<[u8; FRAME_LENGTH]>,
    alternative_frame: Option<[u8; FRAME_LENGTH]>,

    alternative_request: Option<JoinHandle<()>>,
}

impl BigNg {
    /// Create a device over an already opened transport
    ///
    /// All fixed channel slots are created up front; only miniNG sensors
    /// and the per-fan `MaxRPM` parameter are created lazily from frame
    /// contents.
    pub fn new(transport: Box<dyn SerialTransport>, config: &DeviceConfig) -> Self {
        let mut hardware = Hardware::new(
            "T-Balancer bigNG",
            HardwareKind::TBalancer,
            Some(config.port_index),
        );

        let digital_temperatures = std::array::from_fn(|i| {
            hardware.add_sensor(
                &format!("Digital Sensor {}", i + 1),
                i,
                SensorKind::Temperature,
                vec![offset_parameter()],
            )
        });
        let analog_temperatures = std::array::from_fn(|i| {
            hardware.add_sensor(
                &format!("Analog Sensor {}", i + 1),
                DIGITAL_TEMP_COUNT + i,
                SensorKind::Temperature,
                vec![offset_parameter()],
            )
        });
        let hub_temperatures = std::array::from_fn(|i| {
            hardware.add_sensor(
                &format!("Sensor Hub {}", i + 1),
                DIGITAL_TEMP_COUNT + ANALOG_TEMP_COUNT + i,
                SensorKind::Temperature,
                vec![offset_parameter()],
            )
        });
        let hub_flows = std::array::from_fn(|i| {
            hardware.add_sensor(
                &format!("Flowmeter {}", i + 1),
                i,
                SensorKind::Flow,
                vec![Parameter::new(
                    PULSES_PER_LITER_PARAMETER,
                    "Flow meter impulse rate in pulses per liter.",
                    DEFAULT_PULSES_PER_LITER,
                )],
            )
        });
        let fans = std::array::from_fn(|i| {
            hardware.add_sensor(&format!("Fan Channel {}", i + 1), i, SensorKind::Fan, Vec::new())
        });
        let controls = std::array::from_fn(|i| {
            hardware.add_sensor(
                &format!("Fan Channel {}", i + 1),
                i,
                SensorKind::Control,
                Vec::new(),
            )
        });

        Self {
            transport: Arc::new(Mutex::new(transport)),
            hardware,
            port_index: config.port_index,
            protocol_version: config.protocol_version,
            digital_temperatures,
            analog_temperatures,
            hub_temperatures,
            hub_flows,
            fans,
            controls,
            fan_max_rpm_seen: [false; FAN_COUNT],
            mini_ng_temperatures: [None; MINI_NG_COUNT * MINI_NG_CHANNELS],
            mini_ng_fans: [None; MINI_NG_COUNT * MINI_NG_CHANNELS],
            mini_ng_controls: [None; MINI_NG_COUNT * MINI_NG_CHANNELS],
            primary_frame: None,
            alternative_frame: None,
            alternative_request: None,
        }
    }

    /// Open the configured serial port and create the device on it
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        let driver = SerialDriver::open(&config.port_name, config.timeout_ms, config.debug_uart)?;
        Ok(Self::new(Box::new(driver), config))
    }

    /// The sensor tree owned by this device
    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    /// Mutable access to the sensor tree (observer registration, parameter
    /// adjustment)
    pub fn hardware_mut(&mut self) -> &mut Hardware {
        &mut self.hardware
    }

    /// Protocol version this decoder was configured with
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Port slot this device was opened on
    pub fn port_index(&self) -> usize {
        self.port_index
    }

    /// Run one poll cycle
    ///
    /// Drains every complete frame the transport has buffered, discards a
    /// single stray byte to resynchronize framing, decodes what was read,
    /// then requests the next status frame and schedules the alternative
    /// request. Protocol-level anomalies are recovered here; only transport
    /// failures surface, and the device remains usable for the next cycle.
    pub async fn update(&mut self) -> Result<()> {
        let transport = Arc::clone(&self.transport);

        loop {
            let mut frame = [0u8; FRAME_LENGTH];
            {
                let mut port = transport.lock().await;
                let available = port.bytes_available()?;
                if available < FRAME_LENGTH {
                    // one leftover byte means the stream slipped by one
                    if available == 1 {
                        let mut stray = [0u8; 1];
                        port.read_exact(&mut stray).await?;
                        debug!("discarded stray byte to resynchronize framing");
                    }
                    break;
                }
                port.read_exact(&mut frame).await?;
                if frame[0] != START_FLAG {
                    debug!(start = frame[0], "bad start flag, purging receive buffer");
                    port.purge_input()?;
                    continue;
                }
            }
            self.read_frame(&frame);
        }

        transport.lock().await.write_all(&[REQUEST_STATUS]).await?;
        self.schedule_alternative_request();
        Ok(())
    }

    /// Cancel the pending alternative request
    ///
    /// After this no command is written on behalf of this device; dropping
    /// the device has the same effect. The underlying port closes when the
    /// last transport handle is dropped.
    pub fn close(&mut self) {
        if let Some(handle) = self.alternative_request.take() {
            handle.abort();
        }
    }

    /// Diagnostic report with hex dumps of the last valid frames
    pub fn report(&self) -> String {
        let mut r = String::new();
        let _ = writeln!(r, "T-Balancer bigNG");
        let _ = writeln!(r);
        let _ = writeln!(r, "Port Index: {}", self.port_index);
        let _ = writeln!(r, "Protocol Version: 0x{:02X}", self.protocol_version);
        let _ = writeln!(r);

        if let Some(frame) = &self.primary_frame {
            let _ = writeln!(r, "Primary Status Frame:");
            append_hex_dump(&mut r, frame);
            let _ = writeln!(r);
        }
        if let Some(frame) = &self.alternative_frame {
            let _ = writeln!(r, "Alternative Status Frame:");
            append_hex_dump(&mut r, frame);
            let _ = writeln!(r);
        }
        r
    }

    fn read_frame(&mut self, data: &[u8; FRAME_LENGTH]) {
        match FrameKind::from_marker(data[1]) {
            FrameKind::BigNg => self.read_big_ng(data),
            FrameKind::MiniNg => self.read_mini_ng_frame(data),
            FrameKind::Unknown => {
                debug!(marker = data[1], "unknown frame variant, ignored");
            }
        }
    }

    fn read_big_ng(&mut self, data: &[u8; FRAME_LENGTH]) {
        if data[PROTOCOL_VERSION_OFFSET] != self.protocol_version {
            debug!(
                got = data[PROTOCOL_VERSION_OFFSET],
                expected = self.protocol_version,
                "protocol version mismatch, frame dropped"
            );
            return;
        }
        self.primary_frame = Some(*data);

        for i in 0..DIGITAL_TEMP_COUNT {
            self.update_temperature(self.digital_temperatures[i], data[DIGITAL_TEMP_OFFSET + i]);
        }
        for i in 0..HUB_TEMP_COUNT {
            self.update_temperature(self.hub_temperatures[i], data[HUB_TEMP_OFFSET + i]);
        }
        for i in 0..ANALOG_TEMP_COUNT {
            self.update_temperature(self.analog_temperatures[i], data[ANALOG_TEMP_OFFSET + i]);
        }

        for i in 0..HUB_FLOW_COUNT {
            let key = self.hub_flows[i];
            let pulses = data[HUB_FLOW_OFFSET + i];
            let timebase = data[HUB_FLOW_TIMEBASE_OFFSET];
            if pulses > 0 && timebase > 0 {
                let pulses_per_second = pulses as f32 * 4.0 / timebase as f32;
                let pulses_per_liter = self
                    .hardware
                    .sensor(key)
                    .parameter_value(PULSES_PER_LITER_PARAMETER)
                    .unwrap_or(DEFAULT_PULSES_PER_LITER);
                self.hardware
                    .sensor_mut(key)
                    .set_value(pulses_per_second * 3600.0 / pulses_per_liter);
                self.hardware.activate(key);
            } else {
                self.hardware.deactivate(key);
            }
        }

        for i in 0..FAN_COUNT {
            let key = self.fans[i];

            if !self.fan_max_rpm_seen[i] {
                let raw = u16_le(
                    data[FAN_MAX_RPM_OFFSET + 2 * i],
                    data[FAN_MAX_RPM_OFFSET + 2 * i + 1],
                );
                self.hardware.sensor_mut(key).push_parameter(Parameter::new(
                    MAX_RPM_PARAMETER,
                    "Maximum fan speed in revolutions per minute.",
                    11.5 * raw as f32,
                ));
                self.fan_max_rpm_seen[i] = true;
            }

            let duty = if data[FAN_MODE_MASK_OFFSET] & (1 << i) == 0 {
                0.02 * data[FAN_PWM_DUTY_OFFSET + i] as f32
            } else {
                0.01 * data[FAN_ANALOG_DUTY_OFFSET + i] as f32
            };

            let max_rpm = self
                .hardware
                .sensor(key)
                .parameter_value(MAX_RPM_PARAMETER)
                .unwrap_or(0.0);
            self.hardware.sensor_mut(key).set_value(max_rpm * duty);
            self.hardware.activate(key);

            let control = self.controls[i];
            self.hardware.sensor_mut(control).set_value(100.0 * duty);
            self.hardware.activate(control);
        }
    }

    fn read_mini_ng_frame(&mut self, data: &[u8; FRAME_LENGTH]) {
        self.alternative_frame = Some(*data);
        self.read_mini_ng(data, 0);
        if data[MINI_NG_NESTED_MARKER_OFFSET] == MINI_NG_MARKER {
            self.read_mini_ng(data, 1);
        }
    }

    fn read_mini_ng(&mut self, data: &[u8; FRAME_LENGTH], number: usize) {
        let offset = 1 + number * MINI_NG_BLOCK_LENGTH;
        if data[offset + MINI_NG_END_FLAG_OFFSET] != END_FLAG {
            debug!(block = number, "miniNG block failed end marker check, skipped");
            return;
        }
        self.ensure_mini_ng_sensors(number);

        for i in 0..MINI_NG_CHANNELS {
            let slot = number * MINI_NG_CHANNELS + i;
            if let Some(key) = self.mini_ng_temperatures[slot] {
                self.update_temperature(key, data[offset + MINI_NG_TEMP_OFFSET + i]);
            }
            if let Some(key) = self.mini_ng_fans[slot] {
                self.hardware
                    .sensor_mut(key)
                    .set_value(20.0 * data[offset + MINI_NG_FAN_OFFSET + i] as f32);
                self.hardware.activate(key);
            }
            if let Some(key) = self.mini_ng_controls[slot] {
                self.hardware
                    .sensor_mut(key)
                    .set_value(data[offset + MINI_NG_CONTROL_OFFSET + i] as f32);
                self.hardware.activate(key);
            }
        }
    }

    // Creates the sensor set of one miniNG the first time its block
    // validates. Slots are deactivated, never destroyed, afterwards.
    fn ensure_mini_ng_sensors(&mut self, number: usize) {
        if self.mini_ng_temperatures[number * MINI_NG_CHANNELS].is_some() {
            return;
        }
        debug!(unit = number + 1, "first valid miniNG block, creating sensors");

        for i in 0..MINI_NG_CHANNELS {
            let slot = number * MINI_NG_CHANNELS + i;
            self.mini_ng_temperatures[slot] = Some(self.hardware.add_sensor(
                &format!("miniNG #{} Sensor {}", number + 1, i + 1),
                DIGITAL_TEMP_COUNT + ANALOG_TEMP_COUNT + HUB_TEMP_COUNT + slot,
                SensorKind::Temperature,
                vec![offset_parameter()],
            ));
            self.mini_ng_fans[slot] = Some(self.hardware.add_sensor(
                &format!("miniNG #{} Fan Channel {}", number + 1, i + 1),
                FAN_COUNT + slot,
                SensorKind::Fan,
                Vec::new(),
            ));
            self.mini_ng_controls[slot] = Some(self.hardware.add_sensor(
                &format!("miniNG #{} Fan Channel {}", number + 1, i + 1),
                FAN_COUNT + slot,
                SensorKind::Control,
                Vec::new(),
            ));
        }
    }

    fn update_temperature(&mut self, key: SensorKey, raw: u8) {
        if raw > 0 {
            let offset = self
                .hardware
                .sensor(key)
                .parameter_value(OFFSET_PARAMETER)
                .unwrap_or(0.0);
            self.hardware
                .sensor_mut(key)
                .set_value(0.5 * raw as f32 + offset);
            self.hardware.activate(key);
        } else {
            self.hardware.deactivate(key);
        }
    }

    // At most one outstanding alternative request per device; a newer
    // schedule replaces a still-sleeping predecessor and performs the write
    // itself, so the device is never left unpolled.
    fn schedule_alternative_request(&mut self) {
        if let Some(handle) = self.alternative_request.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }

        let transport = Arc::clone(&self.transport);
        self.alternative_request = Some(tokio::spawn(async move {
            sleep(ALTERNATIVE_REQUEST_DELAY).await;
            let mut port = transport.lock().await;
            if let Err(err) = port.write_all(&[REQUEST_ALTERNATIVE]).await {
                warn!(%err, "alternative request failed");
            }
        }));
    }
}

impl Drop for BigNg {
    fn drop(&mut self) {
        self.close();
    }
}

fn append_hex_dump(out: &mut String, data: &[u8]) {
    for chunk in data.chunks(16) {
        for (i, byte) in chunk.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:02X}", byte);
        }
        out.push('\n');
    }
}

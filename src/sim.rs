use std::collections::{HashMap, VecDeque};
use std::f64::consts::TAU;
use std::thread;
use std::time::Duration;

use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::device::{ArmRequest, BoardInfo, DeviceControl};
use crate::error::DaqError;
use crate::params::DeviceParam;

/// Waveform the simulator writes into posted buffers.
#[derive(Debug, Clone)]
pub enum FillPattern {
    /// Deterministic per-channel ramp; channel B runs inverted. Tests can
    /// predict every code with [`SimBoard::ramp_code`].
    Ramp,
    /// Sine with a little uniform noise on top, for demo runs.
    Sine { period: usize, noise: u32 },
    Constant(u32),
}

/// In-process stand-in for the digitizer.
///
/// Models the card's asynchronous DMA contract synchronously: a posted
/// buffer is filled at the moment the engine waits on it, strictly in
/// posting order. An always-firing trigger is assumed, so the pipeline can
/// run without external trigger hardware. Fault injection covers the two
/// runtime failure modes of the real card: a buffer that never completes
/// (timeout) and a device-side overflow.
pub struct SimBoard {
    info: BoardInfo,
    params: HashMap<DeviceParam, u32>,
    param_log: Vec<(DeviceParam, u32)>,
    registers: HashMap<u32, u32>,
    posted: VecDeque<(usize, usize)>,
    armed: Option<ArmRequest>,
    capturing: bool,
    filled: usize,
    pattern: FillPattern,
    overrun_on: Option<usize>,
    timeout_on: Option<usize>,
    wait_delay: Duration,
    rng: StdRng,
}

impl SimBoard {
    pub fn new(info: BoardInfo, pattern: FillPattern) -> Self {
        SimBoard {
            info,
            params: HashMap::new(),
            param_log: Vec::new(),
            registers: HashMap::new(),
            posted: VecDeque::new(),
            armed: None,
            capturing: false,
            filled: 0,
            pattern,
            overrun_on: None,
            timeout_on: None,
            wait_delay: Duration::ZERO,
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    /// The board this crate targets: 12-bit ADC shipping left-aligned 16-bit
    /// codes, zero at 32760, 84 MiB transfer ceiling.
    pub fn ats9371() -> Self {
        SimBoard::new(
            BoardInfo {
                model: "ATS9371".into(),
                serial: "970043".into(),
                firmware: "35.00".into(),
                bits_per_sample: 16,
                zero_code: 32760,
                max_transfer_bytes: 84 * 1024 * 1024,
                channels: 2,
            },
            FillPattern::Ramp,
        )
    }

    pub fn with_firmware(firmware: &str) -> Self {
        let mut board = SimBoard::ats9371();
        board.info.firmware = firmware.into();
        board
    }

    pub fn set_pattern(&mut self, pattern: FillPattern) {
        self.pattern = pattern;
    }

    /// Report an overrun when the buffer with this 0-based ordinal is waited
    /// on.
    pub fn overrun_on_buffer(&mut self, ordinal: usize) {
        self.overrun_on = Some(ordinal);
    }

    /// Never complete the buffer with this 0-based ordinal.
    pub fn timeout_on_buffer(&mut self, ordinal: usize) {
        self.timeout_on = Some(ordinal);
    }

    /// Sleep this long in every wait call, to emulate a slow transfer.
    pub fn set_wait_delay(&mut self, delay: Duration) {
        self.wait_delay = delay;
    }

    pub fn param_log(&self) -> &[(DeviceParam, u32)] {
        &self.param_log
    }

    pub fn buffers_filled(&self) -> usize {
        self.filled
    }

    /// The code the Ramp pattern writes at sample `s` of stream channel
    /// `ch`.
    pub fn ramp_code(info: &BoardInfo, s: usize, ch: usize) -> u32 {
        let zero = i64::from(info.zero_code);
        let quarter = 1i64 << (info.bits_per_sample - 2);
        let max = (1i64 << info.bits_per_sample) - 1;
        let ramp = (s as i64) % quarter;
        let code = if ch == 0 { zero + ramp } else { zero - ramp };
        code.clamp(0, max) as u32
    }

    fn sample_code(&mut self, s: usize, ch: usize) -> u32 {
        let zero = i64::from(self.info.zero_code);
        let quarter = 1i64 << (self.info.bits_per_sample - 2);
        let max = (1i64 << self.info.bits_per_sample) - 1;
        let code = match self.pattern {
            FillPattern::Ramp => return Self::ramp_code(&self.info, s, ch),
            FillPattern::Sine { period, noise } => {
                let period = period.max(1);
                let angle = TAU * (s % period) as f64 / period as f64;
                let swing = (quarter as f64 * angle.sin()) as i64;
                let jitter = if noise > 0 {
                    self.rng.random_range(-i64::from(noise)..=i64::from(noise))
                } else {
                    0
                };
                let polarity = if ch == 0 { 1 } else { -1 };
                zero + polarity * swing + jitter
            }
            FillPattern::Constant(c) => i64::from(c),
        };
        code.clamp(0, max) as u32
    }

    fn fill(&mut self, addr: *mut u8, len: usize) -> Result<(), DaqError> {
        let (n_ch, samples_per_record) = {
            let arm = self
                .armed
                .as_ref()
                .ok_or_else(|| DaqError::Device("fill without arm".into()))?;
            let n_ch = (arm.channel_mask & 1) as usize + ((arm.channel_mask >> 1) & 1) as usize;
            if n_ch == 0 {
                return Err(DaqError::Device("channel mask selects no channel".into()));
            }
            (n_ch, arm.samples_per_record)
        };
        let bytes = self.info.bytes_per_sample();
        let total = len / bytes;
        let buf = unsafe { std::slice::from_raw_parts_mut(addr, len) };
        for i in 0..total {
            let s = (i / n_ch) % samples_per_record;
            let ch = i % n_ch;
            let code = self.sample_code(s, ch);
            if bytes == 1 {
                buf[i] = code as u8;
            } else {
                let le = (code as u16).to_le_bytes();
                buf[2 * i] = le[0];
                buf[2 * i + 1] = le[1];
            }
        }
        Ok(())
    }
}

impl DeviceControl for SimBoard {
    fn board_info(&self) -> &BoardInfo {
        &self.info
    }

    fn set_param(&mut self, param: DeviceParam, code: u32) -> Result<(), DaqError> {
        trace!("set {} = {code}", param.name());
        self.params.insert(param, code);
        self.param_log.push((param, code));
        Ok(())
    }

    fn get_param(&self, param: DeviceParam) -> Result<u32, DaqError> {
        self.params
            .get(&param)
            .copied()
            .ok_or_else(|| DaqError::Device(format!("{} was never set", param.name())))
    }

    fn read_register(&self, addr: u32) -> Result<u32, DaqError> {
        Ok(self.registers.get(&addr).copied().unwrap_or(0))
    }

    fn write_register(&mut self, addr: u32, value: u32) -> Result<(), DaqError> {
        self.registers.insert(addr, value);
        Ok(())
    }

    fn arm(&mut self, request: &ArmRequest) -> Result<(), DaqError> {
        if self.capturing {
            return Err(DaqError::Device("arm while capturing".into()));
        }
        self.armed = Some(request.clone());
        self.posted.clear();
        self.filled = 0;
        Ok(())
    }

    fn post_buffer(&mut self, addr: *mut u8, len: usize) -> Result<(), DaqError> {
        if self.armed.is_none() {
            return Err(DaqError::Device("post_buffer before arm".into()));
        }
        if len > self.info.max_transfer_bytes {
            return Err(DaqError::Device(format!(
                "transfer of {len} bytes exceeds board maximum {}",
                self.info.max_transfer_bytes
            )));
        }
        self.posted.push_back((addr as usize, len));
        Ok(())
    }

    fn start_capture(&mut self) -> Result<(), DaqError> {
        if self.armed.is_none() {
            return Err(DaqError::Device("start_capture before arm".into()));
        }
        self.capturing = true;
        Ok(())
    }

    fn wait_buffer(&mut self, addr: *mut u8, timeout: Duration) -> Result<(), DaqError> {
        if !self.capturing {
            return Err(DaqError::Device("wait_buffer before start_capture".into()));
        }
        if !self.wait_delay.is_zero() {
            thread::sleep(self.wait_delay);
        }
        let ordinal = self.filled;
        if self.timeout_on == Some(ordinal) {
            return Err(DaqError::Timeout {
                slot: ordinal,
                timeout,
            });
        }
        if self.overrun_on == Some(ordinal) {
            return Err(DaqError::Overrun(ordinal));
        }
        let &(front, len) = self
            .posted
            .front()
            .ok_or_else(|| DaqError::Device("wait with no buffer posted".into()))?;
        if front != addr as usize {
            return Err(DaqError::Device(
                "buffer completion waited out of posting order".into(),
            ));
        }
        self.posted.pop_front();
        self.fill(addr, len)?;
        self.filled += 1;
        Ok(())
    }

    fn abort_capture(&mut self) -> Result<(), DaqError> {
        self.capturing = false;
        self.posted.clear();
        Ok(())
    }
}

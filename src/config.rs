use std::time::Duration;

use confique::Config;
use log::info;
use serde::Deserialize;

use crate::acquisition::AcquisitionParams;
use crate::demux::{Demux, ScalarDemux, VectorDemux};
use crate::device::DeviceControl;
use crate::error::DaqError;
use crate::params::{
    AuxIoMode, AuxIoParam, Channel, ClockEdge, ClockSource, Coupling, DeviceParam,
    ExternalSampleRate, ExternalTriggerRange, Impedance, InputRange, SampleRate, TriggerEngine,
    TriggerOperation, TriggerSlope, TriggerSlot, TriggerSource, EXTERNAL_RATE_MAX,
    EXTERNAL_RATE_MIN, MAX_DECIMATION, SAMPLE_RATE_EXTERNAL_CODE, TRIGGER_DELAY_DIVISOR,
};

/// Trigger holdoff lives in bit 26 of this board register and needs recent
/// firmware.
pub(crate) const TRIGGER_HOLDOFF_REGISTER: u32 = 58;
pub(crate) const TRIGGER_HOLDOFF_BIT: u32 = 1 << 26;
const HOLDOFF_MIN_FIRMWARE: (u32, u32) = (30, 4);

#[derive(Debug, Clone, Copy)]
pub struct TriggerEngineSetup {
    pub engine: TriggerEngine,
    pub source: TriggerSource,
    pub slope: TriggerSlope,
    pub level: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelSetup {
    pub coupling: Coupling,
    pub range: InputRange,
    pub impedance: Impedance,
}

/// Immutable snapshot of the board configuration.
///
/// Built incrementally through a [`ConfigSession`]; once validated it is
/// pushed to the device as one batch and cached on the engine for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub clock_source: ClockSource,
    pub sample_rate: SampleRate,
    pub external_sample_rate: ExternalSampleRate,
    pub clock_edge: ClockEdge,
    pub decimation: u32,
    pub trigger_operation: TriggerOperation,
    pub trigger_engines: [TriggerEngineSetup; 2],
    pub external_trigger_coupling: Coupling,
    pub external_trigger_range: ExternalTriggerRange,
    pub trigger_delay: u32,
    pub trigger_holdoff: bool,
    pub timeout_ticks: u32,
    pub aux_io_mode: AuxIoMode,
    pub aux_io_param: AuxIoParam,
    pub channels: [ChannelSetup; 2],
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        AcquisitionConfig {
            clock_source: ClockSource::Internal,
            sample_rate: SampleRate::Undefined,
            external_sample_rate: ExternalSampleRate::Undefined,
            clock_edge: ClockEdge::Rising,
            decimation: 1,
            trigger_operation: TriggerOperation::J,
            trigger_engines: [
                TriggerEngineSetup {
                    engine: TriggerEngine::J,
                    source: TriggerSource::External,
                    slope: TriggerSlope::Positive,
                    level: 140,
                },
                TriggerEngineSetup {
                    engine: TriggerEngine::K,
                    source: TriggerSource::External,
                    slope: TriggerSlope::Positive,
                    level: 140,
                },
            ],
            external_trigger_coupling: Coupling::Dc,
            external_trigger_range: ExternalTriggerRange::Volt2_5,
            trigger_delay: 0,
            trigger_holdoff: false,
            timeout_ticks: 0,
            aux_io_mode: AuxIoMode::InAuxiliary,
            aux_io_param: AuxIoParam::None,
            channels: [ChannelSetup {
                coupling: Coupling::Dc,
                range: InputRange::Mv400,
                impedance: Impedance::Ohm50,
            }; 2],
        }
    }
}

impl AcquisitionConfig {
    fn validate(&self) -> Result<(), DaqError> {
        if self.decimation > MAX_DECIMATION {
            return Err(DaqError::Configuration(format!(
                "decimation {} out of range 0..={MAX_DECIMATION}",
                self.decimation
            )));
        }
        if self.trigger_delay % TRIGGER_DELAY_DIVISOR != 0 {
            return Err(DaqError::Configuration(format!(
                "trigger delay {} is not a multiple of {TRIGGER_DELAY_DIVISOR}",
                self.trigger_delay
            )));
        }
        if self.clock_source.is_external() {
            match self.external_sample_rate {
                ExternalSampleRate::Rate(rate)
                    if (EXTERNAL_RATE_MIN..=EXTERNAL_RATE_MAX).contains(&rate) => {}
                ExternalSampleRate::Rate(rate) => {
                    return Err(DaqError::Configuration(format!(
                        "external sample rate {rate} outside {EXTERNAL_RATE_MIN}..={EXTERNAL_RATE_MAX}"
                    )));
                }
                ExternalSampleRate::Undefined => {
                    return Err(DaqError::Configuration(
                        "external clock selected but external_sample_rate not set".into(),
                    ));
                }
            }
            if matches!(self.sample_rate, SampleRate::Internal(_)) {
                return Err(DaqError::Configuration(
                    "internal sample rate set while the clock source is external".into(),
                ));
            }
        } else {
            // internal clock needs a rate from the ladder
            self.sample_rate.code()?;
            if self.sample_rate == SampleRate::External {
                return Err(DaqError::Configuration(
                    "EXTERNAL_CLOCK sample rate needs an external clock source".into(),
                ));
            }
        }
        Ok(())
    }

    /// Push the whole configuration to the device in dependency order: clock
    /// and sample rate first, then the trigger block, then the per-channel
    /// input settings.
    ///
    /// The card has no transactional configuration. If a write in the middle
    /// of the batch fails, no further writes are attempted but the already
    /// applied ones stay in effect; the caller must treat the device state
    /// as at-least-partially applied.
    pub fn apply<D: DeviceControl + ?Sized>(&self, dev: &mut D) -> Result<(), DaqError> {
        self.validate()?;
        let info = dev.board_info().clone();
        if self.trigger_holdoff && !firmware_supports_holdoff(&info.firmware) {
            return Err(DaqError::Configuration(format!(
                "trigger holdoff needs firmware {}.{:02}, board reports {}",
                HOLDOFF_MIN_FIRMWARE.0, HOLDOFF_MIN_FIRMWARE.1, info.firmware
            )));
        }

        // clock block
        dev.set_param(DeviceParam::ClockSource, self.clock_source.code())?;
        let rate_code = if self.clock_source.is_external() {
            SAMPLE_RATE_EXTERNAL_CODE
        } else {
            self.sample_rate.code()?
        };
        dev.set_param(DeviceParam::SampleRate, rate_code)?;
        if let ExternalSampleRate::Rate(rate) = self.external_sample_rate {
            dev.set_param(DeviceParam::ExternalSampleRate, rate as u32)?;
        }
        dev.set_param(DeviceParam::ClockEdge, self.clock_edge.code())?;
        dev.set_param(DeviceParam::Decimation, self.decimation)?;

        // trigger block
        dev.set_param(DeviceParam::TriggerOperation, self.trigger_operation.code())?;
        for (slot, setup) in [TriggerSlot::One, TriggerSlot::Two]
            .into_iter()
            .zip(self.trigger_engines)
        {
            dev.set_param(DeviceParam::TriggerEngine(slot), setup.engine.code())?;
            dev.set_param(DeviceParam::TriggerSource(slot), setup.source.code())?;
            dev.set_param(DeviceParam::TriggerSlope(slot), setup.slope.code())?;
            dev.set_param(DeviceParam::TriggerLevel(slot), u32::from(setup.level))?;
        }
        dev.set_param(
            DeviceParam::ExternalTriggerCoupling,
            self.external_trigger_coupling.code(),
        )?;
        dev.set_param(
            DeviceParam::ExternalTriggerRange,
            self.external_trigger_range.code(),
        )?;
        dev.set_param(DeviceParam::TriggerDelay, self.trigger_delay)?;
        dev.set_param(DeviceParam::TimeoutTicks, self.timeout_ticks)?;
        dev.set_param(DeviceParam::AuxIoMode, self.aux_io_mode.code())?;
        dev.set_param(DeviceParam::AuxIoParam, self.aux_io_param.code())?;
        if firmware_supports_holdoff(&info.firmware) {
            let current = dev.read_register(TRIGGER_HOLDOFF_REGISTER)?;
            let new = if self.trigger_holdoff {
                current | TRIGGER_HOLDOFF_BIT
            } else {
                current & !TRIGGER_HOLDOFF_BIT
            };
            dev.write_register(TRIGGER_HOLDOFF_REGISTER, new)?;
        }

        // channel block
        for (channel, setup) in [Channel::A, Channel::B].into_iter().zip(self.channels) {
            dev.set_param(DeviceParam::Coupling(channel), setup.coupling.code())?;
            dev.set_param(DeviceParam::InputRange(channel), setup.range.code())?;
            dev.set_param(DeviceParam::Impedance(channel), setup.impedance.code())?;
        }

        info!("configuration committed to {}", info.model);
        Ok(())
    }
}

fn firmware_supports_holdoff(firmware: &str) -> bool {
    let mut parts = firmware.split('.');
    let major: u32 = match parts.next().and_then(|p| p.parse().ok()) {
        Some(v) => v,
        None => return false,
    };
    let minor: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor) >= HOLDOFF_MIN_FIRMWARE
}

/// Scoped configuration session.
///
/// Assignments made through the session are staged in memory; nothing
/// reaches the hardware until the session is committed by
/// [`AcquisitionEngine::configure`](crate::acquisition::AcquisitionEngine::configure)
/// when the caller's closure returns.
#[derive(Debug, Default)]
pub struct ConfigSession {
    cfg: AcquisitionConfig,
}

impl ConfigSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock_source(&mut self, source: ClockSource) -> &mut Self {
        self.cfg.clock_source = source;
        self
    }

    pub fn sample_rate(&mut self, rate: SampleRate) -> &mut Self {
        self.cfg.sample_rate = rate;
        self
    }

    pub fn external_sample_rate(&mut self, rate: u64) -> &mut Self {
        self.cfg.external_sample_rate = ExternalSampleRate::Rate(rate);
        self
    }

    pub fn clock_edge(&mut self, edge: ClockEdge) -> &mut Self {
        self.cfg.clock_edge = edge;
        self
    }

    pub fn decimation(&mut self, decimation: u32) -> &mut Self {
        self.cfg.decimation = decimation;
        self
    }

    pub fn trigger_operation(&mut self, op: TriggerOperation) -> &mut Self {
        self.cfg.trigger_operation = op;
        self
    }

    pub fn trigger_engine(
        &mut self,
        slot: TriggerSlot,
        engine: TriggerEngine,
        source: TriggerSource,
        slope: TriggerSlope,
        level: u8,
    ) -> &mut Self {
        let idx = match slot {
            TriggerSlot::One => 0,
            TriggerSlot::Two => 1,
        };
        self.cfg.trigger_engines[idx] = TriggerEngineSetup {
            engine,
            source,
            slope,
            level,
        };
        self
    }

    pub fn external_trigger(
        &mut self,
        coupling: Coupling,
        range: ExternalTriggerRange,
    ) -> &mut Self {
        self.cfg.external_trigger_coupling = coupling;
        self.cfg.external_trigger_range = range;
        self
    }

    pub fn trigger_delay(&mut self, delay: u32) -> &mut Self {
        self.cfg.trigger_delay = delay;
        self
    }

    pub fn trigger_holdoff(&mut self, enabled: bool) -> &mut Self {
        self.cfg.trigger_holdoff = enabled;
        self
    }

    pub fn timeout_ticks(&mut self, ticks: u32) -> &mut Self {
        self.cfg.timeout_ticks = ticks;
        self
    }

    pub fn aux_io(&mut self, mode: AuxIoMode, param: AuxIoParam) -> &mut Self {
        self.cfg.aux_io_mode = mode;
        self.cfg.aux_io_param = param;
        self
    }

    pub fn channel(
        &mut self,
        channel: Channel,
        coupling: Coupling,
        range: InputRange,
        impedance: Impedance,
    ) -> &mut Self {
        let idx = match channel {
            Channel::A => 0,
            Channel::B => 1,
        };
        self.cfg.channels[idx] = ChannelSetup {
            coupling,
            range,
            impedance,
        };
        self
    }

    /// Validate value domains and inter-parameter constraints, then hand out
    /// the immutable snapshot.
    pub fn into_validated(self) -> Result<AcquisitionConfig, DaqError> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

#[derive(Deserialize, Clone, Copy, Debug)]
pub enum DemuxKind {
    Scalar,
    Vector,
}

impl DemuxKind {
    pub fn build(self) -> Box<dyn Demux> {
        match self {
            DemuxKind::Scalar => Box::new(ScalarDemux),
            DemuxKind::Vector => Box::new(VectorDemux),
        }
    }
}

/// TOML run configuration for the `ats_daq` binary.
#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub run_settings: RunSettings,
    #[config(nested)]
    pub board_settings: BoardSettings,
    #[config(nested)]
    pub trigger_settings: TriggerSettings,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    pub output_dir: String,
    pub samples_per_record: usize,
    pub records_per_buffer: usize,
    pub buffers_per_acquisition: usize,
    #[config(default = 4)]
    pub allocated_buffers: usize,
    #[config(default = 1000)]
    pub buffer_timeout_ms: u64,
    #[config(default = "AB")]
    pub channels: String,
    #[config(default = "Scalar")]
    pub demux: DemuxKind,
    #[config(default = 2)]
    pub compression_level: u8,
}

#[derive(Config, Debug, Clone)]
pub struct BoardSettings {
    #[config(default = "INTERNAL_CLOCK")]
    pub clock_source: String,
    pub sample_rate: u64,
    #[config(default = "CLOCK_EDGE_RISING")]
    pub clock_edge: String,
    #[config(default = 1)]
    pub decimation: u32,
    #[config(default = "DC")]
    pub coupling: String,
    #[config(default = "400mV")]
    pub channel_range: String,
    #[config(default = 50)]
    pub impedance: u32,
}

#[derive(Config, Debug, Clone)]
pub struct TriggerSettings {
    #[config(default = "TRIG_ENGINE_OP_J")]
    pub operation: String,
    #[config(default = "EXTERNAL")]
    pub source: String,
    #[config(default = "TRIG_SLOPE_POSITIVE")]
    pub slope: String,
    #[config(default = 140)]
    pub level: u8,
    #[config(default = 0)]
    pub delay: u32,
    #[config(default = 0)]
    pub timeout_ticks: u32,
    #[config(default = false)]
    pub holdoff: bool,
}

impl Conf {
    pub fn acquisition_params(&self) -> Result<AcquisitionParams, DaqError> {
        let run = &self.run_settings;
        let mut params = AcquisitionParams::new(
            run.samples_per_record,
            run.records_per_buffer,
            run.buffers_per_acquisition,
            run.allocated_buffers,
        );
        params.channel_selection = run.channels.parse()?;
        params.buffer_timeout = Duration::from_millis(run.buffer_timeout_ms);
        Ok(params)
    }

    /// Stage the file settings into a configuration session. Channel and
    /// trigger-slot-one settings come from the file; slot two keeps the
    /// board defaults.
    pub fn stage(&self, session: &mut ConfigSession) -> Result<(), DaqError> {
        let board = &self.board_settings;
        let trig = &self.trigger_settings;

        session
            .clock_source(board.clock_source.parse()?)
            .sample_rate(SampleRate::Internal(board.sample_rate))
            .clock_edge(board.clock_edge.parse()?)
            .decimation(board.decimation)
            .trigger_operation(trig.operation.parse()?)
            .trigger_engine(
                TriggerSlot::One,
                TriggerEngine::J,
                trig.source.parse()?,
                trig.slope.parse()?,
                trig.level,
            )
            .trigger_delay(trig.delay)
            .trigger_holdoff(trig.holdoff)
            .timeout_ticks(trig.timeout_ticks);

        let coupling: Coupling = board.coupling.parse()?;
        let range: InputRange = board.channel_range.parse()?;
        let impedance = Impedance::from_ohms(board.impedance)?;
        session.channel(Channel::A, coupling, range, impedance);
        session.channel(Channel::B, coupling, range, impedance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBoard;

    fn valid_session() -> ConfigSession {
        let mut session = ConfigSession::new();
        session.sample_rate(SampleRate::Internal(500_000_000));
        session
    }

    #[test]
    fn commit_writes_clock_then_trigger_then_channels() {
        let cfg = valid_session().into_validated().unwrap();
        let mut board = SimBoard::ats9371();
        cfg.apply(&mut board).unwrap();

        let log = board.param_log();
        let pos = |p: DeviceParam| {
            log.iter()
                .position(|&(written, _)| written == p)
                .unwrap_or_else(|| panic!("{} never written", p.name()))
        };
        assert!(pos(DeviceParam::ClockSource) < pos(DeviceParam::SampleRate));
        assert!(pos(DeviceParam::SampleRate) < pos(DeviceParam::TriggerOperation));
        assert!(
            pos(DeviceParam::TriggerEngine(TriggerSlot::One))
                < pos(DeviceParam::TriggerLevel(TriggerSlot::One))
        );
        assert!(pos(DeviceParam::TriggerOperation) < pos(DeviceParam::Coupling(Channel::A)));
        assert!(
            pos(DeviceParam::TriggerLevel(TriggerSlot::Two))
                < pos(DeviceParam::InputRange(Channel::B))
        );
    }

    #[test]
    fn undefined_sample_rate_is_rejected() {
        let session = ConfigSession::new();
        assert!(matches!(
            session.into_validated(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn misaligned_trigger_delay_is_rejected() {
        let mut session = valid_session();
        session.trigger_delay(12);
        assert!(session.into_validated().is_err());
    }

    #[test]
    fn decimation_range_is_enforced() {
        let mut session = valid_session();
        session.decimation(100_001);
        assert!(session.into_validated().is_err());
    }

    #[test]
    fn external_clock_needs_external_rate() {
        let mut session = ConfigSession::new();
        session.clock_source(ClockSource::External10MHzRef);
        assert!(session.into_validated().is_err());

        let mut session = ConfigSession::new();
        session
            .clock_source(ClockSource::External10MHzRef)
            .external_sample_rate(1_000_000_000);
        let cfg = session.into_validated().unwrap();
        let mut board = SimBoard::ats9371();
        cfg.apply(&mut board).unwrap();
        assert_eq!(
            board.get_param(DeviceParam::SampleRate).unwrap(),
            SAMPLE_RATE_EXTERNAL_CODE
        );
    }

    #[test]
    fn external_rate_window_is_enforced() {
        let mut session = ConfigSession::new();
        session
            .clock_source(ClockSource::FastExternal)
            .external_sample_rate(100_000_000);
        assert!(session.into_validated().is_err());
    }

    #[test]
    fn holdoff_needs_recent_firmware() {
        let mut session = valid_session();
        session.trigger_holdoff(true);
        let cfg = session.into_validated().unwrap();

        let mut old_board = SimBoard::with_firmware("29.10");
        match cfg.apply(&mut old_board) {
            Err(DaqError::Configuration(_)) => {}
            other => panic!("expected Configuration error, got {other:?}"),
        }
        // validation failed before any write reached the card
        assert!(old_board.param_log().is_empty());

        let mut board = SimBoard::ats9371();
        cfg.apply(&mut board).unwrap();
        let reg = board.read_register(TRIGGER_HOLDOFF_REGISTER).unwrap();
        assert_ne!(reg & TRIGGER_HOLDOFF_BIT, 0);
    }

    #[test]
    fn firmware_version_parsing() {
        assert!(firmware_supports_holdoff("30.04"));
        assert!(firmware_supports_holdoff("35.00"));
        assert!(!firmware_supports_holdoff("30.03"));
        assert!(!firmware_supports_holdoff("29.99"));
        assert!(!firmware_supports_holdoff("garbage"));
    }
}

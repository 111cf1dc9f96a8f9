use std::str::FromStr;

use crate::error::DaqError;

/// Internal sample-rate ladder of the board: rate in S/s paired with the
/// hardware code written to the capture-clock register.
pub const SAMPLE_RATE_CODES: &[(u64, u32)] = &[
    (1_000, 1),
    (2_000, 2),
    (5_000, 4),
    (10_000, 8),
    (20_000, 10),
    (50_000, 12),
    (100_000, 14),
    (200_000, 16),
    (500_000, 18),
    (1_000_000, 20),
    (2_000_000, 24),
    (5_000_000, 26),
    (10_000_000, 28),
    (20_000_000, 30),
    (25_000_000, 33),
    (50_000_000, 34),
    (100_000_000, 36),
    (125_000_000, 37),
    (160_000_000, 38),
    (180_000_000, 39),
    (200_000_000, 40),
    (250_000_000, 43),
    (500_000_000, 48),
    (800_000_000, 50),
    (1_000_000_000, 53),
];

pub const SAMPLE_RATE_EXTERNAL_CODE: u32 = 64;

/// External clock must run in this window (S/s).
pub const EXTERNAL_RATE_MIN: u64 = 300_000_000;
pub const EXTERNAL_RATE_MAX: u64 = 2_000_000_000;

pub const MIN_SAMPLES_PER_RECORD: usize = 256;
pub const SAMPLES_DIVISOR: usize = 128;
pub const MAX_DECIMATION: u32 = 100_000;
pub const TRIGGER_DELAY_DIVISOR: u32 = 8;

// Acquire-time option flags, OR-ed into the flags word passed at arm.
pub const FLAG_EXTERNAL_STARTCAPTURE: u32 = 0x1;
pub const FLAG_ENABLE_RECORD_HEADERS: u32 = 0x8;
pub const FLAG_ALLOC_BUFFERS: u32 = 0x20;
pub const FLAG_FIFO_ONLY_STREAMING: u32 = 0x800;
pub const FLAG_INTERLEAVE_SAMPLES: u32 = 0x1000;
pub const FLAG_GET_PROCESSED_DATA: u32 = 0x2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    fn suffix(self) -> &'static str {
        match self {
            Channel::A => "1",
            Channel::B => "2",
        }
    }
}

/// The two trigger-engine slots of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSlot {
    One,
    Two,
}

impl TriggerSlot {
    fn suffix(self) -> &'static str {
        match self {
            TriggerSlot::One => "1",
            TriggerSlot::Two => "2",
        }
    }
}

/// Closed schema of the configuration parameters the device accepts. Every
/// value written through [`DeviceControl::set_param`](crate::device::DeviceControl)
/// is the hardware code of one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceParam {
    ClockSource,
    SampleRate,
    ExternalSampleRate,
    ClockEdge,
    Decimation,
    Coupling(Channel),
    InputRange(Channel),
    Impedance(Channel),
    TriggerOperation,
    TriggerEngine(TriggerSlot),
    TriggerSource(TriggerSlot),
    TriggerSlope(TriggerSlot),
    TriggerLevel(TriggerSlot),
    ExternalTriggerCoupling,
    ExternalTriggerRange,
    TriggerDelay,
    TimeoutTicks,
    AuxIoMode,
    AuxIoParam,
}

impl DeviceParam {
    pub fn name(self) -> String {
        match self {
            DeviceParam::ClockSource => "clock_source".into(),
            DeviceParam::SampleRate => "sample_rate".into(),
            DeviceParam::ExternalSampleRate => "external_sample_rate".into(),
            DeviceParam::ClockEdge => "clock_edge".into(),
            DeviceParam::Decimation => "decimation".into(),
            DeviceParam::Coupling(ch) => format!("coupling{}", ch.suffix()),
            DeviceParam::InputRange(ch) => format!("channel_range{}", ch.suffix()),
            DeviceParam::Impedance(ch) => format!("impedance{}", ch.suffix()),
            DeviceParam::TriggerOperation => "trigger_operation".into(),
            DeviceParam::TriggerEngine(s) => format!("trigger_engine{}", s.suffix()),
            DeviceParam::TriggerSource(s) => format!("trigger_source{}", s.suffix()),
            DeviceParam::TriggerSlope(s) => format!("trigger_slope{}", s.suffix()),
            DeviceParam::TriggerLevel(s) => format!("trigger_level{}", s.suffix()),
            DeviceParam::ExternalTriggerCoupling => "external_trigger_coupling".into(),
            DeviceParam::ExternalTriggerRange => "external_trigger_range".into(),
            DeviceParam::TriggerDelay => "trigger_delay".into(),
            DeviceParam::TimeoutTicks => "timeout_ticks".into(),
            DeviceParam::AuxIoMode => "aux_io_mode".into(),
            DeviceParam::AuxIoParam => "aux_io_param".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    Internal,
    FastExternal,
    External10MHzRef,
}

impl ClockSource {
    pub fn code(self) -> u32 {
        match self {
            ClockSource::Internal => 1,
            ClockSource::FastExternal => 2,
            ClockSource::External10MHzRef => 7,
        }
    }

    pub fn is_external(self) -> bool {
        !matches!(self, ClockSource::Internal)
    }
}

impl FromStr for ClockSource {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, DaqError> {
        match s {
            "INTERNAL_CLOCK" => Ok(ClockSource::Internal),
            "FAST_EXTERNAL_CLOCK" => Ok(ClockSource::FastExternal),
            "EXTERNAL_CLOCK_10MHz_REF" => Ok(ClockSource::External10MHzRef),
            _ => Err(DaqError::Configuration(format!("unknown clock source {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Internal(u64),
    External,
    Undefined,
}

impl SampleRate {
    pub fn code(self) -> Result<u32, DaqError> {
        match self {
            SampleRate::Internal(rate) => SAMPLE_RATE_CODES
                .iter()
                .find(|&&(r, _)| r == rate)
                .map(|&(_, code)| code)
                .ok_or_else(|| {
                    DaqError::Configuration(format!("unsupported internal sample rate {rate} S/s"))
                }),
            SampleRate::External => Ok(SAMPLE_RATE_EXTERNAL_CODE),
            SampleRate::Undefined => Err(DaqError::Configuration("sample rate not set".into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalSampleRate {
    Rate(u64),
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEdge {
    Rising,
    Falling,
}

impl ClockEdge {
    pub fn code(self) -> u32 {
        match self {
            ClockEdge::Rising => 0,
            ClockEdge::Falling => 1,
        }
    }
}

impl FromStr for ClockEdge {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, DaqError> {
        match s {
            "CLOCK_EDGE_RISING" => Ok(ClockEdge::Rising),
            "CLOCK_EDGE_FALLING" => Ok(ClockEdge::Falling),
            _ => Err(DaqError::Configuration(format!("unknown clock edge {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

impl Coupling {
    pub fn code(self) -> u32 {
        match self {
            Coupling::Ac => 1,
            Coupling::Dc => 2,
        }
    }
}

impl FromStr for Coupling {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, DaqError> {
        match s {
            "AC" => Ok(Coupling::Ac),
            "DC" => Ok(Coupling::Dc),
            _ => Err(DaqError::Configuration(format!("unknown coupling {s:?}"))),
        }
    }
}

/// Input range of a channel. The board supports a single fixed range of
/// +-400 mV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRange {
    Mv400,
}

impl InputRange {
    pub fn code(self) -> u32 {
        match self {
            InputRange::Mv400 => 7,
        }
    }

    pub fn volts(self) -> f64 {
        match self {
            InputRange::Mv400 => 0.4,
        }
    }
}

impl FromStr for InputRange {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, DaqError> {
        match s {
            "400mV" | "0.4" => Ok(InputRange::Mv400),
            _ => Err(DaqError::Configuration(format!("unknown input range {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impedance {
    Ohm50,
}

impl Impedance {
    pub fn code(self) -> u32 {
        match self {
            Impedance::Ohm50 => 2,
        }
    }

    pub fn from_ohms(ohms: u32) -> Result<Self, DaqError> {
        match ohms {
            50 => Ok(Impedance::Ohm50),
            _ => Err(DaqError::Configuration(format!(
                "unsupported input impedance {ohms} Ohm"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOperation {
    J,
    K,
    JOrK,
    JAndK,
    JXorK,
    JAndNotK,
    NotJAndK,
}

impl TriggerOperation {
    pub fn code(self) -> u32 {
        match self {
            TriggerOperation::J => 0,
            TriggerOperation::K => 1,
            TriggerOperation::JOrK => 2,
            TriggerOperation::JAndK => 3,
            TriggerOperation::JXorK => 4,
            TriggerOperation::JAndNotK => 5,
            TriggerOperation::NotJAndK => 6,
        }
    }
}

impl FromStr for TriggerOperation {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, DaqError> {
        match s {
            "TRIG_ENGINE_OP_J" => Ok(TriggerOperation::J),
            "TRIG_ENGINE_OP_K" => Ok(TriggerOperation::K),
            "TRIG_ENGINE_OP_J_OR_K" => Ok(TriggerOperation::JOrK),
            "TRIG_ENGINE_OP_J_AND_K" => Ok(TriggerOperation::JAndK),
            "TRIG_ENGINE_OP_J_XOR_K" => Ok(TriggerOperation::JXorK),
            "TRIG_ENGINE_OP_J_AND_NOT_K" => Ok(TriggerOperation::JAndNotK),
            "TRIG_ENGINE_OP_NOT_J_AND_K" => Ok(TriggerOperation::NotJAndK),
            _ => Err(DaqError::Configuration(format!(
                "unknown trigger operation {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEngine {
    J,
    K,
}

impl TriggerEngine {
    pub fn code(self) -> u32 {
        match self {
            TriggerEngine::J => 0,
            TriggerEngine::K => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    ChannelA,
    ChannelB,
    External,
    Disable,
}

impl TriggerSource {
    pub fn code(self) -> u32 {
        match self {
            TriggerSource::ChannelA => 0,
            TriggerSource::ChannelB => 1,
            TriggerSource::External => 2,
            TriggerSource::Disable => 3,
        }
    }
}

impl FromStr for TriggerSource {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, DaqError> {
        match s {
            "CHANNEL_A" => Ok(TriggerSource::ChannelA),
            "CHANNEL_B" => Ok(TriggerSource::ChannelB),
            "EXTERNAL" => Ok(TriggerSource::External),
            "DISABLE" => Ok(TriggerSource::Disable),
            _ => Err(DaqError::Configuration(format!(
                "unknown trigger source {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSlope {
    Positive,
    Negative,
}

impl TriggerSlope {
    pub fn code(self) -> u32 {
        match self {
            TriggerSlope::Positive => 1,
            TriggerSlope::Negative => 2,
        }
    }
}

impl FromStr for TriggerSlope {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, DaqError> {
        match s {
            "TRIG_SLOPE_POSITIVE" => Ok(TriggerSlope::Positive),
            "TRIG_SLOPE_NEGATIVE" => Ok(TriggerSlope::Negative),
            _ => Err(DaqError::Configuration(format!(
                "unknown trigger slope {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTriggerRange {
    Ttl,
    Volt2_5,
}

impl ExternalTriggerRange {
    pub fn code(self) -> u32 {
        match self {
            ExternalTriggerRange::Ttl => 2,
            ExternalTriggerRange::Volt2_5 => 3,
        }
    }
}

impl FromStr for ExternalTriggerRange {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, DaqError> {
        match s {
            "ETR_TTL" => Ok(ExternalTriggerRange::Ttl),
            "ETR_2V5" => Ok(ExternalTriggerRange::Volt2_5),
            _ => Err(DaqError::Configuration(format!(
                "unknown external trigger range {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxIoMode {
    OutTrigger,
    InTriggerEnable,
    InAuxiliary,
}

impl AuxIoMode {
    pub fn code(self) -> u32 {
        match self {
            AuxIoMode::OutTrigger => 0,
            AuxIoMode::InTriggerEnable => 1,
            AuxIoMode::InAuxiliary => 13,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxIoParam {
    None,
    SlopePositive,
    SlopeNegative,
}

impl AuxIoParam {
    pub fn code(self) -> u32 {
        match self {
            AuxIoParam::None => 0,
            AuxIoParam::SlopePositive => 1,
            AuxIoParam::SlopeNegative => 2,
        }
    }
}

/// ADMA acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqMode {
    Npt,
    Ts,
}

impl AcqMode {
    pub fn code(self) -> u32 {
        match self {
            AcqMode::Npt => 0x200,
            AcqMode::Ts => 0x400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSelection {
    A,
    B,
    Both,
}

impl ChannelSelection {
    pub fn code(self) -> u32 {
        match self {
            ChannelSelection::A => 1,
            ChannelSelection::B => 2,
            ChannelSelection::Both => 3,
        }
    }

    pub fn count(self) -> usize {
        match self {
            ChannelSelection::Both => 2,
            _ => 1,
        }
    }

    pub fn includes_a(self) -> bool {
        matches!(self, ChannelSelection::A | ChannelSelection::Both)
    }

    pub fn includes_b(self) -> bool {
        matches!(self, ChannelSelection::B | ChannelSelection::Both)
    }
}

impl FromStr for ChannelSelection {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, DaqError> {
        match s {
            "A" => Ok(ChannelSelection::A),
            "B" => Ok(ChannelSelection::B),
            "AB" => Ok(ChannelSelection::Both),
            _ => Err(DaqError::Configuration(format!(
                "unknown channel selection {s:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_ladder_lookup() {
        assert_eq!(SampleRate::Internal(1_000).code().unwrap(), 1);
        assert_eq!(SampleRate::Internal(125_000_000).code().unwrap(), 37);
        assert_eq!(SampleRate::Internal(1_000_000_000).code().unwrap(), 53);
        assert_eq!(SampleRate::External.code().unwrap(), 64);
        assert!(SampleRate::Internal(3_000).code().is_err());
        assert!(SampleRate::Undefined.code().is_err());
    }

    #[test]
    fn code_mappings_match_board_tables() {
        assert_eq!(ClockSource::External10MHzRef.code(), 7);
        assert_eq!(ClockEdge::Falling.code(), 1);
        assert_eq!(Coupling::Ac.code(), 1);
        assert_eq!(InputRange::Mv400.code(), 7);
        assert_eq!(Impedance::Ohm50.code(), 2);
        assert_eq!(TriggerOperation::NotJAndK.code(), 6);
        assert_eq!(TriggerSource::Disable.code(), 3);
        assert_eq!(TriggerSlope::Negative.code(), 2);
        assert_eq!(ExternalTriggerRange::Volt2_5.code(), 3);
        assert_eq!(AuxIoMode::InAuxiliary.code(), 13);
        assert_eq!(AcqMode::Npt.code(), 0x200);
        assert_eq!(ChannelSelection::Both.code(), 3);
    }

    #[test]
    fn parse_config_strings() {
        assert_eq!(
            "INTERNAL_CLOCK".parse::<ClockSource>().unwrap(),
            ClockSource::Internal
        );
        assert_eq!(
            "TRIG_SLOPE_POSITIVE".parse::<TriggerSlope>().unwrap(),
            TriggerSlope::Positive
        );
        assert_eq!("AB".parse::<ChannelSelection>().unwrap(), ChannelSelection::Both);
        assert!("EXTERNAL_CLOCK".parse::<ClockSource>().is_err());
    }

    #[test]
    fn param_names() {
        assert_eq!(DeviceParam::Coupling(Channel::B).name(), "coupling2");
        assert_eq!(
            DeviceParam::TriggerLevel(TriggerSlot::One).name(),
            "trigger_level1"
        );
    }
}

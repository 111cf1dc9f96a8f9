pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod demux;
pub mod device;
pub mod error;
pub mod params;
pub mod sim;
pub mod utils;
pub mod writer;

pub use acquisition::{
    AcquireFlags, AcquiredTraces, AcquisitionEngine, AcquisitionParams, EngineState, RunSummary,
};
pub use buffer::{BufferPool, BufferState, DmaBuffer};
pub use config::{
    AcquisitionConfig, ChannelSetup, Conf, ConfigSession, DemuxKind, TriggerEngineSetup,
};
pub use demux::{Conversion, Demux, ScalarDemux, TracePair, VectorDemux};
pub use device::{ArmRequest, BoardInfo, DeviceControl};
pub use error::DaqError;
pub use params::{
    AcqMode, AuxIoMode, AuxIoParam, Channel, ChannelSelection, ClockEdge, ClockSource, Coupling,
    DeviceParam, ExternalSampleRate, ExternalTriggerRange, Impedance, InputRange, SampleRate,
    TriggerEngine, TriggerOperation, TriggerSlope, TriggerSlot, TriggerSource,
};
pub use sim::{FillPattern, SimBoard};
pub use utils::Counter;
pub use writer::TraceWriter;

use std::time::Duration;

use crate::error::DaqError;
use crate::params::DeviceParam;

/// Identity and calibration facts the board reports at open time.
#[derive(Debug, Clone)]
pub struct BoardInfo {
    pub model: String,
    pub serial: String,
    pub firmware: String,
    /// Width of one transferred sample code in bits. The 12-bit ADC ships its
    /// codes left-aligned in 16-bit words, so this is 16 for the real board.
    pub bits_per_sample: u8,
    /// Device-reported code for 0 V input.
    pub zero_code: u32,
    /// Largest DMA transfer the board accepts, in bytes.
    pub max_transfer_bytes: usize,
    pub channels: usize,
}

impl BoardInfo {
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }
}

/// Everything the engine hands to the device when arming a capture.
///
/// `flags` is the combined ADMA word: the acquisition-mode code OR-ed with
/// the acquire option flags from [`crate::params`].
#[derive(Debug, Clone)]
pub struct ArmRequest {
    pub channel_mask: u32,
    pub transfer_offset: usize,
    pub samples_per_record: usize,
    pub records_per_buffer: usize,
    pub records_per_acquisition: usize,
    pub flags: u32,
}

/// Capability interface to the digitizer.
///
/// The acquisition core drives the card exclusively through this trait; the
/// register/ioctl backend behind it is out of scope here and a software
/// simulator ([`crate::sim::SimBoard`]) stands in for tests and dry runs.
///
/// Buffer traffic follows the card's asynchronous DMA contract: a region is
/// handed over with [`post_buffer`](DeviceControl::post_buffer) and must not
/// be touched until [`wait_buffer`](DeviceControl::wait_buffer) on the same
/// address returns. Completion is signalled strictly in posting order.
/// `wait_buffer` surfaces the card's overflow status flag as
/// [`DaqError::Overrun`]; an overrun means sample continuity is lost and the
/// acquisition cannot be repaired after the fact.
pub trait DeviceControl: Send {
    fn board_info(&self) -> &BoardInfo;

    fn set_param(&mut self, param: DeviceParam, code: u32) -> Result<(), DaqError>;

    fn get_param(&self, param: DeviceParam) -> Result<u32, DaqError>;

    fn read_register(&self, addr: u32) -> Result<u32, DaqError>;

    fn write_register(&mut self, addr: u32, value: u32) -> Result<(), DaqError>;

    /// Prepare the capture state machine for an asynchronous acquisition.
    fn arm(&mut self, request: &ArmRequest) -> Result<(), DaqError>;

    /// Lend a pinned region of `len` bytes to the card for filling.
    fn post_buffer(&mut self, addr: *mut u8, len: usize) -> Result<(), DaqError>;

    fn start_capture(&mut self) -> Result<(), DaqError>;

    /// Block until the region at `addr` has been filled, up to `timeout`.
    fn wait_buffer(&mut self, addr: *mut u8, timeout: Duration) -> Result<(), DaqError>;

    /// Stop the capture and forget all posted buffers.
    fn abort_capture(&mut self) -> Result<(), DaqError>;
}

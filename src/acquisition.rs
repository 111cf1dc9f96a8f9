use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::{info, warn};
use ndarray::{concatenate, Array2, Axis};

use crate::buffer::{BufferPool, BufferState};
use crate::config::{AcquisitionConfig, ConfigSession};
use crate::demux::{Conversion, Demux, TracePair};
use crate::device::{ArmRequest, BoardInfo, DeviceControl};
use crate::error::DaqError;
use crate::params::{
    AcqMode, ChannelSelection, FLAG_ALLOC_BUFFERS, FLAG_ENABLE_RECORD_HEADERS,
    FLAG_EXTERNAL_STARTCAPTURE, FLAG_FIFO_ONLY_STREAMING, FLAG_GET_PROCESSED_DATA,
    FLAG_INTERLEAVE_SAMPLES, MIN_SAMPLES_PER_RECORD, SAMPLES_DIVISOR,
};

const BOARD_MODEL: &str = "ATS9371";

/// records_per_acquisition value armed for an unbounded streaming run.
const RECORDS_INFINITE: usize = 0x7FFF_FFFF;

/// Acquire-time option flags, folded into the ADMA flags word together with
/// the acquisition mode.
#[derive(Debug, Clone, Copy)]
pub struct AcquireFlags {
    pub external_startcapture: bool,
    pub enable_record_headers: bool,
    pub alloc_buffers: bool,
    pub fifo_only_streaming: bool,
    pub interleave_samples: bool,
    pub get_processed_data: bool,
}

impl Default for AcquireFlags {
    fn default() -> Self {
        AcquireFlags {
            external_startcapture: true,
            enable_record_headers: false,
            alloc_buffers: false,
            fifo_only_streaming: false,
            interleave_samples: false,
            get_processed_data: false,
        }
    }
}

impl AcquireFlags {
    pub fn bits(self) -> u32 {
        let mut bits = 0;
        if self.external_startcapture {
            bits |= FLAG_EXTERNAL_STARTCAPTURE;
        }
        if self.enable_record_headers {
            bits |= FLAG_ENABLE_RECORD_HEADERS;
        }
        if self.alloc_buffers {
            bits |= FLAG_ALLOC_BUFFERS;
        }
        if self.fifo_only_streaming {
            bits |= FLAG_FIFO_ONLY_STREAMING;
        }
        if self.interleave_samples {
            bits |= FLAG_INTERLEAVE_SAMPLES;
        }
        if self.get_processed_data {
            bits |= FLAG_GET_PROCESSED_DATA;
        }
        bits
    }
}

/// Per-run acquisition geometry.
///
/// `buffers_per_acquisition = 0` streams until [`AcquisitionEngine::abort`]
/// is called; otherwise exactly that many buffers are captured and the run
/// drains on its own.
#[derive(Debug, Clone)]
pub struct AcquisitionParams {
    pub mode: AcqMode,
    pub samples_per_record: usize,
    pub records_per_buffer: usize,
    pub buffers_per_acquisition: usize,
    pub allocated_buffers: usize,
    pub channel_selection: ChannelSelection,
    pub transfer_offset: usize,
    pub buffer_timeout: Duration,
    pub flags: AcquireFlags,
}

impl AcquisitionParams {
    pub fn new(
        samples_per_record: usize,
        records_per_buffer: usize,
        buffers_per_acquisition: usize,
        allocated_buffers: usize,
    ) -> Self {
        AcquisitionParams {
            mode: AcqMode::Npt,
            samples_per_record,
            records_per_buffer,
            buffers_per_acquisition,
            allocated_buffers,
            channel_selection: ChannelSelection::Both,
            transfer_offset: 0,
            buffer_timeout: Duration::from_millis(1000),
            flags: AcquireFlags::default(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_selection.count()
    }

    /// Byte size of one DMA buffer, or None on overflow.
    pub fn bytes_per_buffer(&self, bytes_per_sample: usize) -> Option<usize> {
        self.records_per_buffer
            .checked_mul(self.samples_per_record)?
            .checked_mul(self.channel_count())?
            .checked_mul(bytes_per_sample)
    }

    pub fn flags_word(&self) -> u32 {
        self.mode.code() | self.flags.bits()
    }

    /// All geometry violations are configuration errors raised before any
    /// hardware call.
    pub fn validate(&self, info: &BoardInfo) -> Result<(), DaqError> {
        if self.samples_per_record < MIN_SAMPLES_PER_RECORD {
            return Err(DaqError::Configuration(format!(
                "samples_per_record {} below minimum {MIN_SAMPLES_PER_RECORD}",
                self.samples_per_record
            )));
        }
        if self.samples_per_record % SAMPLES_DIVISOR != 0 {
            return Err(DaqError::Configuration(format!(
                "samples_per_record {} is not a multiple of {SAMPLES_DIVISOR}",
                self.samples_per_record
            )));
        }
        if self.records_per_buffer == 0 {
            return Err(DaqError::Configuration(
                "records_per_buffer must be at least 1".into(),
            ));
        }
        if self.allocated_buffers == 0 {
            return Err(DaqError::Configuration(
                "allocated_buffers must be at least 1".into(),
            ));
        }
        if self.buffers_per_acquisition > 0 && self.allocated_buffers > self.buffers_per_acquisition
        {
            return Err(DaqError::Configuration(format!(
                "allocated_buffers {} exceeds buffers_per_acquisition {}",
                self.allocated_buffers, self.buffers_per_acquisition
            )));
        }
        if self.channel_count() > info.channels {
            return Err(DaqError::Configuration(format!(
                "selection needs {} channels, board has {}",
                self.channel_count(),
                info.channels
            )));
        }
        if self.buffer_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "buffer_timeout must be non-zero".into(),
            ));
        }
        let bytes = self
            .bytes_per_buffer(info.bytes_per_sample())
            .ok_or_else(|| DaqError::Configuration("buffer byte size overflows".into()))?;
        if bytes > info.max_transfer_bytes {
            return Err(DaqError::Configuration(format!(
                "buffer of {bytes} bytes exceeds the board transfer ceiling {}",
                info.max_transfer_bytes
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Armed,
    Running,
    Draining,
    Aborting,
}

/// Outcome of a callback-driven run.
#[derive(Debug)]
pub struct RunSummary {
    pub buffers_completed: usize,
    pub records_completed: usize,
    pub partial: bool,
    pub error: Option<DaqError>,
}

/// A whole acquisition's converted traces.
///
/// On `Timeout`/`Overrun` the run is cut short but everything converted up
/// to the failure is still here, with `partial` set and the error attached.
#[derive(Debug)]
pub struct AcquiredTraces {
    pub chan_a: Array2<f64>,
    pub chan_b: Array2<f64>,
    pub records_completed: usize,
    pub buffers_completed: usize,
    pub partial: bool,
    pub error: Option<DaqError>,
}

/// Capture state machine around a [`DeviceControl`] implementation.
///
/// One engine drives one board. A single consumer loop runs per
/// acquisition; re-entrant runs are refused with `AlreadyRunning`. The
/// engine owns no pinned memory between runs; the buffer pool lives and
/// dies inside one acquisition.
///
/// Triggering is a precondition: the engine arms and captures, but the
/// trigger events themselves must come from the configured trigger engines
/// or an external source. There is no self-triggering mode.
pub struct AcquisitionEngine<D: DeviceControl> {
    device: Mutex<D>,
    state: Mutex<EngineState>,
    abort: AtomicBool,
    params: Mutex<Option<AcquisitionParams>>,
    last_config: Mutex<Option<AcquisitionConfig>>,
}

impl<D: DeviceControl> AcquisitionEngine<D> {
    pub fn new(device: D) -> Result<Self, DaqError> {
        let model = device.board_info().model.clone();
        if model != BOARD_MODEL {
            return Err(DaqError::Configuration(format!(
                "expected an {BOARD_MODEL} board, found {model:?}"
            )));
        }
        Ok(AcquisitionEngine {
            device: Mutex::new(device),
            state: Mutex::new(EngineState::Idle),
            abort: AtomicBool::new(false),
            params: Mutex::new(None),
            last_config: Mutex::new(None),
        })
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    pub fn board_info(&self) -> BoardInfo {
        self.device.lock().unwrap().board_info().clone()
    }

    /// Last committed configuration, for diagnostics.
    pub fn last_config(&self) -> Option<AcquisitionConfig> {
        self.last_config.lock().unwrap().clone()
    }

    /// Open a scoped configuration session, let `build` stage parameter
    /// assignments, then validate and commit them to the card as one batch.
    ///
    /// Nothing is written while `build` runs. See
    /// [`AcquisitionConfig::apply`] for the partial-apply caveat on a
    /// mid-batch device failure; on any commit error the cached diagnostic
    /// config is dropped, since the card state is no longer known.
    pub fn configure<F>(&self, build: F) -> Result<(), DaqError>
    where
        F: FnOnce(&mut ConfigSession) -> Result<(), DaqError>,
    {
        if self.state() != EngineState::Idle {
            return Err(DaqError::AlreadyRunning);
        }
        let mut session = ConfigSession::new();
        build(&mut session)?;
        let cfg = session.into_validated()?;
        let mut device = self.device.lock().unwrap();
        match cfg.apply(&mut *device) {
            Ok(()) => {
                *self.last_config.lock().unwrap() = Some(cfg);
                Ok(())
            }
            Err(e) => {
                *self.last_config.lock().unwrap() = None;
                Err(e)
            }
        }
    }

    /// Validate and store the per-run geometry.
    pub fn set_acquisition_params(&self, params: AcquisitionParams) -> Result<(), DaqError> {
        let device = self.device.lock().unwrap();
        params.validate(device.board_info())?;
        drop(device);
        *self.params.lock().unwrap() = Some(params);
        Ok(())
    }

    /// Request an abort. Honored at the next buffer boundary; the DMA
    /// transfer in flight cannot be interrupted.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Run one acquisition, handing each converted buffer to `on_buffer`.
    pub fn run_with<F>(&self, demux: &dyn Demux, mut on_buffer: F) -> Result<RunSummary, DaqError>
    where
        F: FnMut(usize, TracePair),
    {
        {
            let mut state = self.state.lock().unwrap();
            if *state != EngineState::Idle {
                return Err(DaqError::AlreadyRunning);
            }
            *state = EngineState::Armed;
        }
        self.abort.store(false, Ordering::SeqCst);
        let result = self.acquire(demux, &mut on_buffer);
        *self.state.lock().unwrap() = EngineState::Idle;
        result
    }

    /// Run one acquisition and collect the converted records into one trace
    /// pair. This is the high-level surface; `run_with` streams buffers to
    /// a callback instead.
    pub fn run_acquisition(&self, demux: &dyn Demux) -> Result<AcquiredTraces, DaqError> {
        let samples = self
            .params
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.samples_per_record)
            .ok_or_else(|| DaqError::Configuration("acquisition parameters not set".into()))?;

        let mut parts_a = Vec::new();
        let mut parts_b = Vec::new();
        let summary = self.run_with(demux, |_, traces| {
            if traces.chan_a.nrows() > 0 {
                parts_a.push(traces.chan_a);
            }
            if traces.chan_b.nrows() > 0 {
                parts_b.push(traces.chan_b);
            }
        })?;

        Ok(AcquiredTraces {
            chan_a: stack_records(parts_a, samples)?,
            chan_b: stack_records(parts_b, samples)?,
            records_completed: summary.records_completed,
            buffers_completed: summary.buffers_completed,
            partial: summary.partial,
            error: summary.error,
        })
    }

    fn acquire<F>(&self, demux: &dyn Demux, on_buffer: &mut F) -> Result<RunSummary, DaqError>
    where
        F: FnMut(usize, TracePair),
    {
        let params = self
            .params
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DaqError::Configuration("acquisition parameters not set".into()))?;
        let cfg = self.last_config.lock().unwrap().clone().unwrap_or_default();

        let mut device = self.device.lock().unwrap();
        let info = device.board_info().clone();
        params.validate(&info)?;

        let conv = Conversion::new(&info, cfg.channels[0].range, cfg.channels[1].range);
        let bytes = params
            .bytes_per_buffer(conv.bytes_per_sample())
            .ok_or_else(|| DaqError::Configuration("buffer byte size overflows".into()))?;
        let mut pool = BufferPool::allocate(params.allocated_buffers, bytes)?;

        let outcome = Self::drive(
            &mut *device,
            &mut pool,
            &params,
            &conv,
            demux,
            &self.abort,
            &self.state,
            on_buffer,
        );

        // Whatever happened, stop the card, reclaim outstanding buffers and
        // release the pinned pool before reporting.
        let _ = device.abort_capture();
        pool.reclaim_all();
        pool.destroy();

        let (buffers_completed, aborted, error) = outcome?;
        let finite = params.buffers_per_acquisition > 0;
        if aborted {
            info!("acquisition aborted after {buffers_completed} buffers");
        }
        Ok(RunSummary {
            buffers_completed,
            records_completed: buffers_completed * params.records_per_buffer,
            partial: error.is_some()
                || (finite && buffers_completed < params.buffers_per_acquisition),
            error,
        })
    }

    /// The hot loop: post everything, start, then wait/convert/repost per
    /// buffer in round-robin slot order.
    #[allow(clippy::too_many_arguments)]
    fn drive<F>(
        device: &mut D,
        pool: &mut BufferPool,
        params: &AcquisitionParams,
        conv: &Conversion,
        demux: &dyn Demux,
        abort: &AtomicBool,
        state: &Mutex<EngineState>,
        on_buffer: &mut F,
    ) -> Result<(usize, bool, Option<DaqError>), DaqError>
    where
        F: FnMut(usize, TracePair),
    {
        let n_alloc = params.allocated_buffers;
        let bpa = params.buffers_per_acquisition;
        let streaming = bpa == 0;
        let bytes = pool.buffer_len();

        device.arm(&ArmRequest {
            channel_mask: params.channel_selection.code(),
            transfer_offset: params.transfer_offset,
            samples_per_record: params.samples_per_record,
            records_per_buffer: params.records_per_buffer,
            records_per_acquisition: if streaming {
                RECORDS_INFINITE
            } else {
                params.records_per_buffer * bpa
            },
            flags: params.flags_word(),
        })?;

        // Every allocated buffer is posted before capture starts. The card
        // begins filling immediately on start; an un-posted slot at that
        // point is dropped data.
        for _ in 0..n_alloc {
            let slot = pool.acquire_free()?;
            device.post_buffer(pool.slot_ptr(slot), bytes)?;
            pool.mark_posted(slot)?;
        }

        *state.lock().unwrap() = EngineState::Running;
        device.start_capture()?;
        if streaming {
            info!("capture started, streaming until abort");
        } else {
            info!(
                "capture started: {bpa} buffers x {} records",
                params.records_per_buffer
            );
        }

        let mut posted = n_alloc;
        let mut completed = 0usize;
        loop {
            if !streaming && completed == bpa {
                break;
            }
            if abort.load(Ordering::SeqCst) {
                *state.lock().unwrap() = EngineState::Aborting;
                return Ok((completed, true, None));
            }

            let slot = completed % n_alloc;
            if let Err(e) = device.wait_buffer(pool.slot_ptr(slot), params.buffer_timeout) {
                *state.lock().unwrap() = EngineState::Aborting;
                return match e {
                    DaqError::Timeout { .. } => {
                        warn!(
                            "buffer {completed} not filled within {:?}",
                            params.buffer_timeout
                        );
                        Ok((
                            completed,
                            false,
                            Some(DaqError::Timeout {
                                slot,
                                timeout: params.buffer_timeout,
                            }),
                        ))
                    }
                    DaqError::Overrun(_) => {
                        warn!("device overrun at buffer {completed}, data lost");
                        Ok((completed, false, Some(DaqError::Overrun(completed))))
                    }
                    other => Err(other),
                };
            }

            pool.mark_filled(slot)?;
            pool.mark_processing(slot)?;
            let traces = demux.demux(pool.slot_slice(slot), params, conv)?;
            on_buffer(completed, traces);
            pool.release(slot)?;
            completed += 1;

            // Keep the card fed: the slot goes straight back out while
            // records remain.
            if streaming || posted < bpa {
                device.post_buffer(pool.slot_ptr(slot), bytes)?;
                pool.mark_posted(slot)?;
                posted += 1;
            }
        }

        // All records are in. Give any slot still with the card one final
        // bounded wait before it is stopped.
        *state.lock().unwrap() = EngineState::Draining;
        for slot in 0..pool.len() {
            if pool.state_of(slot) == Some(BufferState::Posted) {
                let _ = device.wait_buffer(pool.slot_ptr(slot), params.buffer_timeout);
            }
        }
        Ok((completed, false, None))
    }
}

fn stack_records(parts: Vec<Array2<f64>>, samples: usize) -> Result<Array2<f64>, DaqError> {
    if parts.is_empty() {
        return Ok(Array2::zeros((0, samples)));
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(0), &views)
        .map_err(|e| DaqError::Configuration(format!("trace concatenation failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use crate::demux::ScalarDemux;
    use crate::sim::SimBoard;

    fn engine_with(board: SimBoard) -> AcquisitionEngine<SimBoard> {
        AcquisitionEngine::new(board).unwrap()
    }

    fn small_params(buffers: usize, allocated: usize) -> AcquisitionParams {
        AcquisitionParams::new(256, 4, buffers, allocated)
    }

    #[test]
    fn rejects_foreign_board_models() {
        let mut board = SimBoard::ats9371();
        let info = board.board_info().clone();
        board = SimBoard::new(
            BoardInfo {
                model: "ATS9360".into(),
                ..info
            },
            crate::sim::FillPattern::Ramp,
        );
        assert!(matches!(
            AcquisitionEngine::new(board),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn geometry_validation() {
        let info = SimBoard::ats9371().board_info().clone();

        // unaligned record length
        assert!(AcquisitionParams::new(300, 4, 1, 1).validate(&info).is_err());
        // below minimum
        assert!(AcquisitionParams::new(128, 4, 1, 1).validate(&info).is_err());
        // more slots than buffers in a finite run
        assert!(AcquisitionParams::new(256, 4, 2, 4).validate(&info).is_err());
        // streaming run may hold any number of slots
        assert!(AcquisitionParams::new(256, 4, 0, 4).validate(&info).is_ok());
        assert!(small_params(4, 2).validate(&info).is_ok());
    }

    #[test]
    fn buffer_size_formula_and_ceiling() {
        let mut info = SimBoard::ats9371().board_info().clone();
        info.bits_per_sample = 8;
        info.zero_code = 128;

        let params = AcquisitionParams::new(3200, 8192, 1, 1);
        assert_eq!(
            params.bytes_per_buffer(info.bytes_per_sample()),
            Some(3200 * 8192 * 2)
        );
        assert!(params.validate(&info).is_ok());

        // doubling the records blows the 84 MiB transfer ceiling
        let too_big = AcquisitionParams::new(3200, 16384, 1, 1);
        assert!(matches!(
            too_big.validate(&info),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn full_acquisition_produces_ramp_voltages() {
        let engine = engine_with(SimBoard::ats9371());
        engine.set_acquisition_params(small_params(6, 2)).unwrap();

        let result = engine.run_acquisition(&ScalarDemux).unwrap();
        assert!(!result.partial);
        assert!(result.error.is_none());
        assert_eq!(result.buffers_completed, 6);
        assert_eq!(result.records_completed, 24);
        assert_eq!(result.chan_a.dim(), (24, 256));
        assert_eq!(result.chan_b.dim(), (24, 256));

        let info = engine.board_info();
        for s in [0usize, 1, 100, 255] {
            let code_a = f64::from(SimBoard::ramp_code(&info, s, 0));
            let code_b = f64::from(SimBoard::ramp_code(&info, s, 1));
            let want_a = (code_a - 32760.0) / 32768.0 * 0.4;
            let want_b = (code_b - 32760.0) / 32768.0 * 0.4;
            assert_eq!(result.chan_a[[0, s]], want_a);
            assert_eq!(result.chan_b[[17, s]], want_b);
        }

        // the engine is reusable once back in Idle
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.run_acquisition(&ScalarDemux).is_ok());
    }

    #[test]
    fn overrun_on_third_of_ten_keeps_two_buffers() {
        let mut board = SimBoard::ats9371();
        board.overrun_on_buffer(2);
        let engine = engine_with(board);
        engine.set_acquisition_params(small_params(10, 2)).unwrap();

        let result = engine.run_acquisition(&ScalarDemux).unwrap();
        assert!(result.partial);
        assert!(matches!(result.error, Some(DaqError::Overrun(2))));
        assert_eq!(result.buffers_completed, 2);
        assert_eq!(result.records_completed, 8);
        assert_eq!(result.chan_a.dim(), (8, 256));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn timeout_aborts_with_partial_data() {
        let mut board = SimBoard::ats9371();
        board.timeout_on_buffer(1);
        let engine = engine_with(board);
        engine.set_acquisition_params(small_params(4, 2)).unwrap();

        let result = engine.run_acquisition(&ScalarDemux).unwrap();
        assert!(result.partial);
        assert!(matches!(result.error, Some(DaqError::Timeout { .. })));
        assert_eq!(result.buffers_completed, 1);
        assert_eq!(result.chan_a.nrows(), 4);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn concurrent_run_is_refused() {
        let mut board = SimBoard::ats9371();
        board.set_wait_delay(Duration::from_millis(20));
        let engine = Arc::new(engine_with(board));
        engine.set_acquisition_params(small_params(0, 2)).unwrap();

        let background = Arc::clone(&engine);
        let handle = thread::spawn(move || background.run_with(&ScalarDemux, |_, _| {}));

        thread::sleep(Duration::from_millis(50));
        assert!(matches!(
            engine.run_acquisition(&ScalarDemux),
            Err(DaqError::AlreadyRunning)
        ));

        engine.abort();
        let summary = handle.join().unwrap().unwrap();
        assert!(summary.error.is_none());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn streaming_runs_until_abort() {
        let mut board = SimBoard::ats9371();
        board.set_wait_delay(Duration::from_millis(5));
        let engine = Arc::new(engine_with(board));
        engine.set_acquisition_params(small_params(0, 3)).unwrap();

        let background = Arc::clone(&engine);
        let handle = thread::spawn(move || background.run_acquisition(&ScalarDemux));

        thread::sleep(Duration::from_millis(60));
        engine.abort();
        let result = handle.join().unwrap().unwrap();

        assert!(result.error.is_none());
        assert!(!result.partial);
        assert!(result.buffers_completed > 0);
        assert_eq!(result.chan_a.nrows(), result.records_completed);
        assert_eq!(engine.state(), EngineState::Idle);

        // everything was reclaimed; a fresh run works
        engine.set_acquisition_params(small_params(2, 2)).unwrap();
        assert!(engine.run_acquisition(&ScalarDemux).is_ok());
    }

    #[test]
    fn missing_params_fail_before_hardware() {
        let engine = engine_with(SimBoard::ats9371());
        assert!(matches!(
            engine.run_acquisition(&ScalarDemux),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn eight_bit_scenario_traces_stay_in_range() {
        let mut info = SimBoard::ats9371().board_info().clone();
        info.bits_per_sample = 8;
        info.zero_code = 128;
        let board = SimBoard::new(info, crate::sim::FillPattern::Ramp);
        let engine = engine_with(board);

        let params = AcquisitionParams::new(3200, 8192, 1, 1);
        engine.set_acquisition_params(params).unwrap();

        let mut shape = None;
        let mut in_range = true;
        let summary = engine
            .run_with(&ScalarDemux, |_, traces| {
                in_range = in_range
                    && traces.chan_a.iter().all(|&v| (-0.4..=0.4).contains(&v))
                    && traces.chan_b.iter().all(|&v| (-0.4..=0.4).contains(&v));
                shape = Some(traces.chan_a.dim());
            })
            .unwrap();

        assert!(!summary.partial);
        assert_eq!(summary.records_completed, 8192);
        assert_eq!(shape, Some((8192, 3200)));
        assert!(in_range);
    }
}

use ndarray::{Array2, Array3, Axis};

use crate::acquisition::AcquisitionParams;
use crate::device::BoardInfo;
use crate::error::DaqError;
use crate::params::{Channel, InputRange};

/// Fixed-point calibration facts needed to turn raw codes into volts.
#[derive(Debug, Clone, Copy)]
pub struct Conversion {
    pub bits_per_sample: u8,
    pub zero_code: f64,
    /// Input range per physical channel, volts, symmetric about 0.
    pub range_volts: [f64; 2],
}

impl Conversion {
    pub fn new(info: &BoardInfo, range_a: InputRange, range_b: InputRange) -> Self {
        Conversion {
            bits_per_sample: info.bits_per_sample,
            zero_code: f64::from(info.zero_code),
            range_volts: [range_a.volts(), range_b.volts()],
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }

    fn half_scale(&self) -> f64 {
        f64::from(1u32 << (self.bits_per_sample - 1))
    }

    fn range_of(&self, channel: Channel) -> f64 {
        match channel {
            Channel::A => self.range_volts[0],
            Channel::B => self.range_volts[1],
        }
    }
}

/// voltage = (code - zero) / 2^(w-1) * range, computed entirely in f64.
///
/// Both demux strategies route every sample through this one expression so
/// their outputs are bit-identical.
#[inline(always)]
fn code_to_volts(code: f64, zero: f64, half_scale: f64, range: f64) -> f64 {
    (code - zero) / half_scale * range
}

/// Per-channel voltage traces of one buffer (or one whole acquisition).
///
/// Always two slots: an unselected channel is an empty 0-row array, never an
/// omitted field, so the shape of the result does not depend on
/// channel_selection.
#[derive(Debug, Clone, PartialEq)]
pub struct TracePair {
    pub chan_a: Array2<f64>,
    pub chan_b: Array2<f64>,
}

impl TracePair {
    pub fn empty(samples_per_record: usize) -> Self {
        TracePair {
            chan_a: Array2::zeros((0, samples_per_record)),
            chan_b: Array2::zeros((0, samples_per_record)),
        }
    }
}

/// Strategy interface for the raw-to-voltage conversion stage.
///
/// Implementations must produce identical output for identical input; they
/// are interchangeable and differ only in how they execute.
pub trait Demux: Send + Sync {
    fn demux(
        &self,
        raw: &[u8],
        params: &AcquisitionParams,
        conv: &Conversion,
    ) -> Result<TracePair, DaqError>;
}

fn check_layout(
    raw: &[u8],
    params: &AcquisitionParams,
    conv: &Conversion,
) -> Result<usize, DaqError> {
    let bytes = conv.bytes_per_sample();
    if bytes != 1 && bytes != 2 {
        return Err(DaqError::Configuration(format!(
            "unsupported sample width: {} bits",
            conv.bits_per_sample
        )));
    }
    let expected = params.records_per_buffer
        * params.samples_per_record
        * params.channel_selection.count()
        * bytes;
    if raw.len() != expected {
        return Err(DaqError::Configuration(format!(
            "raw buffer is {} bytes, layout needs {expected}",
            raw.len()
        )));
    }
    Ok(bytes)
}

/// Physical channels present in the interleaved stream, in stream order.
fn stream_channels(params: &AcquisitionParams) -> Vec<Channel> {
    let mut channels = Vec::with_capacity(2);
    if params.channel_selection.includes_a() {
        channels.push(Channel::A);
    }
    if params.channel_selection.includes_b() {
        channels.push(Channel::B);
    }
    channels
}

/// Batch-vectorized strategy: lift the whole buffer into an ndarray cube and
/// transform each channel plane in one pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorDemux;

impl Demux for VectorDemux {
    fn demux(
        &self,
        raw: &[u8],
        params: &AcquisitionParams,
        conv: &Conversion,
    ) -> Result<TracePair, DaqError> {
        let bytes = check_layout(raw, params, conv)?;
        let records = params.records_per_buffer;
        let samples = params.samples_per_record;
        let channels = stream_channels(params);
        let zero = conv.zero_code;
        let half = conv.half_scale();

        let codes: Vec<f64> = if bytes == 1 {
            raw.iter().map(|&b| f64::from(b)).collect()
        } else {
            raw.chunks_exact(2)
                .map(|c| f64::from(u16::from_le_bytes([c[0], c[1]])))
                .collect()
        };
        let cube = Array3::from_shape_vec((records, samples, channels.len()), codes)
            .map_err(|e| DaqError::Configuration(format!("buffer reshape failed: {e}")))?;

        let mut traces = TracePair::empty(samples);
        for (idx, &channel) in channels.iter().enumerate() {
            let range = conv.range_of(channel);
            let plane = cube
                .index_axis(Axis(2), idx)
                .map(|&c| code_to_volts(c, zero, half, range));
            match channel {
                Channel::A => traces.chan_a = plane,
                Channel::B => traces.chan_b = plane,
            }
        }
        Ok(traces)
    }
}

/// Tight-loop strategy: one pass over the interleaved stream, per-sample
/// conversion, no intermediate allocation beyond the output arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarDemux;

impl Demux for ScalarDemux {
    fn demux(
        &self,
        raw: &[u8],
        params: &AcquisitionParams,
        conv: &Conversion,
    ) -> Result<TracePair, DaqError> {
        let bytes = check_layout(raw, params, conv)?;
        let records = params.records_per_buffer;
        let samples = params.samples_per_record;
        let channels = stream_channels(params);
        let n_ch = channels.len();
        let zero = conv.zero_code;
        let half = conv.half_scale();

        let mut traces = TracePair::empty(samples);
        for (idx, &channel) in channels.iter().enumerate() {
            let range = conv.range_of(channel);
            let mut out = Array2::<f64>::zeros((records, samples));
            for r in 0..records {
                let row_base = r * samples * n_ch;
                for s in 0..samples {
                    let pos = row_base + s * n_ch + idx;
                    let code = if bytes == 1 {
                        f64::from(raw[pos])
                    } else {
                        f64::from(u16::from_le_bytes([raw[pos * 2], raw[pos * 2 + 1]]))
                    };
                    out[[r, s]] = code_to_volts(code, zero, half, range);
                }
            }
            match channel {
                Channel::A => traces.chan_a = out,
                Channel::B => traces.chan_b = out,
            }
        }
        Ok(traces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ChannelSelection;

    fn board_16bit() -> BoardInfo {
        BoardInfo {
            model: "ATS9371".into(),
            serial: "0".into(),
            firmware: "35.00".into(),
            bits_per_sample: 16,
            zero_code: 32760,
            max_transfer_bytes: 84 * 1024 * 1024,
            channels: 2,
        }
    }

    fn conv_16bit() -> Conversion {
        Conversion::new(&board_16bit(), InputRange::Mv400, InputRange::Mv400)
    }

    fn params(records: usize, samples: usize, selection: ChannelSelection) -> AcquisitionParams {
        let mut p = AcquisitionParams::new(samples, records, 1, 1);
        p.channel_selection = selection;
        p
    }

    /// Interleaved 16-bit buffer whose code encodes its own position.
    fn positional_buffer(records: usize, samples: usize, n_ch: usize) -> Vec<u8> {
        let mut raw = Vec::with_capacity(records * samples * n_ch * 2);
        for r in 0..records {
            for s in 0..samples {
                for ch in 0..n_ch {
                    let code = (30000 + r * 1000 + s * 10 + ch) as u16;
                    raw.extend_from_slice(&code.to_le_bytes());
                }
            }
        }
        raw
    }

    #[test]
    fn strategies_are_bit_identical() {
        let raw = positional_buffer(3, 8, 2);
        let p = params(3, 8, ChannelSelection::Both);
        let conv = conv_16bit();

        let vec_out = VectorDemux.demux(&raw, &p, &conv).unwrap();
        let scalar_out = ScalarDemux.demux(&raw, &p, &conv).unwrap();
        assert_eq!(vec_out, scalar_out);
    }

    #[test]
    fn deinterleave_preserves_record_and_sample_order() {
        let raw = positional_buffer(2, 4, 2);
        let p = params(2, 4, ChannelSelection::Both);
        let conv = conv_16bit();
        let out = ScalarDemux.demux(&raw, &p, &conv).unwrap();

        let half = f64::from(1u32 << 15);
        for r in 0..2 {
            for s in 0..4 {
                let code_a = (30000 + r * 1000 + s * 10) as f64;
                let code_b = code_a + 1.0;
                let want_a = (code_a - 32760.0) / half * 0.4;
                let want_b = (code_b - 32760.0) / half * 0.4;
                assert_eq!(out.chan_a[[r, s]], want_a);
                assert_eq!(out.chan_b[[r, s]], want_b);
            }
        }
    }

    #[test]
    fn single_channel_keeps_two_slot_result() {
        let records = 2;
        let samples = 4;
        let mut raw = Vec::new();
        for i in 0..records * samples {
            raw.extend_from_slice(&(32000u16 + i as u16).to_le_bytes());
        }
        let p = params(records, samples, ChannelSelection::A);
        let out = VectorDemux.demux(&raw, &p, &conv_16bit()).unwrap();
        assert_eq!(out.chan_a.dim(), (records, samples));
        assert_eq!(out.chan_b.dim(), (0, samples));

        let p = params(records, samples, ChannelSelection::B);
        let out = VectorDemux.demux(&raw, &p, &conv_16bit()).unwrap();
        assert_eq!(out.chan_a.dim(), (0, samples));
        assert_eq!(out.chan_b.dim(), (records, samples));
    }

    #[test]
    fn round_trip_is_within_one_lsb() {
        let conv = conv_16bit();
        let half = f64::from(1u32 << 15);
        let lsb = 0.4 / half;
        // the zero code sits at 32760, so -0.4 itself falls just below code
        // 0 and is not encodable; stay inside the representable window
        let voltages = [-0.399, -0.123456, -0.0001, 0.0, 0.0789, 0.25, 0.399];

        let mut raw = Vec::new();
        for &v in &voltages {
            let code = (v / 0.4 * half + 32760.0).round() as u16;
            raw.extend_from_slice(&code.to_le_bytes());
        }
        // pad to one record of 8 samples, single channel
        raw.extend_from_slice(&32760u16.to_le_bytes());
        let p = params(1, 8, ChannelSelection::A);
        let out = ScalarDemux.demux(&raw, &p, &conv).unwrap();

        for (i, &v) in voltages.iter().enumerate() {
            assert!(
                (out.chan_a[[0, i]] - v).abs() <= lsb,
                "sample {i}: {} vs {v}",
                out.chan_a[[0, i]]
            );
        }
    }

    #[test]
    fn eight_bit_codes_convert() {
        let info = BoardInfo {
            bits_per_sample: 8,
            zero_code: 128,
            ..board_16bit()
        };
        let conv = Conversion::new(&info, InputRange::Mv400, InputRange::Mv400);
        // one record, two samples, both channels: A=255, B=128, A=0, B=64
        let raw = vec![255u8, 128, 0, 64];
        let p = params(1, 2, ChannelSelection::Both);

        let out = ScalarDemux.demux(&raw, &p, &conv).unwrap();
        assert_eq!(out.chan_a[[0, 0]], (255.0 - 128.0) / 128.0 * 0.4);
        assert_eq!(out.chan_b[[0, 0]], 0.0);
        assert_eq!(out.chan_a[[0, 1]], (0.0 - 128.0) / 128.0 * 0.4);
        assert_eq!(out.chan_b[[0, 1]], (64.0 - 128.0) / 128.0 * 0.4);

        let vec_out = VectorDemux.demux(&raw, &p, &conv).unwrap();
        assert_eq!(out, vec_out);
    }

    #[test]
    fn wrong_buffer_length_is_rejected() {
        let raw = vec![0u8; 10];
        let p = params(2, 4, ChannelSelection::Both);
        assert!(matches!(
            ScalarDemux.demux(&raw, &p, &conv_16bit()),
            Err(DaqError::Configuration(_))
        ));
    }
}

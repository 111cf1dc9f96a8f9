use anyhow::{anyhow, Result};
use hdf5::{Dataset, File, Group};
use ndarray::{s, Array2};

use crate::demux::TracePair;

/// Writes converted voltage traces to HDF5, one group per channel.
///
/// Both channel groups always exist so the file layout does not depend on
/// channel_selection; an unselected channel simply ends the run with zero
/// rows written.
pub struct TraceWriter {
    pub file: File,
    pub chan_a: ChannelData,
    pub chan_b: ChannelData,
}

impl TraceWriter {
    pub fn new(
        filename: &str,
        samples_per_record: usize,
        max_records: usize,
        chunk_records: usize,
        compression_level: u8,
    ) -> Result<Self> {
        let file = File::create(filename)?;

        let group_a = file.create_group("chan_a")?;
        let group_b = file.create_group("chan_b")?;

        let chunk = chunk_records.min(max_records).max(1);
        let chan_a = ChannelData::new(
            &group_a,
            samples_per_record,
            max_records,
            chunk,
            compression_level,
        )?;
        let chan_b = ChannelData::new(
            &group_b,
            samples_per_record,
            max_records,
            chunk,
            compression_level,
        )?;

        Ok(Self {
            file,
            chan_a,
            chan_b,
        })
    }

    /// Append one converted buffer's worth of records.
    pub fn append(&mut self, traces: &TracePair) -> Result<()> {
        self.chan_a.append(&traces.chan_a)?;
        self.chan_b.append(&traces.chan_b)?;
        Ok(())
    }

    pub fn records_written(&self) -> (usize, usize) {
        (self.chan_a.written, self.chan_b.written)
    }
}

/// One channel's trace dataset.
pub struct ChannelData {
    pub dataset: Dataset,
    pub written: usize,
    pub max_records: usize,
    pub samples_per_record: usize,
}

impl ChannelData {
    pub fn new(
        group: &Group,
        samples_per_record: usize,
        max_records: usize,
        chunk_records: usize,
        compression_level: u8,
    ) -> Result<Self> {
        let mut builder = group
            .new_dataset::<f64>()
            .shape((max_records, samples_per_record))
            .chunk((chunk_records, samples_per_record));
        if compression_level > 0 {
            builder = builder.deflate(compression_level);
        }
        let dataset = builder.create("traces")?;

        Ok(Self {
            dataset,
            written: 0,
            max_records,
            samples_per_record,
        })
    }

    /// Append a slab of records. A 0-row slab (unselected channel) is a
    /// no-op.
    pub fn append(&mut self, slab: &Array2<f64>) -> Result<()> {
        let (rows, samples) = slab.dim();
        if rows == 0 {
            return Ok(());
        }
        if samples != self.samples_per_record {
            return Err(anyhow!(
                "slab has {samples} samples per record, dataset holds {}",
                self.samples_per_record
            ));
        }
        if self.written + rows > self.max_records {
            return Err(anyhow!("dataset full: {} records", self.max_records));
        }

        let to_write = slab.slice(s![.., ..]).to_owned();
        self.dataset
            .write_slice(&to_write, (self.written..self.written + rows, ..))?;
        self.written += rows;
        Ok(())
    }
}

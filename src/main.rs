use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use ats_daq::*;
use clap::Parser;
use confique::Config;
use crossbeam_channel::{tick, unbounded};
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use time::macros::format_description;

#[derive(Parser, Debug)]
#[command(version, about = "Acquire calibrated voltage traces from an ATS9371-class digitizer")]
struct Cli {
    /// Path to the TOML run configuration
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the demux strategy from the config file (scalar | vector)
    #[arg(long)]
    demux: Option<String>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_config = ConfigBuilder::new()
        .set_time_format_custom(format_description!(
            "[hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .build();
    TermLogger::init(level, log_config, TerminalMode::Mixed, ColorChoice::Auto)?;

    let conf = Conf::builder()
        .env()
        .file(&cli.config)
        .load()
        .map_err(|e| anyhow!("loading {}: {e}", cli.config.display()))?;

    let demux_kind = match cli.demux.as_deref() {
        Some("scalar") => DemuxKind::Scalar,
        Some("vector") => DemuxKind::Vector,
        Some(other) => bail!("unknown demux strategy {other:?}"),
        None => conf.run_settings.demux,
    };

    run(conf, demux_kind)
}

fn run(conf: Conf, demux_kind: DemuxKind) -> Result<()> {
    if conf.run_settings.buffers_per_acquisition == 0 {
        bail!("streaming runs (buffers_per_acquisition = 0) cannot be routed to a file writer");
    }

    // No register backend here: the pipeline runs against the bundled
    // simulator, which models an always-triggering board.
    let mut board = SimBoard::ats9371();
    board.set_pattern(FillPattern::Sine {
        period: conf.run_settings.samples_per_record / 4,
        noise: 64,
    });

    let engine = Arc::new(AcquisitionEngine::new(board)?);
    let info = engine.board_info();
    info!(
        "board {} s/n {} fw {} ({} bit)",
        info.model, info.serial, info.firmware, info.bits_per_sample
    );

    engine.configure(|session| conf.stage(session))?;

    let params = conf.acquisition_params()?;
    engine.set_acquisition_params(params.clone())?;
    let buf_bytes = params
        .bytes_per_buffer(info.bytes_per_sample())
        .ok_or_else(|| anyhow!("buffer byte size overflows"))?;
    info!(
        "run geometry: {} buffers x {} records x {} samples ({:.1} MB per buffer)",
        params.buffers_per_acquisition,
        params.records_per_buffer,
        params.samples_per_record,
        buf_bytes as f64 / (1024.0 * 1024.0)
    );

    let run_file = create_run_file(&conf.run_settings.output_dir)?;
    info!("writing {}", run_file.display());

    let (tx_traces, rx_traces) = unbounded::<(usize, TracePair)>();
    let (tx_stats, rx_stats) = unbounded::<(usize, usize)>();

    let samples = params.samples_per_record;
    let records_per_buffer = params.records_per_buffer;
    let max_records = records_per_buffer * params.buffers_per_acquisition;
    let compression = conf.run_settings.compression_level;
    let writer_path = run_file
        .to_str()
        .ok_or_else(|| anyhow!("run file path is not valid UTF-8"))?
        .to_owned();
    let writer_handle = thread::spawn(move || -> Result<()> {
        let mut writer = TraceWriter::new(
            &writer_path,
            samples,
            max_records,
            records_per_buffer,
            compression,
        )?;
        while let Ok((_idx, traces)) = rx_traces.recv() {
            writer.append(&traces)?;
            if tx_stats.send((buf_bytes, records_per_buffer)).is_err() {
                break;
            }
        }
        let (a, b) = writer.records_written();
        info!("wrote {a} records on channel A, {b} on channel B");
        Ok(())
    });

    let acq_engine = Arc::clone(&engine);
    let demux = demux_kind.build();
    let acq_handle = thread::spawn(move || {
        acq_engine.run_with(&*demux, move |idx, traces| {
            if tx_traces.send((idx, traces)).is_err() {
                warn!("writer gone, dropping buffer {idx}");
            }
        })
    });

    let ticker = tick(Duration::from_secs(1));
    let mut counter = Counter::new();
    loop {
        let _ = ticker.recv();
        while let Ok((bytes, records)) = rx_stats.try_recv() {
            counter.increment(bytes, records);
        }
        info!(
            "elapsed {:>4} s  buffers {:>6}  records {:>9}  rate {:>8.2} MB/s",
            counter.t_begin.elapsed().as_secs(),
            counter.n_buffers,
            counter.n_records,
            counter.rate()
        );
        if acq_handle.is_finished() {
            break;
        }
    }

    let summary = acq_handle
        .join()
        .map_err(|_| anyhow!("acquisition thread panicked"))??;
    writer_handle
        .join()
        .map_err(|_| anyhow!("writer thread panicked"))??;
    while let Ok((bytes, records)) = rx_stats.try_recv() {
        counter.increment(bytes, records);
    }

    match &summary.error {
        Some(err) => warn!(
            "acquisition ended early after {} of {} buffers (partial data kept): {err}",
            summary.buffers_completed, conf.run_settings.buffers_per_acquisition
        ),
        None => info!(
            "acquisition complete: {} buffers, {} records, avg {:.2} MB/s",
            summary.buffers_completed,
            summary.records_completed,
            counter.average_rate()
        ),
    }

    Ok(())
}

/// Next free acq<N>.h5 in the output directory.
fn create_run_file(output_dir: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(output_dir);
    std::fs::create_dir_all(&dir)?;

    let max_run = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("acq").map(str::to_owned))
                .and_then(|rest| rest.strip_suffix(".h5").map(str::to_owned))
                .and_then(|num| num.parse::<usize>().ok())
        })
        .max();

    let next = max_run.map_or(0, |n| n + 1);
    Ok(dir.join(format!("acq{next}.h5")))
}

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::Level;
use serde::Serialize;

use super::command::{Cli, InfoArgs};
use crate::input::InputReader;
use ogv::process::demux::Demuxer;
use ogv::process::headers::{HeaderParser, classify};
use ogv::structs::headers::{DecodeContext, PixelFormat};
use ogv::structs::packet::{Packet, StreamKind};
use ogv::utils::errors::DemuxError;

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing Ogg video stream: {}", args.input.display());

    let report = analyze_stream(&args.input, cli, multi)?;

    match report {
        Some(report) => {
            if args.yaml {
                print!("{}", serde_yaml_ng::to_string(&report)?);
            } else {
                display_report(&report);
            }
        }
        None => {
            println!("No recognized video stream found in the file.");
            println!("This doesn't appear to be a valid Ogg video stream.");
        }
    }

    Ok(())
}

fn analyze_stream(
    input_path: &Path,
    cli: &Cli,
    multi: Option<&MultiProgress>,
) -> Result<Option<StreamReport>> {
    let mut input_reader = InputReader::new(input_path)?;
    let mut demuxer = Demuxer::default();
    let mut parser = HeaderParser::default();

    // Configure fail level based on strict mode
    let fail_level = if cli.strict {
        Level::Warn
    } else {
        Level::Error
    };
    demuxer.set_fail_level(fail_level);
    parser.set_fail_level(fail_level);

    let mut context = AnalysisContext {
        file: input_path.display().to_string(),
        ..Default::default()
    };

    if let Some(multi) = multi {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb.set_message("Analyzing pages...");
        context.pb = Some(pb);
    }

    input_reader.process_chunks(64 * 1024, |chunk| {
        context.total_bytes += chunk.len();
        demuxer.push_bytes(chunk);

        for result in demuxer.by_ref() {
            match result {
                Ok(packet) => context.process_packet(&packet, &mut parser, cli)?,
                Err(DemuxError::InsufficientData) => break,
                Err(error) => {
                    if cli.strict {
                        return Err(error.into());
                    }
                    log::warn!("{error}");
                }
            }
        }

        Ok(true)
    })?;

    if let Some(error) = demuxer.finish() {
        if cli.strict {
            return Err(error.into());
        }
        log::warn!("{error}");
    }

    Ok(context.into_report(&demuxer, &parser))
}

#[derive(Default)]
struct StreamTally {
    kind: Option<StreamKind>,
    packets: u64,
    last_granule: Option<i64>,
}

#[derive(Default)]
struct AnalysisContext {
    file: String,
    streams: HashMap<u32, StreamTally>,
    video_serial: Option<u32>,
    video_context: Option<DecodeContext>,
    header_failed: bool,
    packet_count: u64,
    total_bytes: usize,
    pb: Option<ProgressBar>,
}

impl AnalysisContext {
    fn process_packet(&mut self, packet: &Packet, parser: &mut HeaderParser, cli: &Cli) -> Result<()> {
        self.packet_count += 1;
        let serial = packet.serial;

        let tally = self.streams.entry(serial).or_default();
        if tally.kind.is_none() {
            let kind = classify(packet);
            tally.kind = Some(kind);
            if kind == StreamKind::Video && self.video_serial.is_none() {
                self.video_serial = Some(serial);
            }
        }
        tally.packets += 1;
        if let Some(granule) = packet.granule_position {
            tally.last_granule = Some(granule);
        }

        if Some(serial) == self.video_serial && !parser.is_complete() && !self.header_failed {
            match parser.parse(packet) {
                Ok(Some(context)) => self.video_context = Some(context),
                Ok(None) => {}
                Err(error) => {
                    if cli.strict {
                        return Err(error);
                    }
                    self.header_failed = true;
                    log::warn!("Header parse error in stream {serial:#010X}: {error}");
                }
            }
        }

        if self.packet_count.is_multiple_of(100) {
            if let Some(ref pb) = self.pb {
                pb.set_message(format!("Analyzing pages...       {} packets", self.packet_count));
                pb.tick();
            }
        }

        Ok(())
    }

    fn into_report(self, demuxer: &Demuxer, parser: &HeaderParser) -> Option<StreamReport> {
        if let Some(ref pb) = self.pb {
            pb.finish_and_clear();
        }

        let video_context = self.video_context?;
        let serial = self.video_serial?;
        let ident = &video_context.ident;

        let frames = self
            .streams
            .get(&serial)
            .and_then(|tally| tally.last_granule)
            .map(|granule| ident.granule_to_frame_count(granule));
        let duration_seconds = frames.map(|frames| frames as f64 / ident.frame_rate());

        let aspect_ratio = (ident.aspect_numerator != 0 && ident.aspect_denominator != 0)
            .then(|| format!("{}:{}", ident.aspect_numerator, ident.aspect_denominator));

        let (vendor, comments) = parser
            .comment()
            .map(|c| (c.vendor.clone(), c.comments.clone()))
            .unwrap_or_default();

        Some(StreamReport {
            file: self.file,
            size_bytes: self.total_bytes,
            pages: demuxer.pages_processed(),
            packets: self.packet_count,
            container_errors: demuxer.error_count(),
            logical_streams: self.streams.len(),
            video: VideoReport {
                serial: format!("{serial:#010X}"),
                version: format!(
                    "{}.{}.{}",
                    ident.version.0, ident.version.1, ident.version.2
                ),
                coded_size: format!("{}x{}", ident.coded_width, ident.coded_height),
                picture_size: format!("{}x{}", ident.pic_width, ident.pic_height),
                picture_offset: format!("+{}+{}", ident.pic_x, ident.pic_y),
                pixel_format: pixel_format_str(ident.pixel_format).to_string(),
                frame_rate: ident.frame_rate(),
                aspect_ratio,
                quality: ident.quality,
                nominal_bitrate: ident.nominal_bitrate,
                vendor,
                comments,
                frames,
                duration_seconds,
            },
        })
    }
}

fn pixel_format_str(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Yuv420 => "4:2:0",
        PixelFormat::Yuv422 => "4:2:2",
        PixelFormat::Yuv444 => "4:4:4",
    }
}

#[derive(Serialize)]
pub struct StreamReport {
    pub file: String,
    pub size_bytes: usize,
    pub pages: usize,
    pub packets: u64,
    pub container_errors: usize,
    pub logical_streams: usize,
    pub video: VideoReport,
}

#[derive(Serialize)]
pub struct VideoReport {
    pub serial: String,
    pub version: String,
    pub coded_size: String,
    pub picture_size: String,
    pub picture_offset: String,
    pub pixel_format: String,
    pub frame_rate: f64,
    pub aspect_ratio: Option<String>,
    pub quality: u8,
    pub nominal_bitrate: u32,
    pub vendor: String,
    pub comments: Vec<String>,
    pub frames: Option<u64>,
    pub duration_seconds: Option<f64>,
}

fn display_report(report: &StreamReport) {
    let video = &report.video;

    println!();
    println!("Ogg Video Stream Information");
    println!("============================");
    println!();

    println!("Stream Information");
    println!("  Serial number             {}", video.serial);
    println!("  Bitstream version         {}", video.version);
    println!("  Coded size                {}", video.coded_size);
    println!(
        "  Picture size              {} at {}",
        video.picture_size, video.picture_offset
    );
    println!("  Pixel format              {}", video.pixel_format);
    println!("  Frame rate                {:.3} fps", video.frame_rate);
    if let Some(aspect) = &video.aspect_ratio {
        println!("  Pixel aspect ratio        {aspect}");
    }
    println!("  Quality                   {}", video.quality);
    if video.nominal_bitrate != 0 {
        println!("  Nominal bitrate           {} bps", video.nominal_bitrate);
    }
    println!();

    println!("Comment Information");
    println!("  Vendor                    {}", video.vendor);
    for comment in &video.comments {
        println!("    {comment}");
    }
    println!();

    println!("Analysis Summary");
    println!("  Logical streams           {}", report.logical_streams);
    println!("  Pages processed           {}", report.pages);
    println!("  Packets                   {}", report.packets);
    println!("  Container errors          {}", report.container_errors);

    let size_mb = report.size_bytes as f64 / 1_000_000.0;
    println!(
        "  Size                      {size_mb:.2} MB ({} bytes)",
        report.size_bytes
    );

    if let Some(frames) = video.frames {
        println!("  Frames                    {frames}");
    }
    if let Some(duration) = video.duration_seconds {
        println!("  Duration                  {duration:.2} s");

        if duration > 0.0 {
            let avg_data_rate_kbps = (report.size_bytes as f64 * 8.0) / (duration * 1000.0);
            println!("  Average data rate         {avg_data_rate_kbps:.1} kbps");
        }
    }

    println!();
}

use std::fs;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::Level;

use super::command::{Cli, DecodeArgs, PixelLayout};
use crate::input::InputReader;
use ogv::process::session::Session;
use ogv::utils::errors::DriverError;

pub fn cmd_decode(args: &DecodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Decoding Ogg video stream: {}", args.input.display());

    let input = InputReader::new(&args.input)?;
    let mut session = Session::open(input);
    if cli.strict {
        session.set_fail_level(Level::Warn);
    }
    session.set_image_format(args.format.to_image_format());

    let context = session.read_headers()?;
    let ident = &context.ident;
    log::info!(
        "Video stream {}: {}x{} picture in {}x{} coded frame, {:.3} fps",
        session
            .video_serial()
            .map(|s| format!("{s:#010X}"))
            .unwrap_or_default(),
        ident.pic_width,
        ident.pic_height,
        ident.coded_width,
        ident.coded_height,
        ident.frame_rate(),
    );

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new(args.frames));
            pb.set_style(ProgressStyle::with_template(
                "{bar:40.green/white} {pos}/{len} frames",
            )?);
            Some(pb)
        }
        None => None,
    };

    let mut decoded = 0u64;
    for _ in 0..args.frames {
        match session.read_frame() {
            Ok(()) => {
                decoded += 1;
                if let Some(ref pb) = pb {
                    pb.inc(1);
                }
            }
            Err(error)
                if matches!(
                    error.downcast_ref::<DriverError>(),
                    Some(DriverError::EndOfStream)
                ) =>
            {
                // Short streams are a reportable condition, not a failure.
                log::warn!(
                    "Stream ended after {decoded} of {} requested frames",
                    args.frames
                );
                break;
            }
            Err(error) => return Err(error),
        }
    }

    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    let image = session.get_frame_image()?;

    let output = args
        .output_path
        .clone()
        .unwrap_or_else(|| args.input.with_extension("raw"));
    fs::write(&output, &image.data)?;

    let layout = match args.format {
        PixelLayout::Gray => "luma",
        PixelLayout::Rgb => "R,G,B interleaved",
    };

    println!("Decode Summary");
    println!("  Frames decoded            {decoded}");
    println!("  Pages processed           {}", session.pages_processed());
    println!("  Container errors          {}", session.container_errors());
    println!(
        "  Image                     {}x{}, {} channel(s), {layout}",
        image.width, image.height, image.channels
    );
    println!("  Written to                {}", output.display());

    Ok(())
}

//! Pixel buffer extraction from reconstructed pictures.
//!
//! Coded dimensions are macroblock multiples and commonly exceed the
//! visible picture region, so extraction always crops; the crop is
//! anchored at the region's top-left offset inside the coded frame.

use crate::structs::headers::DecodeContext;
use crate::structs::picture::{ImageFormat, Picture, PixelBuffer};
use crate::utils::errors::ImageError;

// BT.601 full-range coefficients in 16.16 fixed point.
const CR_TO_R: i32 = 91_881;
const CB_TO_G: i32 = 22_554;
const CR_TO_G: i32 = 46_802;
const CB_TO_B: i32 = 116_130;

#[inline(always)]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Packs the visible region of `picture` into a caller-owned buffer.
///
/// The crop rectangle comes from the decode context; it is validated
/// against the picture's actual coded dimensions, not trusted.
pub fn extract_image(
    picture: &Picture,
    context: &DecodeContext,
    format: ImageFormat,
) -> Result<PixelBuffer, ImageError> {
    let ident = &context.ident;
    let x = ident.pic_x as usize;
    let y = ident.pic_y as usize;
    let width = ident.pic_width as usize;
    let height = ident.pic_height as usize;

    let luma = &picture.planes[0];
    if x + width > luma.width || y + height > luma.height {
        return Err(ImageError::CropOutOfBounds {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
            coded_width: luma.width as u32,
            coded_height: luma.height as u32,
        });
    }

    let channels = format.channels();
    let mut data = Vec::with_capacity(width * height * channels);

    match format {
        ImageFormat::Gray => {
            for row in y..y + height {
                data.extend_from_slice(&luma.row(row)[x..x + width]);
            }
        }
        ImageFormat::Rgb => {
            let (sx, sy) = ident.pixel_format.chroma_shift();
            let cb = &picture.planes[1];
            let cr = &picture.planes[2];

            for row in y..y + height {
                let luma_row = luma.row(row);
                let cb_row = cb.row(row >> sy);
                let cr_row = cr.row(row >> sy);

                for col in x..x + width {
                    let l = luma_row[col] as i32;
                    let b_off = cb_row[col >> sx] as i32 - 128;
                    let r_off = cr_row[col >> sx] as i32 - 128;

                    data.push(clamp_u8(l + ((CR_TO_R * r_off + 32_768) >> 16)));
                    data.push(clamp_u8(
                        l - ((CB_TO_G * b_off + CR_TO_G * r_off + 32_768) >> 16),
                    ));
                    data.push(clamp_u8(l + ((CB_TO_B * b_off + 32_768) >> 16)));
                }
            }
        }
    }

    Ok(PixelBuffer {
        width,
        height,
        channels,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::headers::{HeaderParser, test_packet};
    use crate::structs::headers::test_packets;
    use crate::structs::picture::Plane;

    fn context(mb_w: u16, mb_h: u16, pic_w: u32, pic_h: u32, x: u8, y: u8) -> DecodeContext {
        let mut parser = HeaderParser::default();
        parser
            .parse(&test_packet(
                1,
                true,
                test_packets::ident_packet(mb_w, mb_h, pic_w, pic_h, x, y, 6, 0),
            ))
            .unwrap();
        parser
            .parse(&test_packet(1, false, test_packets::comment_packet("v", &[])))
            .unwrap();
        parser
            .parse(&test_packet(1, false, test_packets::setup_packet(&[])))
            .unwrap()
            .unwrap()
    }

    fn gradient_picture(context: &DecodeContext) -> Picture {
        let mut picture = Picture::filled(
            context.coded_width(),
            context.coded_height(),
            context.pixel_format(),
            0,
            128,
        );
        let luma = &mut picture.planes[0];
        for row in 0..luma.height {
            for col in 0..luma.width {
                luma.data[row * luma.stride + col] = ((col + 2 * row) & 0xFF) as u8;
            }
        }

        picture
    }

    #[test]
    fn padded_frame_crops_to_visible_region() {
        // Coded 720x496 holding a visible 704x480 region at (8, 4).
        let context = context(45, 31, 704, 480, 8, 4);
        let picture = gradient_picture(&context);

        let image = extract_image(&picture, &context, ImageFormat::Gray).unwrap();
        assert_eq!((image.width, image.height, image.channels), (704, 480, 1));
        assert_eq!(image.data.len(), 704 * 480);

        // Top-left aligned: output (0,0) maps to coded (8,4).
        assert_eq!(image.row(0)[0], ((8 + 2 * 4) & 0xFF) as u8);
        assert_eq!(
            image.row(479)[703],
            (((8 + 703) + 2 * (4 + 479)) & 0xFF) as u8
        );
    }

    #[test]
    fn crop_exceeding_coded_size_rejected() {
        let context = context(45, 30, 704, 480, 0, 0);
        // A picture at the wrong geometry, as a broken stage might hand
        // back: extraction must refuse rather than read out of bounds.
        let small = Picture {
            planes: [
                Plane::new(64, 64, 0),
                Plane::new(32, 32, 128),
                Plane::new(32, 32, 128),
            ],
            frame_index: 0,
            keyframe: true,
        };

        assert!(matches!(
            extract_image(&small, &context, ImageFormat::Gray),
            Err(ImageError::CropOutOfBounds {
                coded_width: 64,
                coded_height: 64,
                ..
            })
        ));
    }

    #[test]
    fn neutral_chroma_converts_to_gray_rgb() {
        let context = context(4, 4, 64, 64, 0, 0);
        let picture = Picture::filled(64, 64, context.pixel_format(), 128, 128);

        let image = extract_image(&picture, &context, ImageFormat::Rgb).unwrap();
        assert_eq!(image.channels, 3);
        assert_eq!(image.data.len(), 64 * 64 * 3);
        assert_eq!(&image.row(0)[..3], &[128, 128, 128]);
    }

    #[test]
    fn strong_cr_pushes_red() {
        let context = context(4, 4, 64, 64, 0, 0);
        let mut picture = Picture::filled(64, 64, context.pixel_format(), 128, 128);
        for value in picture.planes[2].data.iter_mut() {
            *value = 255;
        }

        let image = extract_image(&picture, &context, ImageFormat::Rgb).unwrap();
        let pixel = &image.row(10)[30..33];
        assert_eq!(pixel[0], 255);
        assert!(pixel[1] < 128);
        assert_eq!(pixel[2], 128);
    }

    #[test]
    fn chroma_subsampling_upsampled_in_rgb() {
        // 4:2:0: one chroma sample covers a 2x2 luma block.
        let context = context(4, 4, 64, 64, 0, 0);
        let mut picture = Picture::filled(64, 64, context.pixel_format(), 128, 128);
        picture.planes[1].data[0] = 255;

        let image = extract_image(&picture, &context, ImageFormat::Rgb).unwrap();
        // All four luma positions sharing chroma (0,0) see the same blue.
        let blue = image.row(0)[2];
        assert!(blue > 128);
        assert_eq!(image.row(0)[5], blue);
        assert_eq!(image.row(1)[2], blue);
        assert_eq!(image.row(1)[5], blue);
        // A pixel outside that block is neutral.
        assert_eq!(image.row(0)[8], 128);
    }
}

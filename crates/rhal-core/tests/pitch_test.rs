//! Integration test: pitch arithmetic and region copies
//!
//! Run with: cargo test -p rhal-core --test pitch_test -- --nocapture

use rhal_core::pitch::{
    block_rows, copy_texture_region, depth_pitch, region_size, row_pitch, texel_offset, Extent,
    Origin, PitchLayout,
};
use rhal_types::{HalError, PixelFormat};

#[test]
fn test_uncompressed_pitches() {
    assert_eq!(row_pitch(16, PixelFormat::R8G8B8A8Unorm), Ok(64));
    assert_eq!(row_pitch(3, PixelFormat::R8Unorm), Ok(3));
    assert_eq!(row_pitch(5, PixelFormat::R32G32B32A32Float), Ok(80));
    assert_eq!(depth_pitch(64, 10, PixelFormat::R8G8B8A8Unorm), Ok(640));
    assert_eq!(block_rows(7, PixelFormat::R16Unorm), 7);
}

#[test]
fn test_compressed_pitches_round_up_to_whole_blocks() {
    // 16 texels = 4 blocks of 8 bytes
    assert_eq!(row_pitch(16, PixelFormat::Bc1RgbaUnorm), Ok(32));
    // Anything narrower than a block still occupies one block
    assert_eq!(row_pitch(1, PixelFormat::Bc3Unorm), Ok(16));
    assert_eq!(row_pitch(2, PixelFormat::Bc1RgbUnorm), Ok(8));
    // 6 texels need two blocks
    assert_eq!(row_pitch(6, PixelFormat::Bc2Unorm), Ok(32));

    assert_eq!(block_rows(1, PixelFormat::Bc3Unorm), 1);
    assert_eq!(block_rows(8, PixelFormat::Bc3Unorm), 2);
    assert_eq!(depth_pitch(32, 8, PixelFormat::Bc1RgbaUnorm), Ok(64));
}

#[test]
fn test_region_size() {
    assert_eq!(region_size(Extent::new(4, 4, 1), PixelFormat::R8G8B8A8Unorm), Ok(64));
    assert_eq!(region_size(Extent::new(4, 4, 3), PixelFormat::R8Unorm), Ok(48));
    assert_eq!(region_size(Extent::new(8, 8, 1), PixelFormat::Bc1RgbaUnorm), Ok(32));
    assert_eq!(region_size(Extent::new(0, 8, 1), PixelFormat::R8Unorm), Ok(0));
}

#[test]
fn test_texel_offset() {
    let layout = PitchLayout {
        row_pitch: 256,
        depth_pitch: 256 * 8,
    };
    let offset = texel_offset(Origin::new(3, 2, 1), layout, PixelFormat::R8G8B8A8Unorm);
    assert_eq!(offset, 256 * 8 + 2 * 256 + 3 * 4);

    let bc = PitchLayout {
        row_pitch: 64,
        depth_pitch: 64 * 4,
    };
    // (8, 4) is block column 2, block row 1
    let offset = texel_offset(Origin::new(8, 4, 0), bc, PixelFormat::Bc3Unorm);
    assert_eq!(offset, 64 + 2 * 16);
}

#[test]
fn test_aligned_layout() {
    let layout = PitchLayout::aligned(10, 4, PixelFormat::R8G8B8A8Unorm, 256).expect("layout");
    assert_eq!(layout.row_pitch, 256);
    assert_eq!(layout.depth_pitch, 1024);

    let exact = PitchLayout::aligned(64, 2, PixelFormat::R8G8B8A8Unorm, 256).expect("layout");
    assert_eq!(exact.row_pitch, 256);
}

#[test]
fn test_copy_into_padded_destination_leaves_padding_untouched() {
    let format = PixelFormat::R8G8B8A8Unorm;
    let extent = Extent::new(3, 2, 1);
    let src_layout = PitchLayout::dense(3, 2, format).expect("layout");
    let src: Vec<u8> = (0..src_layout.depth_pitch as u8).collect();

    let dst_layout = PitchLayout::aligned(8, 4, format, 64).expect("layout");
    let mut dst = vec![0xAAu8; dst_layout.depth_pitch as usize];

    copy_texture_region(
        &src,
        Origin::ZERO,
        src_layout,
        &mut dst,
        Origin::new(2, 1, 0),
        dst_layout,
        extent,
        format,
    )
    .expect("copy");

    for row in 0..4usize {
        for x in 0..dst_layout.row_pitch as usize {
            let byte = dst[row * dst_layout.row_pitch as usize + x];
            let inside = (1..3).contains(&row) && (8..20).contains(&x);
            if inside {
                let src_index = (row - 1) * 12 + (x - 8);
                assert_eq!(byte, src[src_index], "row {} byte {}", row, x);
            } else {
                assert_eq!(byte, 0xAA, "padding clobbered at row {} byte {}", row, x);
            }
        }
    }
}

#[test]
fn test_copy_3d_slices() {
    let format = PixelFormat::R8Unorm;
    let extent = Extent::new(2, 2, 3);
    let src_layout = PitchLayout::dense(2, 2, format).expect("layout");
    let src: Vec<u8> = (1..=12).collect();

    let dst_layout = PitchLayout {
        row_pitch: 4,
        depth_pitch: 16,
    };
    let mut dst = vec![0u8; 16 * 3];
    copy_texture_region(
        &src,
        Origin::ZERO,
        src_layout,
        &mut dst,
        Origin::ZERO,
        dst_layout,
        extent,
        format,
    )
    .expect("copy");

    for z in 0..3usize {
        for y in 0..2usize {
            let at = z * 16 + y * 4;
            assert_eq!(&dst[at..at + 2], &src[z * 4 + y * 2..z * 4 + y * 2 + 2]);
            assert_eq!(&dst[at + 2..at + 4], &[0, 0]);
        }
    }
}

#[test]
fn test_contiguous_copy_when_layouts_match() {
    let format = PixelFormat::R8G8B8A8Unorm;
    let layout = PitchLayout::dense(4, 4, format).expect("layout");
    let src: Vec<u8> = (0..64).collect();
    let mut dst = vec![0u8; 64];
    copy_texture_region(
        &src,
        Origin::ZERO,
        layout,
        &mut dst,
        Origin::ZERO,
        layout,
        Extent::new(4, 4, 1),
        format,
    )
    .expect("copy");
    assert_eq!(src, dst);
}

#[test]
fn test_compressed_copy_uses_block_rows() {
    let format = PixelFormat::Bc1RgbaUnorm;
    let extent = Extent::new(8, 8, 1);
    let src_layout = PitchLayout::dense(8, 8, format).expect("layout");
    assert_eq!(src_layout.row_pitch, 16);
    let src: Vec<u8> = (0..32).collect();

    let dst_layout = PitchLayout::aligned(8, 8, format, 32).expect("layout");
    let mut dst = vec![0u8; dst_layout.depth_pitch as usize];
    copy_texture_region(
        &src,
        Origin::ZERO,
        src_layout,
        &mut dst,
        Origin::ZERO,
        dst_layout,
        extent,
        format,
    )
    .expect("copy");

    assert_eq!(&dst[0..16], &src[0..16]);
    assert_eq!(&dst[16..32], &[0u8; 16]);
    assert_eq!(&dst[32..48], &src[16..32]);
}

#[test]
fn test_empty_region_is_noop() {
    let format = PixelFormat::R8Unorm;
    let mut dst = vec![7u8; 4];
    copy_texture_region(
        &[],
        Origin::ZERO,
        PitchLayout::dense(0, 0, format).expect("layout"),
        &mut dst,
        Origin::ZERO,
        PitchLayout::dense(2, 2, format).expect("layout"),
        Extent::new(0, 2, 1),
        format,
    )
    .expect("empty copy");
    assert_eq!(dst, vec![7u8; 4]);
}

#[test]
fn test_out_of_bounds_copy_is_usage_error() {
    let format = PixelFormat::R8Unorm;
    let src = vec![0u8; 4];
    let mut dst = vec![0u8; 4];
    let err = copy_texture_region(
        &src,
        Origin::ZERO,
        PitchLayout::dense(2, 2, format).expect("layout"),
        &mut dst,
        Origin::new(1, 1, 0),
        PitchLayout::dense(2, 2, format).expect("layout"),
        Extent::new(2, 2, 1),
        format,
    )
    .expect_err("destination too small");
    assert!(err.is_usage());
}

#[test]
fn test_oversized_pitches_are_out_of_memory() {
    let format = PixelFormat::R32G32B32A32Float;
    // 32768 texels of 16 bytes fit one row, but not a 32768-row slice
    assert_eq!(row_pitch(32768, format), Ok(32768 * 16));
    let err = region_size(Extent::new(32768, 32768, 1), format).expect_err("slice too large");
    assert!(matches!(err, HalError::OutOfMemory { requested } if requested == 1 << 34));

    assert!(PitchLayout::dense(16384, 16384, format).is_err());
    assert!(row_pitch(u32::MAX, format).is_err());
    assert!(PitchLayout::aligned(u32::MAX, 1, PixelFormat::R8Unorm, 256).is_err());
    assert!(depth_pitch(u32::MAX, 2, PixelFormat::R8Unorm).is_err());
}

#[test]
fn test_unaligned_block_origin_is_rejected() {
    let format = PixelFormat::Bc1RgbaUnorm;
    let layout = PitchLayout::dense(8, 8, format).expect("layout");
    let src = vec![0xABu8; 8];
    let mut dst = vec![0u8; layout.depth_pitch as usize];

    let err = copy_texture_region(
        &src,
        Origin::ZERO,
        PitchLayout::dense(4, 4, format).expect("layout"),
        &mut dst,
        Origin::new(2, 2, 0),
        layout,
        Extent::new(4, 4, 1),
        format,
    )
    .expect_err("origin inside a block");
    assert!(err.is_usage());
    assert!(dst.iter().all(|&b| b == 0), "nothing may be written");
}

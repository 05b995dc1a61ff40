mod common;

use common::Lcg;
use media_transform::geometry::{
    to_native, to_native_range, CropRegion, DisplaySize, NativeCropRegion, Size, TrimRange, ViewportMapping,
};
use media_transform::TransformError;

fn mapping(natural: (u32, u32), displayed: (f64, f64)) -> ViewportMapping {
    ViewportMapping::new(
        Some(Size::new(natural.0, natural.1)),
        DisplaySize::new(displayed.0, displayed.1),
    )
}

#[test]
fn preview_region_scales_to_native_pixels() {
    let m = mapping((1920, 1080), (640.0, 360.0));
    let native = to_native(&CropRegion::new(160.0, 90.0, 320.0, 180.0), &m).unwrap();
    assert_eq!(
        native,
        NativeCropRegion {
            x: 480,
            y: 270,
            width: 960,
            height: 540
        }
    );
}

#[test]
fn non_uniform_scale_rounds_to_nearest() {
    // 1280/500 = 2.56, 720/300 = 2.4
    let m = mapping((1280, 720), (500.0, 300.0));
    let native = to_native(&CropRegion::new(10.3, 20.0, 100.0, 100.0), &m).unwrap();
    assert_eq!(native.x, 26);
    assert_eq!(native.y, 48);
    assert_eq!(native.width, 256);
    assert_eq!(native.height, 240);
}

#[test]
fn full_frame_selection_stays_inside() {
    let m = mapping((1921, 1081), (641.3, 360.7));
    let native = to_native(&CropRegion::new(0.0, 0.0, 641.3, 360.7), &m).unwrap();
    assert_eq!(native.size(), Size::new(1921, 1081));
    assert!(native.fits_within(Size::new(1921, 1081)));
}

#[test]
fn random_regions_never_leave_the_frame() {
    let mut rng = Lcg::new(0x5eed);
    for _ in 0..5_000 {
        let natural = Size::new(rng.range(1, 4096), rng.range(1, 4096));
        let displayed = DisplaySize::new(rng.range(1, 2000) as f64 + rng.unit(), rng.range(1, 2000) as f64 + rng.unit());
        let x = rng.unit() * displayed.width;
        let y = rng.unit() * displayed.height;
        let width = rng.unit() * (displayed.width - x);
        let height = rng.unit() * (displayed.height - y);
        let region = CropRegion::new(x, y, width, height);

        match to_native(&region, &ViewportMapping::new(Some(natural), displayed)) {
            Ok(native) => assert!(
                native.fits_within(natural),
                "{:?} -> {:?} escapes {}",
                region,
                native,
                natural
            ),
            Err(TransformError::InvalidRegion(_)) => {}
            Err(other) => panic!("unexpected error for {:?}: {}", region, other),
        }
    }
}

#[test]
fn native_regions_are_fixed_points_at_identity() {
    let mut rng = Lcg::new(42);
    for _ in 0..1_000 {
        let natural = Size::new(rng.range(2, 3840), rng.range(2, 2160));
        let x = rng.range(0, natural.width - 1);
        let y = rng.range(0, natural.height - 1);
        let native = NativeCropRegion {
            x,
            y,
            width: rng.range(1, natural.width - x),
            height: rng.range(1, natural.height - y),
        };
        let again = to_native(&native.as_display(), &ViewportMapping::identity(natural)).unwrap();
        assert_eq!(again, native);
    }
}

#[test]
fn degenerate_regions_are_rejected() {
    let m = mapping((1920, 1080), (640.0, 360.0));
    for region in [
        CropRegion::new(0.0, 0.0, 0.0, 100.0),
        CropRegion::new(-1.0, 0.0, 10.0, 10.0),
        CropRegion::new(0.0, 0.0, f64::NAN, 10.0),
        CropRegion::new(600.0, 0.0, 100.0, 10.0),
    ] {
        assert!(
            matches!(to_native(&region, &m), Err(TransformError::InvalidRegion(_))),
            "{:?} accepted",
            region
        );
    }
}

#[test]
fn region_smaller_than_a_native_pixel_is_rejected() {
    let m = mapping((100, 100), (1000.0, 1000.0));
    let result = to_native(&CropRegion::new(10.0, 10.0, 2.0, 2.0), &m);
    assert!(matches!(result, Err(TransformError::InvalidRegion(_))));
}

#[test]
fn unknown_natural_size_is_not_ready() {
    let m = ViewportMapping::new(None, DisplaySize::new(640.0, 360.0));
    let result = to_native(&CropRegion::new(0.0, 0.0, 10.0, 10.0), &m);
    assert!(matches!(result, Err(TransformError::AssetNotReady)));
}

#[test]
fn trim_before_zero_is_an_error() {
    let result = to_native_range(&TrimRange::new(-2.0, 40.0), 30.0);
    assert!(matches!(result, Err(TransformError::InvalidRange(_))));
}

#[test]
fn trim_end_is_pulled_back_to_duration() {
    assert_eq!(to_native_range(&TrimRange::new(5.0, 40.0), 30.0).unwrap(), TrimRange::new(5.0, 30.0));
    // Scrubber noise just below zero is treated as zero.
    assert_eq!(to_native_range(&TrimRange::new(-0.0004, 3.0), 30.0).unwrap(), TrimRange::new(0.0, 3.0));
}

#[test]
fn trim_needs_a_known_duration() {
    assert!(matches!(
        to_native_range(&TrimRange::new(0.0, 1.0), 0.0),
        Err(TransformError::AssetNotReady)
    ));
    assert!(matches!(
        to_native_range(&TrimRange::new(4.0, 4.0), 30.0),
        Err(TransformError::InvalidRange(_))
    ));
}

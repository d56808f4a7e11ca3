use hexlst::{GeoTransform, RasterImage, SeasonalCompositeBuilder};
use ndarray::Array2;
use std::time::Instant;

fn synthetic_scene(index: usize, rows: usize, cols: usize) -> RasterImage {
    let data = Array2::from_shape_fn((rows, cols), |(r, c)| {
        // every seventh pixel of a scene is cloudy
        if (r * cols + c + index) % 7 == 0 {
            f64::NAN
        } else {
            20.0 + index as f64 + ((r + c) % 10) as f64 * 0.1
        }
    });
    // neighbouring scenes shift by one pixel so the merged grid grows
    let origin_x = 13.0 + index as f64 * 0.001;
    RasterImage::new(
        data,
        GeoTransform::from_gdal([origin_x, 0.001, 0.0, 47.8, 0.0, -0.001]),
        String::new(),
        Some(f64::NAN),
    )
}

#[test]
fn test_composite_throughput() {
    let _ = env_logger::builder().is_test(true).try_init();

    let scenes: Vec<RasterImage> = (0..12).map(|i| synthetic_scene(i, 400, 400)).collect();
    let builder = SeasonalCompositeBuilder::new();

    println!("\n=== Median composite of {} scenes ===", scenes.len());
    let start = Instant::now();
    let composite = builder.composite(&scenes).expect("Failed to build composite");
    let elapsed = start.elapsed();

    let (rows, cols) = composite.shape();
    let megapixels = (rows * cols * scenes.len()) as f64 / 1e6;
    println!("Output grid: {} x {}", rows, cols);
    println!("Time: {:.3}s ({:.1} Mpx/s)", elapsed.as_secs_f64(), megapixels / elapsed.as_secs_f64());

    assert_eq!((rows, cols), (400, 411));
    // left edge only sees the first scene
    assert!((composite.data[[1, 0]] - 20.1).abs() < 1e-9);
    assert!(composite.valid_count() > rows * cols * 9 / 10);

    let again = builder.composite(&scenes).expect("Failed to build composite");
    let identical = composite
        .data
        .iter()
        .zip(again.data.iter())
        .all(|(a, b)| a.to_bits() == b.to_bits());
    assert!(identical, "composite must be reproducible");
}

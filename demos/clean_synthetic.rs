//! Clean a synthetic run with a GPS spike and show what the pipeline makes of it.
//!
//! Run with: RUST_LOG=info cargo run --example clean_synthetic

use track_archiver::geo_utils::offset_point;
use track_archiver::{analyze_track, GpsPoint, PipelineConfig, Track, TrackPoint};

fn main() {
    env_logger::init();

    // Twenty points along a London street, 3 m/s
    let origin = GpsPoint::new(51.5, -0.12);
    let mut points: Vec<TrackPoint> = (0..20)
        .map(|i| TrackPoint::located(1_500_000_000 + i, offset_point(&origin, 3.0 * i as f64, 0.0)))
        .collect();

    // Multipath burst: three fixes half a kilometer off
    points[10] = TrackPoint::located(points[10].timestamp(), offset_point(&origin, 530.0, 0.0));
    points[11] = TrackPoint::located(points[11].timestamp(), offset_point(&origin, 33.0, 500.0));
    points[12] = TrackPoint::located(points[12].timestamp(), offset_point(&origin, -464.0, 0.0));

    let track = Track::new("7AE81234.FIT", points, true, None);

    let config = PipelineConfig::default();
    println!("Before: {}", track.explain(&config.classifier));

    match analyze_track(track, &config) {
        Ok(analyzed) => {
            println!("After:  {}", analyzed.cleaned().explain(&config.classifier));
            println!(
                "Removed {} points in {} passes, archive as {}",
                analyzed.report.removed, analyzed.report.passes, analyzed.canonical_basename
            );
            match serde_json::to_string_pretty(&analyzed.summary()) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Cannot serialize summary: {}", e),
            }
        }
        Err(e) => eprintln!("Analysis failed: {}", e),
    }
}

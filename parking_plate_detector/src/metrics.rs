use lazy_static::lazy_static;
use prometheus::register_int_counter;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::TextEncoder;

lazy_static! {
    pub static ref FRAMES: IntCounter =
        register_int_counter!("plate_frames_total", "Frames read from the video source")
            .expect("register plate_frames_total");
    pub static ref REGIONS: IntCounter =
        register_int_counter!("plate_regions_total", "Detected regions evaluated")
            .expect("register plate_regions_total");
    pub static ref EMPTY_REGIONS: IntCounter = register_int_counter!(
        "plate_empty_regions_total",
        "Regions skipped because their crop had no area"
    )
    .expect("register plate_empty_regions_total");
    pub static ref REJECTED: IntCounter = register_int_counter!(
        "plate_rejected_total",
        "Recognized texts that failed the plate grammar"
    )
    .expect("register plate_rejected_total");
    pub static ref ACCEPTED: IntCounter =
        register_int_counter!("plate_accepted_total", "Plates accepted by the grammar")
            .expect("register plate_accepted_total");
    pub static ref PERSIST_FAILURES: IntCounter = register_int_counter!(
        "plate_persist_failures_total",
        "Accepted plates the record store did not take"
    )
    .expect("register plate_persist_failures_total");
}

/// Text exposition of every registered metric.
pub fn render() -> String {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        FRAMES.inc();
        PERSIST_FAILURES.inc_by(0);
        let text = render();
        assert!(text.contains("plate_frames_total"));
        assert!(text.contains("plate_persist_failures_total"));
    }
}

#![no_main]

use jitterscope::{Histogram, Timebase};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    // Timebase parsing must never panic
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = input.parse::<Timebase>();
    }

    let width = u64::from(data[0]) + 1;
    let buckets = usize::from(data[1]) + 1;
    let Ok(mut h) = Histogram::with_buckets(width, buckets) else {
        return;
    };

    for chunk in data[2..].chunks(8) {
        let mut bytes = [0u8; 8];
        bytes[..chunk.len()].copy_from_slice(chunk);
        h.accumulate(u64::from_le_bytes(bytes));
    }

    let bucketed: u64 = h.buckets().iter().sum();
    assert_eq!(bucketed + h.overflow_count(), h.sample_count());
    assert!(h.min() <= h.average() && h.average() <= h.max());

    let p = f64::from(data[2]) / 2.55;
    let _ = h.percentile(p);
});

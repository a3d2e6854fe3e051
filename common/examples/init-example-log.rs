//! Shows what the ingest diagnostics look like: a burst of bad envelopes on one
//! stream is logged once per interval, with the number of swallowed repeats.
//!
//!     RUST_LOG=debug cargo run -p common --example init-example-log
extern crate common;

use std::time::Duration;

use common::rate_limit::SimpleRateLimiter;
use log::{info, warn};

fn main() {
    common::init::firehose_init();
    let mut limiter = SimpleRateLimiter::new(Duration::from_millis(200));
    let mut dropped = 0u64;
    for envelope_no in 0..50u64 {
        // every third envelope of the burst is missing its app id
        if envelope_no % 3 != 0 {
            continue;
        }
        dropped += 1;
        if let Some(suppressed) = limiter.check_update_with_suppressed() {
            warn!(
                "Dropping malformed HttpStartStop event #{} from stream 0: missing required field `application_id` ({} similar suppressed)",
                envelope_no, suppressed
            );
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    info!(
        "Stream 0 done: {} envelopes dropped, {} warnings still suppressed",
        dropped,
        limiter.suppressed()
    );
}

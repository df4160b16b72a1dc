//! # metrics
//!
//! process level metrics and text encoding of everything registered
use std::time::Instant;

use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntGauge, TextEncoder, register_int_gauge};

lazy_static! {
    /// When the process started
    pub static ref START_TIME: Instant = Instant::now();

    /// process uptime
    pub static ref UPTIME: IntGauge = register_int_gauge!("uptime", "process uptime (seconds)").unwrap();
}

/// every registered metric in the prometheus text format
pub fn render_text() -> Result<String> {
    UPTIME.set(START_TIME.elapsed().as_secs() as i64);
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_uptime() {
        lazy_static::initialize(&START_TIME);
        let text = render_text().unwrap();
        assert!(text.contains("# TYPE uptime gauge"));
    }
}

//! TPS probe response parsing

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TPS_PATTERN: Regex =
        Regex::new(r"TPS \(([^)]+)\): Min: ([0-9.]+), Avg: ([0-9.]+), Max: ([0-9.]+)")
            .expect("Invalid TPS regex");
}

/// One parsed `TPS (<window>): Min: .., Avg: .., Max: ..` line
#[derive(Debug, Clone, PartialEq)]
pub struct TpsReading {
    /// Free-text measurement window, e.g. `10 sec`
    pub window: String,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

/// Find a TPS report anywhere in `line`
pub fn parse_tps(line: &str) -> Option<TpsReading> {
    let captures = TPS_PATTERN.captures(line)?;
    Some(TpsReading {
        window: captures.get(1)?.as_str().to_string(),
        min: captures.get(2)?.as_str().parse().ok()?,
        avg: captures.get(3)?.as_str().parse().ok()?,
        max: captures.get(4)?.as_str().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_tps_line() {
        let reading = parse_tps("TPS (10 sec): Min: 9.0, Avg: 12.5, Max: 15.0").unwrap();
        assert_eq!(reading.window, "10 sec");
        assert_eq!(reading.min, 9.0);
        assert_eq!(reading.avg, 12.5);
        assert_eq!(reading.max, 15.0);
    }

    #[test]
    fn test_parse_tps_with_prefix() {
        let line = "[12:00:01 INFO] [World] TPS (1 min): Min: 19.8, Avg: 20, Max: 20.0";
        let reading = parse_tps(line).unwrap();
        assert_eq!(reading.window, "1 min");
        assert_eq!(reading.avg, 20.0);
    }

    #[test]
    fn test_parse_tps_rejects_other_lines() {
        assert!(parse_tps("Player joined the game").is_none());
        assert!(parse_tps("TPS (10 sec): Min: 9.0, Avg: n/a, Max: 15.0").is_none());
        assert!(parse_tps("TPS (10 sec): Min: 1.2.3, Avg: 12.5, Max: 15.0").is_none());
        assert!(parse_tps("tps (10 sec): min: 9.0, avg: 12.5, max: 15.0").is_none());
    }

    proptest! {
        #[test]
        fn prop_parse_recovers_average(
            window in "[a-z0-9 ]{1,10}",
            min in 0u32..100_000,
            avg in 0u32..100_000,
            max in 0u32..100_000,
        ) {
            let (min, avg, max) = (min as f64 / 100.0, avg as f64 / 100.0, max as f64 / 100.0);
            let line = format!("TPS ({}): Min: {:.2}, Avg: {:.2}, Max: {:.2}", window, min, avg, max);
            let reading = parse_tps(&line).unwrap();
            prop_assert_eq!(reading.window, window);
            prop_assert!((reading.avg - avg).abs() < 1e-9);
        }
    }
}

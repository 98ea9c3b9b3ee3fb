mod parser;
mod template;
mod url;

use std::time::Duration;

use crate::error::{AdaptiveError, AdaptiveResult};

pub use parser::*;
pub use template::Template;

/// Parses an `xs:duration` such as `PT1H2M3.5S`.
pub fn parse_xs_duration(s: &str) -> AdaptiveResult<Duration> {
    match iso8601::duration(s.trim()) {
        Ok(iso8601::Duration::Weeks(w)) => Ok(Duration::from_secs(w as u64 * 60 * 60 * 24 * 7)),
        Ok(iso8601::Duration::YMDHMS {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
        }) => {
            // Years and months have no fixed length, approximate them
            let mut secs: u64 = second.into();
            secs += minute as u64 * 60;
            secs += hour as u64 * 60 * 60;
            secs += day as u64 * 60 * 60 * 24;
            secs += month as u64 * 60 * 60 * 24 * 31;
            secs += year as u64 * 60 * 60 * 24 * 365;
            Ok(Duration::from_secs(secs) + Duration::from_millis(millisecond.into()))
        }
        Err(e) => Err(AdaptiveError::MpdParsing(format!(
            "Couldn't parse xs:duration {s}: {e:?}"
        ))),
    }
}

/// Parses a frame rate given either as a number or as `num/den`.
pub(crate) fn parse_frame_rate(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => s.trim().parse().ok(),
    }
}

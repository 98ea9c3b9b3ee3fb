use std::{collections::VecDeque, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::playlist::{AdaptationSet, RefreshPolicy};

/// Picks the representation the tracker should continue with.
///
/// Implementations only return indices of representations that are selectable under `policy`.
pub trait AdaptationLogic: Send + Sync {
    fn next_representation(
        &mut self,
        set: &AdaptationSet,
        current: Option<usize>,
        policy: &RefreshPolicy,
    ) -> Option<usize>;

    /// Reports a finished download of `bytes` that took `elapsed`.
    fn update_download_rate(&mut self, _bytes: usize, _elapsed: Duration) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicType {
    AlwaysBest,
    AlwaysLowest,
    #[default]
    RateBased,
    FixedRate,
}

impl FromStr for LogicType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "alwaysbest" | "best" => Ok(Self::AlwaysBest),
            "alwayslowest" | "lowest" => Ok(Self::AlwaysLowest),
            "ratebased" | "rate" => Ok(Self::RateBased),
            "fixedrate" | "fixed" => Ok(Self::FixedRate),
            _ => Err(format!("unknown adaptation logic: {s}")),
        }
    }
}

pub fn create_logic(logic: LogicType, fixed_bandwidth: Option<u64>) -> Box<dyn AdaptationLogic> {
    match logic {
        LogicType::AlwaysBest => Box::new(AlwaysBest),
        LogicType::AlwaysLowest => Box::new(AlwaysLowest),
        LogicType::RateBased => Box::new(RateBased::default()),
        LogicType::FixedRate => Box::new(FixedRate::new(fixed_bandwidth.unwrap_or(0))),
    }
}

fn selectable<'a>(
    set: &'a AdaptationSet,
    policy: &'a RefreshPolicy,
) -> impl Iterator<Item = (usize, u64)> + 'a {
    set.representations
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_selectable(policy))
        .map(|(index, r)| (index, r.bandwidth))
}

fn lowest(set: &AdaptationSet, policy: &RefreshPolicy) -> Option<usize> {
    selectable(set, policy)
        .min_by_key(|(_, bandwidth)| *bandwidth)
        .map(|(index, _)| index)
}

/// Highest bandwidth not above `bitrate`, or the lowest available one.
fn best_under(set: &AdaptationSet, policy: &RefreshPolicy, bitrate: u64) -> Option<usize> {
    selectable(set, policy)
        .filter(|(_, bandwidth)| *bandwidth <= bitrate)
        .max_by_key(|(_, bandwidth)| *bandwidth)
        .map(|(index, _)| index)
        .or_else(|| lowest(set, policy))
}

pub struct AlwaysBest;

impl AdaptationLogic for AlwaysBest {
    fn next_representation(
        &mut self,
        set: &AdaptationSet,
        _current: Option<usize>,
        policy: &RefreshPolicy,
    ) -> Option<usize> {
        selectable(set, policy)
            .max_by_key(|(_, bandwidth)| *bandwidth)
            .map(|(index, _)| index)
    }
}

pub struct AlwaysLowest;

impl AdaptationLogic for AlwaysLowest {
    fn next_representation(
        &mut self,
        set: &AdaptationSet,
        _current: Option<usize>,
        policy: &RefreshPolicy,
    ) -> Option<usize> {
        lowest(set, policy)
    }
}

pub struct FixedRate {
    bitrate: u64,
}

impl FixedRate {
    pub fn new(bitrate: u64) -> Self {
        Self { bitrate }
    }
}

impl AdaptationLogic for FixedRate {
    fn next_representation(
        &mut self,
        set: &AdaptationSet,
        _current: Option<usize>,
        policy: &RefreshPolicy,
    ) -> Option<usize> {
        best_under(set, policy, self.bitrate)
    }
}

/// Follows the moving average of the measured throughput.
pub struct RateBased {
    samples: VecDeque<u64>,
    window: usize,
}

impl RateBased {
    /// Only this share of the measured throughput is spent on media, in percent.
    const USABLE_PERCENT: u64 = 80;

    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    /// Average throughput in bits per second, zero before the first sample.
    pub fn average(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        self.samples.iter().sum::<u64>() / self.samples.len() as u64
    }
}

impl Default for RateBased {
    fn default() -> Self {
        Self::new(8)
    }
}

impl AdaptationLogic for RateBased {
    fn next_representation(
        &mut self,
        set: &AdaptationSet,
        current: Option<usize>,
        policy: &RefreshPolicy,
    ) -> Option<usize> {
        let usable = self.average() * Self::USABLE_PERCENT / 100;
        let next = best_under(set, policy, usable);
        if next != current {
            tracing::debug!(bps = self.average(), ?current, ?next, "rate based switch");
        }
        next
    }

    fn update_download_rate(&mut self, bytes: usize, elapsed: Duration) {
        if bytes == 0 {
            return;
        }
        let micros = elapsed.as_micros().max(1) as u64;
        let bps = (bytes as u64).saturating_mul(8_000_000) / micros;
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(bps);
    }
}

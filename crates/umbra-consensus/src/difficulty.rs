//! Difficulty adjustment.
//!
//! Four versioned algorithms, selected through the governor's feature tags.
//! All consume the most recent block timestamps and cumulative difficulties
//! (window length varies by version) plus the fixed target interval, and
//! return the next block's difficulty.

use crate::hardfork::{Feature, HardFork};
use crate::params;
use umbra_types::Difficulty;

/// How many trailing `(timestamp, cumulative difficulty)` pairs the active
/// algorithm at `height` consumes.
pub fn difficulty_blocks_count(hardfork: &HardFork, height: u64) -> usize {
    if hardfork.check_feature(Feature::DifficultyV4, height) {
        params::DIFFICULTY_BLOCKS_COUNT_V4
    } else if hardfork.check_feature(Feature::DifficultyV3, height) {
        params::DIFFICULTY_BLOCKS_COUNT_V3
    } else if hardfork.check_feature(Feature::DifficultyV2, height) {
        params::DIFFICULTY_BLOCKS_COUNT_V2
    } else {
        params::DIFFICULTY_BLOCKS_COUNT_V1
    }
}

/// Dispatch on the governor's feature tags.
pub fn next_difficulty(
    hardfork: &HardFork,
    height: u64,
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
) -> Difficulty {
    if hardfork.check_feature(Feature::DifficultyV4, height) {
        next_difficulty_v4(timestamps, cumulative_difficulties)
    } else if hardfork.check_feature(Feature::DifficultyV3, height) {
        next_difficulty_v3(timestamps, cumulative_difficulties)
    } else if hardfork.check_feature(Feature::DifficultyV2, height) {
        next_difficulty_v2(timestamps, cumulative_difficulties, params::DIFFICULTY_TARGET)
    } else {
        next_difficulty_v1(timestamps, cumulative_difficulties, params::DIFFICULTY_TARGET)
    }
}

/// v1: classic windowed estimator. Sorts timestamps, cuts outliers on both
/// ends, and targets `total_work * target / time_span`.
pub fn next_difficulty_v1(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    target_seconds: u64,
) -> Difficulty {
    let length = timestamps.len().min(cumulative_difficulties.len());
    if length < 2 {
        return 1;
    }
    let mut timestamps: Vec<u64> = timestamps[..length].to_vec();
    let cumulative_difficulties = &cumulative_difficulties[..length];
    timestamps.sort_unstable();

    let window = params::DIFFICULTY_WINDOW_V1;
    let cut = params::DIFFICULTY_CUT_V1;
    let (cut_begin, cut_end) = if length <= window - 2 * cut {
        (0, length)
    } else {
        let begin = (length - (window - 2 * cut) + 1) / 2;
        (begin, begin + (window - 2 * cut))
    };

    let time_span = timestamps[cut_end - 1].saturating_sub(timestamps[cut_begin]).max(1);
    let total_work =
        cumulative_difficulties[cut_end - 1].saturating_sub(cumulative_difficulties[cut_begin]);
    if total_work == 0 {
        return 1;
    }

    ((total_work * target_seconds as u128 + time_span as u128 - 1) / time_span as u128).max(1)
}

/// Linearly-weighted moving average over the last `window` solve times.
///
/// `clamp_negative` admits out-of-order timestamps (clamped symmetrically)
/// instead of flooring them at one second.
fn lwma(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    target_seconds: u64,
    window: usize,
    clamp_negative: bool,
) -> Difficulty {
    let length = timestamps.len().min(cumulative_difficulties.len());
    if length < 2 {
        return 1;
    }
    let used = length.min(window + 1);
    let timestamps = &timestamps[length - used..];
    let cumulative_difficulties = &cumulative_difficulties[length - used..];
    let n = used - 1;

    let cap = (6 * target_seconds) as i64;
    let mut weighted: i128 = 0;
    for i in 1..=n {
        let solve_time = timestamps[i] as i64 - timestamps[i - 1] as i64;
        let solve_time = if clamp_negative {
            solve_time.clamp(-cap, cap)
        } else {
            solve_time.clamp(1, cap)
        };
        weighted += solve_time as i128 * i as i128;
    }

    let k = (n * (n + 1) / 2) as i128;
    // Keep the denominator sane even under hostile timestamps.
    let floor = k * target_seconds as i128 / 100;
    let weighted = weighted.max(floor.max(1));

    let total_work = cumulative_difficulties[n].saturating_sub(cumulative_difficulties[0]);
    if total_work == 0 {
        return 1;
    }
    let avg_difficulty = (total_work / n as u128).max(1);

    let next = avg_difficulty
        .saturating_mul(k as u128)
        .saturating_mul(target_seconds as u128)
        / weighted as u128;
    next.max(1)
}

/// v2: LWMA with solve times floored at one second.
pub fn next_difficulty_v2(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    target_seconds: u64,
) -> Difficulty {
    lwma(
        timestamps,
        cumulative_difficulties,
        target_seconds,
        params::DIFFICULTY_WINDOW_V2,
        false,
    )
}

/// v3: LWMA admitting (clamped) negative solve times.
pub fn next_difficulty_v3(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
) -> Difficulty {
    lwma(
        timestamps,
        cumulative_difficulties,
        params::DIFFICULTY_TARGET,
        params::DIFFICULTY_WINDOW_V3,
        true,
    )
}

/// v4: shorter window plus a per-step drop floor of one third, limiting
/// how fast difficulty can collapse under timestamp manipulation.
pub fn next_difficulty_v4(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
) -> Difficulty {
    let next = lwma(
        timestamps,
        cumulative_difficulties,
        params::DIFFICULTY_TARGET,
        params::DIFFICULTY_WINDOW_V4,
        true,
    );
    let length = timestamps.len().min(cumulative_difficulties.len());
    if length < 2 {
        return next;
    }
    let previous = cumulative_difficulties[length - 1]
        .saturating_sub(cumulative_difficulties[length - 2])
        .max(1);
    next.max(previous - previous / 3)
}

/// The last difficulty window, keyed by the height it was computed at.
/// On a +1 step the chain slides it instead of re-reading the window.
#[derive(Debug, Default)]
pub struct DifficultyCache {
    /// Chain height the vectors were valid for; zero means invalid.
    pub computed_height: u64,
    pub timestamps: Vec<u64>,
    pub difficulties: Vec<Difficulty>,
}

impl DifficultyCache {
    pub fn invalidate(&mut self) {
        self.computed_height = 0;
        self.timestamps.clear();
        self.difficulties.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(count: usize, spacing: u64, difficulty: Difficulty) -> (Vec<u64>, Vec<Difficulty>) {
        let timestamps: Vec<u64> = (0..count as u64).map(|i| i * spacing).collect();
        let cumulative: Vec<Difficulty> = (1..=count as u128).map(|i| i * difficulty).collect();
        (timestamps, cumulative)
    }

    #[test]
    fn test_degenerate_windows_return_one() {
        assert_eq!(next_difficulty_v1(&[], &[], 240), 1);
        assert_eq!(next_difficulty_v1(&[100], &[10], 240), 1);
        assert_eq!(next_difficulty_v2(&[100], &[10], 240), 1);
        assert_eq!(next_difficulty_v3(&[], &[]), 1);
        assert_eq!(next_difficulty_v4(&[100], &[10]), 1);
    }

    #[test]
    fn test_v1_on_target_holds_difficulty() {
        let (ts, cd) = series(100, params::DIFFICULTY_TARGET, 1000);
        let next = next_difficulty_v1(&ts, &cd, params::DIFFICULTY_TARGET);
        // Ceiling division admits a +1.
        assert!((1000..=1001).contains(&next), "next = {}", next);
    }

    #[test]
    fn test_v2_reacts_to_block_rate() {
        let target = params::DIFFICULTY_TARGET;
        let (ts, cd) = series(61, target / 2, 1000);
        let fast = next_difficulty_v2(&ts, &cd, target);
        assert!(fast > 1000, "fast blocks must raise difficulty, got {}", fast);

        let (ts, cd) = series(61, target * 2, 1000);
        let slow = next_difficulty_v2(&ts, &cd, target);
        assert!(slow < 1000, "slow blocks must drop difficulty, got {}", slow);
    }

    #[test]
    fn test_v3_tolerates_backward_timestamp() {
        let target = params::DIFFICULTY_TARGET;
        let (mut ts, cd) = series(61, target, 1000);
        // One out-of-order timestamp must not blow the estimate up.
        ts[30] = ts[29].saturating_sub(10);
        let next = next_difficulty_v3(&ts, &cd);
        assert!(next >= 900 && next <= 1300, "next = {}", next);
    }

    #[test]
    fn test_v4_limits_collapse() {
        let target = params::DIFFICULTY_TARGET;
        // Absurdly slow chain: v4 still refuses to drop more than a third
        // below the last per-block difficulty.
        let (ts, cd) = series(46, target * 50, 900);
        let next = next_difficulty_v4(&ts, &cd);
        assert!(next >= 600, "next = {}", next);
    }
}

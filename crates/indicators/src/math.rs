//! Column arithmetic shared by the standard indicators.
//!
//! Every function takes and returns columns aligned to the bar sequence.
//! `None` marks rows where the value is not yet defined (window not full,
//! upstream not defined). Nothing here interpolates or fills gaps.

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;

use crate::spec::Column;

/// Index of the first defined value.
fn first_defined(input: &[Option<Decimal>]) -> Option<usize> {
    input.iter().position(Option::is_some)
}

/// Iterator over full windows ending at each row, `None` while the window
/// is short or contains an undefined value.
fn windows<'a>(
    input: &'a [Option<Decimal>],
    period: usize,
) -> impl Iterator<Item = Option<Vec<Decimal>>> + 'a {
    (0..input.len()).map(move |end| {
        if period == 0 || end + 1 < period {
            return None;
        }
        input[end + 1 - period..=end].iter().copied().collect()
    })
}

/// Simple moving average.
pub fn sma(input: &[Option<Decimal>], period: usize) -> Column {
    let divisor = Decimal::from(period);
    windows(input, period)
        .map(|window| {
            let window = window?;
            window.iter().sum::<Decimal>().checked_div(divisor)
        })
        .collect()
}

/// Sample standard deviation (n - 1 denominator) over a rolling window.
pub fn rolling_std(input: &[Option<Decimal>], period: usize) -> Column {
    if period < 2 {
        return vec![None; input.len()];
    }
    let n = Decimal::from(period);
    windows(input, period)
        .map(|window| {
            let window = window?;
            let mean = window.iter().sum::<Decimal>().checked_div(n)?;
            let squares: Decimal = window.iter().map(|v| (*v - mean) * (*v - mean)).sum();
            squares.checked_div(n - Decimal::ONE)?.sqrt()
        })
        .collect()
}

pub fn rolling_min(input: &[Option<Decimal>], period: usize) -> Column {
    windows(input, period)
        .map(|window| window?.into_iter().min())
        .collect()
}

pub fn rolling_max(input: &[Option<Decimal>], period: usize) -> Column {
    windows(input, period)
        .map(|window| window?.into_iter().max())
        .collect()
}

/// Recursive smoothing `s = alpha * x + (1 - alpha) * s_prev`, seeded with
/// the simple average of the first `period` defined values.
///
/// Leading undefined rows are skipped, so the filter can run on the output
/// of another windowed indicator.
pub fn smoothed(input: &[Option<Decimal>], period: usize, alpha: Decimal) -> Column {
    let mut out = vec![None; input.len()];
    let Some(start) = first_defined(input) else {
        return out;
    };
    if period == 0 || start + period > input.len() {
        return out;
    }

    let seed_end = start + period - 1;
    let seed: Option<Vec<Decimal>> = input[start..=seed_end].iter().copied().collect();
    let Some(mut state) = seed.and_then(|values| {
        values
            .iter()
            .sum::<Decimal>()
            .checked_div(Decimal::from(period))
    }) else {
        return out;
    };
    out[seed_end] = Some(state);

    let keep = Decimal::ONE - alpha;
    for (i, value) in input.iter().enumerate().skip(seed_end + 1) {
        let Some(value) = value else {
            break;
        };
        state = alpha * *value + keep * state;
        out[i] = Some(state);
    }
    out
}

/// Exponential moving average with `alpha = 2 / (period + 1)`.
pub fn ema(input: &[Option<Decimal>], period: usize) -> Column {
    let alpha = Decimal::TWO / Decimal::from(period + 1);
    smoothed(input, period, alpha)
}

/// Wilder's smoothing, `alpha = 1 / period`.
pub fn wilder(input: &[Option<Decimal>], period: usize) -> Column {
    if period == 0 {
        return vec![None; input.len()];
    }
    let alpha = Decimal::ONE / Decimal::from(period);
    smoothed(input, period, alpha)
}

/// Recursive smoothing seeded with a fixed value instead of an average.
pub fn seeded(input: &[Option<Decimal>], alpha: Decimal, seed: Decimal) -> Column {
    let mut state = seed;
    let keep = Decimal::ONE - alpha;
    input
        .iter()
        .map(|value| {
            let value = (*value)?;
            state = alpha * value + keep * state;
            Some(state)
        })
        .collect()
}

/// Combine two aligned columns row by row where both are defined.
pub fn zip_with<F>(a: &[Option<Decimal>], b: &[Option<Decimal>], f: F) -> Column
where
    F: Fn(Decimal, Decimal) -> Option<Decimal>,
{
    a.iter()
        .zip(b)
        .map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => f(*a, *b),
            _ => None,
        })
        .collect()
}

/// Change from the previous row. The first row is undefined.
pub fn diff(input: &[Option<Decimal>]) -> Column {
    let mut out = Vec::with_capacity(input.len());
    let mut previous: Option<Decimal> = None;
    for value in input {
        out.push(match (value, previous) {
            (Some(v), Some(p)) => Some(*v - p),
            _ => None,
        });
        previous = *value;
    }
    out
}

/// Percentage change over `period` rows.
pub fn pct_change(input: &[Option<Decimal>], period: usize) -> Column {
    (0..input.len())
        .map(|i| {
            let current = input[i]?;
            let base = input[i.checked_sub(period)?]?;
            let ratio = current.checked_div(base)?;
            Some((ratio - Decimal::ONE) * Decimal::ONE_HUNDRED)
        })
        .collect()
}

/// `max(high - low, |high - prev_close|, |low - prev_close|)`. The first row
/// has no previous close and uses `high - low`.
pub fn true_range(
    high: &[Option<Decimal>],
    low: &[Option<Decimal>],
    close: &[Option<Decimal>],
) -> Column {
    (0..high.len())
        .map(|i| {
            let (h, l) = (high[i]?, low[i]?);
            let range = h - l;
            match i.checked_sub(1).and_then(|p| close[p]) {
                Some(prev) => Some(range.max((h - prev).abs()).max((l - prev).abs())),
                None => Some(range),
            }
        })
        .collect()
}

/// Relative strength index with Wilder smoothing of gains and losses.
///
/// A window with no losses reads 100; a flat window reads 50.
pub fn rsi(close: &[Option<Decimal>], period: usize) -> Column {
    let changes = diff(close);
    let gains: Column = changes.iter().map(|c| c.map(|c| c.max(Decimal::ZERO))).collect();
    let losses: Column = changes
        .iter()
        .map(|c| c.map(|c| (-c).max(Decimal::ZERO)))
        .collect();

    zip_with(&wilder(&gains, period), &wilder(&losses, period), |gain, loss| {
        if loss.is_zero() {
            return Some(if gain.is_zero() {
                Decimal::from(50)
            } else {
                Decimal::ONE_HUNDRED
            });
        }
        let rs = gain.checked_div(loss)?;
        Some(Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
    })
}

//! Standard indicator library.
//!
//! | Family | Indicators | Group |
//! |--------|------------|-------|
//! | Moving averages | `ma5` `ma10` `ma20` `ma30` `ma60` | `ma` |
//! | Exponential averages | `ema5` `ema10` `ema12` `ema21` `ema26` `ema34` `ema55` | `ema` |
//! | MACD (12, 26, 9) | `macd_dif` `macd_dea` `macd_hist` | `macd` |
//! | RSI (Wilder) | `rsi6` `rsi12` `rsi14` | `rsi` |
//! | Bollinger (20, 2σ) | `boll_upper` `boll_mid` `boll_lower` (`stddev20`) | `boll` |
//! | KDJ (9, 3, 3) | `kdj_k` `kdj_d` `kdj_j` (`rsv9`) | `kdj` |
//! | ATR | `atr14` (`true_range`) | `atr` |
//! | ADX / DMI | `adx14` `plus_di14` `minus_di14` (`plus_dm` `minus_dm` `dx14`) | `adx` |
//! | On-balance volume | `obv` `obv_ma10` | |
//! | Volume | `volume_ma5` `volume_ma10` `volume_ma20` `volume_ratio` | `volume` |
//! | Trend | `trend_direction` `momentum10` | `trend` |
//!
//! Names in parentheses are intermediates; they can be selected directly
//! but are not part of any group.

use rust_decimal::Decimal;

use crate::errors::Result;
use crate::math;
use crate::registry::IndicatorRegistry;
use crate::spec::{Column, Field, IndicatorSpec};

const MA_PERIODS: [usize; 5] = [5, 10, 20, 30, 60];
const EMA_PERIODS: [usize; 7] = [5, 10, 12, 21, 26, 34, 55];
const RSI_PERIODS: [usize; 3] = [6, 12, 14];
const VOLUME_MA_PERIODS: [usize; 3] = [5, 10, 20];

const MACD_SIGNAL: usize = 9;
const BOLL_PERIOD: usize = 20;
const KDJ_PERIOD: usize = 9;
const DMI_PERIOD: usize = 14;
const MOMENTUM_PERIOD: usize = 10;

fn percent(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    Some(numerator.checked_div(denominator)? * Decimal::ONE_HUNDRED)
}

/// Registry holding every standard indicator and group.
pub fn standard_registry() -> Result<IndicatorRegistry> {
    let mut registry = IndicatorRegistry::new();
    register_averages(&mut registry)?;
    register_macd(&mut registry)?;
    register_rsi(&mut registry)?;
    register_bollinger(&mut registry)?;
    register_kdj(&mut registry)?;
    register_atr_dmi(&mut registry)?;
    register_volume(&mut registry)?;
    register_trend(&mut registry)?;
    Ok(registry)
}

fn register_averages(registry: &mut IndicatorRegistry) -> Result<()> {
    for period in MA_PERIODS {
        registry.register(
            IndicatorSpec::new(format!("ma{period}"), period, move |inputs| {
                math::sma(inputs.field(Field::Close), period)
            })
            .reads(Field::Close),
        )?;
    }
    for period in EMA_PERIODS {
        registry.register(
            IndicatorSpec::new(format!("ema{period}"), period, move |inputs| {
                math::ema(inputs.field(Field::Close), period)
            })
            .reads(Field::Close),
        )?;
    }

    registry.register_group("ma", MA_PERIODS.map(|p| format!("ma{p}")))?;
    registry.register_group("ema", EMA_PERIODS.map(|p| format!("ema{p}")))?;
    Ok(())
}

fn register_macd(registry: &mut IndicatorRegistry) -> Result<()> {
    registry.register(
        IndicatorSpec::new("macd_dif", 26, |inputs| {
            math::zip_with(inputs.indicator("ema12"), inputs.indicator("ema26"), |f, s| {
                Some(f - s)
            })
        })
        .depends_on("ema12")
        .depends_on("ema26"),
    )?;
    registry.register(
        IndicatorSpec::new("macd_dea", 26 + MACD_SIGNAL - 1, |inputs| {
            math::ema(inputs.indicator("macd_dif"), MACD_SIGNAL)
        })
        .depends_on("macd_dif"),
    )?;
    registry.register(
        IndicatorSpec::new("macd_hist", 26 + MACD_SIGNAL - 1, |inputs| {
            math::zip_with(
                inputs.indicator("macd_dif"),
                inputs.indicator("macd_dea"),
                |dif, dea| Some(dif - dea),
            )
        })
        .depends_on("macd_dif")
        .depends_on("macd_dea"),
    )?;

    registry.register_group("macd", ["macd_dif", "macd_dea", "macd_hist"])
}

fn register_rsi(registry: &mut IndicatorRegistry) -> Result<()> {
    for period in RSI_PERIODS {
        registry.register(
            IndicatorSpec::new(format!("rsi{period}"), period + 1, move |inputs| {
                math::rsi(inputs.field(Field::Close), period)
            })
            .reads(Field::Close),
        )?;
    }
    registry.register_group("rsi", RSI_PERIODS.map(|p| format!("rsi{p}")))
}

fn register_bollinger(registry: &mut IndicatorRegistry) -> Result<()> {
    let width = Decimal::TWO;

    registry.register(
        IndicatorSpec::new("stddev20", BOLL_PERIOD, |inputs| {
            math::rolling_std(inputs.field(Field::Close), BOLL_PERIOD)
        })
        .reads(Field::Close),
    )?;
    registry.register(
        IndicatorSpec::new("boll_mid", BOLL_PERIOD, |inputs| {
            inputs.indicator("ma20").to_vec()
        })
        .depends_on("ma20"),
    )?;
    registry.register(
        IndicatorSpec::new("boll_upper", BOLL_PERIOD, move |inputs| {
            math::zip_with(inputs.indicator("ma20"), inputs.indicator("stddev20"), |m, s| {
                Some(m + width * s)
            })
        })
        .depends_on("ma20")
        .depends_on("stddev20"),
    )?;
    registry.register(
        IndicatorSpec::new("boll_lower", BOLL_PERIOD, move |inputs| {
            math::zip_with(inputs.indicator("ma20"), inputs.indicator("stddev20"), |m, s| {
                Some(m - width * s)
            })
        })
        .depends_on("ma20")
        .depends_on("stddev20"),
    )?;

    registry.register_group("boll", ["boll_upper", "boll_mid", "boll_lower"])
}

fn register_kdj(registry: &mut IndicatorRegistry) -> Result<()> {
    let alpha = Decimal::ONE / Decimal::from(3);
    let neutral = Decimal::from(50);

    registry.register(
        IndicatorSpec::new("rsv9", KDJ_PERIOD, move |inputs| {
            let close = inputs.field(Field::Close);
            let lowest = math::rolling_min(inputs.field(Field::Low), KDJ_PERIOD);
            let highest = math::rolling_max(inputs.field(Field::High), KDJ_PERIOD);
            (0..inputs.len())
                .map(|i| {
                    let (c, l, h) = (close[i]?, lowest[i]?, highest[i]?);
                    if h == l {
                        return Some(neutral);
                    }
                    percent(c - l, h - l)
                })
                .collect::<Column>()
        })
        .reads(Field::High)
        .reads(Field::Low)
        .reads(Field::Close),
    )?;
    registry.register(
        IndicatorSpec::new("kdj_k", KDJ_PERIOD, move |inputs| {
            math::seeded(inputs.indicator("rsv9"), alpha, neutral)
        })
        .depends_on("rsv9"),
    )?;
    registry.register(
        IndicatorSpec::new("kdj_d", KDJ_PERIOD, move |inputs| {
            math::seeded(inputs.indicator("kdj_k"), alpha, neutral)
        })
        .depends_on("kdj_k"),
    )?;
    registry.register(
        IndicatorSpec::new("kdj_j", KDJ_PERIOD, |inputs| {
            math::zip_with(inputs.indicator("kdj_k"), inputs.indicator("kdj_d"), |k, d| {
                Some(Decimal::from(3) * k - Decimal::TWO * d)
            })
        })
        .depends_on("kdj_k")
        .depends_on("kdj_d"),
    )?;

    registry.register_group("kdj", ["kdj_k", "kdj_d", "kdj_j"])
}

/// Directional movement: `primary` counts only where it exceeds `opposite` and is positive.
fn directional_movement(primary: Column, opposite: &[Option<Decimal>]) -> Column {
    math::zip_with(&primary, opposite, |movement, other| {
        Some(if movement > other && movement > Decimal::ZERO {
            movement
        } else {
            Decimal::ZERO
        })
    })
}

fn register_atr_dmi(registry: &mut IndicatorRegistry) -> Result<()> {
    registry.register(
        IndicatorSpec::new("true_range", 1, |inputs| {
            math::true_range(
                inputs.field(Field::High),
                inputs.field(Field::Low),
                inputs.field(Field::Close),
            )
        })
        .reads(Field::High)
        .reads(Field::Low)
        .reads(Field::Close),
    )?;
    registry.register(
        IndicatorSpec::new("atr14", DMI_PERIOD, |inputs| {
            math::sma(inputs.indicator("true_range"), DMI_PERIOD)
        })
        .depends_on("true_range"),
    )?;

    registry.register(
        IndicatorSpec::new("plus_dm", 2, |inputs| {
            let up = math::diff(inputs.field(Field::High));
            let down: Column = math::diff(inputs.field(Field::Low))
                .into_iter()
                .map(|d| d.map(|d| -d))
                .collect();
            directional_movement(up, &down)
        })
        .reads(Field::High)
        .reads(Field::Low),
    )?;
    registry.register(
        IndicatorSpec::new("minus_dm", 2, |inputs| {
            let up = math::diff(inputs.field(Field::High));
            let down: Column = math::diff(inputs.field(Field::Low))
                .into_iter()
                .map(|d| d.map(|d| -d))
                .collect();
            directional_movement(down, &up)
        })
        .reads(Field::High)
        .reads(Field::Low),
    )?;

    for (name, dm) in [("plus_di14", "plus_dm"), ("minus_di14", "minus_dm")] {
        registry.register(
            IndicatorSpec::new(name, DMI_PERIOD + 1, move |inputs| {
                let smoothed = math::sma(inputs.indicator(dm), DMI_PERIOD);
                math::zip_with(&smoothed, inputs.indicator("atr14"), |movement, atr| {
                    if atr.is_zero() {
                        return Some(Decimal::ZERO);
                    }
                    percent(movement, atr)
                })
            })
            .depends_on(dm)
            .depends_on("atr14"),
        )?;
    }

    registry.register(
        IndicatorSpec::new("dx14", DMI_PERIOD + 1, |inputs| {
            math::zip_with(
                inputs.indicator("plus_di14"),
                inputs.indicator("minus_di14"),
                |plus, minus| {
                    let sum = plus + minus;
                    if sum.is_zero() {
                        return Some(Decimal::ZERO);
                    }
                    percent((plus - minus).abs(), sum)
                },
            )
        })
        .depends_on("plus_di14")
        .depends_on("minus_di14"),
    )?;
    registry.register(
        IndicatorSpec::new("adx14", 2 * DMI_PERIOD, |inputs| {
            math::sma(inputs.indicator("dx14"), DMI_PERIOD)
        })
        .depends_on("dx14"),
    )?;

    registry.register_group("atr", ["atr14"])?;
    registry.register_group("adx", ["adx14", "plus_di14", "minus_di14"])
}

fn register_volume(registry: &mut IndicatorRegistry) -> Result<()> {
    registry.register(
        IndicatorSpec::new("obv", 1, |inputs| {
            let close = inputs.field(Field::Close);
            let volume = inputs.field(Field::Volume);
            let mut total = Decimal::ZERO;
            (0..inputs.len())
                .map(|i| {
                    if i > 0 {
                        let (c, p, v) = (close[i]?, close[i - 1]?, volume[i]?);
                        if c > p {
                            total += v;
                        } else if c < p {
                            total -= v;
                        }
                    }
                    Some(total)
                })
                .collect::<Column>()
        })
        .reads(Field::Close)
        .reads(Field::Volume),
    )?;
    registry.register(
        IndicatorSpec::new("obv_ma10", 10, |inputs| math::sma(inputs.indicator("obv"), 10))
            .depends_on("obv"),
    )?;

    for period in VOLUME_MA_PERIODS {
        registry.register(
            IndicatorSpec::new(format!("volume_ma{period}"), period, move |inputs| {
                math::sma(inputs.field(Field::Volume), period)
            })
            .reads(Field::Volume),
        )?;
    }
    registry.register(
        IndicatorSpec::new("volume_ratio", 20, |inputs| {
            math::zip_with(
                inputs.field(Field::Volume),
                inputs.indicator("volume_ma20"),
                |volume, average| {
                    if average.is_zero() {
                        return Some(Decimal::ONE);
                    }
                    volume.checked_div(average)
                },
            )
        })
        .reads(Field::Volume)
        .depends_on("volume_ma20"),
    )?;

    registry.register_group(
        "volume",
        ["volume_ma5", "volume_ma10", "volume_ma20", "volume_ratio"],
    )
}

/// Trend score in [-1, 1] from price vs. EMA12, EMA12 vs. EMA26 and
/// 10-bar momentum.
fn trend_score(close: Decimal, fast: Decimal, slow: Decimal, momentum: Decimal) -> Decimal {
    let position = Decimal::new(3, 1);
    let strong = Decimal::new(4, 1);
    let weak = Decimal::new(2, 1);
    let threshold = Decimal::from(5);

    let mut score = Decimal::ZERO;
    score += if close > fast { position } else { -position };
    score += if fast > slow { position } else { -position };
    score += if momentum > threshold {
        strong
    } else if momentum > Decimal::ZERO {
        weak
    } else if momentum < -threshold {
        -strong
    } else if momentum < Decimal::ZERO {
        -weak
    } else {
        Decimal::ZERO
    };

    score.clamp(Decimal::NEGATIVE_ONE, Decimal::ONE)
}

fn register_trend(registry: &mut IndicatorRegistry) -> Result<()> {
    registry.register(
        IndicatorSpec::new("momentum10", MOMENTUM_PERIOD + 1, |inputs| {
            math::pct_change(inputs.field(Field::Close), MOMENTUM_PERIOD)
        })
        .reads(Field::Close),
    )?;
    registry.register(
        IndicatorSpec::new("trend_direction", 26, |inputs| {
            let close = inputs.field(Field::Close);
            let fast = inputs.indicator("ema12");
            let slow = inputs.indicator("ema26");
            let momentum = inputs.indicator("momentum10");
            (0..inputs.len())
                .map(|i| Some(trend_score(close[i]?, fast[i]?, slow[i]?, momentum[i]?)))
                .collect::<Column>()
        })
        .reads(Field::Close)
        .depends_on("ema12")
        .depends_on("ema26")
        .depends_on("momentum10"),
    )?;

    registry.register_group("trend", ["trend_direction", "momentum10"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_standard_registry_is_valid() {
        let registry = standard_registry().unwrap();
        registry.validate().unwrap();
        assert!(registry.contains("macd_hist"));
        assert!(registry.contains("trend_direction"));
        assert_eq!(registry.expand("ma").unwrap().len(), MA_PERIODS.len());
    }

    #[test]
    fn test_trend_score_extremes() {
        assert_eq!(
            trend_score(dec!(110), dec!(105), dec!(100), dec!(8)),
            dec!(1.0)
        );
        assert_eq!(
            trend_score(dec!(90), dec!(95), dec!(100), dec!(-8)),
            dec!(-1.0)
        );
        assert_eq!(
            trend_score(dec!(101), dec!(100), dec!(102), dec!(1)),
            dec!(0.2)
        );
    }

    #[test]
    fn test_directional_movement_picks_larger_positive_move() {
        let up = vec![None, Some(dec!(3)), Some(dec!(-1)), Some(dec!(1))];
        let down = vec![None, Some(dec!(1)), Some(dec!(2)), Some(dec!(1))];
        let plus = directional_movement(up.clone(), &down);
        assert_eq!(
            plus,
            vec![None, Some(dec!(3)), Some(dec!(0)), Some(dec!(0))]
        );
        let minus = directional_movement(down, &up);
        assert_eq!(
            minus,
            vec![None, Some(dec!(0)), Some(dec!(2)), Some(dec!(0))]
        );
    }
}

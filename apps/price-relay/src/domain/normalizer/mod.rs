//! Quote Normalizer
//!
//! Converts raw upstream ticks into canonical [`Quote`] records.
//!
//! # Rules
//!
//! - **bid**: the upstream value when it is a positive number, otherwise the
//!   previous bid. With no previous bid the tick is dropped.
//! - **ask**: the upstream value plus the configured markup when present,
//!   otherwise `bid + spread`.
//! - **high / low**: monotonic extrema for the current run. The first tick
//!   seeds them; later ticks can only widen them.
//! - Every price is rounded to two decimal places, half away from zero.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::quote::{Quote, RawTick, SessionStats, positive, round_price};

/// Default unit label attached to every quote.
pub const DEFAULT_UNIT: &str = "USD/oz";

// =============================================================================
// Configuration
// =============================================================================

/// Normalization parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizerConfig {
    /// Added to the bid when the upstream provides no ask.
    pub spread: Decimal,
    /// Added to an upstream-provided ask.
    pub ask_markup: Decimal,
    /// Unit label.
    pub unit: String,
    /// Symbol override; when `None` the upstream symbol is used.
    pub symbol: Option<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            spread: Decimal::ONE,
            ask_markup: Decimal::ZERO,
            unit: DEFAULT_UNIT.to_string(),
            symbol: None,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Reasons a tick is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// No usable bid on the tick and nothing to fall back on.
    #[error("tick has no usable bid and no previous bid to fall back on")]
    NoBid,

    /// Deriving the ask overflowed the decimal range.
    #[error("price out of range")]
    OutOfRange,
}

impl NormalizeError {
    /// Metric label for the drop reason.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NoBid => "no_bid",
            Self::OutOfRange => "out_of_range",
        }
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Stateful normalizer owning the previous bid and the session extrema.
#[derive(Debug)]
pub struct QuoteNormalizer {
    config: NormalizerConfig,
    last_bid: Option<Decimal>,
    extrema: Option<SessionStats>,
    dropped_ticks: u64,
}

impl QuoteNormalizer {
    /// Create a normalizer with no history.
    #[must_use]
    pub const fn new(config: NormalizerConfig) -> Self {
        Self {
            config,
            last_bid: None,
            extrema: None,
            dropped_ticks: 0,
        }
    }

    /// Create a normalizer whose bid fallback is seeded from a restored quote.
    ///
    /// Session extrema are not seeded: they belong to the current run only.
    #[must_use]
    pub fn with_previous(config: NormalizerConfig, previous: Option<&Quote>) -> Self {
        Self {
            last_bid: previous.map(|q| q.bid),
            ..Self::new(config)
        }
    }

    /// Normalize a tick, stamping it with the current time.
    ///
    /// # Errors
    ///
    /// Returns `NormalizeError::NoBid` when the tick cannot produce a bid,
    /// or `NormalizeError::OutOfRange` when the derived ask overflows.
    pub fn normalize(&mut self, tick: &RawTick) -> Result<Quote, NormalizeError> {
        self.normalize_at(tick, Utc::now())
    }

    /// Normalize a tick with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns `NormalizeError::NoBid` when the tick cannot produce a bid,
    /// or `NormalizeError::OutOfRange` when the derived ask overflows.
    pub fn normalize_at(
        &mut self,
        tick: &RawTick,
        now: DateTime<Utc>,
    ) -> Result<Quote, NormalizeError> {
        let bid = match positive(tick.bid.map(round_price)).or(self.last_bid) {
            Some(bid) => bid,
            None => {
                self.dropped_ticks += 1;
                return Err(NormalizeError::NoBid);
            }
        };

        let ask = positive(tick.ask)
            .map_or_else(
                || bid.checked_add(self.config.spread),
                |ask| ask.checked_add(self.config.ask_markup),
            )
            .map(round_price);
        let Some(ask) = ask else {
            self.dropped_ticks += 1;
            return Err(NormalizeError::OutOfRange);
        };

        let upstream_high = positive(tick.high).map_or(ask, |h| round_price(h).max(ask));
        let upstream_low = positive(tick.low).map_or(bid, |l| round_price(l).min(bid));

        let extrema = self.extrema.map_or_else(
            || SessionStats::seed(upstream_high, upstream_low),
            |prev| prev.widen(upstream_high, upstream_low),
        );

        self.last_bid = Some(bid);
        self.extrema = Some(extrema);

        Ok(Quote {
            symbol: self.config.symbol.clone().or_else(|| tick.symbol.clone()),
            bid,
            ask,
            high: extrema.high,
            low: extrema.low,
            unit: self.config.unit.clone(),
            updated: now,
            time: tick.time.clone(),
            time_msc: tick.time_msc.clone(),
            volume: tick.volume.clone(),
        })
    }

    /// Extrema of the current run, if any tick has been normalized.
    #[must_use]
    pub const fn session_stats(&self) -> Option<SessionStats> {
        self.extrema
    }

    /// Number of ticks dropped so far.
    #[must_use]
    pub const fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks
    }

    /// Normalization parameters.
    #[must_use]
    pub const fn config(&self) -> &NormalizerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    fn normalizer() -> QuoteNormalizer {
        QuoteNormalizer::new(NormalizerConfig::default())
    }

    fn tick(bid: Option<Decimal>, ask: Option<Decimal>) -> RawTick {
        RawTick {
            bid,
            ask,
            ..RawTick::default()
        }
    }

    #[test]
    fn derives_ask_from_spread() {
        let raw: RawTick =
            serde_json::from_str(r#"{"type":"tick","bid":2350.123,"ask":null}"#).unwrap();
        let quote = normalizer().normalize(&raw).unwrap();

        assert_eq!(quote.bid.to_string(), "2350.12");
        assert_eq!(quote.ask.to_string(), "2351.12");
    }

    #[test_case(dec!(2350.125), "2350.13", "2351.13" ; "midpoint rounds away from zero")]
    #[test_case(dec!(2350.1), "2350.10", "2351.10" ; "pads to two digits")]
    #[test_case(dec!(2350.005), "2350.01", "2351.01" ; "third digit five rounds up")]
    fn rounding_table(bid: Decimal, expected_bid: &str, expected_ask: &str) {
        let quote = normalizer().normalize(&tick(Some(bid), None)).unwrap();
        assert_eq!(quote.bid.to_string(), expected_bid);
        assert_eq!(quote.ask.to_string(), expected_ask);
    }

    #[test]
    fn overflowing_spread_is_dropped_not_fatal() {
        let raw: RawTick =
            serde_json::from_str(r#"{"type":"tick","bid":"79228162514264337593543950335"}"#)
                .unwrap();
        assert_eq!(raw.bid, Some(Decimal::MAX));

        let mut normalizer = normalizer();
        assert_eq!(normalizer.normalize(&raw), Err(NormalizeError::OutOfRange));
        assert_eq!(normalizer.dropped_ticks(), 1);
        assert!(normalizer.session_stats().is_none());

        let quote = normalizer.normalize(&tick(Some(dec!(2350)), None)).unwrap();
        assert_eq!(quote.ask, dec!(2351.00));
    }

    #[test]
    fn overflowing_markup_is_dropped() {
        let config = NormalizerConfig {
            ask_markup: dec!(0.50),
            ..NormalizerConfig::default()
        };
        let mut normalizer = QuoteNormalizer::new(config);

        let result = normalizer.normalize(&tick(Some(dec!(2350)), Some(Decimal::MAX)));
        assert_eq!(result.unwrap_err().reason(), "out_of_range");
    }

    #[test]
    fn upstream_ask_gets_markup() {
        let config = NormalizerConfig {
            ask_markup: dec!(0.40),
            ..NormalizerConfig::default()
        };
        let mut normalizer = QuoteNormalizer::new(config);

        let quote = normalizer
            .normalize(&tick(Some(dec!(2350)), Some(dec!(2350.30))))
            .unwrap();
        assert_eq!(quote.ask.to_string(), "2350.70");
    }

    #[test]
    fn drops_tick_without_bid_or_fallback() {
        let mut normalizer = normalizer();
        assert_eq!(
            normalizer.normalize(&tick(None, None)),
            Err(NormalizeError::NoBid)
        );
        assert_eq!(
            normalizer.normalize(&tick(Some(dec!(-5)), None)),
            Err(NormalizeError::NoBid)
        );
        assert_eq!(
            normalizer.normalize(&tick(Some(dec!(0.004)), None)),
            Err(NormalizeError::NoBid)
        );
        assert_eq!(normalizer.dropped_ticks(), 3);
        assert!(normalizer.session_stats().is_none());
    }

    #[test]
    fn falls_back_to_previous_bid() {
        let mut normalizer = normalizer();
        normalizer.normalize(&tick(Some(dec!(2350)), None)).unwrap();

        let quote = normalizer.normalize(&tick(None, None)).unwrap();
        assert_eq!(quote.bid, dec!(2350.00));
        assert_eq!(normalizer.dropped_ticks(), 0);
    }

    #[test]
    fn falls_back_to_restored_quote() {
        let restored = Quote {
            symbol: None,
            bid: dec!(2000.00),
            ask: dec!(2001.00),
            high: dec!(2100.00),
            low: dec!(1900.00),
            unit: DEFAULT_UNIT.to_string(),
            updated: Utc::now(),
            time: None,
            time_msc: None,
            volume: None,
        };
        let mut normalizer =
            QuoteNormalizer::with_previous(NormalizerConfig::default(), Some(&restored));

        let quote = normalizer.normalize(&tick(None, None)).unwrap();
        assert_eq!(quote.bid, dec!(2000.00));
        // Extrema restart with the run, not with the restored record.
        assert_eq!(quote.high, dec!(2001.00));
        assert_eq!(quote.low, dec!(2000.00));
    }

    #[test]
    fn first_tick_seeds_extrema() {
        let quote = normalizer()
            .normalize(&tick(Some(dec!(10)), None))
            .unwrap();
        assert_eq!(quote.high, dec!(11.00));
        assert_eq!(quote.low, dec!(10.00));
    }

    #[test]
    fn upstream_extrema_widen_session() {
        let mut raw = tick(Some(dec!(10)), None);
        raw.high = Some(dec!(15));
        raw.low = Some(dec!(8));

        let quote = normalizer().normalize(&raw).unwrap();
        assert_eq!(quote.high, dec!(15.00));
        assert_eq!(quote.low, dec!(8.00));
    }

    #[test]
    fn symbol_override_and_passthrough() {
        let mut raw = tick(Some(dec!(10)), None);
        raw.symbol = Some("XAUUSD".to_string());
        raw.time_msc = Some(serde_json::json!(1_700_000_000_123_i64));

        let quote = normalizer().normalize(&raw).unwrap();
        assert_eq!(quote.symbol.as_deref(), Some("XAUUSD"));
        assert_eq!(quote.time_msc, raw.time_msc);

        let config = NormalizerConfig {
            symbol: Some("GOLD".to_string()),
            ..NormalizerConfig::default()
        };
        let quote = QuoteNormalizer::new(config).normalize(&raw).unwrap();
        assert_eq!(quote.symbol.as_deref(), Some("GOLD"));
    }

    fn price() -> impl Strategy<Value = Option<Decimal>> {
        prop_oneof![
            1 => Just(None),
            6 => (1_i64..500_000_000).prop_map(|cents| Some(Decimal::new(cents, 3))),
        ]
    }

    proptest! {
        #[test]
        fn extrema_are_monotonic(ticks in prop::collection::vec((price(), price()), 1..64)) {
            let mut normalizer = normalizer();
            let mut previous: Option<SessionStats> = None;

            for (bid, ask) in ticks {
                let Ok(quote) = normalizer.normalize(&tick(bid, ask)) else {
                    continue;
                };

                prop_assert!(quote.high >= quote.ask);
                prop_assert!(quote.low <= quote.bid);
                if ask.is_none() {
                    prop_assert!(quote.ask >= quote.bid);
                }
                if let Some(prev) = previous {
                    prop_assert!(quote.high >= prev.high);
                    prop_assert!(quote.low <= prev.low);
                }
                previous = Some(quote.session_stats());
            }
        }
    }
}

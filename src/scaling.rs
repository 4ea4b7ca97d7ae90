//! # Scaling Engine
//!
//! Linear transform between a raw band (what the device transmits) and an
//! engineering-unit band (what the host publishes). Both bands are optional
//! and independent:
//!
//! | raw band | eu band | read | write |
//! |----------|---------|------|-------|
//! | - | - | pass through | pass through |
//! | ✓ | - | reject raw outside band | pass through |
//! | - | ✓ | reject eu outside band (32/64-bit) | reject eu outside band |
//! | ✓ | ✓ | reject, then map raw→eu | reject, then map eu→raw |
//!
//! On reads the EU band only gates multi-register values; 16-bit values
//! are published even when they land outside it.

use serde::Deserialize;

use crate::constants::VALUE_DECIMALS;
use crate::error::{MapError, MapResult};
use crate::value::DataType;

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScaleBand {
    pub min: f64,
    pub max: f64,
}

impl ScaleBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    #[inline]
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    fn check(&self, value: f64) -> MapResult<()> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(MapError::out_of_range(value, self.min, self.max))
        }
    }
}

/// Per-signal scaling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Scaling {
    pub raw: Option<ScaleBand>,
    pub eu: Option<ScaleBand>,
}

impl Scaling {
    /// No bands: values pass through unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn with_raw_band(mut self, min: f64, max: f64) -> Self {
        self.raw = Some(ScaleBand::new(min, max));
        self
    }

    pub fn with_eu_band(mut self, min: f64, max: f64) -> Self {
        self.eu = Some(ScaleBand::new(min, max));
        self
    }

    /// True when both bands are present and values are mapped linearly.
    #[inline]
    pub fn is_linear(&self) -> bool {
        self.raw.is_some() && self.eu.is_some()
    }

    /// Raw → engineering units.
    ///
    /// Rejects raw values outside the raw band (transport noise guard).
    /// 32/64-bit results outside the EU band are rejected as well.
    pub fn to_eu(&self, raw: f64, data_type: DataType) -> MapResult<f64> {
        if let Some(band) = &self.raw {
            band.check(raw)?;
        }

        let value = match (&self.raw, &self.eu) {
            (Some(raw_band), Some(eu_band)) => {
                (raw - raw_band.min) / raw_band.span() * eu_band.span() + eu_band.min
            }
            _ => raw,
        };

        if let Some(band) = self.eu.filter(|_| data_type.register_count() > 1) {
            band.check(round_value(value))?;
        }
        Ok(value)
    }

    /// Reject a requested value outside the EU band, if one is set.
    pub fn check_eu(&self, eu: f64) -> MapResult<()> {
        match &self.eu {
            Some(band) => band.check(eu),
            None => Ok(()),
        }
    }

    /// Engineering units → raw.
    ///
    /// Rejects requests outside the EU band before any mapping happens.
    pub fn to_raw(&self, eu: f64) -> MapResult<f64> {
        self.check_eu(eu)?;

        let value = match (&self.raw, &self.eu) {
            (Some(raw_band), Some(eu_band)) => {
                (eu - eu_band.min) / eu_band.span() * raw_band.span() + raw_band.min
            }
            _ => eu,
        };
        Ok(value)
    }
}

/// Round to the number of decimals published to the host.
#[inline]
pub fn round_value(value: f64) -> f64 {
    let factor = 10f64.powi(VALUE_DECIMALS);
    (value * factor).round() / factor
}

/// Logical NOT for discrete signals stored as 0/1.
#[inline]
pub fn invert_discrete(value: f64) -> f64 {
    1.0 - value
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identity_passes_through() {
        let scaling = Scaling::identity();
        assert_eq!(scaling.to_eu(1234.0, DataType::U16).unwrap(), 1234.0);
        assert_eq!(scaling.to_raw(-5.5).unwrap(), -5.5);
    }

    #[test]
    fn test_linear_to_eu() {
        // 4-20 mA sensor on 0..27648 counts, 0..100 %
        let scaling = Scaling::identity()
            .with_raw_band(0.0, 27648.0)
            .with_eu_band(0.0, 100.0);
        assert_eq!(scaling.to_eu(13824.0, DataType::U16).unwrap(), 50.0);
        assert_eq!(scaling.to_eu(0.0, DataType::U16).unwrap(), 0.0);
        assert_eq!(scaling.to_eu(27648.0, DataType::U16).unwrap(), 100.0);
    }

    #[test]
    fn test_linear_to_raw() {
        let scaling = Scaling::identity()
            .with_raw_band(4000.0, 20000.0)
            .with_eu_band(0.0, 10.0);
        assert_eq!(scaling.to_raw(5.0).unwrap(), 12000.0);
    }

    #[test]
    fn test_raw_band_rejects_noise() {
        let scaling = Scaling::identity().with_raw_band(0.0, 1000.0);
        assert_eq!(
            scaling.to_eu(1001.0, DataType::U16),
            Err(MapError::out_of_range(1001.0, 0.0, 1000.0))
        );
        assert_eq!(scaling.to_eu(1000.0, DataType::U16).unwrap(), 1000.0);
    }

    #[test]
    fn test_eu_band_rejects_write() {
        let scaling = Scaling::identity().with_eu_band(0.0, 100.0);
        assert_eq!(
            scaling.to_raw(150.0),
            Err(MapError::out_of_range(150.0, 0.0, 100.0))
        );
        assert_eq!(scaling.to_raw(100.0).unwrap(), 100.0);
    }

    #[test]
    fn test_eu_band_gates_wide_reads_only() {
        let scaling = Scaling::identity().with_eu_band(-50.0, 50.0);
        assert!(scaling.to_eu(60.0, DataType::Float).is_err());
        assert!(scaling.to_eu(60.0, DataType::Double).is_err());
        assert!(scaling.to_eu(60.0, DataType::Dword).is_err());
        assert_eq!(scaling.to_eu(-49.0, DataType::Float).unwrap(), -49.0);

        assert_eq!(scaling.to_eu(60.0, DataType::U16).unwrap(), 60.0);
        assert_eq!(scaling.to_eu(-60.0, DataType::S16).unwrap(), -60.0);
    }

    #[test]
    fn test_round_value() {
        assert_eq!(round_value(1.005_1), 1.01);
        assert_eq!(round_value(-2.344), -2.34);
        assert_eq!(round_value(3.0), 3.0);
    }

    #[test]
    fn test_invert_discrete() {
        assert_eq!(invert_discrete(1.0), 0.0);
        assert_eq!(invert_discrete(0.0), 1.0);
    }

    proptest! {
        #[test]
        fn prop_eu_raw_roundtrip(
            x in 0.0f64..100.0,
            raw_min in -1000.0f64..0.0,
            raw_width in 1.0f64..65535.0,
        ) {
            let scaling = Scaling::identity()
                .with_raw_band(raw_min, raw_min + raw_width)
                .with_eu_band(0.0, 100.0);
            let raw = scaling.to_raw(x).unwrap();
            let eu = scaling.to_eu(raw, DataType::Float).unwrap();
            prop_assert!((round_value(eu) - round_value(x)).abs() < 0.011);
        }
    }
}

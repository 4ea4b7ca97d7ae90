//! # Address Planner
//!
//! Computes the minimal contiguous span covering a register group and
//! splits it into bounded-size read chunks.
//!
//! ## Example
//!
//! Signals at registers 10 (u16), 12 (float) and 16 (double) span
//! `[10, 19]`, i.e. 10 points. With a chunk limit of 4 the span is read
//! as `[10..14) [14..18) [18..20)`.

use crate::error::{MapError, MapResult};
use crate::signal::SignalDescriptor;

/// Contiguous address range covering every signal in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpan {
    /// Lowest shifted register address.
    pub start: u16,
    /// Highest shifted signal start address.
    pub max_address: u16,
    /// Number of registers (or bits) from `start` through the end of the widest tail.
    pub number_of_points: u32,
}

impl RegisterSpan {
    /// Compute the span of a register group with a signed register shift.
    ///
    /// Returns `Ok(None)` for an empty group. Shifted addresses must stay
    /// inside the 16-bit address space.
    pub fn compute(signals: &[SignalDescriptor], register_shift: i16) -> MapResult<Option<Self>> {
        let Some(first) = signals.first() else {
            return Ok(None);
        };

        let mut start = u32::MAX;
        let mut max_address = 0u32;
        let mut end = 0u32;
        for signal in signals {
            let address = shift_address(signal, register_shift)?;
            start = start.min(address);
            max_address = max_address.max(address);
            end = end.max(address + u32::from(signal.width()));
        }

        if end > u32::from(u16::MAX) + 1 {
            return Err(MapError::malformed(
                first.name.as_str(),
                format!("register span ends past 65535 (end {})", end - 1),
            ));
        }

        Ok(Some(Self {
            start: start as u16,
            max_address: max_address as u16,
            number_of_points: end - start,
        }))
    }

}

/// Apply the device register shift to a signal's configured register.
pub fn shift_address(signal: &SignalDescriptor, register_shift: i16) -> MapResult<u32> {
    let shifted = i32::from(signal.register) + i32::from(register_shift);
    if !(0..=i32::from(u16::MAX)).contains(&shifted) {
        return Err(MapError::malformed(
            signal.name.as_str(),
            format!(
                "register {} shifted by {} is outside 0..=65535",
                signal.register, register_shift
            ),
        ));
    }
    Ok(shifted as u32)
}

/// One transport read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadChunk {
    pub address: u16,
    pub count: u16,
}

/// Split a span into sequential chunks of at most `max_chunk_size` points.
///
/// `max_chunk_size == 0` means unlimited: the span is read in one chunk.
pub fn plan_chunks(span: &RegisterSpan, max_chunk_size: u16) -> Vec<ReadChunk> {
    let limit = if max_chunk_size == 0 {
        span.number_of_points.clamp(1, u32::from(u16::MAX))
    } else {
        u32::from(max_chunk_size)
    };

    let mut chunks = Vec::with_capacity(span.number_of_points.div_ceil(limit) as usize);
    let mut address = u32::from(span.start);
    let mut points_read = 0u32;

    while points_read < span.number_of_points {
        let count = limit.min(span.number_of_points - points_read);
        chunks.push(ReadChunk {
            address: address as u16,
            count: count as u16,
        });
        address += count;
        points_read += count;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SignalConfig, SignalDescriptor};

    fn signal(name: &str, source: &str) -> SignalDescriptor {
        SignalDescriptor::parse(&SignalConfig::new(name, source)).unwrap()
    }

    fn mixed_group() -> Vec<SignalDescriptor> {
        vec![
            signal("a", "mbFunctionNumber:3, reg:10"),
            signal("b", "mbFunctionNumber:3, reg:12, type:float"),
            signal("c", "mbFunctionNumber:3, reg:16, type:double"),
        ]
    }

    #[test]
    fn test_span_of_mixed_group() {
        let span = RegisterSpan::compute(&mixed_group(), 0).unwrap().unwrap();
        assert_eq!(span.start, 10);
        assert_eq!(span.max_address, 16);
        assert_eq!(span.number_of_points, 16 - 10 + 4);
    }

    #[test]
    fn test_span_empty_group() {
        assert_eq!(RegisterSpan::compute(&[], 0).unwrap(), None);
    }

    #[test]
    fn test_span_with_shift() {
        let span = RegisterSpan::compute(&mixed_group(), -1).unwrap().unwrap();
        assert_eq!(span.start, 9);
        assert_eq!(span.max_address, 15);
        assert_eq!(span.number_of_points, 10);
    }

    #[test]
    fn test_span_shift_out_of_range() {
        let group = vec![signal("a", "mbFunctionNumber:3, reg:0")];
        assert!(RegisterSpan::compute(&group, -1).is_err());

        let group = vec![signal("a", "mbFunctionNumber:3, reg:65534, type:float")];
        assert!(RegisterSpan::compute(&group, 0).is_ok());
        assert!(RegisterSpan::compute(&group, 1).is_err());
    }

    #[test]
    fn test_span_wide_signal_not_last() {
        // A double at 10 extends past the u16 at 11.
        let group = vec![
            signal("a", "mbFunctionNumber:4, reg:10, type:double"),
            signal("b", "mbFunctionNumber:4, reg:11"),
        ];
        let span = RegisterSpan::compute(&group, 0).unwrap().unwrap();
        assert_eq!(span.number_of_points, 4);
    }

    #[test]
    fn test_plan_chunks_bounded() {
        let span = RegisterSpan::compute(&mixed_group(), 0).unwrap().unwrap();
        let chunks = plan_chunks(&span, 4);
        assert_eq!(
            chunks,
            vec![
                ReadChunk { address: 10, count: 4 },
                ReadChunk { address: 14, count: 4 },
                ReadChunk { address: 18, count: 2 },
            ]
        );
    }

    #[test]
    fn test_plan_chunks_unlimited() {
        let span = RegisterSpan::compute(&mixed_group(), 0).unwrap().unwrap();
        assert_eq!(
            plan_chunks(&span, 0),
            vec![ReadChunk { address: 10, count: 10 }]
        );
    }

    #[test]
    fn test_plan_chunks_empty_span() {
        let span = RegisterSpan {
            start: 7,
            max_address: 7,
            number_of_points: 0,
        };
        assert!(plan_chunks(&span, 0).is_empty());
        assert!(plan_chunks(&span, 4).is_empty());
    }

    #[test]
    fn test_plan_chunks_exact_boundary() {
        let span = RegisterSpan {
            start: 100,
            max_address: 149,
            number_of_points: 50,
        };
        assert_eq!(
            plan_chunks(&span, 50),
            vec![ReadChunk { address: 100, count: 50 }]
        );
        assert_eq!(plan_chunks(&span, 25).len(), 2);
    }

    #[test]
    fn test_plan_chunks_cover_span_exactly() {
        let span = RegisterSpan {
            start: 0,
            max_address: 999,
            number_of_points: 1000,
        };
        let chunks = plan_chunks(&span, 125);
        assert_eq!(chunks.len(), 8);
        let total: u32 = chunks.iter().map(|c| u32::from(c.count)).sum();
        assert_eq!(total, 1000);
        assert!(chunks.windows(2).all(|w| w[0].address < w[1].address));
    }
}

//! Flow-control window accounting.
//!
//! Each stream carries a send and a receive window, and the connection
//! carries one of each on top. A sender must never transmit DATA bytes
//! exceeding the lesser of the stream and connection send windows.

use crate::error::MuxError;

/// A flow-control window.
///
/// The window never goes negative through `consume`; an attempt to consume
/// more than is available is a connection-fatal flow-control violation.
/// Expansion past 2^31-1 is likewise fatal rather than clamped. The current
/// value can drop below zero only through an initial-size reduction, which
/// the protocol permits.
#[derive(Debug, Clone, Copy)]
pub struct FlowWindow {
    current: i32,
    initial: i32,
}

impl FlowWindow {
    /// Create a window of `initial` bytes.
    ///
    /// `initial` must fit in `i32`; option builders cap it at 2^31-1.
    #[must_use]
    pub fn new(initial: u32) -> Self {
        let initial = i32::try_from(initial).unwrap_or(i32::MAX);
        Self {
            current: initial,
            initial,
        }
    }

    /// Bytes currently available.
    #[must_use]
    pub fn available(&self) -> i32 {
        self.current
    }

    /// The configured initial size.
    #[must_use]
    pub fn initial(&self) -> i32 {
        self.initial
    }

    /// Consume `n` bytes from the window.
    pub fn consume(&mut self, n: u32) -> Result<(), MuxError> {
        let n = i32::try_from(n)
            .map_err(|_| MuxError::flow_control("frame larger than any admissible window"))?;
        if n > self.current {
            return Err(MuxError::flow_control(format!(
                "window underflow: {n} bytes against {} available",
                self.current
            )));
        }
        self.current -= n;
        Ok(())
    }

    /// Expand the window by `increment` (a received or owed WINDOW_UPDATE).
    ///
    /// Overflow past 2^31-1 is a connection-level protocol error, never a
    /// silent clamp.
    pub fn expand(&mut self, increment: u32) -> Result<(), MuxError> {
        let widened = i64::from(self.current) + i64::from(increment);
        self.current = i32::try_from(widened)
            .map_err(|_| MuxError::flow_control("window overflow past 2^31-1"))?;
        Ok(())
    }

    /// Adjust for a peer changing the initial window size via SETTINGS.
    ///
    /// The delta applies to the current value as well; a reduction can push
    /// the current value negative, which stalls sending until updates arrive.
    pub fn set_initial(&mut self, new_initial: u32) -> Result<(), MuxError> {
        let new_initial = i32::try_from(new_initial)
            .map_err(|_| MuxError::flow_control("initial window size exceeds 2^31-1"))?;
        let delta = i64::from(new_initial) - i64::from(self.initial);
        let widened = i64::from(self.current) + delta;
        self.current = i32::try_from(widened)
            .map_err(|_| MuxError::flow_control("window overflow past 2^31-1"))?;
        self.initial = new_initial;
        Ok(())
    }

    /// Bytes consumed and not yet replenished.
    #[must_use]
    pub fn consumed(&self) -> u32 {
        let owed = i64::from(self.initial) - i64::from(self.current);
        u32::try_from(owed.max(0)).unwrap_or(u32::MAX)
    }

    /// Batched replenish decision for a receive window.
    ///
    /// Returns the increment to convey in a WINDOW_UPDATE once consumption
    /// has crossed `initial / divisor`; the increment restores the window to
    /// its initial size. Below the threshold, `None` — updates are batched,
    /// not sent per-byte.
    #[must_use]
    pub fn pending_update(&self, divisor: u32) -> Option<u32> {
        let threshold = self.initial / i32::try_from(divisor.max(1)).unwrap_or(i32::MAX);
        let consumed = self.consumed();
        if consumed > u32::try_from(threshold).unwrap_or(0) && consumed > 0 {
            Some(consumed)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_and_expand() {
        let mut window = FlowWindow::new(65_535);
        window.consume(1000).expect("consume");
        assert_eq!(window.available(), 64_535);
        window.expand(1000).expect("expand");
        assert_eq!(window.available(), 65_535);
    }

    #[test]
    fn underflow_is_fatal() {
        let mut window = FlowWindow::new(100);
        let err = window.consume(101).expect_err("underflow");
        assert!(err.is_connection_error());
        // The failed consume must not have touched the window.
        assert_eq!(window.available(), 100);
    }

    #[test]
    fn overflow_is_fatal_not_clamped() {
        let mut window = FlowWindow::new(i32::MAX as u32);
        assert!(window.expand(1).is_err());
    }

    #[test]
    fn exact_boundary_at_65535() {
        let mut window = FlowWindow::new(65_535);
        for _ in 0..3 {
            window.consume(16_384).expect("within window");
        }
        assert_eq!(window.available(), 16_383);
        // The fourth 16384-byte frame exceeds the window by exactly one byte.
        assert!(window.consume(16_384).is_err());
        assert!(window.consume(16_383).is_ok());
        assert_eq!(window.available(), 0);
    }

    #[test]
    fn initial_size_reduction_can_go_negative() {
        let mut window = FlowWindow::new(65_535);
        window.consume(30_000).expect("consume");
        window.set_initial(10_000).expect("shrink");
        assert_eq!(window.available(), -20_000);
        window.expand(25_000).expect("replenish");
        assert_eq!(window.available(), 5_000);
    }

    #[test]
    fn update_batched_at_quarter_consumed() {
        let mut window = FlowWindow::new(64_000);
        window.consume(16_000).expect("consume");
        // Exactly one quarter consumed: not yet over the threshold.
        assert_eq!(window.pending_update(4), None);
        window.consume(1).expect("consume");
        assert_eq!(window.pending_update(4), Some(16_001));
    }
}

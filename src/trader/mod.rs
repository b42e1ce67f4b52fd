//! The exchange trader interface and the credit reservation handed out
//! around each execution.
//!
//! The decision engine never calls exchanges directly: it emits decisions
//! consumed by a [`Trader`] implementation, and reads positions and
//! balance back through the same interface for the next cycle's context.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::decision::types::PositionInfo;

/// Trader-side errors
#[derive(Debug, Error)]
pub enum TraderError {
    #[error("Exchange error: {status} - {message}")]
    Exchange { status: u16, message: String },

    #[error("Order rejected: {message}")]
    Rejected { message: String },

    #[error("Insufficient margin: {message}")]
    InsufficientMargin { message: String },

    #[error("Unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },
}

/// Result type alias for trader operations
pub type TraderResult<T> = Result<T, TraderError>;

/// The execution surface the decision pipeline emits into.
///
/// Each call returns an opaque success document from the exchange adapter
/// or a typed error.
#[async_trait]
pub trait Trader: Send + Sync {
    /// Open a long position.
    async fn open_long(&self, symbol: &str, quantity: f64, leverage: u32) -> TraderResult<Value>;

    /// Open a short position.
    async fn open_short(&self, symbol: &str, quantity: f64, leverage: u32) -> TraderResult<Value>;

    /// Close a long position.
    async fn close_long(&self, symbol: &str, quantity: Option<f64>) -> TraderResult<Value>;

    /// Close a short position.
    async fn close_short(&self, symbol: &str, quantity: Option<f64>) -> TraderResult<Value>;

    /// Set the leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> TraderResult<Value>;

    /// Set the margin mode for a symbol.
    async fn set_margin_mode(&self, symbol: &str, mode: &str) -> TraderResult<Value>;

    /// Latest traded price for a symbol.
    async fn get_market_price(&self, symbol: &str) -> TraderResult<f64>;

    /// Place or replace the stop-loss order for a position.
    async fn set_stop_loss(&self, symbol: &str, side: &str, price: f64) -> TraderResult<Value>;

    /// Place or replace the take-profit order for a position.
    async fn set_take_profit(&self, symbol: &str, side: &str, price: f64) -> TraderResult<Value>;

    /// Cancel every open order for a symbol.
    async fn cancel_all_orders(&self, symbol: &str) -> TraderResult<Value>;

    /// Round a quantity to the symbol's step size.
    async fn format_quantity(&self, symbol: &str, quantity: f64) -> TraderResult<f64>;

    /// Account balance document.
    async fn get_balance(&self) -> TraderResult<Value>;

    /// Live positions, feeding the next cycle's context.
    async fn get_positions(&self) -> TraderResult<Vec<PositionInfo>>;
}

type ConfirmHook = Box<dyn Fn(&str, &str, &str) -> TraderResult<()> + Send + Sync>;
type ReleaseHook = Box<dyn Fn() -> TraderResult<()> + Send + Sync>;

/// Two-phase credit reservation around one trade execution.
///
/// Credits are reserved before the order goes out; `confirm` consumes
/// them once the trade succeeds and `release` returns them on failure.
/// Both are idempotent: only the first call takes effect, repeats are
/// no-ops.
pub struct CreditReservation {
    /// Reservation id, conventionally the trade id
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Trade the reservation covers
    pub trade_id: String,
    /// Credits reserved
    pub amount: u32,
    processed: bool,
    on_confirm: Option<ConfirmHook>,
    on_release: Option<ReleaseHook>,
}

impl CreditReservation {
    /// Create a reservation with optional settlement hooks.
    pub fn new(
        user_id: impl Into<String>,
        trade_id: impl Into<String>,
        amount: u32,
        on_confirm: Option<ConfirmHook>,
        on_release: Option<ReleaseHook>,
    ) -> Self {
        let trade_id = trade_id.into();
        Self {
            id: trade_id.clone(),
            user_id: user_id.into(),
            trade_id,
            amount,
            processed: false,
            on_confirm,
            on_release,
        }
    }

    /// Consume the reserved credits. Only the first call takes effect.
    pub fn confirm(&mut self, symbol: &str, action: &str, trader_id: &str) -> TraderResult<()> {
        if self.processed {
            return Ok(());
        }
        if let Some(hook) = &self.on_confirm {
            hook(symbol, action, trader_id)?;
        }
        self.processed = true;
        Ok(())
    }

    /// Return the reserved credits. Only the first call takes effect.
    pub fn release(&mut self) -> TraderResult<()> {
        if self.processed {
            return Ok(());
        }
        if let Some(hook) = &self.on_release {
            hook()?;
        }
        self.processed = true;
        Ok(())
    }

    /// Whether confirm or release already ran.
    pub fn is_processed(&self) -> bool {
        self.processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_confirm_is_idempotent() {
        let confirms = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&confirms);
        let mut reservation = CreditReservation::new(
            "user-1",
            "trade-1",
            5,
            Some(Box::new(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            None,
        );

        reservation.confirm("BTCUSDT", "open_long", "t-1").unwrap();
        reservation.confirm("BTCUSDT", "open_long", "t-1").unwrap();

        assert_eq!(confirms.load(Ordering::SeqCst), 1);
        assert!(reservation.is_processed());
    }

    #[test]
    fn test_release_is_idempotent() {
        let releases = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&releases);
        let mut reservation = CreditReservation::new(
            "user-1",
            "trade-2",
            5,
            None,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );

        reservation.release().unwrap();
        reservation.release().unwrap();

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_confirm_then_release_is_noop() {
        let releases = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&releases);
        let mut reservation = CreditReservation::new(
            "user-1",
            "trade-3",
            5,
            None,
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );

        reservation.confirm("ETHUSDT", "close_long", "t-1").unwrap();
        reservation.release().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_confirm_can_be_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let mut reservation = CreditReservation::new(
            "user-1",
            "trade-4",
            5,
            Some(Box::new(move |_, _, _| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(TraderError::Exchange {
                        status: 503,
                        message: "settlement store down".to_string(),
                    })
                } else {
                    Ok(())
                }
            })),
            None,
        );

        assert!(reservation.confirm("BTCUSDT", "open_long", "t-1").is_err());
        assert!(!reservation.is_processed());
        assert!(reservation.confirm("BTCUSDT", "open_long", "t-1").is_ok());
        assert!(reservation.is_processed());
    }

    #[test]
    fn test_reservation_without_hooks_marks_processed() {
        let mut reservation = CreditReservation::new("user-1", "trade-5", 1, None, None);
        reservation.confirm("BTCUSDT", "open_long", "t-1").unwrap();
        assert!(reservation.is_processed());
    }
}

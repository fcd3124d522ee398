//! Ticker Frame Codec
//!
//! Validates inbound stream text frames into [`TickerUpdate`]s.
//!
//! Accepted shapes:
//! - raw events: `{"e":"24hrTicker","s":"BTCUSDT",...}`
//! - combined-stream wrappers: `{"stream":"btcusdt@ticker","data":{...}}`
//! - control replies: `{"result":null,"id":1}` (ignored)
//!
//! A missing or non-numeric required field rejects the whole frame; nothing
//! is zero-filled.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::messages::{EVENT_MINI_TICKER, EVENT_TICKER, TickerFrame, WireNumber};
use crate::domain::ticker::TickerUpdate;

/// Frame validation errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Text is not valid JSON or does not match the frame shape.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Top-level value is not an object.
    #[error("expected JSON object")]
    NotAnObject,

    /// Event type is neither a ticker nor a mini ticker.
    #[error("unexpected event type: {0}")]
    UnexpectedEvent(String),

    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A numeric field is not a finite number.
    #[error("field `{0}` is not a finite number")]
    InvalidNumber(&'static str),

    /// A numeric field is outside its allowed range.
    #[error("field `{0}` is out of range")]
    OutOfRange(&'static str),

    /// Symbol is not part of this connection's subscription set.
    #[error("symbol not subscribed: {0}")]
    UnsubscribedSymbol(String),
}

impl FrameError {
    /// Stable label for the dropped-frame metric.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Json(_) | Self::NotAnObject => "invalid_json",
            Self::UnexpectedEvent(_) => "unexpected_event",
            Self::MissingField(_) => "missing_field",
            Self::InvalidNumber(_) => "invalid_number",
            Self::OutOfRange(_) => "out_of_range",
            Self::UnsubscribedSymbol(_) => "unsubscribed_symbol",
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A validated ticker observation.
    Ticker(TickerUpdate),
    /// Subscription/control reply; carries no market data.
    Control,
}

/// Stateless JSON codec for ticker frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame; `arrival` stamps frames without an event time.
    ///
    /// # Errors
    ///
    /// Returns a `FrameError` for any structurally invalid frame.
    pub fn decode(&self, text: &str, arrival: DateTime<Utc>) -> Result<Frame, FrameError> {
        let value: Value = serde_json::from_str(text.trim())?;
        let Value::Object(mut object) = value else {
            return Err(FrameError::NotAnObject);
        };

        if object.contains_key("result") && object.contains_key("id") {
            return Ok(Frame::Control);
        }

        let payload = if object.contains_key("stream") {
            object
                .remove("data")
                .ok_or(FrameError::MissingField("data"))?
        } else {
            Value::Object(object)
        };

        if !payload.is_object() {
            return Err(FrameError::NotAnObject);
        }

        let frame: TickerFrame = serde_json::from_value(payload)?;
        Self::validate(frame, arrival).map(Frame::Ticker)
    }

    fn validate(frame: TickerFrame, arrival: DateTime<Utc>) -> Result<TickerUpdate, FrameError> {
        let mini = match frame.event_type.as_deref() {
            None | Some(EVENT_TICKER) => false,
            Some(EVENT_MINI_TICKER) => true,
            Some(other) => return Err(FrameError::UnexpectedEvent(other.to_string())),
        };

        let symbol = frame
            .symbol
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(FrameError::MissingField("s"))?
            .to_ascii_uppercase();

        let price = number(frame.close.as_ref(), "c")?;
        if price <= 0.0 {
            return Err(FrameError::OutOfRange("c"));
        }

        let (price_change, price_change_percent) = if mini {
            let open = number(frame.open.as_ref(), "o")?;
            if open <= 0.0 {
                return Err(FrameError::OutOfRange("o"));
            }
            let change = price - open;
            (change, change / open * 100.0)
        } else {
            (
                number(frame.price_change.as_ref(), "p")?,
                number(frame.price_change_percent.as_ref(), "P")?,
            )
        };

        let high_24h = non_negative(frame.high.as_ref(), "h")?;
        let low_24h = non_negative(frame.low.as_ref(), "l")?;
        let volume = non_negative(frame.volume.as_ref(), "v")?;
        let quote_volume = non_negative(frame.quote_volume.as_ref(), "q")?;

        let last_update = frame
            .event_time
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(arrival);

        Ok(TickerUpdate {
            symbol,
            price,
            price_change,
            price_change_percent,
            high_24h,
            low_24h,
            volume,
            quote_volume,
            last_update,
        })
    }
}

fn number(field: Option<&WireNumber>, name: &'static str) -> Result<f64, FrameError> {
    field
        .ok_or(FrameError::MissingField(name))?
        .to_f64()
        .ok_or(FrameError::InvalidNumber(name))
}

fn non_negative(field: Option<&WireNumber>, name: &'static str) -> Result<f64, FrameError> {
    let value = number(field, name)?;
    if value < 0.0 {
        return Err(FrameError::OutOfRange(name));
    }
    Ok(value)
}

// =============================================================================
// Tests
// =============================================================================

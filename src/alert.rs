//! Alert records for the egress ring
//!
//! A scored payment worth materializing downstream becomes one fixed-size
//! [`AlertRecord`]: a UTF-8 JSON line plus its length, formatted straight
//! into the record's buffer. The payload is opaque to the pusher.

use std::io::Write;

use crate::payment::PaymentRecord;

/// Fixed capacity of one alert payload.
pub const ALERT_CAPACITY: usize = 512;

const MICROS_PER_UNIT: i64 = 1_000_000;

/// One formatted alert line. `len <= ALERT_CAPACITY` always holds.
#[derive(Clone, Copy)]
pub struct AlertRecord {
    data: [u8; ALERT_CAPACITY],
    len: usize,
}

impl AlertRecord {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for AlertRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertRecord")
            .field("len", &self.len)
            .field("payload", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

/// Format the alert line for `payment`. The amount is rendered from micros
/// as `<int>.<frac6>` with pure integer arithmetic. Returns `None` when the
/// line would exceed [`ALERT_CAPACITY`]; the caller counts that as a drop.
pub fn format_alert(payment: &PaymentRecord) -> Option<AlertRecord> {
    let units = payment.amount_micros / MICROS_PER_UNIT;
    let frac = (payment.amount_micros % MICROS_PER_UNIT).unsigned_abs();

    let mut data = [0u8; ALERT_CAPACITY];
    let remaining = {
        let mut cursor: &mut [u8] = &mut data;
        let written = write!(
            cursor,
            "{{\"debtor\":\"{}\",\"amount\":{}.{:06},\"uetr\":\"{}\"}}",
            payment.debtor(),
            units,
            frac,
            payment.uetr()
        );
        if written.is_err() {
            return None;
        }
        cursor.len()
    };

    Some(AlertRecord {
        data,
        len: ALERT_CAPACITY - remaining,
    })
}

//! ISO 20022 payment decoding
//!
//! Parses a single credit-transfer document (pacs.008 and friends) into a
//! fixed-size [`PaymentRecord`]. The traversal is structural, not
//! schema-validating: it walks the element hierarchy the upstream gateways
//! actually emit and rejects anything that lacks the fields the scorer needs.
//!
//! # Key Design
//!
//! - The record is trivially copyable so it can travel through the SPSC ring
//!   without indirection.
//! - Amounts are parsed digit-by-digit into signed 64-bit micros. No
//!   floating point is involved at any point.
//! - The decoder writes into a caller-provided record; its only allocations
//!   are the event reader's scratch buffer.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Maximum payload bytes for party names (one byte reserved for NUL)
pub const NAME_CAPACITY: usize = 64;
/// Maximum payload bytes for the UETR (one byte reserved for NUL)
pub const UETR_CAPACITY: usize = 37;

const CURRENCY_WHITELIST: [&[u8]; 3] = [b"EUR", b"USD", b"GBP"];

const MICROS_PER_UNIT: i64 = 1_000_000;

/// Fixed-size payment record handed from ingress to the scorer.
///
/// All byte arrays are NUL-terminated; names are truncated at 63 payload
/// bytes, the UETR at 36. `amount_micros` is strictly positive for any
/// record the decoder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentRecord {
    pub debtor_name: [u8; NAME_CAPACITY],
    pub creditor_name: [u8; NAME_CAPACITY],
    pub currency: [u8; 4],
    pub uetr: [u8; UETR_CAPACITY],
    pub amount_micros: i64,
    pub schema_valid: bool,
}

impl Default for PaymentRecord {
    fn default() -> Self {
        Self {
            debtor_name: [0; NAME_CAPACITY],
            creditor_name: [0; NAME_CAPACITY],
            currency: [0; 4],
            uetr: [0; UETR_CAPACITY],
            amount_micros: 0,
            schema_valid: false,
        }
    }
}

impl PaymentRecord {
    pub fn debtor(&self) -> &str {
        c_str(&self.debtor_name)
    }

    pub fn creditor(&self) -> &str {
        c_str(&self.creditor_name)
    }

    pub fn currency(&self) -> &str {
        c_str(&self.currency)
    }

    pub fn uetr(&self) -> &str {
        c_str(&self.uetr)
    }
}

/// View a NUL-terminated buffer as &str, trimming any trailing bytes that a
/// byte-limit truncation may have cut mid-codepoint.
fn c_str(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let bytes = &buf[..end];
    match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or(""),
    }
}

fn copy_nul_truncated(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed xml document")]
    MalformedXml,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("currency not supported")]
    BadCurrency,
    #[error("amount must be strictly positive")]
    NonPositiveAmount,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    PmtId,
    Dbtr,
    Cdtr,
    Amt,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Leaf {
    None,
    Uetr,
    EndToEndId,
    DbtrNm,
    CdtrNm,
    InstdAmt,
}

/// Decode one ISO 20022 credit-transfer document into `out`.
///
/// Accepted envelopes: `CstmrCdtTrfinitn` or `FIToFICdtTrf` under the root
/// element; transaction blocks: `PmtInf` or `CdtTrfTxInf`. Only the first
/// transaction block is read.
pub fn decode(xml: &[u8], out: &mut PaymentRecord) -> Result<(), DecodeError> {
    *out = PaymentRecord::default();

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::with_capacity(256);

    let mut depth = 0usize;
    let mut envelope_depth: Option<usize> = None;
    let mut tx_depth: Option<usize> = None;
    let mut section = Section::None;
    let mut leaf = Leaf::None;

    let mut have_uetr = false;
    let mut have_end_to_end = false;
    let mut have_pmt_id_block = false;
    let mut have_debtor = false;
    let mut have_creditor = false;
    let mut have_amount = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = e.local_name();
                let n = name.as_ref();

                if envelope_depth.is_none() {
                    if depth == 2 && (n == b"CstmrCdtTrfinitn" || n == b"FIToFICdtTrf") {
                        envelope_depth = Some(depth);
                    }
                } else if tx_depth.is_none() {
                    if depth == envelope_depth.unwrap_or(0) + 1
                        && (n == b"PmtInf" || n == b"CdtTrfTxInf")
                    {
                        tx_depth = Some(depth);
                    }
                } else if let Some(td) = tx_depth {
                    if depth == td + 1 {
                        section = if n == b"PmtId" {
                            have_pmt_id_block = true;
                            Section::PmtId
                        } else if n == b"Dbtr" {
                            Section::Dbtr
                        } else if n == b"Cdtr" {
                            Section::Cdtr
                        } else if n == b"Amt" {
                            Section::Amt
                        } else {
                            Section::None
                        };
                    } else if depth == td + 2 {
                        leaf = match section {
                            Section::PmtId if n == b"UETR" => Leaf::Uetr,
                            Section::PmtId if n == b"EndToEndId" => Leaf::EndToEndId,
                            Section::Dbtr if n == b"Nm" => Leaf::DbtrNm,
                            Section::Cdtr if n == b"Nm" => Leaf::CdtrNm,
                            Section::Amt if n == b"InstdAmt" => {
                                read_currency(&e, out)?;
                                Leaf::InstdAmt
                            }
                            _ => Leaf::None,
                        };
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if leaf != Leaf::None {
                    let text = t.unescape().map_err(|_| DecodeError::MalformedXml)?;
                    let bytes = text.as_bytes();
                    match leaf {
                        Leaf::Uetr => {
                            copy_nul_truncated(&mut out.uetr, bytes);
                            have_uetr = true;
                        }
                        Leaf::EndToEndId => {
                            // UETR is preferred; EndToEndId only fills a gap
                            if !have_uetr && !have_end_to_end {
                                copy_nul_truncated(&mut out.uetr, bytes);
                                have_end_to_end = true;
                            }
                        }
                        Leaf::DbtrNm => {
                            if !have_debtor {
                                copy_nul_truncated(&mut out.debtor_name, bytes);
                                have_debtor = true;
                            }
                        }
                        Leaf::CdtrNm => {
                            if !have_creditor {
                                copy_nul_truncated(&mut out.creditor_name, bytes);
                                have_creditor = true;
                            }
                        }
                        Leaf::InstdAmt => {
                            out.amount_micros = parse_amount_micros(&text)?;
                            have_amount = true;
                        }
                        Leaf::None => {}
                    }
                }
            }
            Ok(Event::End(_)) => {
                if let Some(td) = tx_depth {
                    if depth == td + 2 {
                        leaf = Leaf::None;
                    } else if depth == td + 1 {
                        section = Section::None;
                    } else if depth == td {
                        // transaction block closed; only the first one counts
                        depth -= 1;
                        break;
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return Err(DecodeError::MalformedXml),
        }
        buf.clear();
    }

    if envelope_depth.is_none() {
        return Err(DecodeError::MissingField("CstmrCdtTrfinitn"));
    }
    if tx_depth.is_none() {
        return Err(DecodeError::MissingField("PmtInf"));
    }
    if !have_pmt_id_block {
        return Err(DecodeError::MissingField("PmtId"));
    }
    if !have_uetr && !have_end_to_end {
        return Err(DecodeError::MissingField("UETR"));
    }
    if !have_debtor {
        return Err(DecodeError::MissingField("Dbtr/Nm"));
    }
    if !have_creditor {
        return Err(DecodeError::MissingField("Cdtr/Nm"));
    }
    if !have_amount {
        return Err(DecodeError::MissingField("Amt/InstdAmt"));
    }

    out.schema_valid = true;
    Ok(())
}

fn read_currency(
    e: &quick_xml::events::BytesStart<'_>,
    out: &mut PaymentRecord,
) -> Result<(), DecodeError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|_| DecodeError::MalformedXml)?;
        if attr.key.local_name().as_ref() == b"Ccy" {
            let value = attr.value.as_ref();
            if value.len() != 3 || !CURRENCY_WHITELIST.contains(&value) {
                return Err(DecodeError::BadCurrency);
            }
            copy_nul_truncated(&mut out.currency, value);
            return Ok(());
        }
    }
    Err(DecodeError::MissingField("Ccy"))
}

/// Parse a decimal amount string into signed micros.
///
/// Optional leading `-`, integer digits, then up to six fractional digits
/// (excess digits ignored, shortfall right-padded with zeros). Rejects
/// anything that is not strictly positive or does not fit i64 micros.
fn parse_amount_micros(s: &str) -> Result<i64, DecodeError> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return Err(DecodeError::NonPositiveAmount);
    }

    let mut i = 0;
    let mut negative = false;
    if bytes[0] == b'-' {
        negative = true;
        i = 1;
    }

    let mut integral: i64 = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        integral = integral
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(bytes[i] - b'0')))
            .ok_or(DecodeError::NonPositiveAmount)?;
        i += 1;
    }

    let mut fractional: i64 = 0;
    let mut digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            if digits < 6 {
                fractional = fractional * 10 + i64::from(bytes[i] - b'0');
                digits += 1;
            }
            i += 1;
        }
    }
    while digits < 6 {
        fractional *= 10;
        digits += 1;
    }

    let magnitude = integral
        .checked_mul(MICROS_PER_UNIT)
        .and_then(|v| v.checked_add(fractional))
        .ok_or(DecodeError::NonPositiveAmount)?;
    let amount = if negative { -magnitude } else { magnitude };

    if amount <= 0 {
        return Err(DecodeError::NonPositiveAmount);
    }
    Ok(amount)
}

//! Access-key construction (`clave de acceso`) — SRI's 49-digit document
//! identifier with a modulo-11 check digit.
//!
//! Pure and synchronous, with no I/O — unit-testable the same way the
//! teacher's `core::numbering::InvoiceNumberSequence` is, just without the
//! stateful counter (the sequential itself comes from the database).

use chrono::{DateTime, Utc};
use chrono_tz::America::Guayaquil;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessKeyError {
    #[error("access key component '{field}' must be numeric, got '{value}'")]
    NotNumeric { field: &'static str, value: String },
    #[error("assembled access key has {actual} digits, expected 49")]
    WrongLength { actual: usize },
}

/// `tipo_emision` is always 1 (normal emission) in this service.
pub const TIPO_EMISION_NORMAL: &str = "1";

/// Inputs to access-key construction, already resolved by the caller
/// (the Sequencing & Credit Core).
pub struct AccessKeyInput<'a> {
    pub fecha_emision: DateTime<Utc>,
    /// UNTDID-style SRI document-type code, e.g. "01" for factura.
    pub tipo_comprobante: &'a str,
    pub ruc: &'a str,
    pub ambiente: i16,
    /// 3-digit establishment code + 3-digit emission-point code.
    pub estab_punto: &'a str,
    /// 9-digit sequential.
    pub secuencial: &'a str,
    /// Optional 8-digit numeric code. If `None`, derived from local
    /// time-of-day (H:M:S + 2-digit millis) as `spec.md` §4.6 step 6
    /// directs.
    pub codigo_numerico: Option<&'a str>,
}

/// Builds the 49-digit access key: cleans every component to digits only,
/// pads to fixed widths, concatenates to a 48-digit base, and appends the
/// modulo-11 check digit.
pub fn build_access_key(input: AccessKeyInput<'_>) -> Result<String, AccessKeyError> {
    let local = input.fecha_emision.with_timezone(&Guayaquil);

    let fecha = local.format("%d%m%Y").to_string();
    let tipo_comprobante = only_digits(input.tipo_comprobante, "tipo_comprobante")?;
    let ruc = only_digits(input.ruc, "ruc")?;
    let ambiente = input.ambiente.to_string();
    let estab_punto = only_digits(input.estab_punto, "estab_punto")?;
    let secuencial = only_digits(input.secuencial, "secuencial")?;

    let codigo_numerico = match input.codigo_numerico {
        Some(c) => only_digits(c, "codigo_numerico")?,
        None => {
            use chrono::Timelike;
            format!(
                "{:02}{:02}{:02}{:02}",
                local.hour(),
                local.minute(),
                local.second(),
                local.timestamp_subsec_millis() / 10,
            )
        }
    };

    let base = format!(
        "{fecha}{:0>2}{ruc:0>13}{ambiente:0>1}{estab_punto:0>6}{secuencial:0>9}{codigo_numerico:0>8}{TIPO_EMISION_NORMAL}",
        tipo_comprobante,
    );

    if base.len() != 48 {
        return Err(AccessKeyError::WrongLength { actual: base.len() });
    }

    let check_digit = modulo11_check_digit(&base);
    let full = format!("{base}{check_digit}");

    if full.len() != 49 {
        return Err(AccessKeyError::WrongLength { actual: full.len() });
    }

    Ok(full)
}

fn only_digits(value: &str, field: &'static str) -> Result<String, AccessKeyError> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(AccessKeyError::NotNumeric {
            field,
            value: value.to_string(),
        });
    }
    Ok(cleaned)
}

/// Modulo-11 check digit: weights cycle 2..7 from right to left;
/// `v = 11 - (sum mod 11)`; `v == 11` maps to `0`, `v == 10` maps to `1`,
/// otherwise `v` itself.
pub fn modulo11_check_digit(digits: &str) -> u8 {
    let mut weight = 2u32;
    let mut sum = 0u32;
    for c in digits.chars().rev() {
        let d = c.to_digit(10).unwrap_or(0);
        sum += d * weight;
        weight = if weight == 7 { 2 } else { weight + 1 };
    }
    let v = 11 - (sum % 11);
    match v {
        11 => 0,
        10 => 1,
        other => other as u8,
    }
}

/// Verifies that a 49-digit access key's check digit matches its first 48
/// digits — used by tests and by defensive checks before a key leaves the
/// pipeline.
pub fn verify_access_key(key: &str) -> bool {
    if key.len() != 49 || !key.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let (base, check) = key.split_at(48);
    let expected = modulo11_check_digit(base);
    check.chars().next().and_then(|c| c.to_digit(10)) == Some(expected as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builds_exactly_49_digits() {
        let fecha = Utc.with_ymd_and_hms(2026, 7, 27, 15, 4, 5).unwrap();
        let key = build_access_key(AccessKeyInput {
            fecha_emision: fecha,
            tipo_comprobante: "01",
            ruc: "1790011674001",
            ambiente: 1,
            estab_punto: "001001",
            secuencial: "000000001",
            codigo_numerico: Some("12345678"),
        })
        .unwrap();
        assert_eq!(key.len(), 49);
        assert!(key.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn check_digit_round_trips() {
        let fecha = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let key = build_access_key(AccessKeyInput {
            fecha_emision: fecha,
            tipo_comprobante: "01",
            ruc: "1790011674001",
            ambiente: 2,
            estab_punto: "002005",
            secuencial: "000000042",
            codigo_numerico: Some("00000001"),
        })
        .unwrap();
        assert!(verify_access_key(&key));
    }

    #[test]
    fn rejects_non_numeric_ruc() {
        let fecha = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let err = build_access_key(AccessKeyInput {
            fecha_emision: fecha,
            tipo_comprobante: "01",
            ruc: "not-a-ruc!!!",
            ambiente: 1,
            estab_punto: "001001",
            secuencial: "000000001",
            codigo_numerico: Some("12345678"),
        })
        .unwrap_err();
        assert!(matches!(err, AccessKeyError::NotNumeric { .. }));
    }

    #[test]
    fn modulo11_known_vector() {
        // All-zero base: every weighted digit is 0, so sum % 11 == 0 and
        // v == 11 - 0 == 11, which maps to check digit 0.
        let base = "0".repeat(48);
        assert_eq!(modulo11_check_digit(&base), 0);
    }

    proptest::proptest! {
        #[test]
        fn modulo11_always_single_digit(s in "[0-9]{48}") {
            let d = modulo11_check_digit(&s);
            proptest::prop_assert!(d <= 9);
        }

        #[test]
        fn verify_accepts_every_generated_key(ruc in "[0-9]{13}", secuencial in "[0-9]{9}") {
            let fecha = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
            let key = build_access_key(AccessKeyInput {
                fecha_emision: fecha,
                tipo_comprobante: "01",
                ruc: &ruc,
                ambiente: 1,
                estab_punto: "001001",
                secuencial: &secuencial,
                codigo_numerico: Some("00000001"),
            }).unwrap();
            proptest::prop_assert_eq!(key.len(), 49);
            proptest::prop_assert!(verify_access_key(&key));
        }
    }
}

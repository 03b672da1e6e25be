//! SRI tax (IVA) calculation.
//!
//! Generalizes the teacher's `core::validation::calculate_totals` /
//! `core::types::{Totals, VatBreakdown}` shape — per-line computation
//! feeding a tariff-keyed breakdown plus a summary — from EN 16931 VAT
//! categories to SRI's fixed IVA tariff table.
//!
//! Arithmetic uses full `Decimal` precision throughout; rounding to two
//! decimals (half-away-from-zero) happens only at the formatting boundary,
//! in [`round_money`].

use std::collections::BTreeMap;

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{InvoiceInput, LineItemInput};

#[derive(Debug, Error)]
pub enum TaxError {
    #[error("unknown IVA tariff {0}% (lenient mode is off)")]
    UnknownTariff(Decimal),
}

/// SRI tariff codes, BT-151/BT-152-equivalent: `(codigoPorcentaje, tarifa)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TariffCode {
    pub codigo: &'static str,
    pub codigo_porcentaje: &'static str,
    pub tarifa: u32,
}

const TARIFF_TABLE: &[TariffCode] = &[
    TariffCode {
        codigo: "2",
        codigo_porcentaje: "0",
        tarifa: 0,
    },
    TariffCode {
        codigo: "2",
        codigo_porcentaje: "5",
        tarifa: 5,
    },
    TariffCode {
        codigo: "2",
        codigo_porcentaje: "2",
        tarifa: 12,
    },
    TariffCode {
        codigo: "2",
        codigo_porcentaje: "4",
        tarifa: 15,
    },
];

/// Looks up the `(codigo, codigoPorcentaje)` pair for a normalized (whole
/// percentage) tariff. Unknown tariffs degrade to the 0% row unless
/// `lenient` is `false`, in which case they are a hard error — see
/// `spec.md` §9, "Unknown IVA tariff fallback".
fn lookup_tariff(tarifa: u32, lenient: bool) -> Result<TariffCode, TaxError> {
    TARIFF_TABLE
        .iter()
        .find(|t| t.tarifa == tarifa)
        .copied()
        .or_else(|| {
            if lenient {
                TARIFF_TABLE.iter().find(|t| t.tarifa == 0).copied()
            } else {
                None
            }
        })
        .ok_or(TaxError::UnknownTariff(Decimal::from(tarifa)))
}

/// Normalizes a caller-supplied tariff: a value in `(0, 1)` is a fraction
/// (`0.15`) and is multiplied by 100 to become a whole percentage (`15`).
fn normalize_tariff(tarifa: Decimal) -> Decimal {
    if tarifa > Decimal::ZERO && tarifa < Decimal::ONE {
        tarifa * dec!(100)
    } else {
        tarifa
    }
}

/// Rounds to two decimals, half-away-from-zero — the only point in the
/// pipeline where rounding happens.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Per-line computed detail (SRI `detalle`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineDetail {
    pub codigo_principal: String,
    pub descripcion: String,
    pub cantidad: Decimal,
    pub precio_unitario: Decimal,
    pub descuento: Decimal,
    pub precio_total_sin_impuesto: Decimal,
    pub tarifa: TariffCode,
    pub valor_iva: Decimal,
}

/// Tax-aggregate row, one per distinct tariff present on the invoice (SRI
/// `totalConImpuestos/totalImpuesto`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxAggregate {
    pub tarifa: TariffCode,
    pub base_imponible: Decimal,
    pub valor: Decimal,
}

/// Document-level summary totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxSummary {
    pub total_sin_impuestos: Decimal,
    pub total_descuento: Decimal,
    pub total_iva: Decimal,
    pub importe_total: Decimal,
    pub subtotal_0: Decimal,
    pub subtotal_iva: Decimal,
}

/// Full calculator output for one invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxCalculation {
    pub details: Vec<LineDetail>,
    pub aggregates: Vec<TaxAggregate>,
    pub summary: TaxSummary,
}

/// Computes per-line details, a tariff-keyed aggregate breakdown, and
/// summary totals for an invoice input.
///
/// `importeTotal == totalSinImpuestos + sum(valor_i)` and
/// `subtotal_iva + subtotal_0 == totalSinImpuestos` hold to the cent for
/// every result (testable property 4).
pub fn calculate(input: &InvoiceInput, lenient: bool) -> Result<TaxCalculation, TaxError> {
    let mut details = Vec::with_capacity(input.lines.len());
    // BTreeMap keyed by tarifa for deterministic iteration order in the
    // aggregate array — SRI validators are stricter about stable ordering
    // than about ordering per se, so this avoids flakiness for free.
    let mut aggregates: BTreeMap<u32, (TariffCode, Decimal, Decimal)> = BTreeMap::new();

    let mut total_sin_impuestos = Decimal::ZERO;
    let mut total_descuento = Decimal::ZERO;

    for line in &input.lines {
        let computed = calculate_line(line, lenient)?;

        // Aggregation uses the un-rounded base/valor, not the detail's
        // display fields — summing already-rounded per-line amounts would
        // drift from the formatting-boundary rule by up to a cent per line.
        total_sin_impuestos += computed.raw_base;
        total_descuento += computed.raw_descuento;

        let entry = aggregates
            .entry(computed.detail.tarifa.tarifa)
            .or_insert((computed.detail.tarifa, Decimal::ZERO, Decimal::ZERO));
        entry.1 += computed.raw_base;
        entry.2 += computed.raw_valor;

        details.push(computed.detail);
    }

    let aggregates: Vec<TaxAggregate> = aggregates
        .into_values()
        .map(|(tarifa, base_imponible, valor)| TaxAggregate {
            tarifa,
            base_imponible: round_money(base_imponible),
            valor: round_money(valor),
        })
        .collect();

    let total_iva: Decimal = aggregates.iter().map(|a| a.valor).sum();
    let subtotal_0: Decimal = aggregates
        .iter()
        .filter(|a| a.tarifa.tarifa == 0)
        .map(|a| a.base_imponible)
        .sum();
    let subtotal_iva: Decimal = aggregates
        .iter()
        .filter(|a| a.tarifa.tarifa != 0)
        .map(|a| a.base_imponible)
        .sum();

    let total_sin_impuestos = round_money(total_sin_impuestos);
    let importe_total = round_money(total_sin_impuestos + total_iva);

    let summary = TaxSummary {
        total_sin_impuestos,
        total_descuento: round_money(total_descuento),
        total_iva,
        importe_total,
        subtotal_0,
        subtotal_iva,
    };

    Ok(TaxCalculation {
        details,
        aggregates,
        summary,
    })
}

/// A single line's raw (full-precision) amounts alongside its display
/// [`LineDetail`]. The raw amounts feed [`calculate`]'s aggregation; the
/// detail's own fields are rounded for their own display only and must
/// never be summed back together (see `calculate`'s loop).
struct LineComputation {
    detail: LineDetail,
    raw_descuento: Decimal,
    raw_base: Decimal,
    raw_valor: Decimal,
}

fn calculate_line(line: &LineItemInput, lenient: bool) -> Result<LineComputation, TaxError> {
    let tarifa_normalizada = normalize_tariff(line.tarifa_iva);
    let tarifa_u32 = tarifa_normalizada
        .round()
        .to_u32()
        .unwrap_or(0);
    let tarifa = lookup_tariff(tarifa_u32, lenient)?;

    let base = line.cantidad * line.precio_unitario - line.descuento;
    let valor = base * Decimal::from(tarifa.tarifa) / dec!(100);

    let detail = LineDetail {
        codigo_principal: line.codigo_principal.clone(),
        descripcion: line.descripcion.clone(),
        cantidad: line.cantidad,
        precio_unitario: line.precio_unitario,
        descuento: round_money(line.descuento),
        precio_total_sin_impuesto: round_money(base),
        tarifa,
        valor_iva: round_money(valor),
    };

    Ok(LineComputation {
        detail,
        raw_descuento: line.descuento,
        raw_base: base,
        raw_valor: valor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(cantidad: Decimal, precio: Decimal, tarifa: Decimal) -> LineItemInput {
        LineItemInput {
            codigo_principal: "SKU1".into(),
            descripcion: "item".into(),
            cantidad,
            precio_unitario: precio,
            descuento: Decimal::ZERO,
            tarifa_iva: tarifa,
        }
    }

    fn input(lines: Vec<LineItemInput>) -> InvoiceInput {
        InvoiceInput {
            estab_codigo: "001".into(),
            punto_codigo: "001".into(),
            identificacion_comprador: "9999999999".into(),
            razon_social_comprador: "Consumidor Final".into(),
            lines,
            info_adicional: vec![],
        }
    }

    #[test]
    fn s1_happy_path_totals() {
        let inv = input(vec![line(dec!(1), dec!(100), dec!(15))]);
        let calc = calculate(&inv, false).unwrap();
        assert_eq!(calc.summary.total_sin_impuestos, dec!(100.00));
        assert_eq!(calc.summary.total_iva, dec!(15.00));
        assert_eq!(calc.summary.importe_total, dec!(115.00));
    }

    #[test]
    fn accepts_fractional_tariff() {
        let inv = input(vec![line(dec!(1), dec!(100), dec!(0.15))]);
        let calc = calculate(&inv, false).unwrap();
        assert_eq!(calc.summary.total_iva, dec!(15.00));
    }

    #[test]
    fn unknown_tariff_is_hard_error_by_default() {
        let inv = input(vec![line(dec!(1), dec!(100), dec!(7))]);
        assert!(calculate(&inv, false).is_err());
    }

    #[test]
    fn unknown_tariff_degrades_to_zero_when_lenient() {
        let inv = input(vec![line(dec!(1), dec!(100), dec!(7))]);
        let calc = calculate(&inv, true).unwrap();
        assert_eq!(calc.summary.total_iva, dec!(0.00));
        assert_eq!(calc.summary.subtotal_0, dec!(100.00));
    }

    #[test]
    fn importe_total_identity_holds() {
        let inv = input(vec![
            line(dec!(2), dec!(33.33), dec!(15)),
            line(dec!(1), dec!(10), dec!(0)),
            line(dec!(3), dec!(7.25), dec!(12)),
        ]);
        let calc = calculate(&inv, false).unwrap();
        let sum_valor: Decimal = calc.aggregates.iter().map(|a| a.valor).sum();
        assert_eq!(
            calc.summary.importe_total,
            calc.summary.total_sin_impuestos + sum_valor
        );
        assert_eq!(
            calc.summary.subtotal_iva + calc.summary.subtotal_0,
            calc.summary.total_sin_impuestos
        );
    }

    #[test]
    fn aggregation_keeps_full_precision_across_lines_with_fractional_remainders() {
        // Three lines whose per-line base/valor each have a fractional
        // remainder below a cent; rounding per line before summing would
        // lose a cent relative to rounding only the aggregate.
        let inv = input(vec![
            line(dec!(1), dec!(0.333), dec!(15)),
            line(dec!(1), dec!(0.333), dec!(15)),
            line(dec!(1), dec!(0.334), dec!(15)),
        ]);
        let calc = calculate(&inv, false).unwrap();
        // Unrounded sum of bases is exactly 1.000; rounding line-by-line
        // first (0.33 + 0.33 + 0.33 = 0.99) would have lost the cent.
        assert_eq!(calc.summary.total_sin_impuestos, dec!(1.00));
        assert_eq!(calc.summary.total_iva, dec!(0.15));
        assert_eq!(calc.summary.importe_total, dec!(1.15));
    }

    proptest::proptest! {
        #[test]
        fn identity_holds_for_arbitrary_lines(
            cantidad in 1i64..1000,
            precio in 0i64..100_000,
            tarifa_idx in 0usize..4,
        ) {
            let tarifas = [dec!(0), dec!(5), dec!(12), dec!(15)];
            let inv = input(vec![line(
                Decimal::from(cantidad),
                Decimal::new(precio, 2),
                tarifas[tarifa_idx],
            )]);
            let calc = calculate(&inv, false).unwrap();
            let sum_valor: Decimal = calc.aggregates.iter().map(|a| a.valor).sum();
            proptest::prop_assert_eq!(
                calc.summary.importe_total,
                calc.summary.total_sin_impuestos + sum_valor
            );
            proptest::prop_assert_eq!(
                calc.summary.subtotal_iva + calc.summary.subtotal_0,
                calc.summary.total_sin_impuestos
            );
        }
    }
}

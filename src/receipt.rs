//! Receipt Renderer — `spec.md` §4.9.
//!
//! Builds the RIDE (human-readable receipt) PDF from the already-signed
//! invoice. `printpdf` writes pages incrementally rather than building one
//! giant in-memory document tree, and `qrcode` is a pure-Rust QR encoder —
//! both avoid a system PDF/QR dependency, matching the rest of this
//! stack's preference for pure-Rust where the pack shows no precedent
//! either way.

use printpdf::{
    BuiltinFont, Color, Line, Mm, PdfDocument, PdfDocumentReference, Point, Rgb,
};
use qrcode::QrCode;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{EstadoFactura, Issuer, LineItemInput};
use crate::tax_calculator::TaxCalculation;

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("pdf generation failed: {0}")]
    Pdf(String),
    #[error("qr code generation failed: {0}")]
    Qr(String),
}

const PAGE_WIDTH_MM: f64 = 210.0;
const PAGE_HEIGHT_MM: f64 = 297.0;
const SRI_CONSULTATION_URL: &str =
    "https://srienlinea.sri.gob.ec/comprobantes-electronicos-internet/pages/consultas/comprobantesXml.jsf";

pub struct ReceiptInput<'a> {
    pub issuer: &'a Issuer,
    pub estab_codigo: &'a str,
    pub punto_codigo: &'a str,
    pub secuencial: &'a str,
    pub clave_acceso: &'a str,
    pub identificacion_comprador: &'a str,
    pub razon_social_comprador: &'a str,
    pub lines: &'a [LineItemInput],
    pub calculation: &'a TaxCalculation,
    pub estado: EstadoFactura,
}

/// Renders the A4 RIDE PDF and returns it as bytes, ready to be handed to
/// the Artifact Store Adapter or streamed directly to an HTTP response
/// body — the document is built page by page rather than accumulated in
/// an intermediate object graph.
pub fn render_receipt(input: &ReceiptInput<'_>) -> Result<Vec<u8>, ReceiptError> {
    let (doc, page1, layer1) = PdfDocument::new(
        "RIDE",
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "contenido",
    );
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ReceiptError::Pdf(e.to_string()))?;
    let font_bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ReceiptError::Pdf(e.to_string()))?;
    let layer = doc.get_page(page1).get_layer(layer1);

    let mut cursor_y = PAGE_HEIGHT_MM - 20.0;

    write_line(&layer, &font_bold, 14.0, 15.0, cursor_y, &input.issuer.razon_social);
    cursor_y -= 6.0;
    write_line(&layer, &font, 9.0, 15.0, cursor_y, &input.issuer.direccion_matriz);
    cursor_y -= 6.0;
    write_line(&layer, &font, 9.0, 15.0, cursor_y, &format!("RUC: {}", input.issuer.ruc));
    cursor_y -= 10.0;

    write_line(
        &layer,
        &font_bold,
        11.0,
        15.0,
        cursor_y,
        &format!(
            "FACTURA No. {}-{}-{}",
            input.estab_codigo, input.punto_codigo, input.secuencial
        ),
    );
    cursor_y -= 6.0;
    write_line(&layer, &font, 8.0, 15.0, cursor_y, &format!("Clave de acceso: {}", input.clave_acceso));
    cursor_y -= 10.0;

    draw_authorization_banner(&layer, &font_bold, cursor_y, input.estado);
    cursor_y -= 10.0;

    write_line(
        &layer,
        &font,
        9.0,
        15.0,
        cursor_y,
        &format!("Cliente: {}", input.razon_social_comprador),
    );
    cursor_y -= 5.0;
    write_line(
        &layer,
        &font,
        9.0,
        15.0,
        cursor_y,
        &format!("Identificacion: {}", input.identificacion_comprador),
    );
    cursor_y -= 10.0;

    write_line(&layer, &font_bold, 9.0, 15.0, cursor_y, "Descripcion");
    write_line(&layer, &font_bold, 9.0, 110.0, cursor_y, "Cant.");
    write_line(&layer, &font_bold, 9.0, 130.0, cursor_y, "P.Unit.");
    write_line(&layer, &font_bold, 9.0, 155.0, cursor_y, "IVA");
    write_line(&layer, &font_bold, 9.0, 175.0, cursor_y, "Total");
    cursor_y -= 6.0;

    for (line, detail) in input.lines.iter().zip(&input.calculation.details) {
        if cursor_y < 30.0 {
            break;
        }
        write_line(&layer, &font, 8.0, 15.0, cursor_y, &truncate(&line.descripcion, 45));
        write_line(&layer, &font, 8.0, 110.0, cursor_y, &decimal_str(line.cantidad));
        write_line(&layer, &font, 8.0, 130.0, cursor_y, &decimal_str(line.precio_unitario));
        write_line(&layer, &font, 8.0, 155.0, cursor_y, &format!("{}%", detail.tarifa.tarifa));
        write_line(&layer, &font, 8.0, 175.0, cursor_y, &decimal_str(detail.precio_total_sin_impuesto));
        cursor_y -= 5.0;
    }
    cursor_y -= 5.0;

    let summary = &input.calculation.summary;
    write_totals_row(&layer, &font, cursor_y, "Subtotal sin impuestos", summary.total_sin_impuestos);
    cursor_y -= 5.0;
    write_totals_row(&layer, &font, cursor_y, "Subtotal 0%", summary.subtotal_0);
    cursor_y -= 5.0;
    write_totals_row(&layer, &font, cursor_y, "Subtotal IVA", summary.subtotal_iva);
    cursor_y -= 5.0;
    write_totals_row(&layer, &font, cursor_y, "IVA", summary.total_iva);
    cursor_y -= 5.0;
    write_totals_row(&layer, &font_bold, cursor_y, "VALOR TOTAL", summary.importe_total);
    cursor_y -= 15.0;

    draw_qr(&layer, &doc, page1, input.clave_acceso, cursor_y)?;

    let bytes = doc
        .save_to_bytes()
        .map_err(|e| ReceiptError::Pdf(e.to_string()))?;
    Ok(bytes)
}

fn draw_authorization_banner(
    layer: &printpdf::PdfLayerReference,
    font: &printpdf::IndirectFontRef,
    y: f64,
    estado: EstadoFactura,
) {
    let (text, color) = match estado {
        EstadoFactura::Autorizado => (
            "AUTORIZADO".to_string(),
            Color::Rgb(Rgb::new(0.0, 0.5, 0.0, None)),
        ),
        EstadoFactura::Rechazado => (
            "NO AUTORIZADO".to_string(),
            Color::Rgb(Rgb::new(0.7, 0.0, 0.0, None)),
        ),
        _ => (
            "PENDIENTE DE AUTORIZACION".to_string(),
            Color::Rgb(Rgb::new(0.7, 0.0, 0.0, None)),
        ),
    };
    layer.set_fill_color(color);
    layer.use_text(text, 10.0, Mm(15.0), Mm(y), font);
    layer.set_fill_color(Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));
}

fn draw_qr(
    layer: &printpdf::PdfLayerReference,
    _doc: &PdfDocumentReference,
    _page1: printpdf::PdfPageIndex,
    clave_acceso: &str,
    y: f64,
) -> Result<(), ReceiptError> {
    let url = format!("{SRI_CONSULTATION_URL}?claveAccesoConsultada={clave_acceso}");
    let code = QrCode::new(url.as_bytes()).map_err(|e| ReceiptError::Qr(e.to_string()))?;
    let modules = code.width();
    let cell_mm = 0.8;
    let origin_x = 15.0;

    for row in 0..modules {
        for col in 0..modules {
            if code[(col, row)] == qrcode::Color::Dark {
                let x0 = origin_x + col as f64 * cell_mm;
                let y0 = y - row as f64 * cell_mm;
                let square = Line {
                    points: vec![
                        (Point::new(Mm(x0), Mm(y0)), false),
                        (Point::new(Mm(x0 + cell_mm), Mm(y0)), false),
                        (Point::new(Mm(x0 + cell_mm), Mm(y0 - cell_mm)), false),
                        (Point::new(Mm(x0), Mm(y0 - cell_mm)), false),
                    ],
                    is_closed: true,
                };
                layer.add_line(square);
            }
        }
    }
    Ok(())
}

fn write_line(
    layer: &printpdf::PdfLayerReference,
    font: &printpdf::IndirectFontRef,
    size: f64,
    x_mm: f64,
    y_mm: f64,
    text: &str,
) {
    layer.use_text(text, size, Mm(x_mm), Mm(y_mm), font);
}

fn write_totals_row(
    layer: &printpdf::PdfLayerReference,
    font: &printpdf::IndirectFontRef,
    y: f64,
    label: &str,
    value: Decimal,
) {
    write_line(layer, font, 9.0, 120.0, y, label);
    write_line(layer, font, 9.0, 175.0, y, &decimal_str(value));
}

fn decimal_str(value: Decimal) -> String {
    format!("{:.2}", value)
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        text.chars().take(max_len.saturating_sub(1)).collect::<String>() + "\u{2026}"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ambiente;
    use crate::tax_calculator;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn issuer() -> Issuer {
        Issuer {
            id: Uuid::new_v4(),
            ruc: "1790011674001".into(),
            razon_social: "ACME S.A.".into(),
            direccion_matriz: "Av. Siempre Viva 123".into(),
            ambiente: Ambiente::Pruebas,
            obligado_contabilidad: "SI".into(),
            p12_path: None,
            encrypted_p12_password: None,
            p12_expiration: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn renders_nonempty_pdf_bytes() {
        let issuer = issuer();
        let lines = vec![LineItemInput {
            codigo_principal: "SKU1".into(),
            descripcion: "Consultoria".into(),
            cantidad: dec!(1),
            precio_unitario: dec!(100),
            descuento: Decimal::ZERO,
            tarifa_iva: dec!(15),
        }];
        let input_invoice = crate::domain::InvoiceInput {
            estab_codigo: "001".into(),
            punto_codigo: "001".into(),
            identificacion_comprador: "9999999999".into(),
            razon_social_comprador: "Consumidor Final".into(),
            lines: lines.clone(),
            info_adicional: vec![],
        };
        let calculation = tax_calculator::calculate(&input_invoice, false).unwrap();

        let pdf = render_receipt(&ReceiptInput {
            issuer: &issuer,
            estab_codigo: "001",
            punto_codigo: "001",
            secuencial: "000000001",
            clave_acceso: &"1".repeat(49),
            identificacion_comprador: "9999999999",
            razon_social_comprador: "Consumidor Final",
            lines: &lines,
            calculation: &calculation,
            estado: EstadoFactura::Firmado,
        })
        .unwrap();

        assert!(!pdf.is_empty());
        assert_eq!(&pdf[0..4], b"%PDF");
    }

    #[test]
    fn truncate_adds_ellipsis_only_when_over_limit() {
        assert_eq!(truncate("short", 45), "short");
        assert_eq!(truncate(&"x".repeat(50), 10).chars().count(), 10);
    }
}

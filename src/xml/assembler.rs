//! Builds the invoice XML rooted at `factura`.
//!
//! Grounded on the teacher's `xrechnung::xml_utils` writer-wrapper idiom
//! (`quick_xml::Writer` plus small `start_element`/`text_element` helpers)
//! generalized from XRechnung's UBL/CII shapes to SRI's fixed `factura`
//! schema.

use chrono::{DateTime, Utc};
use chrono_tz::America::Guayaquil;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Writer;
use rust_decimal::Decimal;
use std::io::Cursor;
use thiserror::Error;

use crate::domain::{Issuer, LineItemInput};
use crate::tax_calculator::TaxCalculation;

/// The attribute the signature `Reference` depends on — see `spec.md`
/// §4.4/§4.5. Mandatory; patched back in if the serializer ever omits it.
pub const COMPROBANTE_ID: &str = "comprobante";
pub const FACTURA_VERSION: &str = "1.1.0";

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML serialization error: {0}")]
    Write(#[from] quick_xml::Error),
    #[error("XML is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("assembled XML is missing the mandatory id=\"comprobante\" attribute")]
    MissingComprobanteId,
}

pub struct FacturaInput<'a> {
    pub issuer: &'a Issuer,
    pub estab_codigo: &'a str,
    pub punto_codigo: &'a str,
    pub secuencial: &'a str,
    pub clave_acceso: &'a str,
    pub fecha_emision: DateTime<Utc>,
    pub identificacion_comprador: &'a str,
    pub razon_social_comprador: &'a str,
    pub lines: &'a [LineItemInput],
    pub calculation: &'a TaxCalculation,
    pub info_adicional: &'a [(String, String)],
}

/// Assembles the `factura` XML document for the given invoice.
pub fn assemble_factura_xml(input: &FacturaInput<'_>) -> Result<String, XmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(quick_xml::events::BytesDecl::new(
        "1.0", Some("UTF-8"), None,
    )))?;

    let mut root = BytesStart::new("factura");
    root.push_attribute(("id", COMPROBANTE_ID));
    root.push_attribute(("version", FACTURA_VERSION));
    writer.write_event(Event::Start(root))?;

    write_info_tributaria(&mut writer, input)?;
    write_info_factura(&mut writer, input)?;
    write_detalles(&mut writer, input)?;
    if !input.info_adicional.is_empty() {
        write_info_adicional(&mut writer, input)?;
    }

    writer.write_event(Event::End(quick_xml::events::BytesEnd::new("factura")))?;

    let bytes = writer.into_inner().into_inner();
    let xml = String::from_utf8(bytes)?;

    ensure_comprobante_id(xml)
}

/// Defensive patch for the mandatory signature-reference target. If the
/// serializer ever emits `<factura ...>` without `id="comprobante"` (it
/// never does today, but `spec.md` §4.4 requires the guard), this injects
/// the attribute into the opening tag directly.
fn ensure_comprobante_id(xml: String) -> Result<String, XmlError> {
    if xml.contains(&format!("id=\"{COMPROBANTE_ID}\"")) {
        return Ok(xml);
    }
    let needle = "<factura";
    match xml.find(needle) {
        Some(pos) => {
            let insert_at = pos + needle.len();
            let mut patched = xml;
            patched.insert_str(insert_at, &format!(" id=\"{COMPROBANTE_ID}\""));
            Ok(patched)
        }
        None => Err(XmlError::MissingComprobanteId),
    }
}

fn write_info_tributaria(
    w: &mut Writer<Cursor<Vec<u8>>>,
    input: &FacturaInput<'_>,
) -> Result<(), XmlError> {
    w.write_event(Event::Start(BytesStart::new("infoTributaria")))?;
    text_element(w, "ambiente", &input.issuer.ambiente.code().to_string())?;
    text_element(w, "tipoEmision", "1")?;
    text_element(w, "razonSocial", &input.issuer.razon_social)?;
    text_element(w, "ruc", &input.issuer.ruc)?;
    text_element(w, "claveAcceso", input.clave_acceso)?;
    text_element(w, "codDoc", "01")?;
    text_element(w, "estab", input.estab_codigo)?;
    text_element(w, "ptoEmi", input.punto_codigo)?;
    text_element(w, "secuencial", input.secuencial)?;
    text_element(w, "dirMatriz", &input.issuer.direccion_matriz)?;
    w.write_event(Event::End(quick_xml::events::BytesEnd::new(
        "infoTributaria",
    )))?;
    Ok(())
}

fn write_info_factura(
    w: &mut Writer<Cursor<Vec<u8>>>,
    input: &FacturaInput<'_>,
) -> Result<(), XmlError> {
    let local = input.fecha_emision.with_timezone(&Guayaquil);
    let summary = &input.calculation.summary;

    w.write_event(Event::Start(BytesStart::new("infoFactura")))?;
    text_element(w, "fechaEmision", &local.format("%d/%m/%Y").to_string())?;
    text_element(w, "dirEstablecimiento", &input.issuer.direccion_matriz)?;
    text_element(
        w,
        "obligadoContabilidad",
        &input.issuer.obligado_contabilidad,
    )?;
    text_element(
        w,
        "tipoIdentificacionComprador",
        identificacion_tipo(input.identificacion_comprador),
    )?;
    text_element(
        w,
        "razonSocialComprador",
        input.razon_social_comprador,
    )?;
    text_element(
        w,
        "identificacionComprador",
        input.identificacion_comprador,
    )?;
    text_element(
        w,
        "totalSinImpuestos",
        &decimal_str(summary.total_sin_impuestos),
    )?;
    text_element(w, "totalDescuento", &decimal_str(summary.total_descuento))?;

    w.write_event(Event::Start(BytesStart::new("totalConImpuestos")))?;
    for agg in &input.calculation.aggregates {
        w.write_event(Event::Start(BytesStart::new("totalImpuesto")))?;
        text_element(w, "codigo", agg.tarifa.codigo)?;
        text_element(w, "codigoPorcentaje", agg.tarifa.codigo_porcentaje)?;
        text_element(w, "baseImponible", &decimal_str(agg.base_imponible))?;
        text_element(w, "valor", &decimal_str(agg.valor))?;
        w.write_event(Event::End(quick_xml::events::BytesEnd::new(
            "totalImpuesto",
        )))?;
    }
    w.write_event(Event::End(quick_xml::events::BytesEnd::new(
        "totalConImpuestos",
    )))?;

    text_element(w, "propina", "0.00")?;
    text_element(w, "importeTotal", &decimal_str(summary.importe_total))?;
    text_element(w, "moneda", "DOLAR")?;

    w.write_event(Event::End(quick_xml::events::BytesEnd::new(
        "infoFactura",
    )))?;
    Ok(())
}

fn write_detalles(
    w: &mut Writer<Cursor<Vec<u8>>>,
    input: &FacturaInput<'_>,
) -> Result<(), XmlError> {
    w.write_event(Event::Start(BytesStart::new("detalles")))?;
    for (line, detail) in input.lines.iter().zip(&input.calculation.details) {
        w.write_event(Event::Start(BytesStart::new("detalle")))?;
        text_element(w, "codigoPrincipal", &line.codigo_principal)?;
        text_element(w, "descripcion", &line.descripcion)?;
        text_element(w, "cantidad", &decimal_str(line.cantidad))?;
        text_element(w, "precioUnitario", &decimal_str(line.precio_unitario))?;
        text_element(w, "descuento", &decimal_str(detail.descuento))?;
        text_element(
            w,
            "precioTotalSinImpuesto",
            &decimal_str(detail.precio_total_sin_impuesto),
        )?;
        w.write_event(Event::Start(BytesStart::new("impuestos")))?;
        w.write_event(Event::Start(BytesStart::new("impuesto")))?;
        text_element(w, "codigo", "2")?;
        text_element(w, "codigoPorcentaje", detail.tarifa.codigo_porcentaje)?;
        text_element(w, "tarifa", &detail.tarifa.tarifa.to_string())?;
        text_element(
            w,
            "baseImponible",
            &decimal_str(detail.precio_total_sin_impuesto),
        )?;
        text_element(w, "valor", &decimal_str(detail.valor_iva))?;
        w.write_event(Event::End(quick_xml::events::BytesEnd::new("impuesto")))?;
        w.write_event(Event::End(quick_xml::events::BytesEnd::new("impuestos")))?;
        w.write_event(Event::End(quick_xml::events::BytesEnd::new("detalle")))?;
    }
    w.write_event(Event::End(quick_xml::events::BytesEnd::new("detalles")))?;
    Ok(())
}

fn write_info_adicional(
    w: &mut Writer<Cursor<Vec<u8>>>,
    input: &FacturaInput<'_>,
) -> Result<(), XmlError> {
    w.write_event(Event::Start(BytesStart::new("infoAdicional")))?;
    for (name, value) in input.info_adicional {
        let mut el = BytesStart::new("campoAdicional");
        el.push_attribute(("nombre", name.as_str()));
        w.write_event(Event::Start(el))?;
        w.write_event(Event::Text(BytesText::new(value)))?;
        w.write_event(Event::End(quick_xml::events::BytesEnd::new(
            "campoAdicional",
        )))?;
    }
    w.write_event(Event::End(quick_xml::events::BytesEnd::new(
        "infoAdicional",
    )))?;
    Ok(())
}

fn text_element(w: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) -> Result<(), XmlError> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(quick_xml::events::BytesEnd::new(name)))?;
    Ok(())
}

fn decimal_str(value: Decimal) -> String {
    format!("{:.2}", value)
}

/// `04` for RUC, `05` for cédula, `06` for passport, `07` for consumidor
/// final (the all-nines placeholder SRI uses for anonymous sales).
fn identificacion_tipo(id: &str) -> &'static str {
    match id.len() {
        13 => "04",
        10 if id == "9999999999" => "07",
        10 => "05",
        _ => "06",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ambiente;
    use crate::tax_calculator;
    use chrono::TimeZone;
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
    fn root_has_comprobante_id_and_version() {
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

        let xml = assemble_factura_xml(&FacturaInput {
            issuer: &issuer,
            estab_codigo: "001",
            punto_codigo: "001",
            secuencial: "000000001",
            clave_acceso: &"1".repeat(49),
            fecha_emision: Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap(),
            identificacion_comprador: "9999999999",
            razon_social_comprador: "Consumidor Final",
            lines: &lines,
            calculation: &calculation,
            info_adicional: &[],
        })
        .unwrap();

        assert!(xml.contains("id=\"comprobante\""));
        assert!(xml.contains("version=\"1.1.0\""));
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<claveAcceso>"));
        assert!(xml.contains("115.00"));
    }

    #[test]
    fn patch_injects_missing_attribute() {
        let patched = ensure_comprobante_id("<factura version=\"1.1.0\"></factura>".to_string())
            .unwrap();
        assert!(patched.contains("id=\"comprobante\""));
    }
}

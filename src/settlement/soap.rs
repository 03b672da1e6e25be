//! SOAP envelope construction and response parsing for SRI's reception
//! and authorization services — `spec.md` §4.7/§6 "SOAP surface".
//!
//! The wire shape is small and fixed (two operations, two response
//! shapes), so this is two `quick-xml`-templated envelopes rather than a
//! generated SOAP client, per `SPEC_FULL.md` §6.

use base64::Engine;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SoapError {
    #[error("malformed SOAP response: {0}")]
    Malformed(String),
}

pub const RECEPCION_NAMESPACE: &str = "http://ec.gob.sri.ws.recepcion";
pub const AUTORIZACION_NAMESPACE: &str = "http://ec.gob.sri.ws.autorizacion";

/// Builds the `validarComprobante` reception request, base64-encoding the
/// signed XML bytes as the wrapped payload.
pub fn build_reception_envelope(signed_xml: &[u8]) -> String {
    let xml_b64 = base64::engine::general_purpose::STANDARD.encode(signed_xml);
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ec="{RECEPCION_NAMESPACE}">
<soapenv:Body><ec:validarComprobante><xml>{xml_b64}</xml></ec:validarComprobante></soapenv:Body>
</soapenv:Envelope>"#
    )
}

/// Builds the `autorizacionComprobante` request for a single access key.
pub fn build_authorization_envelope(clave_acceso: &str) -> String {
    format!(
        r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ec="{AUTORIZACION_NAMESPACE}">
<soapenv:Body><ec:autorizacionComprobante><claveAccesoComprobante>{clave_acceso}</claveAccesoComprobante></ec:autorizacionComprobante></soapenv:Body>
</soapenv:Envelope>"#
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceptionOutcome {
    Recibida,
    Devuelta { mensajes: String },
}

/// Parses the reception response body, extracting `<estado>` and, when
/// not `RECIBIDA`, the accompanying `<mensaje>` text as a flat
/// concatenation (SRI nests zero or more `mensaje` elements under
/// `comprobante`).
pub fn parse_reception_response(body: &str) -> Result<ReceptionOutcome, SoapError> {
    let estado = extract_first_text(body, "estado")
        .ok_or_else(|| SoapError::Malformed("missing <estado>".into()))?;
    match estado.as_str() {
        "RECIBIDA" => Ok(ReceptionOutcome::Recibida),
        _ => {
            let mensajes = extract_all_text(body, "mensaje").join("; ");
            Ok(ReceptionOutcome::Devuelta {
                mensajes: if mensajes.is_empty() { estado } else { mensajes },
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Autorizado {
        authorized_xml: String,
        fecha_autorizacion: DateTime<Utc>,
    },
    NoAutorizado {
        mensajes: String,
    },
    /// `numeroComprobantes == 0` — no `<autorizacion>` record present yet.
    /// The worker leaves the row untouched and retries next tick; nothing
    /// to persist since SRI hasn't said anything about this key yet.
    NoRecordYet,
    /// An authority `<estado>` other than `AUTORIZADO`/`NO AUTORIZADO` —
    /// `spec.md` §4.7 requires this be "stored verbatim" rather than
    /// discarded, since it's a genuinely unexpected response worth keeping
    /// for operator review.
    Unrecognized {
        estado: String,
        mensajes: String,
    },
}

/// Parses the authorization response. When `numeroComprobantes == 0` (no
/// `<autorizacion>` record present yet), returns `NoRecordYet` so the
/// worker leaves the row untouched and retries next tick.
pub fn parse_authorization_response(body: &str) -> Result<AuthorizationOutcome, SoapError> {
    let estado = match extract_first_text(body, "estado") {
        Some(e) => e,
        None => return Ok(AuthorizationOutcome::NoRecordYet),
    };

    match estado.as_str() {
        "AUTORIZADO" => {
            let authorized_xml = extract_first_text(body, "comprobante")
                .ok_or_else(|| SoapError::Malformed("missing authorized <comprobante>".into()))?;
            let fecha_str = extract_first_text(body, "fechaAutorizacion")
                .ok_or_else(|| SoapError::Malformed("missing <fechaAutorizacion>".into()))?;
            let fecha_autorizacion = DateTime::parse_from_rfc3339(&fecha_str)
                .map_err(|e| SoapError::Malformed(format!("bad fechaAutorizacion: {e}")))?
                .with_timezone(&Utc);
            Ok(AuthorizationOutcome::Autorizado {
                authorized_xml,
                fecha_autorizacion,
            })
        }
        "NO AUTORIZADO" => {
            let mensajes = extract_all_text(body, "mensaje").join("; ");
            Ok(AuthorizationOutcome::NoAutorizado { mensajes })
        }
        other => Ok(AuthorizationOutcome::Unrecognized {
            estado: other.to_string(),
            mensajes: extract_all_text(body, "mensaje").join("; "),
        }),
    }
}

fn extract_first_text(xml: &str, tag: &str) -> Option<String> {
    extract_all_text(xml, tag).into_iter().next()
}

fn extract_all_text(xml: &str, tag: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut out = Vec::new();
    let mut capturing = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if local_name_matches(e.name().as_ref(), tag) => {
                capturing = true;
            }
            Ok(Event::Text(t)) if capturing => {
                if let Ok(text) = t.decode() {
                    out.push(text.into_owned());
                }
                capturing = false;
            }
            Ok(Event::End(e)) if local_name_matches(e.name().as_ref(), tag) => {
                capturing = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

fn local_name_matches(qname: &[u8], tag: &str) -> bool {
    let name = String::from_utf8_lossy(qname);
    name == tag || name.ends_with(&format!(":{tag}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reception_envelope_is_well_formed_with_no_stray_backslashes() {
        let envelope = build_reception_envelope(b"<factura/>");
        assert!(!envelope.contains('\\'));
        assert!(envelope.starts_with("<soapenv:Envelope"));
        assert!(envelope.ends_with("</soapenv:Envelope>"));
        assert!(envelope.contains(&format!(r#"xmlns:ec="{RECEPCION_NAMESPACE}""#)));
        let xml_b64 = base64::engine::general_purpose::STANDARD.encode(b"<factura/>");
        assert!(envelope.contains(&format!("<xml>{xml_b64}</xml>")));
        assert!(envelope.contains("<ec:validarComprobante>"));
        assert!(envelope.contains("</ec:validarComprobante>"));
    }

    #[test]
    fn authorization_envelope_is_well_formed_with_no_stray_backslashes() {
        let envelope = build_authorization_envelope("1234567890123456789012345678901234567890123456789");
        assert!(!envelope.contains('\\'));
        assert!(envelope.starts_with("<soapenv:Envelope"));
        assert!(envelope.ends_with("</soapenv:Envelope>"));
        assert!(envelope.contains(&format!(r#"xmlns:ec="{AUTORIZACION_NAMESPACE}""#)));
        assert!(envelope.contains(
            "<claveAccesoComprobante>1234567890123456789012345678901234567890123456789</claveAccesoComprobante>"
        ));
    }

    #[test]
    fn parses_recibida() {
        let body = "<respuesta><estado>RECIBIDA</estado></respuesta>";
        assert_eq!(
            parse_reception_response(body).unwrap(),
            ReceptionOutcome::Recibida
        );
    }

    #[test]
    fn parses_devuelta_with_messages() {
        let body = "<respuesta><estado>DEVUELTA</estado><mensaje>RUC invalido</mensaje></respuesta>";
        let outcome = parse_reception_response(body).unwrap();
        assert_eq!(
            outcome,
            ReceptionOutcome::Devuelta {
                mensajes: "RUC invalido".into()
            }
        );
    }

    #[test]
    fn parses_autorizado_with_timestamp() {
        let body = "<respuesta><numeroComprobantes>1</numeroComprobantes><autorizaciones><autorizacion>\
<estado>AUTORIZADO</estado><fechaAutorizacion>2026-07-27T10:00:00+00:00</fechaAutorizacion>\
<comprobante>&lt;factura/&gt;</comprobante></autorizacion></autorizaciones></respuesta>";
        let outcome = parse_authorization_response(body).unwrap();
        match outcome {
            AuthorizationOutcome::Autorizado {
                fecha_autorizacion, ..
            } => {
                assert_eq!(fecha_autorizacion.to_rfc3339(), "2026-07-27T10:00:00+00:00");
            }
            other => panic!("expected Autorizado, got {other:?}"),
        }
    }

    #[test]
    fn parses_no_autorizado() {
        let body = "<respuesta><autorizaciones><autorizacion><estado>NO AUTORIZADO</estado>\
<mensaje>comprobante ya registrado</mensaje></autorizacion></autorizaciones></respuesta>";
        let outcome = parse_authorization_response(body).unwrap();
        assert_eq!(
            outcome,
            AuthorizationOutcome::NoAutorizado {
                mensajes: "comprobante ya registrado".into()
            }
        );
    }

    #[test]
    fn missing_numero_comprobantes_yields_retry_marker() {
        let body = "<respuesta><numeroComprobantes>0</numeroComprobantes></respuesta>";
        let outcome = parse_authorization_response(body).unwrap();
        assert_eq!(outcome, AuthorizationOutcome::NoRecordYet);
    }

    #[test]
    fn unrecognized_estado_is_preserved_verbatim() {
        let body = "<respuesta><autorizaciones><autorizacion><estado>EN PROCESO</estado>\
<mensaje>comprobante en cola</mensaje></autorizacion></autorizaciones></respuesta>";
        let outcome = parse_authorization_response(body).unwrap();
        assert_eq!(
            outcome,
            AuthorizationOutcome::Unrecognized {
                estado: "EN PROCESO".into(),
                mensajes: "comprobante en cola".into(),
            }
        );
    }
}

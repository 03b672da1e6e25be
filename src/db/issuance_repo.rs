//! Repository queries backing the Sequencing & Credit Core (`spec.md`
//! §4.6) and the Settlement Worker (`spec.md` §4.7).
//!
//! Queries are written as runtime-checked `sqlx::query_as` calls against
//! hand-written structs rather than the `query_as!` macro, since this
//! repository has no live database to run `cargo sqlx prepare` against.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::{Ambiente, EmissionPoint, EstadoFactura, Invoice, Issuer};
use crate::error::{AppError, AppResult};

/// Locks the issuer row and its credit balance for the duration of the
/// transaction (`SELECT … FOR UPDATE`), returning both. Does not itself
/// check the balance or credential validity — callers enforce those per
/// `spec.md` §4.6 step 2 so the specific error variant stays at the call
/// site, not buried in the repository.
pub async fn lock_issuer_with_credits(
    tx: &mut Transaction<'_, Postgres>,
    issuer_id: Uuid,
) -> AppResult<(Issuer, i64)> {
    let row = sqlx::query(
        r#"
        SELECT i.id, i.ruc, i.razon_social, i.direccion_matriz, i.ambiente,
               i.obligado_contabilidad, i.p12_path, i.encrypted_p12_password,
               i.p12_expiration, i.created_at, c.balance
        FROM issuers i
        JOIN credit_ledger c ON c.issuer_id = i.id
        WHERE i.id = $1
        FOR UPDATE
        "#,
    )
    .bind(issuer_id)
    .fetch_optional(&mut **tx)
    .await?;

    let row = row.ok_or_else(|| AppError::NotFound(format!("issuer {issuer_id} not found")))?;
    Ok((issuer_from_row(&row)?, row.try_get::<i64, _>("balance")?))
}

fn issuer_from_row(row: &PgRow) -> AppResult<Issuer> {
    let ambiente_code: i16 = row.try_get("ambiente")?;
    Ok(Issuer {
        id: row.try_get("id")?,
        ruc: row.try_get("ruc")?,
        razon_social: row.try_get("razon_social")?,
        direccion_matriz: row.try_get("direccion_matriz")?,
        ambiente: Ambiente::from_code(ambiente_code)
            .ok_or_else(|| AppError::Internal(format!("invalid ambiente code {ambiente_code}")))?,
        obligado_contabilidad: row.try_get("obligado_contabilidad")?,
        p12_path: row.try_get("p12_path")?,
        encrypted_p12_password: row.try_get("encrypted_p12_password")?,
        p12_expiration: row.try_get("p12_expiration")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Resolves `(estab_codigo, punto_codigo)` to an emission-point row,
/// bounded by `issuer_id` so one issuer can never address another's
/// emission points.
pub async fn find_emission_point(
    tx: &mut Transaction<'_, Postgres>,
    issuer_id: Uuid,
    estab_codigo: &str,
    punto_codigo: &str,
) -> AppResult<EmissionPoint> {
    sqlx::query_as::<_, EmissionPoint>(
        r#"
        SELECT ep.id, ep.establishment_id, ep.codigo, ep.secuencial_actual, ep.created_at
        FROM emission_points ep
        JOIN establishments e ON e.id = ep.establishment_id
        WHERE e.issuer_id = $1 AND e.codigo = $2 AND ep.codigo = $3
        "#,
    )
    .bind(issuer_id)
    .bind(estab_codigo)
    .bind(punto_codigo)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| {
        AppError::NotFound(format!(
            "no emission point {estab_codigo}-{punto_codigo} for this issuer"
        ))
    })
}

/// Atomically advances the emission point's sequential via the database
/// function `generar_secuencial`, returning the newly allocated value.
/// Under row-level lock, this is the sole source of truth for
/// monotonically-increasing sequentials (`spec.md` §5, "Ordering
/// guarantees").
pub async fn generar_secuencial(
    tx: &mut Transaction<'_, Postgres>,
    point_id: Uuid,
) -> AppResult<i32> {
    let row = sqlx::query("SELECT generar_secuencial($1) AS secuencial")
        .bind(point_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.try_get("secuencial")?)
}

/// Debits one credit from the issuer's balance. Callers must have already
/// locked the row in this transaction via
/// [`lock_issuer_with_credits`] — this does not re-check `balance > 0`,
/// since that check already happened under the same lock.
pub async fn debit_one_credit(
    tx: &mut Transaction<'_, Postgres>,
    issuer_id: Uuid,
) -> AppResult<i64> {
    let row = sqlx::query(
        r#"
        UPDATE credit_ledger
        SET balance = balance - 1, updated_at = now()
        WHERE issuer_id = $1
        RETURNING balance
        "#,
    )
    .bind(issuer_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.try_get("balance")?)
}

/// Records a credit top-up or adjustment in the append-only audit log and
/// applies the delta to the ledger balance in the same transaction.
pub async fn apply_credit_delta(
    tx: &mut Transaction<'_, Postgres>,
    issuer_id: Uuid,
    delta: i64,
    reason: &str,
    actor: &str,
) -> AppResult<i64> {
    sqlx::query(
        "INSERT INTO transaction_log (id, issuer_id, delta, reason, actor, created_at) \
         VALUES ($1, $2, $3, $4, $5, now())",
    )
    .bind(Uuid::new_v4())
    .bind(issuer_id)
    .bind(delta)
    .bind(reason)
    .bind(actor)
    .execute(&mut **tx)
    .await?;

    let row = sqlx::query(
        "UPDATE credit_ledger SET balance = balance + $2, updated_at = now() \
         WHERE issuer_id = $1 RETURNING balance",
    )
    .bind(issuer_id)
    .bind(delta)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.try_get("balance")?)
}

#[allow(clippy::too_many_arguments)]
pub struct NewInvoice<'a> {
    pub emisor_id: Uuid,
    pub punto_emision_id: Uuid,
    pub secuencial: &'a str,
    pub clave_acceso: &'a str,
    pub identificacion_comprador: &'a str,
    pub razon_social_comprador: &'a str,
    pub subtotal_sin_impuestos: Decimal,
    pub subtotal_0: Decimal,
    pub subtotal_iva: Decimal,
    pub valor_iva: Decimal,
    pub importe_total: Decimal,
    pub estado: EstadoFactura,
    pub xml_path: Option<&'a str>,
    pub pdf_path: Option<&'a str>,
    pub client_input_data: serde_json::Value,
}

/// Inserts the invoice row. Per `spec.md` §4.6 step 10, this happens
/// inside the same transaction as the sequential allocation, the XML
/// signing, and the artifact uploads, so commit is the single point at
/// which "this invoice exists" becomes true.
pub async fn insert_invoice(
    tx: &mut Transaction<'_, Postgres>,
    new: NewInvoice<'_>,
) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoices (
            id, emisor_id, punto_emision_id, secuencial, clave_acceso,
            identificacion_comprador, razon_social_comprador,
            subtotal_sin_impuestos, subtotal_0, subtotal_iva, valor_iva, importe_total,
            estado, xml_path, pdf_path, client_input_data, created_at, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, now(), now()
        )
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.emisor_id)
    .bind(new.punto_emision_id)
    .bind(new.secuencial)
    .bind(new.clave_acceso)
    .bind(new.identificacion_comprador)
    .bind(new.razon_social_comprador)
    .bind(new.subtotal_sin_impuestos)
    .bind(new.subtotal_0)
    .bind(new.subtotal_iva)
    .bind(new.valor_iva)
    .bind(new.importe_total)
    .bind(new.estado)
    .bind(new.xml_path)
    .bind(new.pdf_path)
    .bind(new.client_input_data)
    .fetch_one(&mut **tx)
    .await
    .map_err(Into::into)
}

/// Atomically claims up to `limit` invoices out of `from_estado` into
/// `claim_estado`, in a single statement: the inner `SELECT ... FOR
/// UPDATE SKIP LOCKED` picks the candidate rows and the outer `UPDATE`
/// commits the claim before the statement returns, so the claim survives
/// the SOAP round-trip that follows — unlike a bare `SELECT ... FOR
/// UPDATE` run as its own autocommit statement, whose lock is released
/// the instant the `SELECT` completes. This is what makes a second
/// worker tick or replica unable to double-pick a row still in flight
/// (`spec.md` §4.7, "Concurrency contract"). Callers must revert rows
/// that fail to settle back to `from_estado` via [`revert_claim`] so the
/// next tick retries them.
pub async fn claim_for_settlement(
    pool: &sqlx::PgPool,
    from_estado: EstadoFactura,
    claim_estado: EstadoFactura,
    limit: i64,
) -> AppResult<Vec<Invoice>> {
    sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET estado = $2, updated_at = now()
        WHERE id IN (
            SELECT id FROM invoices
            WHERE estado = $1
            ORDER BY created_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .bind(from_estado)
    .bind(claim_estado)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

/// Reverts a claimed row back to its pre-claim state so the next tick
/// retries it — used when the SOAP round-trip fails with a transport
/// error or a malformed response. Only affects rows still in
/// `claim_estado`, so it is safe to call even if another path already
/// advanced the row.
pub async fn revert_claim(
    pool: &sqlx::PgPool,
    invoice_id: Uuid,
    claim_estado: EstadoFactura,
    from_estado: EstadoFactura,
) -> AppResult<()> {
    sqlx::query("UPDATE invoices SET estado = $3, updated_at = now() WHERE id = $1 AND estado = $2")
        .bind(invoice_id)
        .bind(claim_estado)
        .bind(from_estado)
        .execute(pool)
        .await?;
    Ok(())
}

/// Moves an invoice from `ENVIANDO` to `RECIBIDA`, recording the SRI
/// reception timestamp.
pub async fn mark_recibida(
    pool: &sqlx::PgPool,
    invoice_id: Uuid,
    fecha_envio_sri: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE invoices SET estado = 'RECIBIDA', fecha_envio_sri = $2, updated_at = now() \
         WHERE id = $1 AND estado = 'ENVIANDO'",
    )
    .bind(invoice_id)
    .bind(fecha_envio_sri)
    .execute(pool)
    .await?;
    Ok(())
}

/// Moves an invoice from `ENVIANDO` to `DEVUELTA`, recording the SRI
/// rejection payload.
pub async fn mark_devuelta(pool: &sqlx::PgPool, invoice_id: Uuid, mensajes_sri: &str) -> AppResult<()> {
    sqlx::query(
        "UPDATE invoices SET estado = 'DEVUELTA', mensajes_sri = $2, updated_at = now() \
         WHERE id = $1 AND estado = 'ENVIANDO'",
    )
    .bind(invoice_id)
    .bind(mensajes_sri)
    .execute(pool)
    .await?;
    Ok(())
}

/// Moves an invoice from `AUTORIZANDO` to the terminal `AUTORIZADO`
/// state, replacing `xml_path` with the authority-stamped document and
/// stamping `fecha_autorizacion`. Idempotent: only rows still in
/// `AUTORIZANDO` are affected, so a replayed tick on an already-advanced
/// row is a no-op (testable property 7).
pub async fn mark_autorizado(
    pool: &sqlx::PgPool,
    invoice_id: Uuid,
    xml_path: &str,
    fecha_autorizacion: DateTime<Utc>,
) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE invoices SET estado = 'AUTORIZADO', xml_path = $2, fecha_autorizacion = $3, \
         updated_at = now() WHERE id = $1 AND estado = 'AUTORIZANDO'",
    )
    .bind(invoice_id)
    .bind(xml_path)
    .bind(fecha_autorizacion)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Moves an invoice from `AUTORIZANDO` to the terminal `RECHAZADO` state.
pub async fn mark_rechazado(pool: &sqlx::PgPool, invoice_id: Uuid, mensajes_sri: &str) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE invoices SET estado = 'RECHAZADO', mensajes_sri = $2, updated_at = now() \
         WHERE id = $1 AND estado = 'AUTORIZANDO'",
    )
    .bind(invoice_id)
    .bind(mensajes_sri)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Records an authority `<estado>` other than `AUTORIZADO`/`NO AUTORIZADO`
/// verbatim in `mensajes_sri`, without advancing `estado` — the row stays
/// in `AUTORIZANDO` so the caller can still revert it to `RECIBIDA` and
/// retry next tick. `spec.md` §4.7: "Any other authority state is stored
/// verbatim."
pub async fn mark_otro_estado(
    pool: &sqlx::PgPool,
    invoice_id: Uuid,
    mensajes_sri: &str,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE invoices SET mensajes_sri = $2, updated_at = now() \
         WHERE id = $1 AND estado = 'AUTORIZANDO'",
    )
    .bind(invoice_id)
    .bind(mensajes_sri)
    .execute(pool)
    .await?;
    Ok(())
}

/// Last 50 invoices for an issuer, newest first (`GET /invoices/history`).
pub async fn history(pool: &sqlx::PgPool, issuer_id: Uuid, limit: i64) -> AppResult<Vec<Invoice>> {
    sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE emisor_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(issuer_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

/// Fetches an issuer row by id without taking a lock — used by the
/// Settlement Worker, which only reads issuer metadata (RUC, ambiente) to
/// pick the right SRI endpoint and object-store prefix.
pub async fn find_issuer(pool: &sqlx::PgPool, issuer_id: Uuid) -> AppResult<Issuer> {
    let row = sqlx::query("SELECT * FROM issuers WHERE id = $1")
        .bind(issuer_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("issuer {issuer_id} not found")))?;
    issuer_from_row(&row)
}

pub async fn find_by_clave_acceso(pool: &sqlx::PgPool, clave: &str) -> AppResult<Invoice> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE clave_acceso = $1")
        .bind(clave)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no invoice with access key {clave}")))
}

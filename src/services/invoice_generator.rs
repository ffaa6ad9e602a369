use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::invoice::{
    filter_adjustment_diffs, total_of, AdjustmentDiff, AdjustmentMode, InvoiceRecord,
    InvoiceItemRecord, InvoiceType, ItemKind, LineItem,
};
use crate::domain::period::PeriodMonth;
use crate::error::{map_db_error, AppError, AppResult};

/// Per-contract signed diffs feeding adjustment generation.
#[derive(Debug, Clone)]
pub struct ContractDiffs {
    pub contract_id: Uuid,
    pub diffs: Vec<AdjustmentDiff>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ContractRow {
    tenant_id: Uuid,
    house_id: Uuid,
    status: String,
}

/// Generate one invoice from pre-computed, pre-tagged items. Fee
/// business rules live in the invoking workflow; this validates items,
/// computes the total, and enforces period uniqueness.
pub async fn generate(
    pool: &PgPool,
    reference_prefix: &str,
    contract_id: Uuid,
    period: PeriodMonth,
    due_date: NaiveDate,
    late_fee_percent: Decimal,
    invoice_type: InvoiceType,
    items: Vec<LineItem>,
) -> AppResult<(InvoiceRecord, Vec<InvoiceItemRecord>)> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let result = generate_in_tx(
        &mut tx,
        reference_prefix,
        contract_id,
        period,
        due_date,
        late_fee_percent,
        invoice_type,
        false,
        items,
    )
    .await?;
    tx.commit().await.map_err(map_db_error)?;
    Ok(result)
}

/// Build one adjustment invoice per affected contract from signed diffs,
/// filtered by mode. Contracts whose filtered diff set is empty are
/// skipped. All invoices are created in a single transaction.
pub async fn generate_adjustment(
    pool: &PgPool,
    reference_prefix: &str,
    house_id: Uuid,
    period: PeriodMonth,
    mode: AdjustmentMode,
    contract_diffs: &[ContractDiffs],
    due_days: i64,
) -> AppResult<Vec<InvoiceRecord>> {
    let due_date = Utc::now().date_naive() + Duration::days(due_days.max(0));

    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let mut created = Vec::new();

    for entry in contract_diffs {
        let kept = filter_adjustment_diffs(mode, &entry.diffs);
        if kept.is_empty() {
            continue;
        }

        let contract = fetch_contract(&mut tx, entry.contract_id).await?;
        if contract.house_id != house_id {
            return Err(AppError::BadRequest(format!(
                "Hợp đồng {} không thuộc nhà này.",
                entry.contract_id
            )));
        }
        if contract.status != "active" {
            return Err(AppError::Conflict(format!(
                "Hợp đồng {} không còn hiệu lực.",
                entry.contract_id
            )));
        }

        let items = kept
            .into_iter()
            .map(|diff| {
                LineItem::validate(
                    ItemKind::Adjustment,
                    &diff.description,
                    None,
                    Decimal::ONE,
                    Decimal::ZERO,
                    Some(diff.amount),
                )
            })
            .collect::<AppResult<Vec<_>>>()?;

        let (invoice, _) = generate_in_tx(
            &mut tx,
            reference_prefix,
            entry.contract_id,
            period,
            due_date,
            Decimal::ZERO,
            InvoiceType::Adjustment,
            mode.is_netting(),
            items,
        )
        .await?;
        created.push(invoice);
    }

    tx.commit().await.map_err(map_db_error)?;
    Ok(created)
}

/// Transactional core shared by normal generation, adjustment
/// generation and shortfall application.
#[allow(clippy::too_many_arguments)]
pub async fn generate_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    reference_prefix: &str,
    contract_id: Uuid,
    period: PeriodMonth,
    due_date: NaiveDate,
    late_fee_percent: Decimal,
    invoice_type: InvoiceType,
    is_netting: bool,
    items: Vec<LineItem>,
) -> AppResult<(InvoiceRecord, Vec<InvoiceItemRecord>)> {
    if items.is_empty() {
        return Err(AppError::BadRequest(
            "Hóa đơn phải có ít nhất một khoản mục.".to_string(),
        ));
    }
    if late_fee_percent < Decimal::ZERO {
        return Err(AppError::InvalidAmount(
            "Phí trễ hạn không được âm.".to_string(),
        ));
    }
    if invoice_type == InvoiceType::Normal {
        if let Some(item) = items.iter().find(|item| item.kind == ItemKind::Adjustment) {
            return Err(AppError::BadRequest(format!(
                "Hóa đơn thường không được chứa khoản mục điều chỉnh ('{}').",
                item.description
            )));
        }
    }

    let total = total_of(&items);
    if invoice_type == InvoiceType::Normal && total < Decimal::ZERO {
        return Err(AppError::InvalidAmount(
            "Tổng tiền hóa đơn thường không được âm.".to_string(),
        ));
    }

    let contract = fetch_contract(tx, contract_id).await?;
    if contract.status == "ended" {
        return Err(AppError::Conflict(
            "Hợp đồng đã kết thúc, không thể tạo hóa đơn.".to_string(),
        ));
    }

    // Period uniqueness: one live invoice per (contract, period, type).
    let duplicate: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM invoices
         WHERE contract_id = $1 AND period_month = $2 AND invoice_type = $3
           AND status <> 'cancelled'
         LIMIT 1",
    )
    .bind(contract_id)
    .bind(period.to_string())
    .bind(invoice_type.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_db_error)?;

    if duplicate.is_some() {
        return Err(AppError::DuplicatePeriod(format!(
            "Đã tồn tại hóa đơn {} cho kỳ {period}.",
            invoice_type.as_str()
        )));
    }

    let reference_code = new_reference_code(reference_prefix);

    let invoice: InvoiceRecord = sqlx::query_as(
        "INSERT INTO invoices
             (contract_id, tenant_id, house_id, period_month, due_date,
              total_amount, paid_amount, late_fee_percent, status,
              invoice_type, is_netting, reference_code)
         VALUES ($1, $2, $3, $4, $5, $6, 0, $7, 'draft', $8, $9, $10)
         RETURNING *",
    )
    .bind(contract_id)
    .bind(contract.tenant_id)
    .bind(contract.house_id)
    .bind(period.to_string())
    .bind(due_date)
    .bind(total)
    .bind(late_fee_percent)
    .bind(invoice_type.as_str())
    .bind(is_netting)
    .bind(&reference_code)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_db_error)?;

    let mut inserted_items = Vec::with_capacity(items.len());
    for item in &items {
        let row: InvoiceItemRecord = sqlx::query_as(
            "INSERT INTO invoice_items
                 (invoice_id, item_type, description, category, quantity, unit_price, amount)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(invoice.id)
        .bind(item.kind.as_str())
        .bind(&item.description)
        .bind(&item.category)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.amount)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_db_error)?;
        inserted_items.push(row);
    }

    tracing::info!(
        invoice_id = %invoice.id,
        contract_id = %contract_id,
        period = %period,
        invoice_type = invoice_type.as_str(),
        total = %total,
        "Generated invoice"
    );

    Ok((invoice, inserted_items))
}

async fn fetch_contract(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    contract_id: Uuid,
) -> AppResult<ContractRow> {
    sqlx::query_as::<_, ContractRow>(
        "SELECT tenant_id, house_id, status FROM contracts WHERE id = $1",
    )
    .bind(contract_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound("Không tìm thấy hợp đồng.".to_string()))
}

/// Short uppercase reference code embedded by tenants in bank-transfer
/// memos. Uniqueness is backed by the column's unique constraint.
fn new_reference_code(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::new_reference_code;

    #[test]
    fn reference_codes_carry_prefix_and_alnum_suffix() {
        let code = new_reference_code("TRO");
        assert!(code.starts_with("TRO"));
        assert_eq!(code.len(), 11);
        assert!(code.chars().all(|ch| ch.is_ascii_alphanumeric()));
        assert_eq!(code, code.to_ascii_uppercase());
    }

    #[test]
    fn reference_codes_are_not_repeated() {
        let a = new_reference_code("TRO");
        let b = new_reference_code("TRO");
        assert_ne!(a, b);
    }
}

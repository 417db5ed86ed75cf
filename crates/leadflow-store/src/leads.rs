//! Lead upserts, conversation log, and CRM ID mappings.
//!
//! Leads are keyed by `(tenant_id, phone)`; every apply here runs inside
//! the same transaction as its seen-set insert, so concurrent webhook
//! deliveries cannot create two leads for one phone or two mappings for one
//! CRM ID.

use crate::events::insert_seen;
use crate::{from_millis, to_millis, ReconcileOutcome, Result, Store, StoreError};
use chrono::Utc;
use leadflow_core::id;
use leadflow_core::types::{
    ConversationMessage, CrmLeadEventPayload, InboundEvent, InboundMessageEvent, Lead, LeadId,
    MessageDirection, PhoneNumber, TenantId,
};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};

type LeadRow = (
    String,         // id
    String,         // tenant_id
    String,         // phone
    Option<String>, // name
    String,         // source
    i64,            // created_at
    i64,            // updated_at
);

fn lead_from_row(row: LeadRow) -> Lead {
    let (id, tenant_id, phone, name, source, created_at, updated_at) = row;
    Lead {
        id: LeadId::from_string(id),
        tenant_id: TenantId::new(tenant_id),
        phone: PhoneNumber::new(phone),
        name,
        source,
        created_at: from_millis(created_at),
        updated_at: from_millis(updated_at),
    }
}

/// Upsert a lead by `(tenant_id, phone)` inside an open transaction.
///
/// Returns the lead ID and whether a new lead was created. Safe against
/// races because the caller has already performed a write (the seen-set
/// insert) in this transaction.
async fn upsert_lead(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: &TenantId,
    phone: &PhoneNumber,
    name: Option<&str>,
    source: &str,
) -> Result<(LeadId, bool)> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM leads WHERE tenant_id = ?1 AND phone = ?2")
            .bind(tenant_id.as_str())
            .bind(phone.as_str())
            .fetch_optional(&mut **tx)
            .await?;

    let now = to_millis(Utc::now());

    if let Some((lead_id,)) = existing {
        sqlx::query(
            "UPDATE leads SET name = COALESCE(?1, name), updated_at = ?2 \
             WHERE tenant_id = ?3 AND id = ?4",
        )
        .bind(name)
        .bind(now)
        .bind(tenant_id.as_str())
        .bind(&lead_id)
        .execute(&mut **tx)
        .await?;

        return Ok((LeadId::from_string(lead_id), false));
    }

    let lead_id = LeadId::new();
    sqlx::query(
        "INSERT INTO leads (id, tenant_id, phone, name, source, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
    )
    .bind(lead_id.as_str())
    .bind(tenant_id.as_str())
    .bind(phone.as_str())
    .bind(name)
    .bind(source)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok((lead_id, true))
}

impl Store {
    /// Apply an inbound WhatsApp message: upsert the lead and append the
    /// message to its conversation log.
    pub async fn apply_inbound_message(
        &self,
        event: &InboundEvent,
        message: &InboundMessageEvent,
    ) -> Result<(ReconcileOutcome, Option<LeadId>)> {
        let mut tx = self.pool().begin().await?;

        if !insert_seen(&mut tx, event).await? {
            return Ok((ReconcileOutcome::Duplicate, None));
        }

        let (lead_id, created) = upsert_lead(
            &mut tx,
            &event.tenant_id,
            &message.from_phone,
            message.profile_name.as_deref(),
            "whatsapp",
        )
        .await?;

        sqlx::query(
            "INSERT INTO conversation_messages \
             (id, tenant_id, lead_id, direction, body, provider_message_id, created_at) \
             VALUES (?1, ?2, ?3, 'inbound', ?4, ?5, ?6)",
        )
        .bind(id::uuid())
        .bind(event.tenant_id.as_str())
        .bind(lead_id.as_str())
        .bind(&message.text)
        .bind(&message.provider_message_id)
        .bind(to_millis(Utc::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if created {
            info!(tenant = %event.tenant_id, lead = %lead_id, "Lead created from inbound message");
        } else {
            debug!(tenant = %event.tenant_id, lead = %lead_id, "Inbound message appended");
        }
        Ok((ReconcileOutcome::Applied, Some(lead_id)))
    }

    /// Apply a CRM lead event: resolve the CRM ID mapping, creating it
    /// together with the lead when it does not exist yet.
    pub async fn apply_crm_lead_event(
        &self,
        event: &InboundEvent,
        crm: &CrmLeadEventPayload,
    ) -> Result<(ReconcileOutcome, Option<LeadId>)> {
        let mut tx = self.pool().begin().await?;

        if !insert_seen(&mut tx, event).await? {
            return Ok((ReconcileOutcome::Duplicate, None));
        }

        let mapped: Option<(String,)> =
            sqlx::query_as("SELECT lead_id FROM crm_links WHERE tenant_id = ?1 AND crm_id = ?2")
                .bind(event.tenant_id.as_str())
                .bind(&crm.crm_id)
                .fetch_optional(&mut *tx)
                .await?;

        let lead_id = match mapped {
            Some((lead_id,)) => {
                let lead_id = LeadId::from_string(lead_id);
                if crm.name.is_some() {
                    sqlx::query(
                        "UPDATE leads SET name = COALESCE(?1, name), updated_at = ?2 \
                         WHERE tenant_id = ?3 AND id = ?4",
                    )
                    .bind(crm.name.as_deref())
                    .bind(to_millis(Utc::now()))
                    .bind(event.tenant_id.as_str())
                    .bind(lead_id.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
                lead_id
            }
            None => {
                let phone = crm.phone.as_ref().ok_or_else(|| {
                    StoreError::InvalidEvent(format!(
                        "CRM event {} has no mapping and no phone number",
                        crm.crm_id
                    ))
                })?;

                let (lead_id, _created) = upsert_lead(
                    &mut tx,
                    &event.tenant_id,
                    phone,
                    crm.name.as_deref(),
                    "crm",
                )
                .await?;

                sqlx::query(
                    "INSERT INTO crm_links (tenant_id, crm_id, lead_id) VALUES (?1, ?2, ?3)",
                )
                .bind(event.tenant_id.as_str())
                .bind(&crm.crm_id)
                .bind(lead_id.as_str())
                .execute(&mut *tx)
                .await?;

                lead_id
            }
        };

        tx.commit().await?;

        debug!(tenant = %event.tenant_id, crm_id = %crm.crm_id, lead = %lead_id, "CRM lead event applied");
        Ok((ReconcileOutcome::Applied, Some(lead_id)))
    }

    /// Fetch a lead by phone number.
    pub async fn get_lead_by_phone(
        &self,
        tenant_id: &TenantId,
        phone: &PhoneNumber,
    ) -> Result<Option<Lead>> {
        let row: Option<LeadRow> = sqlx::query_as(
            "SELECT id, tenant_id, phone, name, source, created_at, updated_at \
             FROM leads WHERE tenant_id = ?1 AND phone = ?2",
        )
        .bind(tenant_id.as_str())
        .bind(phone.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(lead_from_row))
    }

    /// Number of leads a tenant has.
    pub async fn lead_count(&self, tenant_id: &TenantId) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM leads WHERE tenant_id = ?1")
                .bind(tenant_id.as_str())
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    /// The CRM mapping for an external ID, if one exists.
    pub async fn crm_link(
        &self,
        tenant_id: &TenantId,
        crm_id: &str,
    ) -> Result<Option<LeadId>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT lead_id FROM crm_links WHERE tenant_id = ?1 AND crm_id = ?2")
                .bind(tenant_id.as_str())
                .bind(crm_id)
                .fetch_optional(self.pool())
                .await?;

        Ok(row.map(|(id,)| LeadId::from_string(id)))
    }

    /// A lead's conversation log, oldest first.
    pub async fn conversation_for_lead(
        &self,
        tenant_id: &TenantId,
        lead_id: &LeadId,
    ) -> Result<Vec<ConversationMessage>> {
        let rows: Vec<(String, String, String, String, String, Option<String>, i64)> =
            sqlx::query_as(
                "SELECT id, tenant_id, lead_id, direction, body, provider_message_id, created_at \
                 FROM conversation_messages \
                 WHERE tenant_id = ?1 AND lead_id = ?2 ORDER BY created_at ASC",
            )
            .bind(tenant_id.as_str())
            .bind(lead_id.as_str())
            .fetch_all(self.pool())
            .await?;

        rows.into_iter()
            .map(|(id, tenant, lead, direction, body, provider_message_id, created_at)| {
                let direction = match direction.as_str() {
                    "inbound" => MessageDirection::Inbound,
                    "outbound" => MessageDirection::Outbound,
                    other => {
                        return Err(StoreError::corrupted(
                            "conversation_messages",
                            format!("unknown direction '{other}'"),
                        ))
                    }
                };
                Ok(ConversationMessage {
                    id,
                    tenant_id: TenantId::new(tenant),
                    lead_id: LeadId::from_string(lead),
                    direction,
                    body,
                    provider_message_id,
                    created_at: from_millis(created_at),
                })
            })
            .collect()
    }
}

use bazaar_store::{StreamEntry, StreamFields};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{SeckillError, SeckillResult};

pub(crate) const FIELD_ORDER_ID: &str = "id";
pub(crate) const FIELD_USER_ID: &str = "userId";
pub(crate) const FIELD_VOUCHER_ID: &str = "voucherId";

/// An admitted purchase waiting to be persisted.
///
/// On the stream it is the flat map `{id, userId, voucherId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRecord {
    pub order_id: u64,
    pub user_id: u64,
    pub voucher_id: u64,
}

impl AdmissionRecord {
    pub fn to_fields(&self) -> StreamFields {
        vec![
            (FIELD_USER_ID.to_string(), self.user_id.to_string()),
            (FIELD_VOUCHER_ID.to_string(), self.voucher_id.to_string()),
            (FIELD_ORDER_ID.to_string(), self.order_id.to_string()),
        ]
    }

    pub fn from_entry(entry: &StreamEntry) -> SeckillResult<Self> {
        let numeric = |name: &str| -> SeckillResult<u64> {
            let raw = entry
                .field(name)
                .ok_or_else(|| SeckillError::malformed_record(&entry.id, format!("missing '{name}'")))?;
            raw.parse().map_err(|_| {
                SeckillError::malformed_record(&entry.id, format!("'{name}' is not an id: {raw:?}"))
            })
        };
        Ok(Self {
            order_id: numeric(FIELD_ORDER_ID)?,
            user_id: numeric(FIELD_USER_ID)?,
            voucher_id: numeric(FIELD_VOUCHER_ID)?,
        })
    }
}

/// A persisted voucher order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherOrder {
    pub id: u64,
    pub user_id: u64,
    pub voucher_id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl VoucherOrder {
    pub fn from_record(record: &AdmissionRecord, created_at: OffsetDateTime) -> Self {
        Self {
            id: record.order_id,
            user_id: record.user_id,
            voucher_id: record.voucher_id,
            created_at,
        }
    }
}

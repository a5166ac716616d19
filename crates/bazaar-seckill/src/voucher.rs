use bazaar_core::keys::seckill::{begin_key, end_key, stock_key};
use bazaar_core::unix_millis;
use bazaar_store::KeyValueStore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{SeckillError, SeckillResult};

/// A voucher sold in a flash sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillVoucher {
    pub id: u64,
    pub stock: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub begin: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl SeckillVoucher {
    pub fn validate(&self) -> SeckillResult<()> {
        if self.stock < 0 {
            return Err(SeckillError::invalid_voucher(format!(
                "voucher {} has negative stock {}",
                self.id, self.stock
            )));
        }
        if self.end < self.begin {
            return Err(SeckillError::invalid_voucher(format!(
                "voucher {} ends before it begins",
                self.id
            )));
        }
        Ok(())
    }
}

/// Seeds the stock counter and sale window the admission procedure reads.
pub(crate) async fn publish(store: &dyn KeyValueStore, voucher: &SeckillVoucher) -> SeckillResult<()> {
    voucher.validate()?;
    store
        .set(&begin_key(voucher.id), unix_millis(voucher.begin).to_string().as_bytes(), None)
        .await?;
    store
        .set(&end_key(voucher.id), unix_millis(voucher.end).to_string().as_bytes(), None)
        .await?;
    // Stock last: its presence marks the voucher as admissible.
    store
        .set(&stock_key(voucher.id), voucher.stock.to_string().as_bytes(), None)
        .await?;
    tracing::info!(voucher_id = voucher.id, stock = voucher.stock, "seckill voucher published");
    Ok(())
}

use std::fmt;
use std::sync::Arc;

use bazaar_core::SharedClock;
use bazaar_core::keys::seckill::{begin_key, end_key, order_set_key, stock_key};
use bazaar_core::metrics::record_admission;
use bazaar_store::KeyValueStore;
use bazaar_sync::IdGenerator;

use crate::error::{SeckillError, SeckillResult};
use crate::procedure::{
    ADMISSION, STATUS_ADMITTED, STATUS_DUPLICATE, STATUS_ENDED, STATUS_NOT_STARTED,
    STATUS_OUT_OF_STOCK, STATUS_UNKNOWN_VOUCHER,
};
use crate::voucher::{self, SeckillVoucher};

/// Identifier prefix for order ids.
pub const ORDER_ID_PREFIX: &str = "order";

/// Why an admission was refused. These are expected business outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    OutOfStock,
    DuplicateOrder,
    NotStarted,
    Ended,
    UnknownVoucher,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfStock => "out_of_stock",
            Self::DuplicateOrder => "duplicate_order",
            Self::NotStarted => "not_started",
            Self::Ended => "ended",
            Self::UnknownVoucher => "unknown_voucher",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted { order_id: u64 },
    Rejected(Rejection),
}

impl AdmissionOutcome {
    fn from_status(code: i64, order_id: u64) -> SeckillResult<Self> {
        let outcome = match code {
            STATUS_ADMITTED => Self::Admitted { order_id },
            STATUS_OUT_OF_STOCK => Self::Rejected(Rejection::OutOfStock),
            STATUS_DUPLICATE => Self::Rejected(Rejection::DuplicateOrder),
            STATUS_NOT_STARTED => Self::Rejected(Rejection::NotStarted),
            STATUS_ENDED => Self::Rejected(Rejection::Ended),
            STATUS_UNKNOWN_VOUCHER => Self::Rejected(Rejection::UnknownVoucher),
            code => return Err(SeckillError::UnexpectedStatus { code }),
        };
        Ok(outcome)
    }

    pub fn order_id(&self) -> Option<u64> {
        match self {
            Self::Admitted { order_id } => Some(*order_id),
            Self::Rejected(_) => None,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Synchronous flash-sale admission.
///
/// Every decision is made by one atomic procedure on the store, so
/// concurrent admissions for the same voucher are serialized there and stock
/// can never go below zero.
#[derive(Clone)]
pub struct AdmissionGate {
    store: Arc<dyn KeyValueStore>,
    ids: IdGenerator,
    clock: SharedClock,
    stream: String,
}

impl AdmissionGate {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        ids: IdGenerator,
        clock: SharedClock,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            stream: stream.into(),
        }
    }

    /// Makes a voucher admissible by seeding its stock and sale window.
    pub async fn publish_voucher(&self, voucher: &SeckillVoucher) -> SeckillResult<()> {
        voucher::publish(self.store.as_ref(), voucher).await
    }

    /// Decides one purchase attempt.
    ///
    /// Rejections come back as `Ok`. Any `Err` means the decision could not
    /// be made and must be treated as a refusal.
    pub async fn admit(&self, voucher_id: u64, user_id: u64) -> SeckillResult<AdmissionOutcome> {
        let order_id = self.ids.next_id(ORDER_ID_PREFIX).await?;
        let keys = [
            stock_key(voucher_id),
            order_set_key(voucher_id),
            begin_key(voucher_id),
            end_key(voucher_id),
            self.stream.clone(),
        ];
        let args = [
            voucher_id.to_string(),
            user_id.to_string(),
            order_id.to_string(),
            self.clock.now_millis().to_string(),
        ];

        let code = match self.store.eval(&ADMISSION, &keys, &args).await {
            Ok(reply) => reply.into_int(ADMISSION.name())?,
            Err(e) => {
                record_admission("error");
                tracing::error!(voucher_id, user_id, error = %e, "admission procedure failed");
                return Err(e.into());
            }
        };

        let outcome = AdmissionOutcome::from_status(code, order_id)?;
        match outcome {
            AdmissionOutcome::Admitted { order_id } => {
                record_admission("admitted");
                tracing::info!(voucher_id, user_id, order_id, "seckill admission granted");
            }
            AdmissionOutcome::Rejected(reason) => {
                record_admission(reason.as_str());
                tracing::debug!(voucher_id, user_id, reason = %reason, "seckill admission rejected");
            }
        }
        Ok(outcome)
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("stream", &self.stream)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AdmissionOutcome::from_status(0, 9).unwrap(),
            AdmissionOutcome::Admitted { order_id: 9 }
        );
        assert_eq!(
            AdmissionOutcome::from_status(5, 9).unwrap(),
            AdmissionOutcome::Rejected(Rejection::UnknownVoucher)
        );
        assert!(matches!(
            AdmissionOutcome::from_status(42, 9),
            Err(SeckillError::UnexpectedStatus { code: 42 })
        ));
    }
}

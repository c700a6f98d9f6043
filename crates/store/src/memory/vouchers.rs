use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ReservationId;
use domain::{Voucher, VoucherCode};
use tokio::sync::RwLock;

use crate::{Result, StoreError, UniqueKey, voucher::VoucherStore};

/// In-memory voucher store keyed by code.
#[derive(Clone, Default)]
pub struct InMemoryVoucherStore {
    vouchers: Arc<RwLock<HashMap<VoucherCode, Voucher>>>,
}

impl InMemoryVoucherStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored voucher.
    pub async fn all(&self) -> Vec<Voucher> {
        self.vouchers.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl VoucherStore for InMemoryVoucherStore {
    async fn insert(&self, voucher: &Voucher) -> Result<()> {
        let mut vouchers = self.vouchers.write().await;
        if vouchers
            .values()
            .any(|v| v.reservation_id == voucher.reservation_id)
        {
            return Err(StoreError::Duplicate(UniqueKey::VoucherReservation));
        }
        if vouchers.contains_key(&voucher.code) {
            return Err(StoreError::Duplicate(UniqueKey::VoucherCode));
        }
        vouchers.insert(voucher.code.clone(), voucher.clone());
        Ok(())
    }

    async fn find_by_code(&self, code: &VoucherCode) -> Result<Option<Voucher>> {
        Ok(self.vouchers.read().await.get(code).cloned())
    }

    async fn find_by_reservation(&self, reservation_id: ReservationId) -> Result<Option<Voucher>> {
        Ok(self
            .vouchers
            .read()
            .await
            .values()
            .find(|v| v.reservation_id == reservation_id)
            .cloned())
    }

    async fn redeem(&self, code: &VoucherCode, now: DateTime<Utc>) -> Result<Voucher> {
        let mut vouchers = self.vouchers.write().await;
        let voucher = vouchers
            .get_mut(code)
            .ok_or_else(|| StoreError::VoucherNotFound(code.clone()))?;
        voucher.redeem(now)?;
        Ok(voucher.clone())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.vouchers.read().await.len() as u64)
    }
}

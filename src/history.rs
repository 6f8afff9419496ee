//! Paginated, read-only view over an account's purchases.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::{AccountId, Error, Purchase, PurchaseLedger};

pub const DEFAULT_PAGE_SIZE: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub account_id: AccountId,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u32,
    pub prev_page: Option<u32>,
    pub next_page: Option<u32>,
    pub rows: Vec<Purchase>,
}

pub fn total_pages(total_count: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let pages = total_count.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Clamps a requested page into `[1, total_pages]`; an empty history still
/// has a page 1.
pub fn clamp_page(requested: i64, total_pages: u32) -> u32 {
    let last = i64::from(total_pages.max(1));
    // within [1, u32::MAX] after the clamp
    requested.clamp(1, last) as u32
}

pub struct HistoryViewer<L: PurchaseLedger> {
    ledger: Arc<L>,
    page_size: u32,
}

impl<L: PurchaseLedger> HistoryViewer<L> {
    pub fn new(ledger: Arc<L>, page_size: u32) -> Self {
        Self {
            ledger,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn view(&self, account_id: AccountId, requested_page: i64) -> Result<HistoryPage, Error> {
        let pages = total_pages(self.ledger.count_by_account(account_id)?, self.page_size);
        let page = clamp_page(requested_page, pages);

        let listed = self
            .ledger
            .list_by_account(account_id, page, self.page_size)?;
        // a purchase may land between the two reads; the listing's count wins
        let pages = total_pages(listed.total_count, self.page_size);

        Ok(HistoryPage {
            account_id,
            page,
            page_size: self.page_size,
            total_count: listed.total_count,
            total_pages: pages,
            prev_page: (page > 1).then(|| page - 1),
            next_page: (page < pages).then(|| page + 1),
            rows: listed.rows,
        })
    }
}

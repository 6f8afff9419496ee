mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use coin_shop::domain::{Money, Purchase, PurchaseLedger};
use coin_shop::history::HistoryViewer;
use common::{eur, shop};

fn seed(shop: &common::Shop, rows: i64) {
    let start = Utc::now() - Duration::days(1);
    for i in 0..rows {
        let purchase = Purchase {
            order_id: format!("HIST-{i:03}"),
            capture_id: None,
            account_id: shop.alice.id,
            amount: Money::from_decimal_str("5.00").unwrap(),
            currency: eur(),
            coins: 500,
            payer_email: "payer@example.com".to_string(),
            created_at: start + Duration::minutes(i),
        };
        shop.repository.credit_purchase(&purchase).unwrap();
    }
}

#[test]
fn fifty_seven_rows_make_three_pages() {
    let shop = shop();
    seed(&shop, 57);

    let first = shop.state.history.view(shop.alice.id, 1).unwrap();
    assert_eq!(first.total_count, 57);
    assert_eq!(first.total_pages, 3);
    assert_eq!(first.page_size, 25);
    assert_eq!(first.rows.len(), 25);
    assert_eq!(first.rows[0].order_id, "HIST-056");
    assert_eq!(first.prev_page, None);
    assert_eq!(first.next_page, Some(2));

    let third = shop.state.history.view(shop.alice.id, 3).unwrap();
    assert_eq!(third.rows.len(), 7);
    assert_eq!(third.rows[6].order_id, "HIST-000");
    assert_eq!(third.prev_page, Some(2));
    assert_eq!(third.next_page, None);
}

#[test]
fn out_of_range_pages_are_clamped() {
    let shop = shop();
    seed(&shop, 57);

    assert_eq!(shop.state.history.view(shop.alice.id, 0).unwrap().page, 1);
    assert_eq!(shop.state.history.view(shop.alice.id, -1).unwrap().page, 1);

    let last = shop.state.history.view(shop.alice.id, 99).unwrap();
    assert_eq!(last.page, 3);
    assert_eq!(last.rows.len(), 7);
}

#[test]
fn empty_history_has_one_empty_page() {
    let shop = shop();

    let page = shop.state.history.view(shop.alice.id, 5).unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.total_count, 0);
    assert_eq!(page.total_pages, 0);
    assert!(page.rows.is_empty());
    assert_eq!(page.next_page, None);
}

#[test]
fn page_size_comes_from_the_viewer() {
    let shop = shop();
    seed(&shop, 12);

    let viewer = HistoryViewer::new(Arc::clone(&shop.repository), 5);
    let page = viewer.view(shop.alice.id, 3).unwrap();
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.rows.len(), 2);
}

//! Listing, checkout and order lifecycle through the service layer.

mod support;

use serde_json::json;

use ewaste_market::models::{CartLine, OrderStatus, Role};
use ewaste_market::services::{codes, Page};
use support::{new_product, TestApp};

fn line(product: &ewaste_market::models::Product, quantity: i32) -> CartLine {
    CartLine {
        product_id: product.id,
        quantity,
    }
}

#[tokio::test]
async fn test_listing_requires_approved_kyc() {
    let app = TestApp::new();
    let seller = app.register_verified(Role::Seller, "pending@shop.test").await;

    let err = app
        .services
        .catalog
        .create_product(seller.id, new_product("ThinkPad", 25_000, 2))
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::KYC_REQUIRED);

    let buyer = app.register_verified(Role::Buyer, "buyer@shop.test").await;
    let err = app
        .services
        .catalog
        .create_product(buyer.id, new_product("ThinkPad", 25_000, 2))
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::FORBIDDEN);
}

#[tokio::test]
async fn test_rejected_kyc_can_be_resubmitted() {
    let app = TestApp::new();
    let admin = app.admin_id().await;
    let seller = app.register_verified(Role::Seller, "retry@shop.test").await;
    let submission = || ewaste_market::services::accounts::KycSubmission {
        business_name: "Retry Ltd".to_string(),
        registration_number: "REG-42".to_string(),
        document_url: "https://docs.ewaste.test/42.pdf".to_string(),
    };

    app.services
        .accounts
        .submit_kyc(seller.id, submission())
        .await
        .unwrap();
    let twice = app
        .services
        .accounts
        .submit_kyc(seller.id, submission())
        .await
        .unwrap_err();
    assert_eq!(twice.code(), codes::KYC_ALREADY_SUBMITTED);

    let no_reason = app
        .services
        .accounts
        .review_kyc(
            admin,
            seller.id,
            ewaste_market::services::accounts::KycDecision {
                approve: false,
                reason: Some("   ".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(no_reason.code(), codes::VALIDATION_ERROR);

    let rejected = app
        .services
        .accounts
        .review_kyc(
            admin,
            seller.id,
            ewaste_market::services::accounts::KycDecision {
                approve: false,
                reason: Some("document unreadable".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        rejected.kyc.and_then(|k| k.rejection_reason).as_deref(),
        Some("document unreadable")
    );

    app.services
        .accounts
        .submit_kyc(seller.id, submission())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_checkout_splits_orders_per_seller() {
    let app = TestApp::new();
    let alpha = app.approved_business(Role::Seller, "alpha@shop.test").await;
    let beta = app.approved_business(Role::Seller, "beta@shop.test").await;
    let buyer = app.register_verified(Role::Buyer, "buyer@shop.test").await;

    let laptop = app.list_product(alpha.id, "Laptop", 30_000, 5).await;
    let charger = app.list_product(alpha.id, "Charger", 1_500, 10).await;
    let phone = app.list_product(beta.id, "Phone", 12_000, 3).await;

    let orders = app
        .services
        .catalog
        .checkout(buyer.id, &[line(&laptop, 1), line(&phone, 2), line(&charger, 2)])
        .await
        .unwrap();
    assert_eq!(orders.len(), 2);

    let alpha_order = orders.iter().find(|o| o.seller_id == alpha.id).unwrap();
    assert_eq!(alpha_order.items.len(), 2);
    assert_eq!(alpha_order.total_cents, 30_000 + 2 * 1_500);
    assert_eq!(alpha_order.status, OrderStatus::Pending);

    let beta_order = orders.iter().find(|o| o.seller_id == beta.id).unwrap();
    assert_eq!(beta_order.total_cents, 24_000);
    assert_eq!(beta_order.items[0].name, "Phone");

    let laptop = app.services.catalog.get_product(laptop.id).await.unwrap();
    let phone = app.services.catalog.get_product(phone.id).await.unwrap();
    assert_eq!(laptop.quantity, 4);
    assert_eq!(phone.quantity, 1);

    let listed = app
        .services
        .catalog
        .list_buyer_orders(buyer.id, None, Page::default())
        .await
        .unwrap();
    assert_eq!(listed.total, 2);

    let seller_view = app
        .services
        .catalog
        .list_seller_orders(beta.id, Some(OrderStatus::Pending), Page::default())
        .await
        .unwrap();
    assert_eq!(seller_view.items.len(), 1);
    assert_eq!(seller_view.items[0].buyer_id, buyer.id);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_every_product_untouched() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "stock@shop.test").await;
    let buyer = app.register_verified(Role::Buyer, "buyer@shop.test").await;
    let plenty = app.list_product(seller.id, "Monitor", 9_000, 10).await;
    let scarce = app.list_product(seller.id, "GPU", 40_000, 1).await;

    let err = app
        .services
        .catalog
        .checkout(buyer.id, &[line(&plenty, 3), line(&scarce, 2)])
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::INSUFFICIENT_STOCK);

    assert_eq!(
        app.services.catalog.get_product(plenty.id).await.unwrap().quantity,
        10
    );
    assert_eq!(
        app.services.catalog.get_product(scarce.id).await.unwrap().quantity,
        1
    );
    let orders = app
        .services
        .catalog
        .list_buyer_orders(buyer.id, None, Page::default())
        .await
        .unwrap();
    assert_eq!(orders.total, 0);
}

#[tokio::test]
async fn test_duplicate_lines_merge_before_stock_check() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "merge@shop.test").await;
    let buyer = app.register_verified(Role::Buyer, "buyer@shop.test").await;
    let cable = app.list_product(seller.id, "Cable", 500, 3).await;

    // 2 + 2 exceeds the 3 in stock even though each line fits.
    let err = app
        .services
        .catalog
        .checkout(buyer.id, &[line(&cable, 2), line(&cable, 2)])
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::INSUFFICIENT_STOCK);

    let orders = app
        .services
        .catalog
        .checkout(buyer.id, &[line(&cable, 1), line(&cable, 2)])
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].items.len(), 1);
    assert_eq!(orders[0].items[0].quantity, 3);
    assert_eq!(orders[0].total_cents, 1_500);
}

#[tokio::test]
async fn test_checkout_rejects_bad_carts() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "bad@shop.test").await;
    let buyer = app.register_verified(Role::Buyer, "buyer@shop.test").await;
    let item = app.list_product(seller.id, "Tablet", 8_000, 2).await;

    let empty = app.services.catalog.checkout(buyer.id, &[]).await.unwrap_err();
    assert_eq!(empty.code(), codes::VALIDATION_ERROR);

    let zero = app
        .services
        .catalog
        .checkout(buyer.id, &[line(&item, 0)])
        .await
        .unwrap_err();
    assert_eq!(zero.code(), codes::VALIDATION_ERROR);

    let missing = app
        .services
        .catalog
        .checkout(
            buyer.id,
            &[
                line(&item, 1),
                CartLine {
                    product_id: ewaste_market::models::ProductId(9_999),
                    quantity: 1,
                },
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(missing.code(), codes::PRODUCT_NOT_FOUND);
    assert_eq!(
        app.services.catalog.get_product(item.id).await.unwrap().quantity,
        2
    );
}

#[tokio::test]
async fn test_cancel_restocks_and_is_final() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "cancel@shop.test").await;
    let buyer = app.register_verified(Role::Buyer, "buyer@shop.test").await;
    let other = app.register_verified(Role::Buyer, "other@shop.test").await;
    let drive = app.list_product(seller.id, "SSD", 6_000, 4).await;

    let order = app
        .services
        .catalog
        .checkout(buyer.id, &[line(&drive, 3)])
        .await
        .unwrap()
        .remove(0);

    let foreign = app
        .services
        .catalog
        .cancel_order(other.id, order.id)
        .await
        .unwrap_err();
    assert_eq!(foreign.code(), codes::ORDER_NOT_FOUND);

    let cancelled = app
        .services
        .catalog
        .cancel_order(buyer.id, order.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(
        app.services.catalog.get_product(drive.id).await.unwrap().quantity,
        4
    );

    let again = app
        .services
        .catalog
        .cancel_order(buyer.id, order.id)
        .await
        .unwrap_err();
    assert_eq!(again.code(), codes::INVALID_STATUS_TRANSITION);
    assert_eq!(
        app.services.catalog.get_product(drive.id).await.unwrap().quantity,
        4
    );
}

#[tokio::test]
async fn test_seller_moves_order_through_fulfilment() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "ship@shop.test").await;
    let rival = app.approved_business(Role::Seller, "rival@shop.test").await;
    let buyer = app.register_verified(Role::Buyer, "buyer@shop.test").await;
    let router = app.list_product(seller.id, "Router", 4_000, 1).await;

    let order = app
        .services
        .catalog
        .checkout(buyer.id, &[line(&router, 1)])
        .await
        .unwrap()
        .remove(0);

    let skip = app
        .services
        .catalog
        .update_order_status(seller.id, order.id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert_eq!(skip.code(), codes::INVALID_STATUS_TRANSITION);

    let foreign = app
        .services
        .catalog
        .update_order_status(rival.id, order.id, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert_eq!(foreign.code(), codes::ORDER_NOT_FOUND);

    for next in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered] {
        let updated = app
            .services
            .catalog
            .update_order_status(seller.id, order.id, next)
            .await
            .unwrap();
        assert_eq!(updated.status, next);
    }

    let late = app
        .services
        .catalog
        .cancel_order(buyer.id, order.id)
        .await
        .unwrap_err();
    assert_eq!(late.code(), codes::INVALID_STATUS_TRANSITION);
}

#[tokio::test]
async fn test_browse_hides_sold_out_products() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "browse@shop.test").await;
    let buyer = app.register_verified(Role::Buyer, "buyer@shop.test").await;
    let last_one = app.list_product(seller.id, "Camera", 20_000, 1).await;
    app.list_product(seller.id, "Lens", 9_000, 2).await;

    let before = app
        .services
        .catalog
        .browse(Some("LAPTOPS".to_string()), Page::default())
        .await
        .unwrap();
    assert_eq!(before.total, 2);

    app.services
        .catalog
        .checkout(buyer.id, &[line(&last_one, 1)])
        .await
        .unwrap();

    let after = app
        .services
        .catalog
        .browse(None, Page::default())
        .await
        .unwrap();
    assert_eq!(after.total, 1);
    assert_eq!(after.items[0].name, "Lens");

    let none = app
        .services
        .catalog
        .browse(Some("phones".to_string()), Page::default())
        .await
        .unwrap();
    assert_eq!(none.total, 0);
}

#[tokio::test]
async fn test_bulk_upload_reports_failures_by_index() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "bulk@shop.test").await;

    let report = app
        .services
        .catalog
        .bulk_create_products(
            seller.id,
            vec![
                json!({
                    "name": "Keyboard",
                    "category": "peripherals",
                    "condition": "used",
                    "price_cents": 1200,
                    "quantity": 4
                }),
                json!({
                    "name": "Mouse",
                    "category": "peripherals",
                    "condition": "used",
                    "price_cents": -5,
                    "quantity": 1
                }),
                json!({ "name": "Broken" }),
            ],
        )
        .await
        .unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.failed, 2);
    let indexes: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
    assert_eq!(indexes, vec![1, 2]);

    let mine = app
        .services
        .catalog
        .list_seller_products(seller.id, Page::default())
        .await
        .unwrap();
    assert_eq!(mine.total, 1);
    assert_eq!(mine.items[0].name, "Keyboard");
}

#[tokio::test]
async fn test_overflowing_total_is_rejected_without_reserving_stock() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "gold@shop.test").await;
    let other = app.approved_business(Role::Seller, "platinum@shop.test").await;
    let buyer = app.register_verified(Role::Buyer, "whale@shop.test").await;
    let price = i64::MAX / 2 + 1;
    let ingot = app.list_product(seller.id, "Gold ingot", price, 2).await;
    let bar = app.list_product(other.id, "Platinum bar", price, 1).await;

    // One line whose total does not fit.
    let err = app
        .services
        .catalog
        .checkout(buyer.id, &[line(&ingot, 2)])
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::VALIDATION_ERROR);

    // Each order fits on its own but the checkout as a whole does not.
    let err = app
        .services
        .catalog
        .checkout(buyer.id, &[line(&ingot, 1), line(&bar, 1)])
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::VALIDATION_ERROR);

    assert_eq!(
        app.services.catalog.get_product(ingot.id).await.unwrap().quantity,
        2
    );
    assert_eq!(
        app.services.catalog.get_product(bar.id).await.unwrap().quantity,
        1
    );
    let orders = app
        .services
        .catalog
        .list_buyer_orders(buyer.id, None, Page::default())
        .await
        .unwrap();
    assert_eq!(orders.total, 0);
}

fn bulk_item(index: usize) -> serde_json::Value {
    json!({
        "name": format!("Charger {index}"),
        "category": "accessories",
        "condition": "used",
        "price_cents": 300,
        "quantity": 1
    })
}

#[tokio::test]
async fn test_bulk_upload_batch_size_limits() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "batch@shop.test").await;

    let empty = app
        .services
        .catalog
        .bulk_create_products(seller.id, vec![])
        .await
        .unwrap_err();
    assert_eq!(empty.code(), codes::VALIDATION_ERROR);

    let too_many = app
        .services
        .catalog
        .bulk_create_products(seller.id, (0..101).map(bulk_item).collect())
        .await
        .unwrap_err();
    assert_eq!(too_many.code(), codes::VALIDATION_ERROR);

    let mine = app
        .services
        .catalog
        .list_seller_products(seller.id, Page::default())
        .await
        .unwrap();
    assert_eq!(mine.total, 0);

    let report = app
        .services
        .catalog
        .bulk_create_products(seller.id, (0..100).map(bulk_item).collect())
        .await
        .unwrap();
    assert_eq!(report.created, 100);
    assert_eq!(report.failed, 0);
    assert!(report.errors.is_empty());

    let mine = app
        .services
        .catalog
        .list_seller_products(seller.id, Page::default())
        .await
        .unwrap();
    assert_eq!(mine.total, 100);
}

mod common;

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use medtrip_client::notify::{Notice, NoticeLevel};
use medtrip_client::{BookingService, ClientError, RateLimiter};
use medtrip_gateway::GatewayError;
use medtrip_types::api::NewBooking;
use medtrip_types::models::{BookingStatus, Money, PaymentStatus};
use medtrip_types::{Select, record};

use common::{CLINIC_NAME, RecordingNavigator, TREATMENT_NAME, World, world};

struct Harness {
    world: World,
    service: BookingService,
    navigator: Arc<RecordingNavigator>,
    notices: tokio::sync::mpsc::UnboundedReceiver<Notice>,
}

async fn harness() -> Harness {
    let world = world().await;
    world.local.sign_in(world.patient);

    let (notifier, notices) = common::notifier();
    let navigator = Arc::new(RecordingNavigator::default());
    let service = BookingService::new(
        world.gateway.clone(),
        RateLimiter::new(notifier.clone()),
        notifier,
        navigator.clone(),
        common::config(),
    );

    Harness {
        world,
        service,
        navigator,
        notices,
    }
}

fn new_booking(world: &World) -> NewBooking {
    NewBooking {
        clinic_id: world.clinic,
        treatment_id: world.treatment,
        booking_date: Utc.with_ymd_and_hms(2026, 11, 20, 9, 30, 0).unwrap(),
        total_amount: 125050,
        currency: "EUR".into(),
        notes: Some("Two implants, upper jaw".into()),
    }
}

fn last_notice(notices: &mut tokio::sync::mpsc::UnboundedReceiver<Notice>) -> Notice {
    let mut last = None;
    while let Ok(notice) = notices.try_recv() {
        last = Some(notice);
    }
    last.expect("a notice was posted")
}

#[tokio::test]
async fn create_booking_starts_pending() {
    let mut h = harness().await;

    let booking = h.service.create_booking(new_booking(&h.world)).await.unwrap();

    assert_eq!(booking.user_id, h.world.patient);
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
    assert_eq!(booking.total_amount, 125050);
    assert_eq!(booking.currency, "eur");
    assert_eq!(last_notice(&mut h.notices).level, NoticeLevel::Success);
}

#[tokio::test]
async fn create_booking_requires_a_session() {
    let h = harness().await;
    h.world.local.sign_out();

    let err = h.service.create_booking(new_booking(&h.world)).await.unwrap_err();
    assert!(matches!(err, ClientError::NotSignedIn));
}

#[tokio::test]
async fn gateway_errors_reach_the_user_verbatim() {
    let mut h = harness().await;
    let mut booking = new_booking(&h.world);
    booking.treatment_id = Uuid::new_v4();

    let err = h.service.create_booking(booking).await.unwrap_err();

    let notice = last_notice(&mut h.notices);
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.body, err.to_string());
    assert!(notice.body.contains("FOREIGN KEY constraint failed"));
}

#[tokio::test]
async fn booking_creation_is_rate_limited() {
    let mut h = harness().await;

    for _ in 0..5 {
        h.service.create_booking(new_booking(&h.world)).await.unwrap();
    }
    let err = h.service.create_booking(new_booking(&h.world)).await.unwrap_err();

    assert!(matches!(err, ClientError::RateLimited { .. }));
    let notice = last_notice(&mut h.notices);
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert!(notice.body.contains("5 requests per 15 minutes"));
    assert_eq!(h.service.list_bookings().await.unwrap().len(), 5);
}

#[tokio::test]
async fn booking_list_is_cached_until_a_write() {
    let h = harness().await;
    assert!(h.service.list_bookings().await.unwrap().is_empty());

    // Written behind the service's back: the cached list does not see it.
    h.world
        .gateway
        .insert(
            "bookings",
            record(json!({
                "user_id": h.world.patient,
                "clinic_id": h.world.clinic,
                "treatment_id": h.world.treatment,
                "booking_date": "2026-12-01T10:00:00Z",
                "total_amount": 5000,
                "currency": "eur",
            })),
        )
        .await
        .unwrap();
    assert!(h.service.list_bookings().await.unwrap().is_empty());

    let created = h.service.create_booking(new_booking(&h.world)).await.unwrap();
    let listed = h.service.list_bookings().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, created.id);
}

#[tokio::test]
async fn checkout_redirects_to_the_payment_page() {
    let h = harness().await;
    let seen: Arc<Mutex<Option<Value>>> = Arc::default();
    let captured = seen.clone();
    h.world.functions.register("create-checkout", move |body| {
        *captured.lock().unwrap() = Some(body);
        Ok(json!({ "url": "https://pay.example.com/c/abc", "sessionId": "cs_test_abc" }))
    });

    let booking = h.service.create_booking(new_booking(&h.world)).await.unwrap();
    let session = h
        .service
        .process_payment(booking.id, Money::new(125050, "EUR"))
        .await
        .unwrap();

    assert_eq!(session.url, "https://pay.example.com/c/abc");
    assert_eq!(session.session_id.as_deref(), Some("cs_test_abc"));
    assert_eq!(*h.navigator.visited.lock().unwrap(), vec!["https://pay.example.com/c/abc".to_string()]);

    let body = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body["bookingId"], json!(booking.id));
    assert_eq!(body["treatmentName"], TREATMENT_NAME);
    assert_eq!(body["clinicName"], CLINIC_NAME);
    assert_eq!(body["amount"], 125050);
    assert_eq!(body["currency"], "eur");
    assert_eq!(body["success_url"], "http://localhost:5173/payment-success");

    let stored = stored_booking(&h.world, booking.id).await;
    assert_eq!(stored["payment_status"], "processing");
    assert_eq!(stored["payment_session_id"], "cs_test_abc");
    assert_eq!(stored["status"], "pending");
}

#[tokio::test]
async fn failed_checkout_returns_booking_to_pending() {
    let mut h = harness().await;
    h.world
        .functions
        .register("create-checkout", |_| Err("card declined".to_string()));

    let booking = h.service.create_booking(new_booking(&h.world)).await.unwrap();
    let err = h
        .service
        .process_payment(booking.id, Money::new(125050, "eur"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Gateway(GatewayError::Function { .. })));
    assert!(h.navigator.visited.lock().unwrap().is_empty());
    assert_eq!(stored_booking(&h.world, booking.id).await["payment_status"], "pending");

    let notice = last_notice(&mut h.notices);
    assert_eq!(notice.level, NoticeLevel::Error);
    assert!(notice.body.contains("card declined"));
}

#[tokio::test]
async fn checkout_rejects_bad_input() {
    let h = harness().await;

    let err = h
        .service
        .process_payment(Uuid::new_v4(), Money::new(1000, "eur"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotFound("booking")));

    let booking = h.service.create_booking(new_booking(&h.world)).await.unwrap();
    let err = h
        .service
        .process_payment(booking.id, Money::new(0, "eur"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidInput(_)));
    assert_eq!(stored_booking(&h.world, booking.id).await["payment_status"], "pending");
}

#[tokio::test]
async fn payment_outcomes_update_the_booking() {
    let h = harness().await;
    let paid = h.service.create_booking(new_booking(&h.world)).await.unwrap();
    let declined = h.service.create_booking(new_booking(&h.world)).await.unwrap();

    let confirmed = h
        .service
        .handle_payment_success(paid.id, Some("cs_live_1"))
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
    assert_eq!(confirmed.payment_session_id.as_deref(), Some("cs_live_1"));
    assert!(confirmed.updated_at >= paid.updated_at);

    let failed = h.service.handle_payment_failure(declined.id).await.unwrap();
    assert_eq!(failed.status, BookingStatus::Pending);
    assert_eq!(failed.payment_status, PaymentStatus::Failed);

    let listed = h.service.list_bookings().await.unwrap();
    let statuses: Vec<PaymentStatus> = listed.iter().map(|b| b.payment_status).collect();
    assert!(statuses.contains(&PaymentStatus::Paid));
    assert!(statuses.contains(&PaymentStatus::Failed));

    let err = h.service.handle_payment_failure(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound("booking")));
}

#[tokio::test]
async fn signed_out_attempts_do_not_use_up_the_limit() {
    let h = harness().await;
    h.world.local.sign_out();
    for _ in 0..10 {
        let err = h.service.create_booking(new_booking(&h.world)).await.unwrap_err();
        assert!(matches!(err, ClientError::NotSignedIn));
    }

    let mut negative = new_booking(&h.world);
    negative.total_amount = -1;
    h.world.local.sign_in(h.world.patient);
    for _ in 0..3 {
        let err = h.service.create_booking(negative.clone()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidInput(_)));
    }

    for _ in 0..5 {
        h.service.create_booking(new_booking(&h.world)).await.unwrap();
    }
}

#[tokio::test]
async fn paid_bookings_cannot_be_checked_out_again() {
    let h = harness().await;
    let booking = h.service.create_booking(new_booking(&h.world)).await.unwrap();
    h.service.handle_payment_success(booking.id, Some("cs_live_1")).await.unwrap();

    let err = h
        .service
        .process_payment(booking.id, Money::new(125050, "eur"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidInput(_)));
    assert!(h.navigator.visited.lock().unwrap().is_empty());
    let stored = stored_booking(&h.world, booking.id).await;
    assert_eq!(stored["payment_status"], "paid");
    assert_eq!(stored["status"], "confirmed");
    assert_eq!(stored["payment_session_id"], "cs_live_1");
}

#[tokio::test]
async fn failed_retry_keeps_the_failed_status() {
    let h = harness().await;
    h.world
        .functions
        .register("create-checkout", |_| Err("card declined".to_string()));

    let booking = h.service.create_booking(new_booking(&h.world)).await.unwrap();
    h.service.handle_payment_failure(booking.id).await.unwrap();

    h.service
        .process_payment(booking.id, Money::new(125050, "eur"))
        .await
        .unwrap_err();
    assert_eq!(stored_booking(&h.world, booking.id).await["payment_status"], "failed");
}

async fn stored_booking(world: &World, id: Uuid) -> medtrip_types::Record {
    world
        .gateway
        .single(Select::from("bookings").eq("id", id))
        .await
        .unwrap()
}

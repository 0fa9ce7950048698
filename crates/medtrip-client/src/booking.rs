use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use medtrip_gateway::{Gateway, GatewayResultExt};
use medtrip_types::api::{CheckoutRequest, CheckoutResponse, NewBooking};
use medtrip_types::models::{Booking, BookingStatus, Clinic, Money, PaymentStatus, Treatment};
use medtrip_types::query::to_value;
use medtrip_types::{Filter, Record, Select, record};

use crate::cache::QueryCache;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result, decode, with_timeout};
use crate::notify::{Navigator, Notice, Notifier};
use crate::rate_limit::RateLimiter;

pub const CREATE_BOOKING_ENDPOINT: &str = "create-booking";
pub const CREATE_BOOKING_LIMIT: u32 = 5;
pub const CREATE_BOOKING_WINDOW_MINUTES: u32 = 15;

pub const CHECKOUT_FUNCTION: &str = "create-checkout";

/// A hosted checkout page the user has been sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub booking_id: Uuid,
    pub url: String,
    pub session_id: Option<String>,
}

/// Booking creation and the payment status transitions around checkout.
#[derive(Clone)]
pub struct BookingService {
    gateway: Arc<dyn Gateway>,
    limiter: RateLimiter,
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
    cache: QueryCache<Uuid, Vec<Booking>>,
    config: ClientConfig,
}

impl BookingService {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        limiter: RateLimiter,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
        config: ClientConfig,
    ) -> Self {
        Self {
            gateway,
            limiter,
            notifier,
            navigator,
            cache: QueryCache::new(),
            config,
        }
    }

    pub async fn create_booking(&self, new: NewBooking) -> Result<Booking> {
        let user_id = self.gateway.current_user().ok_or(ClientError::NotSignedIn)?;
        if new.total_amount < 0 {
            return Err(ClientError::InvalidInput("total amount cannot be negative".into()));
        }
        if !self.limiter.check(
            CREATE_BOOKING_ENDPOINT,
            CREATE_BOOKING_LIMIT,
            CREATE_BOOKING_WINDOW_MINUTES,
        ) {
            return Err(ClientError::RateLimited {
                endpoint: CREATE_BOOKING_ENDPOINT.into(),
            });
        }

        let row = record(json!({
            "user_id": user_id,
            "clinic_id": new.clinic_id,
            "treatment_id": new.treatment_id,
            "booking_date": new.booking_date,
            "status": BookingStatus::Pending,
            "payment_status": PaymentStatus::Pending,
            "total_amount": new.total_amount,
            "currency": new.currency.to_ascii_lowercase(),
            "notes": new.notes,
        }));

        let result = self
            .timed("create booking", async {
                let row = self.gateway.insert("bookings", row).await?;
                decode::<Booking>("booking", row)
            })
            .await;

        match result {
            Ok(booking) => {
                self.cache.invalidate(&user_id);
                info!("Booking {} created for {}", booking.id, user_id);
                self.notifier.notify(Notice::success(
                    "Booking created",
                    "Your booking request has been sent to the clinic.",
                ));
                Ok(booking)
            }
            Err(e) => {
                self.notifier.notify(Notice::error("Booking failed", e.to_string()));
                Err(e)
            }
        }
    }

    /// The signed-in user's bookings, newest first.
    pub async fn list_bookings(&self) -> Result<Vec<Booking>> {
        let user_id = self.gateway.current_user().ok_or(ClientError::NotSignedIn)?;
        self.cache
            .get_or_fetch(user_id, || {
                self.timed("list bookings", async move {
                    self.gateway
                        .select(
                            Select::from("bookings")
                                .eq("user_id", user_id)
                                .order("created_at", false),
                        )
                        .await?
                        .into_iter()
                        .map(|row| decode("booking", row))
                        .collect::<Result<Vec<Booking>>>()
                })
            })
            .await
    }

    /// Start checkout for a booking and send the user to the payment page.
    ///
    /// Only bookings awaiting payment (`pending` or `failed`, not cancelled) can
    /// be checked out. The booking is marked `processing` before the checkout
    /// function runs and put back to its previous payment status if it fails.
    /// Payment is only confirmed later through
    /// [`handle_payment_success`](Self::handle_payment_success).
    pub async fn process_payment(&self, booking_id: Uuid, amount: Money) -> Result<CheckoutSession> {
        if amount.minor <= 0 {
            return Err(ClientError::InvalidInput("payment amount must be positive".into()));
        }

        let booking = self.load_booking(booking_id).await?;
        let awaiting_payment = matches!(booking.payment_status, PaymentStatus::Pending | PaymentStatus::Failed);
        if !awaiting_payment || booking.status == BookingStatus::Cancelled {
            return Err(ClientError::InvalidInput(format!(
                "booking is {:?}/{:?} and cannot be paid",
                booking.status, booking.payment_status
            )));
        }
        let previous = booking.payment_status;
        let (treatment, clinic) = futures_util::try_join!(
            self.load::<Treatment>("treatments", "treatment", booking.treatment_id),
            self.load::<Clinic>("clinics", "clinic", booking.clinic_id),
        )?;

        self.set_payment_status(booking_id, PaymentStatus::Processing, None)
            .await?;

        let request = CheckoutRequest {
            booking_id,
            treatment_name: treatment.name,
            clinic_name: clinic.name,
            amount: amount.minor,
            currency: amount.currency.clone(),
            success_url: self.config.success_url.clone(),
            cancel_url: self.config.cancel_url.clone(),
        };

        let response = self
            .timed("create checkout", async {
                let body = self.gateway.invoke(CHECKOUT_FUNCTION, to_value(&request)).await?;
                serde_json::from_value::<CheckoutResponse>(body).map_err(|source| ClientError::Decode {
                    entity: "checkout session",
                    source,
                })
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                error!("Checkout for booking {} failed: {}", booking_id, e);
                if let Err(undo) = self
                    .set_payment_status(booking_id, previous, None)
                    .await
                {
                    warn!("Could not return booking {} to {:?}: {}", booking_id, previous, undo);
                }
                self.notifier.notify(Notice::error("Payment failed", e.to_string()));
                return Err(e);
            }
        };

        if let Some(session_id) = &response.session_id {
            self.set_payment_status(booking_id, PaymentStatus::Processing, Some(session_id))
                .await?;
        }

        info!("Checkout for booking {} ready ({})", booking_id, amount);
        self.navigator.redirect(&response.url);

        Ok(CheckoutSession {
            booking_id,
            url: response.url,
            session_id: response.session_id,
        })
    }

    /// Mark a booking paid and confirmed after the checkout page reports success.
    pub async fn handle_payment_success(&self, booking_id: Uuid, session_id: Option<&str>) -> Result<Booking> {
        let mut patch = record(json!({
            "status": BookingStatus::Confirmed,
            "payment_status": PaymentStatus::Paid,
        }));
        if let Some(session_id) = session_id {
            patch.insert("payment_session_id".into(), to_value(session_id));
        }

        let booking = self.write_booking(booking_id, patch).await?;
        self.notifier.notify(Notice::success(
            "Payment successful",
            "Your booking has been confirmed.",
        ));
        Ok(booking)
    }

    pub async fn handle_payment_failure(&self, booking_id: Uuid) -> Result<Booking> {
        let booking = self
            .write_booking(booking_id, record(json!({ "payment_status": PaymentStatus::Failed })))
            .await?;
        self.notifier.notify(Notice::error(
            "Payment failed",
            "Your payment could not be processed. Please try again.",
        ));
        Ok(booking)
    }

    async fn load_booking(&self, booking_id: Uuid) -> Result<Booking> {
        self.load("bookings", "booking", booking_id).await
    }

    async fn load<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        entity: &'static str,
        id: Uuid,
    ) -> Result<T> {
        let row = self
            .timed("load", async {
                self.gateway
                    .single(Select::from(table).eq("id", id))
                    .await
                    .optional()
                    .map_err(ClientError::from)
            })
            .await?
            .ok_or(ClientError::NotFound(entity))?;
        decode(entity, row)
    }

    async fn set_payment_status(
        &self,
        booking_id: Uuid,
        status: PaymentStatus,
        session_id: Option<&str>,
    ) -> Result<Booking> {
        let mut patch = record(json!({ "payment_status": status }));
        if let Some(session_id) = session_id {
            patch.insert("payment_session_id".into(), to_value(session_id));
        }
        self.write_booking(booking_id, patch).await
    }

    /// One unconditional update of a booking row.
    async fn write_booking(&self, booking_id: Uuid, patch: Record) -> Result<Booking> {
        let filters = vec![Filter::Eq("id".into(), to_value(booking_id))];
        let rows = self
            .timed("update booking", async {
                self.gateway
                    .update("bookings", filters, patch)
                    .await
                    .map_err(ClientError::from)
            })
            .await?;
        let row = rows.into_iter().next().ok_or(ClientError::NotFound("booking"))?;
        let booking: Booking = decode("booking", row)?;
        self.cache.invalidate(&booking.user_id);
        Ok(booking)
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        with_timeout(operation, self.config.request_timeout, fut).await
    }
}

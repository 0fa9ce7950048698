use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageType, SenderType};

// -- Checkout function --

/// Body sent to the serverless `create-checkout` function.
/// `amount` is always in minor currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    #[serde(rename = "bookingId")]
    pub booking_id: Uuid,
    #[serde(rename = "treatmentName")]
    pub treatment_name: String,
    #[serde(rename = "clinicName")]
    pub clinic_name: String,
    pub amount: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub url: String,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Error body returned by serverless functions.
#[derive(Debug, Deserialize)]
pub struct FunctionErrorBody {
    pub error: String,
}

// -- Bookings --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewBooking {
    pub clinic_id: Uuid,
    pub treatment_id: Uuid,
    pub booking_date: DateTime<Utc>,
    pub total_amount: i64,
    pub currency: String,
    #[serde(default)]
    pub notes: Option<String>,
}

// -- Messages --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewAttachment {
    pub file_name: String,
    pub file_url: String,
    pub file_type: String,
    pub file_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_type: SenderType,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<NewAttachment>,
}

//! Client core for the medical-travel app: conversation feeds, typing
//! presence, bookings and checkout, all behind a [`Gateway`](medtrip_gateway::Gateway).

pub mod booking;
pub mod cache;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod error;
pub mod live;
pub mod notify;
pub mod profiles;
pub mod rate_limit;
pub mod typing;

pub use booking::{BookingService, CheckoutSession};
pub use config::ClientConfig;
pub use conversation::{ConversationFeed, ConversationSnapshot, ConversationStore};
pub use error::{ClientError, Result};
pub use notify::{Navigator, Notice, NoticeLevel, Notifier};
pub use rate_limit::{RateLimitWindow, RateLimiter};
pub use typing::{TypingFeed, TypingTracker};

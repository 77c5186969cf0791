//! Reservation domain model: statuses, reserver identities, records and the
//! guest token format.
//!
//! Records are generic over the representation of their PII fields. Stores
//! hand out `Reservation<Pii>` (the at-rest form); the engine resolves them to
//! `Reservation<String>` through the [`PiiCipher`](crate::crypto::PiiCipher)
//! so callers never see whether a field was encrypted.

use rand::Rng;
use serde::Serialize;
use validator::Validate;

use crate::crypto::Pii;
use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Length of a guest reservation token (alphanumeric characters).
pub const TOKEN_LENGTH: usize = 48;

/// Default lifetime of a guest reservation before the expiry sweep reclaims it.
pub const DEFAULT_GUEST_TTL_DAYS: i64 = 30;

/// Maximum length of a cancellation reason.
pub const MAX_CANCEL_REASON_LENGTH: usize = 500;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

/// Reservation lifecycle status.
///
/// Discriminants match the seed order of the `reservation_statuses` lookup
/// table. `Active` is the only non-terminal state.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active = 1,
    Cancelled = 2,
    Fulfilled = 3,
    Expired = 4,
}

impl ReservationStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Map a database status ID back to the enum.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Active),
            2 => Some(Self::Cancelled),
            3 => Some(Self::Fulfilled),
            4 => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Fulfilled => "fulfilled",
            Self::Expired => "expired",
        }
    }
}

// ---------------------------------------------------------------------------
// Reserver identity
// ---------------------------------------------------------------------------

/// Who holds a reservation. Exactly one variant per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reserver<P> {
    AuthenticatedUser {
        user_id: DbId,
    },
    Guest {
        name: P,
        email: P,
        /// SHA-256 digest of the guest's token; the token itself is never stored.
        #[serde(skip)]
        token_hash: String,
    },
}

impl<P> Reserver<P> {
    pub fn user_id(&self) -> Option<DbId> {
        match self {
            Reserver::AuthenticatedUser { user_id } => Some(*user_id),
            Reserver::Guest { .. } => None,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Reserver::Guest { .. })
    }

    /// Transform the PII fields, keeping the shape.
    pub fn try_map<Q, E>(self, mut f: impl FnMut(P) -> Result<Q, E>) -> Result<Reserver<Q>, E> {
        Ok(match self {
            Reserver::AuthenticatedUser { user_id } => Reserver::AuthenticatedUser { user_id },
            Reserver::Guest {
                name,
                email,
                token_hash,
            } => Reserver::Guest {
                name: f(name)?,
                email: f(email)?,
                token_hash,
            },
        })
    }
}

/// Identity of the caller asking for a reservation.
#[derive(Debug, Clone)]
pub enum Actor {
    User { user_id: DbId },
    Guest(GuestContact),
}

/// Contact details a guest supplies when reserving.
#[derive(Debug, Clone, Validate)]
pub struct GuestContact {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
}

impl GuestContact {
    /// Trim and validate optional guest fields.
    ///
    /// Both name and email are required; a blank value counts as missing.
    pub fn parse(name: Option<&str>, email: Option<&str>) -> Result<Self, CoreError> {
        let name = name.map(str::trim).filter(|s| !s.is_empty());
        let email = email.map(str::trim).filter(|s| !s.is_empty());

        let (Some(name), Some(email)) = (name, email) else {
            return Err(CoreError::Validation(
                "Guest reservations require both a name and an email address".into(),
            ));
        };

        let contact = Self {
            name: name.to_string(),
            email: email.to_string(),
        };
        contact.validate().map_err(|e| {
            CoreError::Validation(format!("Invalid guest contact details: {e}"))
        })?;
        Ok(contact)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A reservation row. `P` is the PII representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation<P = String> {
    pub id: DbId,
    pub gift_item_id: DbId,
    pub reserver: Reserver<P>,
    pub status: ReservationStatus,
    pub reserved_at: Timestamp,
    /// Only set for guest reservations.
    pub expires_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
    pub cancel_reason: Option<String>,
    pub notification_sent: bool,
}

impl<P> Reservation<P> {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn try_map_pii<Q, E>(self, f: impl FnMut(P) -> Result<Q, E>) -> Result<Reservation<Q>, E> {
        Ok(Reservation {
            id: self.id,
            gift_item_id: self.gift_item_id,
            reserver: self.reserver.try_map(f)?,
            status: self.status,
            reserved_at: self.reserved_at,
            expires_at: self.expires_at,
            cancelled_at: self.cancelled_at,
            cancel_reason: self.cancel_reason,
            notification_sent: self.notification_sent,
        })
    }
}

/// Input to the store's atomic reserve primitive.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub gift_item_id: DbId,
    pub reserver: Reserver<Pii>,
    pub reserved_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

/// A reservation joined with the display fields of its item, list and owner.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationDetail<P = String> {
    #[serde(flatten)]
    pub reservation: Reservation<P>,
    pub gift_item_name: String,
    pub wish_list_id: DbId,
    pub wish_list_title: String,
    pub owner_id: DbId,
    pub owner_name: String,
}

impl<P> ReservationDetail<P> {
    pub fn try_map_pii<Q, E>(
        self,
        f: impl FnMut(P) -> Result<Q, E>,
    ) -> Result<ReservationDetail<Q>, E> {
        Ok(ReservationDetail {
            reservation: self.reservation.try_map_pii(f)?,
            gift_item_name: self.gift_item_name,
            wish_list_id: self.wish_list_id,
            wish_list_title: self.wish_list_title,
            owner_id: self.owner_id,
            owner_name: self.owner_name,
        })
    }
}

/// Result of a successful reserve call.
#[derive(Debug, Clone)]
pub struct Reserved {
    pub reservation: Reservation,
    /// Plaintext guest token. Present only for guest reservations and only here.
    pub reservation_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Guest tokens
// ---------------------------------------------------------------------------

/// Mint a fresh guest reservation token.
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a token, the form stored and looked up.
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Check a presented token's shape before touching the store.
pub fn validate_token_format(token: &str) -> Result<(), CoreError> {
    if token.is_empty() {
        return Err(CoreError::Validation(
            "A reservation token is required".into(),
        ));
    }
    if token.len() != TOKEN_LENGTH || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CoreError::Validation("Malformed reservation token".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_ids_round_trip() {
        for status in [
            ReservationStatus::Active,
            ReservationStatus::Cancelled,
            ReservationStatus::Fulfilled,
            ReservationStatus::Expired,
        ] {
            assert_eq!(ReservationStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(ReservationStatus::from_id(0), None);
        assert_eq!(ReservationStatus::from_id(5), None);
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!ReservationStatus::Active.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Fulfilled.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }

    #[test]
    fn guest_contact_requires_both_fields() {
        assert_matches!(
            GuestContact::parse(Some("Ann"), None),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            GuestContact::parse(None, Some("ann@x.com")),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            GuestContact::parse(Some("   "), Some("ann@x.com")),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn guest_contact_trims_and_validates_email() {
        let contact = GuestContact::parse(Some("  Ann "), Some(" ann@x.com ")).unwrap();
        assert_eq!(contact.name, "Ann");
        assert_eq!(contact.email, "ann@x.com");

        assert_matches!(
            GuestContact::parse(Some("Ann"), Some("not-an-email")),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn generated_tokens_are_well_formed_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert!(validate_token_format(&a).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let token = generate_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_eq!(hash_token(&token).len(), 64);
        assert_eq!(
            hash_token(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn token_format_errors() {
        assert_matches!(
            validate_token_format(""),
            Err(CoreError::Validation(msg)) if msg == "A reservation token is required"
        );
        assert_matches!(validate_token_format("short"), Err(CoreError::Validation(_)));
        let bad = format!("{}!", "a".repeat(TOKEN_LENGTH - 1));
        assert_matches!(validate_token_format(&bad), Err(CoreError::Validation(_)));
    }

    #[test]
    fn guest_serialization_hides_token_hash() {
        let reserver: Reserver<String> = Reserver::Guest {
            name: "Ann".into(),
            email: "ann@x.com".into(),
            token_hash: "deadbeef".into(),
        };
        let json = serde_json::to_value(&reserver).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "guest", "name": "Ann", "email": "ann@x.com" })
        );
    }
}

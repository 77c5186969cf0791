//! Reservation rows.
//!
//! PII columns come in pairs (`guest_name` / `guest_name_encrypted`); the
//! conversion to the domain type picks the authoritative one via
//! [`Pii::from_columns`].

use giftreg_core::crypto::Pii;
use giftreg_core::reservation::{
    NewReservation, Reservation, ReservationDetail, ReservationStatus, Reserver, StatusId,
};
use giftreg_core::store::StoreError;
use giftreg_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `reservations` table.
#[derive(Debug, Clone, FromRow)]
pub struct ReservationRow {
    pub id: DbId,
    pub gift_item_id: DbId,
    pub reserved_by_user_id: Option<DbId>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_name_encrypted: Option<Vec<u8>>,
    pub guest_email_encrypted: Option<Vec<u8>>,
    pub reservation_token_hash: Option<String>,
    pub status_id: StatusId,
    pub reserved_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
    pub cancel_reason: Option<String>,
    pub notification_sent: bool,
}

impl TryFrom<ReservationRow> for Reservation<Pii> {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let status = ReservationStatus::from_id(row.status_id).ok_or_else(|| {
            StoreError::Backend(format!(
                "reservation {} has unknown status_id {}",
                row.id, row.status_id
            ))
        })?;

        let reserver = match (row.reserved_by_user_id, row.reservation_token_hash) {
            (Some(user_id), _) => Reserver::AuthenticatedUser { user_id },
            (None, Some(token_hash)) => {
                let name = Pii::from_columns(row.guest_name, row.guest_name_encrypted);
                let email = Pii::from_columns(row.guest_email, row.guest_email_encrypted);
                let (Some(name), Some(email)) = (name, email) else {
                    return Err(StoreError::Backend(format!(
                        "guest reservation {} is missing contact columns",
                        row.id
                    )));
                };
                Reserver::Guest {
                    name,
                    email,
                    token_hash,
                }
            }
            (None, None) => {
                return Err(StoreError::Backend(format!(
                    "reservation {} has no reserver",
                    row.id
                )))
            }
        };

        Ok(Reservation {
            id: row.id,
            gift_item_id: row.gift_item_id,
            reserver,
            status,
            reserved_at: row.reserved_at,
            expires_at: row.expires_at,
            cancelled_at: row.cancelled_at,
            cancel_reason: row.cancel_reason,
            notification_sent: row.notification_sent,
        })
    }
}

/// A reservation row joined with item, list and owner display fields.
#[derive(Debug, Clone, FromRow)]
pub struct ReservationDetailRow {
    #[sqlx(flatten)]
    pub reservation: ReservationRow,
    pub gift_item_name: String,
    pub wish_list_id: DbId,
    pub wish_list_title: String,
    pub owner_id: DbId,
    pub owner_name: String,
}

impl TryFrom<ReservationDetailRow> for ReservationDetail<Pii> {
    type Error = StoreError;

    fn try_from(row: ReservationDetailRow) -> Result<Self, Self::Error> {
        Ok(ReservationDetail {
            reservation: row.reservation.try_into()?,
            gift_item_name: row.gift_item_name,
            wish_list_id: row.wish_list_id,
            wish_list_title: row.wish_list_title,
            owner_id: row.owner_id,
            owner_name: row.owner_name,
        })
    }
}

/// Column values for a new `reservations` row.
#[derive(Debug, Clone)]
pub struct CreateReservation {
    pub gift_item_id: DbId,
    pub reserved_by_user_id: Option<DbId>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_name_encrypted: Option<Vec<u8>>,
    pub guest_email_encrypted: Option<Vec<u8>>,
    pub reservation_token_hash: Option<String>,
    pub reserved_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

impl From<NewReservation> for CreateReservation {
    fn from(new: NewReservation) -> Self {
        let mut row = CreateReservation {
            gift_item_id: new.gift_item_id,
            reserved_by_user_id: None,
            guest_name: None,
            guest_email: None,
            guest_name_encrypted: None,
            guest_email_encrypted: None,
            reservation_token_hash: None,
            reserved_at: new.reserved_at,
            expires_at: new.expires_at,
        };
        match new.reserver {
            Reserver::AuthenticatedUser { user_id } => row.reserved_by_user_id = Some(user_id),
            Reserver::Guest {
                name,
                email,
                token_hash,
            } => {
                (row.guest_name, row.guest_name_encrypted) = name.into_columns();
                (row.guest_email, row.guest_email_encrypted) = email.into_columns();
                row.reservation_token_hash = Some(token_hash);
            }
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn guest_row() -> ReservationRow {
        ReservationRow {
            id: 7,
            gift_item_id: 3,
            reserved_by_user_id: None,
            guest_name: Some("Ann".into()),
            guest_email: None,
            guest_name_encrypted: None,
            guest_email_encrypted: Some(vec![1, 2, 3]),
            reservation_token_hash: Some("abc".into()),
            status_id: 1,
            reserved_at: Utc::now(),
            expires_at: Some(Utc::now()),
            cancelled_at: None,
            cancel_reason: None,
            notification_sent: false,
        }
    }

    #[test]
    fn guest_row_picks_authoritative_columns() {
        let reservation = Reservation::<Pii>::try_from(guest_row()).unwrap();
        assert_matches!(
            reservation.reserver,
            Reserver::Guest { name: Pii::Plain(name), email: Pii::Encrypted(_), token_hash }
                if name == "Ann" && token_hash == "abc"
        );
        assert_eq!(reservation.status, ReservationStatus::Active);
    }

    #[test]
    fn user_row_maps_to_authenticated_reserver() {
        let row = ReservationRow {
            reserved_by_user_id: Some(42),
            guest_name: None,
            guest_email_encrypted: None,
            reservation_token_hash: None,
            expires_at: None,
            status_id: 2,
            ..guest_row()
        };
        let reservation = Reservation::<Pii>::try_from(row).unwrap();
        assert_eq!(reservation.reserver.user_id(), Some(42));
        assert_eq!(reservation.status, ReservationStatus::Cancelled);
    }

    #[test]
    fn unknown_status_or_missing_contact_is_a_backend_error() {
        let row = ReservationRow {
            status_id: 99,
            ..guest_row()
        };
        assert_matches!(
            Reservation::<Pii>::try_from(row),
            Err(StoreError::Backend(_))
        );

        let row = ReservationRow {
            guest_email_encrypted: None,
            ..guest_row()
        };
        assert_matches!(
            Reservation::<Pii>::try_from(row),
            Err(StoreError::Backend(_))
        );
    }

    #[test]
    fn new_guest_reservation_fills_one_column_per_field() {
        let new = NewReservation {
            gift_item_id: 3,
            reserver: Reserver::Guest {
                name: Pii::Encrypted(vec![9; 40]),
                email: Pii::Plain("ann@example.com".into()),
                token_hash: "abc".into(),
            },
            reserved_at: Utc::now(),
            expires_at: None,
        };
        let row = CreateReservation::from(new);
        assert!(row.reserved_by_user_id.is_none());
        assert!(row.guest_name.is_none());
        assert_eq!(row.guest_name_encrypted.as_deref().map(<[u8]>::len), Some(40));
        assert_eq!(row.guest_email.as_deref(), Some("ann@example.com"));
        assert!(row.guest_email_encrypted.is_none());
        assert_eq!(row.reservation_token_hash.as_deref(), Some("abc"));
    }
}

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::{lenient_f64, lenient_i64, null_as_empty};
use crate::error::AppError;

/// One entry of the message document.
///
/// Bookings carry `"type": "booking"`; contact messages carry no type. Entries
/// of any other shape are kept verbatim so rewriting the list never drops them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Booking(Booking),
    Contact(ContactMessage),
    Other(Value),
}

impl Message {
    pub fn as_booking(&self) -> Option<&Booking> {
        match self {
            Message::Booking(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub message: String,
    pub ts: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingKind {
    Booking,
}

/// Booking state. Statuses written by other tools are kept as `Other` and
/// treated like a cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
    Other(String),
}

impl BookingStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Other(s) => s,
        }
    }
}

impl From<String> for BookingStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => BookingStatus::Pending,
            "confirmed" => BookingStatus::Confirmed,
            "cancelled" => BookingStatus::Cancelled,
            _ => BookingStatus::Other(s),
        }
    }
}

impl Serialize for BookingStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

/// `null` reads as pending.
impl<'de> Deserialize<'de> for BookingStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Option::<String>::deserialize(d)?
            .map(BookingStatus::from)
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    #[serde(rename = "type")]
    pub kind: BookingKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub slug: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub start: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub end: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub nights: i64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total: f64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub phone: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub notes: String,
    #[serde(default)]
    pub status: BookingStatus,
    /// Creation timestamp; doubles as the booking id.
    pub ts: String,
}

impl Booking {
    /// `pending -> confirmed`.
    pub fn confirm(&mut self) -> Result<(), AppError> {
        match self.status {
            BookingStatus::Pending => {
                self.status = BookingStatus::Confirmed;
                Ok(())
            }
            BookingStatus::Confirmed => {
                Err(AppError::Conflict("Booking already confirmed".into()))
            }
            BookingStatus::Cancelled | BookingStatus::Other(_) => {
                Err(AppError::Conflict("Booking is cancelled".into()))
            }
        }
    }

    /// `confirmed -> pending`.
    pub fn undo(&mut self) -> Result<(), AppError> {
        match self.status {
            BookingStatus::Confirmed => {
                self.status = BookingStatus::Pending;
                Ok(())
            }
            _ => Err(AppError::Conflict("Booking is not confirmed".into())),
        }
    }
}

/// Find the first booking whose `ts` equals `id`.
pub fn find_booking_mut<'a>(messages: &'a mut [Message], id: &str) -> Option<&'a mut Booking> {
    messages.iter_mut().find_map(|m| match m {
        Message::Booking(b) if b.ts == id => Some(b),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_are_told_apart_by_type() {
        let list: Vec<Message> = serde_json::from_value(json!([
            { "name": "Ann", "email": "ann@example.com", "message": "Hi", "ts": "t1" },
            { "type": "booking", "slug": "big-blue", "start": "2024-06-01", "end": "2024-06-04",
              "nights": 3, "total": 300, "ts": "t2" },
            { "type": "note", "ts": "t3" }
        ]))
        .unwrap();

        assert!(matches!(list[0], Message::Contact(_)));
        let booking = list[1].as_booking().unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.total, 300.0);
        assert!(matches!(list[2], Message::Other(_)));

        let back = serde_json::to_value(&list).unwrap();
        assert_eq!(back[2], json!({ "type": "note", "ts": "t3" }));
        assert_eq!(back[1]["type"], "booking");
        assert_eq!(back[1]["status"], "pending");
    }

    #[test]
    fn status_transitions() {
        let mut b: Booking = serde_json::from_value(json!({
            "type": "booking", "slug": "a", "ts": "t", "status": "pending"
        }))
        .unwrap();

        b.confirm().unwrap();
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert!(matches!(b.confirm(), Err(AppError::Conflict(_))));

        b.undo().unwrap();
        assert_eq!(b.status, BookingStatus::Pending);
        assert!(matches!(b.undo(), Err(AppError::Conflict(_))));

        b.status = BookingStatus::Cancelled;
        let err = b.confirm().unwrap_err();
        assert_eq!(err.to_string(), "Booking is cancelled");
    }

    #[test]
    fn lookup_ignores_contact_messages_with_same_ts() {
        let mut list: Vec<Message> = serde_json::from_value(json!([
            { "name": "Ann", "email": "a@b.co", "message": "Hi", "ts": "same" },
            { "type": "booking", "slug": "a", "ts": "same" }
        ]))
        .unwrap();
        let b = find_booking_mut(&mut list, "same").unwrap();
        assert_eq!(b.slug, "a");
        assert!(find_booking_mut(&mut list, "other").is_none());
    }

    #[test]
    fn unknown_status_is_still_a_booking() {
        let mut list: Vec<Message> = serde_json::from_value(json!([
            { "type": "booking", "slug": "a", "ts": "t", "status": "declined" }
        ]))
        .unwrap();
        let b = find_booking_mut(&mut list, "t").unwrap();
        assert_eq!(b.status, BookingStatus::Other("declined".into()));
        assert_eq!(b.confirm().unwrap_err().to_string(), "Booking is cancelled");

        let back = serde_json::to_value(&list).unwrap();
        assert_eq!(back[0]["status"], "declined");
    }
}

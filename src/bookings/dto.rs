use crate::bookings::model::{validate_booking_price, Booking};
use crate::error::AppError;
use crate::tours::model::Tour;
use crate::users::dto::UserResponse;
use crate::users::model::User;
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub tour: Option<String>,
    pub user: Option<String>,
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateBookingRequest {
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

impl UpdateBookingRequest {
    /// The tour and user references are fixed at creation; only the price
    /// and payment flag are writable.
    pub fn into_update(self) -> Result<Document, AppError> {
        let mut fields = Document::new();
        if let Some(price) = self.price {
            validate_booking_price(price)?;
            fields.insert("price", price);
        }
        if let Some(paid) = self.paid {
            fields.insert("paid", paid);
        }
        Ok(fields)
    }
}

/// Tour summary embedded in booking responses.
#[derive(Debug, Serialize)]
pub struct BookingTour {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub id: String,
    /// Absent when the referenced tour has since been removed or hidden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tour: Option<BookingTour>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
    pub price: f64,
    pub paid: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl BookingResponse {
    pub fn new(booking: &Booking, tour: Option<&Tour>, user: Option<&User>) -> Self {
        Self {
            id: booking.id.to_hex(),
            tour: tour.map(|tour| BookingTour {
                id: tour.id.to_hex(),
                name: tour.name.clone(),
            }),
            user: user.map(UserResponse::from),
            price: booking.price,
            paid: booking.paid,
            created_at: booking.created_at.to_time_0_3(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn update_collects_only_present_fields() {
        let update = UpdateBookingRequest {
            price: Some(250.0),
            paid: None,
        };
        let fields = update.into_update().unwrap();
        assert_eq!(fields.get_f64("price").unwrap(), 250.0);
        assert!(!fields.contains_key("paid"));

        let empty = UpdateBookingRequest::default().into_update().unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn update_rejects_a_non_positive_price() {
        let update = UpdateBookingRequest {
            price: Some(0.0),
            paid: Some(false),
        };
        assert!(update.into_update().is_err());
    }

    #[test]
    fn response_embeds_tour_and_user_summaries() {
        let user = User::new("Max".into(), "max@example.com".into(), "hash".into());
        let booking = Booking::new(ObjectId::new(), user.id, 497.0).unwrap();

        let json =
            serde_json::to_value(BookingResponse::new(&booking, None, Some(&user))).unwrap();
        assert_eq!(json["price"], 497.0);
        assert_eq!(json["paid"], true);
        assert_eq!(json["user"]["email"], "max@example.com");
        assert!(json.get("tour").is_none());
    }
}

use crate::error::AppError;
use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// A paid (or comped) reservation linking one user to one tour at the
/// price charged at checkout time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub tour: ObjectId,
    pub user: ObjectId,
    pub price: f64,
    #[serde(default = "default_paid")]
    pub paid: bool,
    pub created_at: DateTime,
}

fn default_paid() -> bool {
    true
}

impl Booking {
    pub fn new(tour: ObjectId, user: ObjectId, price: f64) -> Result<Self, AppError> {
        validate_booking_price(price)?;
        Ok(Self {
            id: ObjectId::new(),
            tour,
            user,
            price,
            paid: true,
            created_at: DateTime::now(),
        })
    }
}

pub fn validate_booking_price(price: f64) -> Result<(), AppError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(AppError::validation("Booking must have a price."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_must_be_a_positive_number() {
        assert!(validate_booking_price(497.0).is_ok());
        assert!(validate_booking_price(0.0).is_err());
        assert!(validate_booking_price(-10.0).is_err());
        assert!(validate_booking_price(f64::NAN).is_err());
        assert!(validate_booking_price(f64::INFINITY).is_err());
    }

    #[test]
    fn new_bookings_start_out_paid() {
        let booking = Booking::new(ObjectId::new(), ObjectId::new(), 497.0).unwrap();
        assert!(booking.paid);
        assert_eq!(booking.price, 497.0);
    }

    #[test]
    fn booking_serializes_with_store_field_names() {
        let booking = Booking::new(ObjectId::new(), ObjectId::new(), 100.0).unwrap();
        let doc = mongodb::bson::to_document(&booking).unwrap();
        assert!(doc.contains_key("_id"));
        assert!(doc.contains_key("createdAt"));
        assert_eq!(doc.get_bool("paid").unwrap(), true);
    }
}

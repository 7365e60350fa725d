use crate::error::AppError;
use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// A rating plus comment left by one user on one tour. The `{tour, user}`
/// pair is unique, so a user reviews a given tour at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub review: String,
    pub rating: f64,
    pub tour: ObjectId,
    pub user: ObjectId,
    pub created_at: DateTime,
}

impl Review {
    pub fn new(
        review: &str,
        rating: f64,
        tour: ObjectId,
        user: ObjectId,
    ) -> Result<Self, AppError> {
        let review = validate_review_text(review)?;
        validate_review_rating(rating)?;
        Ok(Self {
            id: ObjectId::new(),
            review,
            rating,
            tour,
            user,
            created_at: DateTime::now(),
        })
    }
}

pub fn validate_review_text(text: &str) -> Result<String, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::validation("Review can not be empty!"));
    }
    Ok(text.to_string())
}

pub fn validate_review_rating(rating: f64) -> Result<(), AppError> {
    if !(1.0..=5.0).contains(&rating) {
        return Err(AppError::validation("Rating must be between 1 and 5"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_text_is_trimmed_and_must_not_be_blank() {
        assert_eq!(validate_review_text("  great trip  ").unwrap(), "great trip");
        assert!(validate_review_text("   ").is_err());
        assert!(validate_review_text("").is_err());
    }

    #[test]
    fn rating_bounds_are_inclusive() {
        assert!(validate_review_rating(1.0).is_ok());
        assert!(validate_review_rating(5.0).is_ok());
        assert!(validate_review_rating(4.5).is_ok());
        assert!(validate_review_rating(0.9).is_err());
        assert!(validate_review_rating(5.1).is_err());
        assert!(validate_review_rating(f64::NAN).is_err());
    }

    #[test]
    fn new_review_rejects_invalid_input() {
        let tour = ObjectId::new();
        let user = ObjectId::new();
        assert!(Review::new("", 4.0, tour, user).is_err());
        assert!(Review::new("fine", 0.0, tour, user).is_err());

        let review = Review::new("Loved every minute", 5.0, tour, user).unwrap();
        assert_eq!(review.tour, tour);
        assert_eq!(review.user, user);
    }

    #[test]
    fn review_serializes_with_store_field_names() {
        let review = Review::new("ok", 3.0, ObjectId::new(), ObjectId::new()).unwrap();
        let doc = mongodb::bson::to_document(&review).unwrap();
        assert!(doc.contains_key("_id"));
        assert!(doc.contains_key("createdAt"));
        assert!(doc.get_object_id("tour").is_ok());
        assert!(doc.get_object_id("user").is_ok());
    }
}

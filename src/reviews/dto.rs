use crate::error::AppError;
use crate::reviews::model::{validate_review_rating, validate_review_text, Review};
use crate::users::model::User;
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Missing fields surface as domain validation errors, so everything here
/// is defaulted rather than required at the deserializer level.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub review: String,
    pub rating: Option<f64>,
    /// Hex tour id; on the nested tour route the path wins over the body.
    pub tour: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateReviewRequest {
    pub review: Option<String>,
    pub rating: Option<f64>,
}

impl UpdateReviewRequest {
    /// Only the text and rating are writable; the tour and author references
    /// are fixed at creation.
    pub fn into_update(self) -> Result<Document, AppError> {
        let mut fields = Document::new();
        if let Some(text) = self.review.as_deref() {
            fields.insert("review", validate_review_text(text)?);
        }
        if let Some(rating) = self.rating {
            validate_review_rating(rating)?;
            fields.insert("rating", rating);
        }
        Ok(fields)
    }
}

/// Public author summary embedded in review responses.
#[derive(Debug, Serialize)]
pub struct ReviewAuthor {
    pub id: String,
    pub name: String,
    pub photo: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub id: String,
    pub review: String,
    pub rating: f64,
    pub tour: String,
    /// Absent when the author account has since been deactivated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ReviewAuthor>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ReviewResponse {
    pub fn new(review: &Review, author: Option<&User>) -> Self {
        Self {
            id: review.id.to_hex(),
            review: review.review.clone(),
            rating: review.rating,
            tour: review.tour.to_hex(),
            user: author.map(|user| ReviewAuthor {
                id: user.id.to_hex(),
                name: user.name.clone(),
                photo: user.photo.clone(),
            }),
            created_at: review.created_at.to_time_0_3(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn update_collects_only_present_fields() {
        let update = UpdateReviewRequest {
            review: Some("  better than expected ".into()),
            rating: None,
        };
        let fields = update.into_update().unwrap();
        assert_eq!(fields.get_str("review").unwrap(), "better than expected");
        assert!(!fields.contains_key("rating"));

        let empty = UpdateReviewRequest::default().into_update().unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn update_rejects_out_of_range_rating() {
        let update = UpdateReviewRequest {
            review: None,
            rating: Some(6.0),
        };
        assert!(update.into_update().is_err());
    }

    #[test]
    fn response_embeds_the_author_summary() {
        let user = User::new(
            "Lourdes".into(),
            "lourdes@example.com".into(),
            "hash".into(),
        );
        let review = Review::new("Stunning views", 5.0, ObjectId::new(), user.id).unwrap();

        let response = ReviewResponse::new(&review, Some(&user));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["rating"], 5.0);
        assert_eq!(json["user"]["name"], "Lourdes");
        assert_eq!(json["user"]["photo"], "default.jpg");
        assert_eq!(json["tour"], review.tour.to_hex());
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn response_omits_a_vanished_author() {
        let review = Review::new("ok", 3.0, ObjectId::new(), ObjectId::new()).unwrap();
        let json = serde_json::to_value(ReviewResponse::new(&review, None)).unwrap();
        assert!(json.get("user").is_none());
    }
}

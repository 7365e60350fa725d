use mongodb::bson::{oid::ObjectId, DateTime, Document};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::AppError;
use crate::tours::model::{
    parse_guide_ids, parse_start_dates, slugify, validate_discount, validate_name, validate_point,
    validate_price, Difficulty, GeoPoint, Tour, DEFAULT_RATING,
};
use crate::users::dto::UserResponse;
use crate::users::model::User;

/// Creation payload. Required fields default to empty/zero so their absence
/// surfaces as a domain validation error instead of a deserialization
/// failure. Ratings are derived data and deliberately not accepted here.
#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateTourRequest {
    pub name: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: String,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<String>,
    pub secret_tour: bool,
    pub start_location: Option<GeoPoint>,
    pub locations: Vec<GeoPoint>,
    pub guides: Vec<String>,
}

impl CreateTourRequest {
    pub fn into_tour(self) -> Result<Tour, AppError> {
        let name = validate_name(&self.name)?;
        if self.duration < 1 {
            return Err(AppError::validation("A tour must have a duration"));
        }
        if self.max_group_size < 1 {
            return Err(AppError::validation("A tour must have a group size"));
        }
        if self.difficulty.is_empty() {
            return Err(AppError::validation("A tour must have a difficulty"));
        }
        let difficulty = Difficulty::parse(&self.difficulty)?;
        validate_price(self.price)?;
        if let Some(discount) = self.price_discount {
            validate_discount(discount, self.price)?;
        }
        let summary = self.summary.trim().to_string();
        if summary.is_empty() {
            return Err(AppError::validation("A tour must have a summary"));
        }
        if self.image_cover.trim().is_empty() {
            return Err(AppError::validation("A tour must have a cover image"));
        }
        if let Some(point) = &self.start_location {
            validate_point(point)?;
        }
        for point in &self.locations {
            validate_point(point)?;
        }
        let start_dates = parse_start_dates(&self.start_dates)?;
        let guides = parse_guide_ids(&self.guides)?;

        Ok(Tour {
            id: ObjectId::new(),
            slug: slugify(&name),
            name,
            duration: self.duration,
            max_group_size: self.max_group_size,
            difficulty,
            ratings_average: DEFAULT_RATING,
            ratings_quantity: 0,
            price: self.price,
            price_discount: self.price_discount,
            summary,
            description: self
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            image_cover: self.image_cover,
            images: self.images,
            start_dates,
            secret_tour: self.secret_tour,
            start_location: self.start_location,
            locations: self.locations,
            guides,
            created_at: DateTime::now(),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateTourRequest {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<String>>,
    pub secret_tour: Option<bool>,
    pub start_location: Option<GeoPoint>,
    pub locations: Option<Vec<GeoPoint>>,
    pub guides: Option<Vec<String>>,
}

impl UpdateTourRequest {
    /// Turns the patch into a `$set` document, validating each present
    /// field. The discount rule runs against the post-update price and
    /// discount, whichever side the patch touches.
    pub fn into_update(self, current: &Tour) -> Result<Document, AppError> {
        let mut fields = Document::new();

        if let Some(name) = self.name.as_deref() {
            let name = validate_name(name)?;
            fields.insert("slug", slugify(&name));
            fields.insert("name", name);
        }
        if let Some(duration) = self.duration {
            if duration < 1 {
                return Err(AppError::validation("A tour must have a duration"));
            }
            fields.insert("duration", duration);
        }
        if let Some(size) = self.max_group_size {
            if size < 1 {
                return Err(AppError::validation("A tour must have a group size"));
            }
            fields.insert("maxGroupSize", size);
        }
        if let Some(difficulty) = self.difficulty.as_deref() {
            fields.insert("difficulty", Difficulty::parse(difficulty)?.as_str());
        }
        if self.price.is_some() || self.price_discount.is_some() {
            let price = self.price.unwrap_or(current.price);
            if let Some(p) = self.price {
                validate_price(p)?;
                fields.insert("price", p);
            }
            if let Some(discount) = self.price_discount.or(current.price_discount) {
                validate_discount(discount, price)?;
            }
            if let Some(discount) = self.price_discount {
                fields.insert("priceDiscount", discount);
            }
        }
        if let Some(summary) = self.summary.as_deref() {
            let summary = summary.trim();
            if summary.is_empty() {
                return Err(AppError::validation("A tour must have a summary"));
            }
            fields.insert("summary", summary);
        }
        if let Some(description) = self.description {
            fields.insert("description", description);
        }
        if let Some(cover) = self.image_cover.as_deref() {
            if cover.trim().is_empty() {
                return Err(AppError::validation("A tour must have a cover image"));
            }
            fields.insert("imageCover", cover);
        }
        if let Some(images) = self.images {
            fields.insert("images", images);
        }
        if let Some(dates) = self.start_dates.as_deref() {
            let dates = parse_start_dates(dates)?;
            fields.insert(
                "startDates",
                mongodb::bson::to_bson(&dates).map_err(anyhow::Error::new)?,
            );
        }
        if let Some(secret) = self.secret_tour {
            fields.insert("secretTour", secret);
        }
        if let Some(point) = self.start_location {
            validate_point(&point)?;
            fields.insert(
                "startLocation",
                mongodb::bson::to_bson(&point).map_err(anyhow::Error::new)?,
            );
        }
        if let Some(points) = self.locations {
            for point in &points {
                validate_point(point)?;
            }
            fields.insert(
                "locations",
                mongodb::bson::to_bson(&points).map_err(anyhow::Error::new)?,
            );
        }
        if let Some(guides) = self.guides.as_deref() {
            let guides = parse_guide_ids(guides)?;
            fields.insert(
                "guides",
                mongodb::bson::to_bson(&guides).map_err(anyhow::Error::new)?,
            );
        }

        Ok(fields)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourResponse {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub duration: i32,
    /// Derived: `duration / 7`, never stored.
    pub duration_weeks: f64,
    pub max_group_size: i32,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i64,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image_cover: String,
    pub images: Vec<String>,
    #[serde(serialize_with = "rfc3339_vec")]
    pub start_dates: Vec<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    pub locations: Vec<GeoPoint>,
    pub guides: Vec<UserResponse>,
}

impl TourResponse {
    /// `guides` carries the resolved staff documents for this tour; ids
    /// that no longer resolve are dropped.
    pub fn new(tour: &Tour, guides: Vec<&User>) -> Self {
        Self {
            id: tour.id.to_hex(),
            name: tour.name.clone(),
            slug: tour.slug.clone(),
            duration: tour.duration,
            duration_weeks: f64::from(tour.duration) / 7.0,
            max_group_size: tour.max_group_size,
            difficulty: tour.difficulty,
            ratings_average: tour.ratings_average,
            ratings_quantity: tour.ratings_quantity,
            price: tour.price,
            price_discount: tour.price_discount,
            summary: tour.summary.clone(),
            description: tour.description.clone(),
            image_cover: tour.image_cover.clone(),
            images: tour.images.clone(),
            start_dates: tour.start_dates.iter().map(|d| d.to_time_0_3()).collect(),
            start_location: tour.start_location.clone(),
            locations: tour.locations.clone(),
            guides: guides.into_iter().map(UserResponse::from).collect(),
        }
    }
}

fn rfc3339_vec<S>(dates: &[OffsetDateTime], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(dates.len()))?;
    for date in dates {
        let formatted = date.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        seq.serialize_element(&formatted)?;
    }
    seq.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn valid_request() -> CreateTourRequest {
        CreateTourRequest {
            name: "The Forest Hiker".into(),
            duration: 5,
            max_group_size: 25,
            difficulty: "easy".into(),
            price: 397.0,
            summary: "Breathtaking hike through the Canadian Banff National Park".into(),
            image_cover: "tour-1-cover.jpg".into(),
            ..Default::default()
        }
    }

    fn valid_tour() -> Tour {
        valid_request().into_tour().unwrap()
    }

    #[test]
    fn create_fills_defaults_and_slug() {
        let tour = valid_tour();
        assert_eq!(tour.slug, "the-forest-hiker");
        assert_eq!(tour.ratings_average, 4.5);
        assert_eq!(tour.ratings_quantity, 0);
        assert!(!tour.secret_tour);
        assert!(tour.guides.is_empty());
    }

    #[test]
    fn create_rejects_missing_required_fields() {
        let mut req = valid_request();
        req.summary = "  ".into();
        assert!(req.into_tour().is_err());

        let mut req = valid_request();
        req.image_cover = String::new();
        assert!(req.into_tour().is_err());

        let mut req = valid_request();
        req.duration = 0;
        assert!(req.into_tour().is_err());

        let mut req = valid_request();
        req.difficulty = String::new();
        assert!(req.into_tour().is_err());
    }

    #[test]
    fn create_rejects_discount_at_or_above_price() {
        let mut req = valid_request();
        req.price_discount = Some(397.0);
        assert!(req.into_tour().is_err());

        let mut req = valid_request();
        req.price_discount = Some(100.0);
        assert!(req.into_tour().is_ok());
    }

    #[test]
    fn update_name_refreshes_slug() {
        let tour = valid_tour();
        let patch = UpdateTourRequest {
            name: Some("The New Forest Hiker".into()),
            ..Default::default()
        };
        let fields = patch.into_update(&tour).unwrap();
        assert_eq!(fields.get_str("name").unwrap(), "The New Forest Hiker");
        assert_eq!(fields.get_str("slug").unwrap(), "the-new-forest-hiker");
    }

    #[test]
    fn update_discount_checks_against_current_price() {
        let tour = valid_tour();
        let patch = UpdateTourRequest {
            price_discount: Some(500.0),
            ..Default::default()
        };
        assert!(patch.into_update(&tour).is_err());

        let patch = UpdateTourRequest {
            price_discount: Some(100.0),
            ..Default::default()
        };
        assert!(patch.into_update(&tour).is_ok());
    }

    #[test]
    fn update_price_checks_against_current_discount() {
        let mut tour = valid_tour();
        tour.price_discount = Some(300.0);

        // Dropping the price below the stored discount must fail.
        let patch = UpdateTourRequest {
            price: Some(250.0),
            ..Default::default()
        };
        assert!(patch.into_update(&tour).is_err());

        let patch = UpdateTourRequest {
            price: Some(350.0),
            ..Default::default()
        };
        assert!(patch.into_update(&tour).is_ok());
    }

    #[test]
    fn update_both_sides_validates_the_new_pair() {
        let tour = valid_tour();
        let patch = UpdateTourRequest {
            price: Some(200.0),
            price_discount: Some(250.0),
            ..Default::default()
        };
        assert!(patch.into_update(&tour).is_err());

        let patch = UpdateTourRequest {
            price: Some(200.0),
            price_discount: Some(150.0),
            ..Default::default()
        };
        let fields = patch.into_update(&tour).unwrap();
        assert_eq!(fields.get_f64("price").unwrap(), 200.0);
        assert_eq!(fields.get_f64("priceDiscount").unwrap(), 150.0);
    }

    #[test]
    fn empty_patch_yields_empty_document() {
        let tour = valid_tour();
        let fields = UpdateTourRequest::default().into_update(&tour).unwrap();
        assert_eq!(fields, doc! {});
    }

    #[test]
    fn response_computes_duration_weeks_and_formats_dates() {
        let mut tour = valid_tour();
        tour.duration = 14;
        tour.start_dates = vec![DateTime::from_millis(1_718_787_600_000)];

        let response = TourResponse::new(&tour, vec![]);
        assert_eq!(response.duration_weeks, 2.0);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["durationWeeks"], 2.0);
        assert_eq!(json["difficulty"], "easy");
        assert!(json["startDates"][0]
            .as_str()
            .unwrap()
            .starts_with("2024-06-19"));
        // Flags and audit fields stay store-side.
        assert!(json.get("secretTour").is_none());
        assert!(json.get("createdAt").is_none());
    }
}

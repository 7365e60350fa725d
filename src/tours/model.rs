use crate::error::AppError;
use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const DEFAULT_RATING: f64 = 4.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

impl Difficulty {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "difficult" => Ok(Self::Difficult),
            _ => Err(AppError::validation(
                "Difficulty is either: easy, medium, difficult",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Difficult => "difficult",
        }
    }
}

/// GeoJSON point with tour-specific annotations. `day` marks the itinerary
/// day for stops along the route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point_type")]
    pub point_type: String,
    pub coordinates: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
}

fn point_type() -> String {
    "Point".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub slug: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: Difficulty,
    #[serde(default = "default_rating")]
    pub ratings_average: f64,
    #[serde(default)]
    pub ratings_quantity: i64,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<DateTime>,
    #[serde(default)]
    pub secret_tour: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Vec<GeoPoint>,
    #[serde(default)]
    pub guides: Vec<ObjectId>,
    pub created_at: DateTime,
}

fn default_rating() -> f64 {
    DEFAULT_RATING
}

/// Ratings are kept to one decimal, so 4.666 stores as 4.7.
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// URL-safe slug derived from the name: lowercase, alphanumeric runs joined
/// by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

pub fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("A tour must have a name"));
    }
    let len = name.chars().count();
    if len > 40 {
        return Err(AppError::validation(
            "A tour name must have less or equal then 40 characters",
        ));
    }
    if len < 10 {
        return Err(AppError::validation(
            "A tour name must have more or equal then 10 characters",
        ));
    }
    Ok(name.to_string())
}

pub fn validate_price(price: f64) -> Result<(), AppError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(AppError::validation("A tour must have a price"));
    }
    Ok(())
}

pub fn validate_discount(discount: f64, price: f64) -> Result<(), AppError> {
    if !discount.is_finite() || discount < 0.0 || discount >= price {
        return Err(AppError::validation(format!(
            "Discount price ({discount}) should be below regular price"
        )));
    }
    Ok(())
}

pub fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    if point.point_type != "Point" {
        return Err(AppError::validation("A location must be a GeoJSON Point"));
    }
    if point.coordinates.len() != 2 {
        return Err(AppError::validation(
            "A location must have [longitude, latitude] coordinates",
        ));
    }
    Ok(())
}

pub fn parse_start_dates(raw: &[String]) -> Result<Vec<DateTime>, AppError> {
    raw.iter()
        .map(|s| {
            OffsetDateTime::parse(s, &Rfc3339)
                .map(DateTime::from_time_0_3)
                .map_err(|_| {
                    AppError::validation(format!("Invalid start date: {s} (expected RFC 3339)"))
                })
        })
        .collect()
}

pub fn parse_guide_ids(raw: &[String]) -> Result<Vec<ObjectId>, AppError> {
    raw.iter()
        .map(|s| {
            ObjectId::parse_str(s)
                .map_err(|_| AppError::validation(format!("Invalid guide ID: {s}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_dashes() {
        assert_eq!(slugify("The Forest Hiker"), "the-forest-hiker");
        assert_eq!(slugify("  Sea & Sun: 2024!  "), "sea-sun-2024");
        assert_eq!(slugify("Åre Winter Trip"), "åre-winter-trip");
    }

    #[test]
    fn ratings_round_to_one_decimal() {
        assert_eq!(round_rating(4.666_666), 4.7);
        assert_eq!(round_rating(4.04), 4.0);
        assert_eq!(round_rating(5.0), 5.0);
    }

    #[test]
    fn name_length_bounds() {
        assert!(validate_name("Too short").is_err());
        assert!(validate_name("The Forest Hiker").is_ok());
        let long = "x".repeat(41);
        assert!(validate_name(&long).is_err());
        // Trimming happens before the length check.
        assert_eq!(
            validate_name("  The Forest Hiker  ").unwrap(),
            "The Forest Hiker"
        );
    }

    #[test]
    fn discount_must_stay_below_price() {
        assert!(validate_discount(100.0, 400.0).is_ok());
        assert!(validate_discount(400.0, 400.0).is_err());
        assert!(validate_discount(500.0, 400.0).is_err());
        assert!(validate_discount(-1.0, 400.0).is_err());
    }

    #[test]
    fn difficulty_parses_known_values_only() {
        assert_eq!(Difficulty::parse("easy").unwrap(), Difficulty::Easy);
        assert_eq!(Difficulty::parse("medium").unwrap(), Difficulty::Medium);
        assert_eq!(
            Difficulty::parse("difficult").unwrap(),
            Difficulty::Difficult
        );
        assert!(Difficulty::parse("extreme").is_err());
        assert!(Difficulty::parse("Easy").is_err());
    }

    #[test]
    fn points_need_two_coordinates() {
        let good = GeoPoint {
            point_type: "Point".into(),
            coordinates: vec![-80.185942, 25.774772],
            address: None,
            description: None,
            day: None,
        };
        assert!(validate_point(&good).is_ok());

        let mut bad = good.clone();
        bad.coordinates = vec![-80.185942];
        assert!(validate_point(&bad).is_err());

        let mut bad = good;
        bad.point_type = "Polygon".into();
        assert!(validate_point(&bad).is_err());
    }

    #[test]
    fn start_dates_parse_rfc3339() {
        let dates = parse_start_dates(&["2024-06-19T09:00:00Z".to_string()]).unwrap();
        assert_eq!(dates.len(), 1);
        assert!(parse_start_dates(&["2024-06-19,10:00".to_string()]).is_err());
    }

    #[test]
    fn guide_ids_parse_as_object_ids() {
        let id = ObjectId::new();
        assert_eq!(parse_guide_ids(&[id.to_hex()]).unwrap(), vec![id]);
        assert!(parse_guide_ids(&["nope".to_string()]).is_err());
    }
}

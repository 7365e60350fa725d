use crate::error::AppError;
use crate::query::ApiQuery;
use crate::tours::model::{round_rating, Tour, DEFAULT_RATING};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};

pub const COLLECTION: &str = "tours";

fn collection(db: &Database) -> Collection<Tour> {
    db.collection::<Tour>(COLLECTION)
}

/// Secret tours never appear on a read path, not even by direct id.
fn visible(mut filter: Document) -> Document {
    filter.insert("secretTour", doc! { "$ne": true });
    filter
}

fn index_models() -> Vec<IndexModel> {
    let name_unique = IndexModel::builder()
        .keys(doc! { "name": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();
    let price_rating = IndexModel::builder()
        .keys(doc! { "price": 1, "ratingsAverage": -1 })
        .build();
    let slug = IndexModel::builder().keys(doc! { "slug": 1 }).build();
    // Geospatial lookups on the departure point need a 2dsphere index.
    let start_location = IndexModel::builder()
        .keys(doc! { "startLocation": "2dsphere" })
        .build();
    vec![name_unique, price_rating, slug, start_location]
}

pub async fn ensure_indexes(db: &Database) -> Result<(), AppError> {
    collection(db).create_indexes(index_models()).await?;
    Ok(())
}

pub async fn insert(db: &Database, tour: &Tour) -> Result<(), AppError> {
    collection(db).insert_one(tour).await?;
    Ok(())
}

pub async fn find_by_id(db: &Database, id: ObjectId) -> Result<Option<Tour>, AppError> {
    let tour = collection(db).find_one(visible(doc! { "_id": id })).await?;
    Ok(tour)
}

pub async fn find_by_ids(db: &Database, ids: &[ObjectId]) -> Result<Vec<Tour>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let tours = collection(db)
        .find(visible(doc! { "_id": { "$in": ids.to_vec() } }))
        .await?
        .try_collect()
        .await?;
    Ok(tours)
}

pub async fn list(db: &Database, query: &ApiQuery) -> Result<Vec<Tour>, AppError> {
    let tours = collection(db)
        .find(visible(query.filter.clone()))
        .sort(query.sort.clone())
        .skip(query.skip)
        .limit(query.limit)
        .await?
        .try_collect()
        .await?;
    Ok(tours)
}

pub async fn update(
    db: &Database,
    id: ObjectId,
    fields: Document,
) -> Result<Option<Tour>, AppError> {
    let tour = collection(db)
        .find_one_and_update(visible(doc! { "_id": id }), doc! { "$set": fields })
        .return_document(ReturnDocument::After)
        .await?;
    Ok(tour)
}

pub async fn delete(db: &Database, id: ObjectId) -> Result<bool, AppError> {
    let result = collection(db).delete_one(visible(doc! { "_id": id })).await?;
    Ok(result.deleted_count > 0)
}

/// Writes the denormalized review statistics. Runs after every review
/// mutation; a tour with no reviews falls back to the defaults.
pub async fn set_rating_stats(
    db: &Database,
    tour_id: ObjectId,
    quantity: i64,
    average: f64,
) -> Result<(), AppError> {
    let (quantity, average) = if quantity == 0 {
        (0, DEFAULT_RATING)
    } else {
        (quantity, round_rating(average))
    };
    collection(db)
        .update_one(
            doc! { "_id": tour_id },
            doc! { "$set": {
                "ratingsQuantity": quantity,
                "ratingsAverage": average,
            }},
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_filter_excludes_secret_tours() {
        let filter = visible(doc! { "difficulty": "easy" });
        assert_eq!(
            filter,
            doc! { "difficulty": "easy", "secretTour": { "$ne": true } }
        );
    }

    #[test]
    fn bootstrap_covers_the_geospatial_index() {
        let keys: Vec<Document> = index_models().into_iter().map(|m| m.keys).collect();

        assert!(keys.contains(&doc! { "name": 1 }));
        assert!(keys.contains(&doc! { "startLocation": "2dsphere" }));
    }
}

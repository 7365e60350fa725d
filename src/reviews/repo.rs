use crate::error::AppError;
use crate::query::ApiQuery;
use crate::reviews::model::Review;
use crate::tours;
use crate::tours::model::DEFAULT_RATING;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};

pub const COLLECTION: &str = "reviews";

fn collection(db: &Database) -> Collection<Review> {
    db.collection::<Review>(COLLECTION)
}

pub async fn ensure_indexes(db: &Database) -> Result<(), AppError> {
    // One review per user per tour.
    let tour_user = IndexModel::builder()
        .keys(doc! { "tour": 1, "user": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();
    collection(db).create_index(tour_user).await?;
    Ok(())
}

pub async fn insert(db: &Database, review: &Review) -> Result<(), AppError> {
    collection(db).insert_one(review).await?;
    Ok(())
}

pub async fn find_by_id(db: &Database, id: ObjectId) -> Result<Option<Review>, AppError> {
    let review = collection(db).find_one(doc! { "_id": id }).await?;
    Ok(review)
}

pub async fn list(db: &Database, query: &ApiQuery) -> Result<Vec<Review>, AppError> {
    let reviews = collection(db)
        .find(query.filter.clone())
        .sort(query.sort.clone())
        .skip(query.skip)
        .limit(query.limit)
        .await?
        .try_collect()
        .await?;
    Ok(reviews)
}

pub async fn list_by_tour(db: &Database, tour_id: ObjectId) -> Result<Vec<Review>, AppError> {
    let reviews = collection(db)
        .find(doc! { "tour": tour_id })
        .sort(doc! { "createdAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(reviews)
}

pub async fn update(
    db: &Database,
    id: ObjectId,
    fields: Document,
) -> Result<Option<Review>, AppError> {
    let review = collection(db)
        .find_one_and_update(doc! { "_id": id }, doc! { "$set": fields })
        .return_document(ReturnDocument::After)
        .await?;
    Ok(review)
}

/// Deletes and returns the review so the caller can recompute the owning
/// tour's rating statistics.
pub async fn delete(db: &Database, id: ObjectId) -> Result<Option<Review>, AppError> {
    let review = collection(db).find_one_and_delete(doc! { "_id": id }).await?;
    Ok(review)
}

/// Re-derives `ratingsQuantity`/`ratingsAverage` on the owning tour from
/// the live review set. Runs after every review write or delete; with no
/// reviews left the tour falls back to the defaults.
pub async fn recompute_tour_ratings(db: &Database, tour_id: ObjectId) -> Result<(), AppError> {
    let pipeline = vec![
        doc! { "$match": { "tour": tour_id } },
        doc! { "$group": {
            "_id": "$tour",
            "nRating": { "$sum": 1 },
            "avgRating": { "$avg": "$rating" },
        }},
    ];

    let mut stats = collection(db).aggregate(pipeline).await?;
    let (quantity, average) = match stats.try_next().await? {
        Some(doc) => {
            let quantity = match doc.get_i32("nRating") {
                Ok(n) => i64::from(n),
                Err(_) => doc.get_i64("nRating").unwrap_or(0),
            };
            (quantity, doc.get_f64("avgRating").unwrap_or(DEFAULT_RATING))
        }
        None => (0, DEFAULT_RATING),
    };

    tours::repo::set_rating_stats(db, tour_id, quantity, average).await
}

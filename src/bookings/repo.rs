use crate::bookings::model::Booking;
use crate::error::AppError;
use crate::query::ApiQuery;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database, IndexModel};

pub const COLLECTION: &str = "bookings";

fn collection(db: &Database) -> Collection<Booking> {
    db.collection::<Booking>(COLLECTION)
}

pub async fn ensure_indexes(db: &Database) -> Result<(), AppError> {
    // The my-bookings view reads by user.
    let by_user = IndexModel::builder().keys(doc! { "user": 1 }).build();
    collection(db).create_index(by_user).await?;
    Ok(())
}

pub async fn insert(db: &Database, booking: &Booking) -> Result<(), AppError> {
    collection(db).insert_one(booking).await?;
    Ok(())
}

pub async fn find_by_id(db: &Database, id: ObjectId) -> Result<Option<Booking>, AppError> {
    let booking = collection(db).find_one(doc! { "_id": id }).await?;
    Ok(booking)
}

pub async fn list(db: &Database, query: &ApiQuery) -> Result<Vec<Booking>, AppError> {
    let bookings = collection(db)
        .find(query.filter.clone())
        .sort(query.sort.clone())
        .skip(query.skip)
        .limit(query.limit)
        .await?
        .try_collect()
        .await?;
    Ok(bookings)
}

pub async fn list_by_user(db: &Database, user_id: ObjectId) -> Result<Vec<Booking>, AppError> {
    let bookings = collection(db)
        .find(doc! { "user": user_id })
        .sort(doc! { "createdAt": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(bookings)
}

pub async fn update(
    db: &Database,
    id: ObjectId,
    fields: Document,
) -> Result<Option<Booking>, AppError> {
    let booking = collection(db)
        .find_one_and_update(doc! { "_id": id }, doc! { "$set": fields })
        .return_document(ReturnDocument::After)
        .await?;
    Ok(booking)
}

pub async fn delete(db: &Database, id: ObjectId) -> Result<bool, AppError> {
    let result = collection(db).delete_one(doc! { "_id": id }).await?;
    Ok(result.deleted_count > 0)
}

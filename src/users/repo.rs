use crate::error::AppError;
use crate::query::ApiQuery;
use crate::users::model::{ResetToken, User};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use time::{Duration, OffsetDateTime};

pub const COLLECTION: &str = "users";

fn collection(db: &Database) -> Collection<User> {
    db.collection::<User>(COLLECTION)
}

pub async fn ensure_indexes(db: &Database) -> Result<(), AppError> {
    let email_unique = IndexModel::builder()
        .keys(doc! { "email": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();
    collection(db).create_index(email_unique).await?;
    Ok(())
}

/// Deactivated accounts stay in the collection but are invisible to every
/// read path, including login.
fn visible(mut filter: Document) -> Document {
    filter.insert("active", doc! { "$ne": false });
    filter
}

// Client-driven field selection happens on the serialized response, so the
// store always loads complete documents minus the hash.
fn without_password() -> Document {
    doc! { "password": 0 }
}

pub async fn insert(db: &Database, user: &User) -> Result<(), AppError> {
    collection(db).insert_one(user).await?;
    Ok(())
}

pub async fn find_by_id(db: &Database, id: ObjectId) -> Result<Option<User>, AppError> {
    let user = collection(db)
        .find_one(visible(doc! { "_id": id }))
        .projection(without_password())
        .await?;
    Ok(user)
}

pub async fn find_by_id_with_password(
    db: &Database,
    id: ObjectId,
) -> Result<Option<User>, AppError> {
    let user = collection(db).find_one(visible(doc! { "_id": id })).await?;
    Ok(user)
}

pub async fn find_by_email_with_password(
    db: &Database,
    email: &str,
) -> Result<Option<User>, AppError> {
    let user = collection(db)
        .find_one(visible(doc! { "email": email }))
        .await?;
    Ok(user)
}

fn reset_token_filter(hashed_token: &str) -> Document {
    visible(doc! {
        "passwordResetToken": hashed_token,
        "passwordResetExpires": { "$gt": DateTime::now() },
    })
}

/// Reset state removed in one `$unset`, both on consumption and on
/// explicit invalidation.
fn reset_fields() -> Document {
    doc! { "passwordResetToken": "", "passwordResetExpires": "" }
}

/// Looks up a user by hashed reset token, provided the token has not
/// expired yet.
pub async fn find_by_reset_token(
    db: &Database,
    hashed_token: &str,
) -> Result<Option<User>, AppError> {
    let user = collection(db)
        .find_one(reset_token_filter(hashed_token))
        .projection(without_password())
        .await?;
    Ok(user)
}

/// Batch lookup for reference resolution (tour guides, review authors).
pub async fn find_by_ids(db: &Database, ids: &[ObjectId]) -> Result<Vec<User>, AppError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let users = collection(db)
        .find(visible(doc! { "_id": { "$in": ids.to_vec() } }))
        .projection(without_password())
        .await?
        .try_collect()
        .await?;
    Ok(users)
}

pub async fn list(db: &Database, query: &ApiQuery) -> Result<Vec<User>, AppError> {
    let users = collection(db)
        .find(visible(query.filter.clone()))
        .sort(query.sort.clone())
        .projection(without_password())
        .skip(query.skip)
        .limit(query.limit)
        .await?
        .try_collect()
        .await?;
    Ok(users)
}

/// Applies a `$set` patch and returns the updated document, or `None` when
/// no visible user matches.
pub async fn update_fields(
    db: &Database,
    id: ObjectId,
    fields: Document,
) -> Result<Option<User>, AppError> {
    let user = collection(db)
        .find_one_and_update(visible(doc! { "_id": id }), doc! { "$set": fields })
        .return_document(ReturnDocument::After)
        .projection(without_password())
        .await?;
    Ok(user)
}

pub async fn set_reset_token(
    db: &Database,
    id: ObjectId,
    token: &ResetToken,
) -> Result<(), AppError> {
    collection(db)
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "passwordResetToken": &token.hashed,
                "passwordResetExpires": token.expires,
            }},
        )
        .await?;
    Ok(())
}

pub async fn clear_reset_token(db: &Database, id: ObjectId) -> Result<(), AppError> {
    collection(db)
        .update_one(doc! { "_id": id }, doc! { "$unset": reset_fields() })
        .await?;
    Ok(())
}

/// Stores a new password hash and invalidates outstanding sessions and
/// reset tokens. The changed-at stamp is backdated one second so a token
/// issued in the same instant still verifies.
pub async fn set_password(db: &Database, id: ObjectId, hash: &str) -> Result<(), AppError> {
    let changed_at = DateTime::from_time_0_3(OffsetDateTime::now_utc() - Duration::seconds(1));
    collection(db)
        .update_one(
            doc! { "_id": id },
            doc! {
                "$set": { "password": hash, "passwordChangedAt": changed_at },
                "$unset": reset_fields(),
            },
        )
        .await?;
    Ok(())
}

pub async fn deactivate(db: &Database, id: ObjectId) -> Result<(), AppError> {
    collection(db)
        .update_one(doc! { "_id": id }, doc! { "$set": { "active": false } })
        .await?;
    Ok(())
}

pub async fn delete(db: &Database, id: ObjectId) -> Result<bool, AppError> {
    let result = collection(db).delete_one(visible(doc! { "_id": id })).await?;
    Ok(result.deleted_count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_filter_excludes_deactivated() {
        let filter = visible(doc! { "email": "a@b.c" });
        assert_eq!(
            filter,
            doc! { "email": "a@b.c", "active": { "$ne": false } }
        );
    }

    #[test]
    fn reads_project_out_the_password() {
        assert_eq!(without_password(), doc! { "password": 0 });
    }

    #[test]
    fn reset_lookup_requires_an_unexpired_token() {
        let filter = reset_token_filter("deadbeef");
        assert_eq!(filter.get_str("passwordResetToken").unwrap(), "deadbeef");
        let expiry = filter.get_document("passwordResetExpires").unwrap();
        assert!(expiry.get_datetime("$gt").is_ok());
        // Deactivated accounts cannot reset their way back in.
        assert_eq!(
            filter.get_document("active").unwrap(),
            &doc! { "$ne": false }
        );
    }

    #[test]
    fn password_change_clears_reset_state() {
        let unset = reset_fields();
        assert!(unset.contains_key("passwordResetToken"));
        assert!(unset.contains_key("passwordResetExpires"));
    }
}

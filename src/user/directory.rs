//! Handle database requests for user records.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime};

use crate::database::{parse_object_id, Database};
use crate::error::{Result, ServerError};
use crate::user::{Role, User};

#[derive(Clone)]
pub struct UserDirectory {
    db: Database,
}

impl UserDirectory {
    /// Create a new [`UserDirectory`].
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert [`User`] into database. The password must already be hashed by
    /// the caller's credential step. Rejects an already-used email.
    pub async fn create(&self, user: &User) -> Result<User> {
        if self.get_by_email(&user.email).await?.is_some() {
            return Err(ServerError::DuplicateEmail);
        }

        let result = self.db.users().insert_one(user.to_document()).await?;

        let mut created = user.clone();
        created.id = result.inserted_id.as_object_id().map(|id| id.to_hex());
        Ok(created)
    }

    /// Find a user by exact email match. Absence is a regular outcome here,
    /// used for existence checks.
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.db.users().find_one(doc! { "email": email }).await? {
            Some(doc) => Ok(Some(User::from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Resolve an authentication key to its user. The submitted key is never
    /// echoed back through the error.
    pub async fn get_by_authentication_key(&self, key: &str) -> Result<User> {
        let doc = self
            .db
            .users()
            .find_one(doc! { "authenticationKey": key })
            .await?
            .ok_or(ServerError::NotFound("user"))?;

        User::from_document(doc)
    }

    /// Find a user by identifier.
    pub async fn get_by_id(&self, id: &str) -> Result<User> {
        let oid = parse_object_id(id)?;
        let doc = self
            .db
            .users()
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or(ServerError::NotFound("user"))?;

        User::from_document(doc)
    }

    /// All user records in store-native order.
    pub async fn get_all(&self) -> Result<Vec<User>> {
        let mut cursor = self.db.users().find(doc! {}).await?;
        let mut users = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            users.push(User::from_document(doc)?);
        }
        Ok(users)
    }

    /// Full replacement of a user record, id preserved. Backs the
    /// login/logout key transitions.
    pub async fn update(&self, user: &User) -> Result<()> {
        let id = user.id.as_deref().ok_or_else(|| {
            ServerError::InvalidFormat("missing user identifier".into())
        })?;
        let oid = parse_object_id(id)?;

        let result = self
            .db
            .users()
            .replace_one(doc! { "_id": oid }, user.to_document())
            .await?;
        if result.matched_count == 0 {
            return Err(ServerError::NotFound("user"));
        }
        Ok(())
    }

    /// Remove a single user record.
    pub async fn delete_by_id(&self, id: &str) -> Result<()> {
        let oid = parse_object_id(id)?;

        let result = self.db.users().delete_one(doc! { "_id": oid }).await?;
        if result.deleted_count == 0 {
            return Err(ServerError::NotFound("user"));
        }
        Ok(())
    }

    /// Delete every user of `role` whose `lastSession` falls within
    /// `[start, end]`.
    ///
    /// Candidate ids are resolved first, then removed as one id set, so the
    /// caller sees either the whole matched set go or nothing.
    pub async fn delete_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        role: Role,
    ) -> Result<u64> {
        let filter = doc! {
            "role": role.as_str(),
            "lastSession": {
                "$gte": BsonDateTime::from_chrono(start),
                "$lte": BsonDateTime::from_chrono(end),
            },
        };

        let mut cursor = self.db.users().find(filter).await?;
        let mut ids = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            ids.push(Bson::ObjectId(doc.get_object_id("_id")?));
        }
        if ids.is_empty() {
            return Err(ServerError::NoMatch);
        }

        let result = self
            .db
            .users()
            .delete_many(doc! { "_id": { "$in": ids } })
            .await?;
        Ok(result.deleted_count)
    }

    /// Move every `student` registered within `[start, end)` to `new_role`.
    /// The target role is validated before the store is touched.
    pub async fn change_roles_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        new_role: Role,
    ) -> Result<u64> {
        if !new_role.assignable() {
            return Err(ServerError::InvalidFormat(format!(
                "role '{new_role}' cannot be assigned"
            )));
        }

        let filter = doc! {
            "role": Role::Student.as_str(),
            "registrationDate": {
                "$gte": BsonDateTime::from_chrono(start),
                "$lt": BsonDateTime::from_chrono(end),
            },
        };

        let result = self
            .db
            .users()
            .update_many(filter, doc! { "$set": { "role": new_role.as_str() } })
            .await?;
        Ok(result.modified_count)
    }
}

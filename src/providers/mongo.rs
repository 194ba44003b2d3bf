//! MongoDB provider.
//!
//! One collection per module. Each entry is a document
//! `{ _id: key, value: Binary, expires_at?: DateTime }`; a document whose
//! `expires_at` has passed reads as absent.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{doc, Binary, DateTime, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use tracing::{debug, info};

use super::{Provider, ProviderResult};
use crate::error::ProviderError;

pub struct MongoProvider {
    uri: String,
    database: String,
    collection_name: String,
    server_selection_timeout: Duration,
    ttl: Option<Duration>,
    collection: Option<Collection<Document>>,
}

impl MongoProvider {
    /// # Arguments
    /// * `uri` - MongoDB connection string
    /// * `database` - Database name to use
    /// * `collection` - Collection owned by this provider
    pub fn new(
        uri: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            collection_name: collection.into(),
            server_selection_timeout: Duration::from_secs(10),
            ttl: None,
            collection: None,
        }
    }

    /// How long `init` waits for a reachable server.
    #[must_use]
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    fn collection(&self) -> ProviderResult<&Collection<Document>> {
        self.collection.as_ref().ok_or(ProviderError::NotInitialized)
    }
}

fn map_mongo_error(err: mongodb::error::Error) -> ProviderError {
    match *err.kind {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
            ProviderError::ConnectionFailed(err.to_string())
        }
        _ => ProviderError::OperationFailed(err.to_string()),
    }
}

fn is_expired(document: &Document) -> bool {
    document
        .get_datetime("expires_at")
        .map(|expires_at| *expires_at <= DateTime::now())
        .unwrap_or(false)
}

#[async_trait]
impl Provider for MongoProvider {
    fn kind(&self) -> &'static str {
        "mongo"
    }

    async fn init(&mut self, ttl: Option<Duration>) -> ProviderResult<()> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(map_mongo_error)?;
        options.server_selection_timeout = Some(self.server_selection_timeout);
        let client = Client::with_options(options).map_err(map_mongo_error)?;

        // Ping the database to verify connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_mongo_error)?;

        self.ttl = ttl;
        self.collection = Some(client.database(&self.database).collection(&self.collection_name));
        info!(
            "Connected to MongoDB collection '{}.{}'",
            self.database, self.collection_name
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.collection.is_some()
    }

    async fn get(&self, key: &str) -> ProviderResult<Vec<u8>> {
        let collection = self.collection()?;
        let document = collection
            .find_one(doc! { "_id": key })
            .await
            .map_err(map_mongo_error)?;

        let Some(document) = document else {
            return Err(ProviderError::NotFound(key.to_string()));
        };
        if is_expired(&document) {
            debug!("Key '{}' in '{}' has expired", key, self.collection_name);
            return Err(ProviderError::NotFound(key.to_string()));
        }

        document
            .get_binary_generic("value")
            .cloned()
            .map_err(|e| ProviderError::OperationFailed(format!("malformed entry '{}': {}", key, e)))
    }

    async fn set(&self, key: &str, value: &[u8]) -> ProviderResult<()> {
        let collection = self.collection()?;

        let value = Binary {
            subtype: BinarySubtype::Generic,
            bytes: value.to_vec(),
        };
        let mut document = doc! { "_id": key, "value": value };
        if let Some(ttl) = self.ttl {
            let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            let expires_at = DateTime::now().timestamp_millis().saturating_add(millis);
            document.insert("expires_at", DateTime::from_millis(expires_at));
        }

        collection
            .replace_one(doc! { "_id": key }, document)
            .upsert(true)
            .await
            .map_err(map_mongo_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> ProviderResult<()> {
        self.collection()?
            .delete_one(doc! { "_id": key })
            .await
            .map_err(map_mongo_error)?;
        Ok(())
    }

    async fn reset(&self) -> ProviderResult<()> {
        let result = self
            .collection()?
            .delete_many(doc! {})
            .await
            .map_err(map_mongo_error)?;
        debug!(
            "Reset collection '{}', {} documents removed",
            self.collection_name, result.deleted_count
        );
        Ok(())
    }
}

impl std::fmt::Debug for MongoProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoProvider")
            .field("database", &self.database)
            .field("collection", &self.collection_name)
            .field("ttl", &self.ttl)
            .field("connected", &self.collection.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn mongodb_uri() -> String {
        std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
    }

    fn test_collection(suffix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("test_{}_{}_{}", std::process::id(), nanos, suffix)
    }

    /// Skip test if MongoDB not available.
    async fn get_test_provider(suffix: &str, ttl: Option<Duration>) -> Option<MongoProvider> {
        let mut provider = MongoProvider::new(mongodb_uri(), "cacheable_test", test_collection(suffix))
            .server_selection_timeout(Duration::from_secs(1));
        provider.init(ttl).await.ok()?;
        Some(provider)
    }

    #[test]
    fn test_expiry_check() {
        let past = doc! { "expires_at": DateTime::from_millis(0) };
        let future = doc! {
            "expires_at": DateTime::from_millis(DateTime::now().timestamp_millis() + 60_000)
        };
        assert!(is_expired(&past));
        assert!(!is_expired(&future));
        assert!(!is_expired(&doc! {}));
    }

    #[tokio::test]
    async fn test_mongo_requires_init() {
        let provider = MongoProvider::new(mongodb_uri(), "cacheable_test", "unused");
        assert!(!provider.is_ready());
        assert_eq!(
            provider.reset().await.unwrap_err(),
            ProviderError::NotInitialized
        );
    }

    #[tokio::test]
    async fn test_mongo_set_get_delete() {
        let Some(provider) = get_test_provider("set_get", None).await else {
            eprintln!("Skipping test: MongoDB not available");
            return;
        };

        provider.set("greeting", b"hello").await.unwrap();
        provider.set("greeting", b"hello again").await.unwrap();
        assert_eq!(provider.get("greeting").await.unwrap(), b"hello again".to_vec());

        provider.delete("greeting").await.unwrap();
        assert!(provider.get("greeting").await.unwrap_err().is_not_found());
        provider.delete("greeting").await.unwrap();

        provider.set("a", b"1").await.unwrap();
        provider.reset().await.unwrap();
        assert!(!provider.has_key("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_mongo_expired_entry_is_absent() {
        let Some(provider) = get_test_provider("ttl", Some(Duration::from_millis(200))).await else {
            eprintln!("Skipping test: MongoDB not available");
            return;
        };

        provider.set("expiring", b"value").await.unwrap();
        assert!(provider.has_key("expiring").await.unwrap());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(provider.get("expiring").await.unwrap_err().is_not_found());
        provider.reset().await.unwrap();
    }
}

//! MongoDB DocumentStore implementation.

use async_trait::async_trait;
use mongodb::bson::{self, doc};
use mongodb::options::FindOptions as MongoFindOptions;
use mongodb::{Client, Collection, Database};
use tracing::{debug, info};

use crate::interfaces::document_store::{Document, DocumentStore, Filter, FindOptions, Result};

use super::{collection_name, filter_to_bson, to_document};

/// MongoDB implementation of DocumentStore.
pub struct MongoDocumentStore {
    database: Database,
}

impl MongoDocumentStore {
    /// Create a document store over a database.
    pub fn new(client: &Client, database_name: &str) -> Self {
        info!(database = %database_name, "Using MongoDB document store");
        Self {
            database: client.database(database_name),
        }
    }

    fn collection(&self, tenant: &str, table: &str) -> Collection<bson::Document> {
        self.database.collection(&collection_name(tenant, table))
    }
}

fn find_options(opts: &FindOptions) -> MongoFindOptions {
    let mut options = MongoFindOptions::default();
    if !opts.fields.is_empty() {
        let mut projection = bson::Document::new();
        for field in &opts.fields {
            projection.insert(field.as_str(), 1);
        }
        options.projection = Some(projection);
    }
    options.sort = opts.sort.as_ref().map(|field| doc! { field.as_str(): 1 });
    options.limit = opts.limit;
    options
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn find(
        &self,
        tenant: &str,
        table: &str,
        filter: &Filter,
        opts: &FindOptions,
    ) -> Result<Vec<Document>> {
        let query = filter_to_bson(filter)?;
        let mut cursor = self
            .collection(tenant, table)
            .find(query)
            .with_options(find_options(opts))
            .await?;

        let mut docs = Vec::new();
        while cursor.advance().await? {
            docs.push(to_document(cursor.deserialize_current()?));
        }

        debug!(tenant, table, found = docs.len(), "MongoDB find completed");
        Ok(docs)
    }

    async fn count(&self, tenant: &str, table: &str, filter: &Filter) -> Result<u64> {
        let query = filter_to_bson(filter)?;
        let count = self
            .collection(tenant, table)
            .count_documents(query)
            .await?;
        Ok(count)
    }
}

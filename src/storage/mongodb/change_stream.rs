//! MongoDB ChangeStream implementation.
//!
//! One database-level change stream per table, matching every tenant's
//! shard of it by collection name.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use mongodb::bson::{self, doc, Timestamp};
use mongodb::change_stream::event::{
    ChangeStreamEvent, OperationType as MongoOperationType, ResumeToken,
};
use mongodb::change_stream::ChangeStream as MongoStream;
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use mongodb::{Client, Database};
use tracing::{debug, info, warn};

use crate::interfaces::change_stream::{
    ChangeEvent, ChangeStream, EventCursor, OperationType, Result, StreamError, WatchToken,
};
use crate::interfaces::document_store::Document;

use super::{collection_name, collection_tenant, to_document, DEL_ARCHIVE_TABLE, OID_FIELD};

/// Server error codes meaning the resume position is gone for good:
/// InvalidResumeToken, ChangeStreamFatalError, ChangeStreamHistoryLost.
const TOKEN_LOST_CODES: [i32; 3] = [260, 280, 286];

fn stream_error(err: MongoError) -> StreamError {
    match err.kind.as_ref() {
        ErrorKind::Command(cmd) if TOKEN_LOST_CODES.contains(&cmd.code) => {
            StreamError::TokenLost(err.to_string())
        }
        _ => StreamError::Stream(err.to_string()),
    }
}

fn operation(op: &MongoOperationType) -> OperationType {
    match op {
        MongoOperationType::Insert => OperationType::Insert,
        MongoOperationType::Update => OperationType::Update,
        MongoOperationType::Replace => OperationType::Replace,
        MongoOperationType::Delete => OperationType::Delete,
        _ => OperationType::Other,
    }
}

fn operation_time(at: DateTime<Utc>) -> Timestamp {
    Timestamp {
        time: u32::try_from(at.timestamp()).unwrap_or(0),
        increment: 0,
    }
}

fn cluster_time(ts: Option<Timestamp>) -> DateTime<Utc> {
    ts.and_then(|ts| Utc.timestamp_opt(i64::from(ts.time), 0).single())
        .unwrap_or_else(Utc::now)
}

/// MongoDB implementation of ChangeStream.
pub struct MongoChangeStream {
    database: Database,
}

impl MongoChangeStream {
    pub fn new(client: &Client, database_name: &str) -> Self {
        Self {
            database: client.database(database_name),
        }
    }

    fn options(from: &WatchToken) -> Result<ChangeStreamOptions> {
        let mut options = ChangeStreamOptions::default();
        options.full_document = Some(FullDocumentType::UpdateLookup);
        match (&from.token, from.start_at) {
            (Some(token), _) => {
                let token: ResumeToken = serde_json::from_str(token)
                    .map_err(|e| StreamError::TokenLost(format!("malformed resume token: {}", e)))?;
                options.resume_after = Some(token);
            }
            (None, Some(at)) => options.start_at_operation_time = Some(operation_time(at)),
            (None, None) => {}
        }
        Ok(options)
    }
}

#[async_trait]
impl ChangeStream for MongoChangeStream {
    async fn subscribe(&self, table: &str, from: &WatchToken) -> Result<Box<dyn EventCursor>> {
        let pipeline = [doc! {
            "$match": {
                "ns.coll": { "$regex": format!("_{}$", table) },
                "operationType": { "$in": ["insert", "update", "replace", "delete"] },
            }
        }];

        let stream = self
            .database
            .watch()
            .pipeline(pipeline)
            .with_options(Self::options(from)?)
            .await
            .map_err(stream_error)?;

        info!(table = %table, resumed = from.token.is_some(), "Opened MongoDB change stream");
        Ok(Box::new(MongoCursor {
            table: table.to_string(),
            stream,
        }))
    }

    async fn deleted_documents(
        &self,
        tenant: &str,
        table: &str,
        oids: &[String],
    ) -> Result<HashMap<String, Document>> {
        if oids.is_empty() {
            return Ok(HashMap::new());
        }
        let archive = self
            .database
            .collection::<bson::Document>(&collection_name(tenant, DEL_ARCHIVE_TABLE));
        let filter = doc! {
            "oid": { "$in": oids.to_vec() },
            "coll": collection_name(tenant, table),
        };

        let mut cursor = archive.find(filter).await.map_err(stream_error)?;
        let mut docs = HashMap::new();
        while cursor.advance().await.map_err(stream_error)? {
            let archived = cursor.deserialize_current().map_err(stream_error)?;
            let (Ok(oid), Ok(detail)) = (archived.get_str("oid"), archived.get_document("detail"))
            else {
                warn!(tenant, table, "Skipping malformed archive document");
                continue;
            };
            docs.insert(oid.to_string(), to_document(detail.clone()));
        }
        Ok(docs)
    }
}

struct MongoCursor {
    table: String,
    stream: MongoStream<ChangeStreamEvent<bson::Document>>,
}

impl MongoCursor {
    fn convert(&self, event: ChangeStreamEvent<bson::Document>) -> Result<Option<ChangeEvent>> {
        let Some(collection) = event.ns.as_ref().and_then(|ns| ns.coll.as_deref()) else {
            return Ok(None);
        };
        let Some(tenant) = collection_tenant(collection, &self.table) else {
            debug!(collection, table = %self.table, "Ignoring event from unrelated collection");
            return Ok(None);
        };
        let Some(oid) = event
            .document_key
            .as_ref()
            .and_then(|key| key.get_object_id(OID_FIELD).ok())
        else {
            warn!(collection, "Ignoring event without object id");
            return Ok(None);
        };

        Ok(Some(ChangeEvent {
            tenant: tenant.to_string(),
            table: self.table.clone(),
            oid: oid.to_hex(),
            operation: operation(&event.operation_type),
            updated_fields: event
                .update_description
                .as_ref()
                .map(|desc| desc.updated_fields.keys().cloned().collect())
                .unwrap_or_default(),
            document: event.full_document.map(to_document),
            token: serde_json::to_string(&event.id)?,
            cluster_time: cluster_time(event.cluster_time),
        }))
    }
}

#[async_trait]
impl EventCursor for MongoCursor {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<ChangeEvent>> {
        let first = self
            .stream
            .next()
            .await
            .ok_or_else(|| StreamError::Stream("change stream closed".to_string()))?
            .map_err(stream_error)?;

        let mut batch = Vec::new();
        batch.extend(self.convert(first)?);
        while batch.len() < max {
            match self.stream.next_if_any().await.map_err(stream_error)? {
                Some(event) => batch.extend(self.convert(event)?),
                None => break,
            }
        }
        Ok(batch)
    }
}

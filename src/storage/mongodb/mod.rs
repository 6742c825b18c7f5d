//! MongoDB implementations of storage interfaces.
//!
//! Tables are tenant-sharded: table `cc_KubePod` of tenant `t1` lives in
//! collection `t1_cc_KubePod`. Documents are handed out as JSON with `_id`
//! flattened to its hex string.

mod change_stream;
mod document_store;

pub use change_stream::MongoChangeStream;
pub use document_store::MongoDocumentStore;

use mongodb::bson::{self, doc, oid::ObjectId, Bson};
use serde_json::Value;

use crate::interfaces::document_store::{Document, Filter, StoreError};

/// Table holding archived copies of deleted documents.
pub(crate) const DEL_ARCHIVE_TABLE: &str = "cc_DelArchive";

/// Field holding the opaque document id.
pub(crate) const OID_FIELD: &str = "_id";

/// Collection of a table within a tenant.
pub(crate) fn collection_name(tenant: &str, table: &str) -> String {
    format!("{}_{}", tenant, table)
}

/// Tenant owning `collection`, if it is a shard of `table`.
pub(crate) fn collection_tenant<'a>(collection: &'a str, table: &str) -> Option<&'a str> {
    collection
        .strip_suffix(table)?
        .strip_suffix('_')
        .filter(|tenant| !tenant.is_empty())
}

/// Convert a BSON document into the store-independent JSON document.
pub(crate) fn to_document(doc: bson::Document) -> Document {
    let oid = doc.get_object_id(OID_FIELD).ok().map(|oid| oid.to_hex());
    let mut out = match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    };
    if let Some(oid) = oid {
        out.insert(OID_FIELD.to_string(), Value::String(oid));
    }
    out
}

fn to_bson(value: &Value) -> Result<Bson, StoreError> {
    bson::to_bson(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Translate a filter into a MongoDB query document.
pub(crate) fn filter_to_bson(filter: &Filter) -> Result<bson::Document, StoreError> {
    Ok(match filter {
        Filter::All => doc! {},
        Filter::Eq(field, value) => doc! { field.as_str(): to_bson(value)? },
        Filter::In(field, values) => {
            let values = values.iter().map(to_bson).collect::<Result<Vec<_>, _>>()?;
            doc! { field.as_str(): { "$in": values } }
        }
        Filter::Gt(field, value) => doc! { field.as_str(): { "$gt": to_bson(value)? } },
        Filter::Oids(oids) => {
            let oids = oids
                .iter()
                .map(|oid| {
                    ObjectId::parse_str(oid)
                        .map(Bson::ObjectId)
                        .map_err(|e| StoreError::InvalidFilter(format!("bad oid {}: {}", oid, e)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            doc! { OID_FIELD: { "$in": oids } }
        }
        Filter::And(filters) => {
            let filters = filters.iter().map(filter_to_bson).collect::<Result<Vec<_>, _>>()?;
            doc! { "$and": filters }
        }
        Filter::Or(filters) => {
            let filters = filters.iter().map(filter_to_bson).collect::<Result<Vec<_>, _>>()?;
            doc! { "$or": filters }
        }
    })
}

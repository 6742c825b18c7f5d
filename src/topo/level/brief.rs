//! Brief topology levels: set → module.
//!
//! Both kinds carry their `default` flag in `Node::extra` so the brief tree
//! can split idle sets from normal ones.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{combine, id_conds, Level, LevelBase};
use crate::interfaces::{lookup, Document, DocumentStore, Filter};
use crate::topo::error::Result;
use crate::topo::key::Key;
use crate::topo::node::NodeCache;
use crate::topo::schema::{
    doc_i64, doc_str, FIELD_BIZ_ID, FIELD_DEFAULT, FIELD_MODULE_ID, FIELD_MODULE_NAME,
    FIELD_SET_ID, FIELD_SET_NAME, KIND_MODULE, KIND_SET, TABLE_MODULE, TABLE_SET,
};
use crate::topo::types::{Node, Scope};

/// Build the brief level chain.
pub fn brief_levels(
    store: Arc<dyn DocumentStore>,
    nodes: NodeCache,
    key: Arc<Key>,
) -> Arc<dyn Level> {
    let module: Arc<dyn Level> = Arc::new(ModuleLevel::new(LevelBase::new(
        store.clone(),
        nodes.clone(),
        key.clone(),
        None,
    )));
    Arc::new(SetLevel::new(LevelBase::new(store, nodes, key, Some(module))))
}

/// Carry the raw `default` value; the tree validates it.
fn with_default(mut node: Node, doc: &Document) -> Node {
    if let Some(default) = lookup(doc, FIELD_DEFAULT) {
        node.extra = Some(json!({ FIELD_DEFAULT: default }));
    }
    node
}

pub(crate) fn parse_set(doc: &Document, biz_id: i64) -> Result<Node> {
    let id = doc_i64(doc, FIELD_SET_ID, KIND_SET)?;
    let node = Node::new(KIND_SET, id, doc_str(doc, FIELD_SET_NAME), biz_id);
    Ok(with_default(node, doc))
}

pub(crate) fn parse_module(doc: &Document) -> Result<Node> {
    let id = doc_i64(doc, FIELD_MODULE_ID, KIND_MODULE)?;
    let parent_id = doc_i64(doc, FIELD_SET_ID, KIND_MODULE)?;
    let node = Node::new(KIND_MODULE, id, doc_str(doc, FIELD_MODULE_NAME), parent_id);
    Ok(with_default(node, doc))
}

/// Sets of a business.
pub struct SetLevel {
    base: LevelBase,
}

impl SetLevel {
    pub fn new(base: LevelBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Level for SetLevel {
    async fn get_nodes_by_db(
        &self,
        scope: &Scope,
        biz_id: i64,
        _conds: &[Filter],
    ) -> Result<Vec<Node>> {
        let sets = self
            .base
            .find_nodes(
                scope,
                TABLE_SET,
                FIELD_SET_ID,
                &[Filter::eq(FIELD_BIZ_ID, biz_id)],
                &[FIELD_SET_ID, FIELD_SET_NAME, FIELD_DEFAULT],
                |doc| parse_set(doc, biz_id),
            )
            .await?;
        self.base.reconcile(scope, biz_id, KIND_SET, &sets).await;

        let set_ids: Vec<i64> = sets.iter().map(|n| n.id).collect();
        let modules = self
            .base
            .next_by_db(scope, biz_id, &id_conds(FIELD_SET_ID, &set_ids))
            .await?;
        Ok(combine(sets, modules))
    }

    async fn get_nodes_by_cache(&self, scope: &Scope, biz_id: i64) -> Result<Vec<Node>> {
        let sets = self.base.cached_nodes(scope, biz_id, KIND_SET).await?;
        let modules = self.base.next_by_cache(scope, biz_id).await?;
        Ok(combine(sets, modules))
    }
}

/// Modules, scoped by their sets. Leaf level.
pub struct ModuleLevel {
    base: LevelBase,
}

impl ModuleLevel {
    pub fn new(base: LevelBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Level for ModuleLevel {
    async fn get_nodes_by_db(
        &self,
        scope: &Scope,
        biz_id: i64,
        conds: &[Filter],
    ) -> Result<Vec<Node>> {
        let modules = self
            .base
            .find_nodes(
                scope,
                TABLE_MODULE,
                FIELD_MODULE_ID,
                conds,
                &[FIELD_MODULE_ID, FIELD_MODULE_NAME, FIELD_SET_ID, FIELD_DEFAULT],
                parse_module,
            )
            .await?;
        self.base.reconcile(scope, biz_id, KIND_MODULE, &modules).await;
        Ok(modules)
    }

    async fn get_nodes_by_cache(&self, scope: &Scope, biz_id: i64) -> Result<Vec<Node>> {
        self.base.cached_nodes(scope, biz_id, KIND_MODULE).await
    }
}

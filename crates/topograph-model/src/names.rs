//! Collection, graph and database naming.
//!
//! Every query and persistence call resolves names through this config;
//! nothing else spells a collection name. Defaults match the persisted
//! layout (`tmoId_<rootTmoId>` databases, `main`/`mainEdge`/`pathEdge`
//! collections) and each field can be overridden via `GRAPH_DB_*`.

use topograph_util::env::env_string_or;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNames {
    pub sys_database: String,
    pub main_graph_collection: String,
    pub db_name_prefix: String,
    pub tmo_collection: String,
    pub tmo_edge_collection: String,
    pub tmo_graph: String,
    pub config_collection: String,
    pub main_collection: String,
    pub main_edge_collection: String,
    pub main_graph: String,
    pub path_edge_collection: String,
    pub path_graph: String,
    pub search_index: String,
    pub search_view: String,
    pub analyzer: String,
}

impl Default for GraphNames {
    fn default() -> Self {
        GraphNames {
            sys_database: "_system".into(),
            main_graph_collection: "main_graphs".into(),
            db_name_prefix: "tmoId".into(),
            tmo_collection: "tmo".into(),
            tmo_edge_collection: "tmoEdge".into(),
            tmo_graph: "tmoGraph".into(),
            config_collection: "config".into(),
            main_collection: "main".into(),
            main_edge_collection: "mainEdge".into(),
            main_graph: "mainGraph".into(),
            path_edge_collection: "pathEdge".into(),
            path_graph: "pathGraph".into(),
            search_index: "inv-idx-name".into(),
            search_view: "search-view".into(),
            analyzer: "norm_en".into(),
        }
    }
}

impl GraphNames {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = GraphNames::default();
        GraphNames {
            sys_database: env_string_or("GRAPH_DB_SYS_DATABASE_NAME", &defaults.sys_database),
            main_graph_collection: env_string_or(
                "GRAPH_DB_MAIN_GRAPH_COLLECTION_NAME",
                &defaults.main_graph_collection,
            ),
            db_name_prefix: env_string_or("GRAPH_DB_DB_NAME_PREFIX", &defaults.db_name_prefix),
            tmo_collection: env_string_or("GRAPH_DB_TMO_COLLECTION_NAME", &defaults.tmo_collection),
            tmo_edge_collection: env_string_or("GRAPH_DB_TMO_EDGE_NAME", &defaults.tmo_edge_collection),
            tmo_graph: env_string_or("GRAPH_DB_TMO_GRAPH_NAME", &defaults.tmo_graph),
            config_collection: env_string_or(
                "GRAPH_DB_CONFIG_COLLECTION_NAME",
                &defaults.config_collection,
            ),
            main_collection: env_string_or(
                "GRAPH_DB_GRAPH_DATA_COLLECTION_NAME",
                &defaults.main_collection,
            ),
            main_edge_collection: env_string_or(
                "GRAPH_DB_GRAPH_DATA_EDGE_NAME",
                &defaults.main_edge_collection,
            ),
            main_graph: env_string_or("GRAPH_DB_GRAPH_DATA_GRAPH_NAME", &defaults.main_graph),
            path_edge_collection: env_string_or(
                "GRAPH_DB_GRAPH_DATA_PATH_NAME",
                &defaults.path_edge_collection,
            ),
            path_graph: env_string_or(
                "GRAPH_DB_GRAPH_DATA_PATH_GRAPH_NAME",
                &defaults.path_graph,
            ),
            search_index: env_string_or("GRAPH_DB_SEARCH_INDEX_NAME", &defaults.search_index),
            search_view: env_string_or("GRAPH_DB_SEARCH_VIEW", &defaults.search_view),
            analyzer: defaults.analyzer,
        }
    }

    /// Per-projection database name: `<prefix>_<rootTmoId>`.
    #[must_use]
    pub fn db_name(&self, tmo_id: i64) -> String {
        format!("{}_{}", self.db_name_prefix, tmo_id)
    }

    /// Full `_id` of a TMO vertex.
    #[must_use]
    pub fn tmo_doc_id(&self, tmo_id: i64) -> String {
        format!("{}/{}", self.tmo_collection, tmo_id)
    }

    /// Full `_id` of an instance vertex from its key.
    #[must_use]
    pub fn node_doc_id(&self, key: &str) -> String {
        format!("{}/{}", self.main_collection, key)
    }

    /// The `_key` part of a full document id (`collection/key`).
    #[must_use]
    pub fn doc_key(id: &str) -> &str {
        id.split_once('/').map_or(id, |(_, key)| key)
    }

    /// Numeric TMO id from a TMO vertex `_id`.
    #[must_use]
    pub fn tmo_id_of(id: &str) -> Option<i64> {
        Self::doc_key(id).parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let names = GraphNames::default();
        assert_eq!(names.db_name(42588), "tmoId_42588");
        assert_eq!(names.tmo_doc_id(42589), "tmo/42589");
        assert_eq!(names.node_doc_id("abc"), "main/abc");
    }

    #[test]
    fn doc_key_extraction() {
        assert_eq!(GraphNames::doc_key("main/123"), "123");
        assert_eq!(GraphNames::doc_key("bare"), "bare");
        assert_eq!(GraphNames::tmo_id_of("tmo/42588"), Some(42588));
        assert_eq!(GraphNames::tmo_id_of("tmo/abc"), None);
    }
}

//! Index descriptions for [`CreateIndexes`](crate::operation::CreateIndexes).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    collation::Collation,
    serde_util,
};

/// An index to create: its key pattern and options.
///
/// ```rust
/// # use mongodb_operation::{bson::doc, options::IndexOptions, IndexModel};
/// let model = IndexModel::builder()
///     .keys(doc! { "email": 1 })
///     .options(IndexOptions::builder().unique(true).build())
///     .build();
/// ```
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct IndexModel {
    /// The indexed fields, each mapped to its index type (`1`, `-1`, `"text"`, `"2dsphere"`, ...).
    #[serde(rename = "key")]
    pub keys: Document,

    #[serde(flatten)]
    #[builder(default)]
    pub options: Option<IndexOptions>,
}

impl IndexModel {
    /// The index name: the one given in the options, or one generated from the key pattern in
    /// the `<field>_<type>` form the server uses, e.g. `a_1_b_-1`.
    pub fn name(&self) -> String {
        if let Some(name) = self.options.as_ref().and_then(|o| o.name.as_ref()) {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|(field, kind)| format!("{}_{}", field, key_type_name(kind)))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// A copy of this model whose options carry an explicit name.
    pub(crate) fn named(&self) -> Self {
        let mut model = self.clone();
        let name = model.name();
        model.options.get_or_insert_with(IndexOptions::default).name = Some(name);
        model
    }

    pub(crate) fn collation(&self) -> Option<&Collation> {
        self.options.as_ref().and_then(|o| o.collation.as_ref())
    }
}

fn key_type_name(kind: &Bson) -> String {
    match kind {
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        Bson::Double(d) if d.fract() == 0.0 => (*d as i64).to_string(),
        Bson::Double(d) => d.to_string(),
        Bson::String(s) => s.replace(' ', "_"),
        _ => String::new(),
    }
}

/// The options of a single index.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct IndexOptions {
    /// Builds the index without blocking other operations. Ignored from MongoDB 4.2 on.
    pub background: Option<bool>,

    /// For TTL indexes, how long documents are kept.
    #[serde(
        rename = "expireAfterSeconds",
        serialize_with = "serde_util::serialize_duration_option_as_int_secs",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_seconds",
        default
    )]
    pub expire_after: Option<Duration>,

    /// The index name. Generated from the key pattern when unset.
    pub name: Option<String>,

    /// Only index documents that contain the indexed fields.
    pub sparse: Option<bool>,

    /// Per-index storage engine configuration, `{ <engine>: <options> }`.
    pub storage_engine: Option<Document>,

    /// Reject documents whose indexed value already exists.
    pub unique: Option<bool>,

    /// The index version.
    #[serde(rename = "v")]
    pub version: Option<i32>,

    /// For text indexes, the language used for stop words and stemming.
    #[serde(rename = "default_language")]
    pub default_language: Option<String>,

    /// For text indexes, the document field that overrides the language.
    #[serde(rename = "language_override")]
    pub language_override: Option<String>,

    pub text_index_version: Option<i32>,

    /// For text indexes, the weight of each indexed field.
    pub weights: Option<Document>,

    #[serde(rename = "2dsphereIndexVersion")]
    pub sphere_2d_index_version: Option<i32>,

    /// For 2d indexes, the geohash precision in bits.
    pub bits: Option<i32>,

    /// For 2d indexes, the upper bound of longitude and latitude.
    pub max: Option<f64>,

    /// For 2d indexes, the lower bound of longitude and latitude.
    pub min: Option<f64>,

    /// For geoHaystack indexes, the size of the location buckets.
    pub bucket_size: Option<f64>,

    /// Only index documents matching this filter.
    pub partial_filter_expression: Option<Document>,

    /// The collation of the index. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// Fields included in or excluded from a wildcard index.
    pub wildcard_projection: Option<Document>,

    /// Hide the index from the query planner.
    pub hidden: Option<bool>,
}

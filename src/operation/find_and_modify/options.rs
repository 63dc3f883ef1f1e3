use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    collation::Collation,
    concern::WriteConcern,
    operation::bulk_write::UpdateModifications,
    options::{Hint, ReturnDocument},
    serde_util,
};

/// Specifies the options to a find-and-delete.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindAndDeleteOptions {
    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,

    /// The level of the write concern.
    pub write_concern: Option<WriteConcern>,

    /// The collation to use for the operation. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// The index to use for the operation. Requires MongoDB 4.4.
    pub hint: Option<Hint>,

    /// Variables accessible in the query as `$$<name>`.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// Tags the query with an arbitrary value to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,
}

/// Specifies the options to a find-and-replace.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindAndReplaceOptions {
    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// Whether the operation returns the document before or after the replacement.
    #[serde(skip)]
    pub return_document: Option<ReturnDocument>,

    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,

    /// If true, insert the replacement when no document matches the filter.
    pub upsert: Option<bool>,

    /// The level of the write concern.
    pub write_concern: Option<WriteConcern>,

    /// The collation to use for the operation. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// The index to use for the operation. Requires MongoDB 4.2.
    pub hint: Option<Hint>,

    /// Variables accessible in the query as `$$<name>`.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// Tags the query with an arbitrary value to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,
}

/// Specifies the options to a find-and-update.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindAndUpdateOptions {
    /// Filters specifying which array elements an update applies to. Requires MongoDB 3.6.
    pub array_filters: Option<Vec<Document>>,

    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The maximum amount of time to allow the query to run.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis",
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis",
        default
    )]
    pub max_time: Option<Duration>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// Whether the operation returns the document before or after the update.
    #[serde(skip)]
    pub return_document: Option<ReturnDocument>,

    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,

    /// If true, insert a document when no document matches the filter.
    pub upsert: Option<bool>,

    /// The level of the write concern.
    pub write_concern: Option<WriteConcern>,

    /// The collation to use for the operation. Requires MongoDB 3.4.
    pub collation: Option<Collation>,

    /// The index to use for the operation. Requires MongoDB 4.2.
    pub hint: Option<Hint>,

    /// Variables accessible in the query as `$$<name>`.
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// Tags the query with an arbitrary value to help trace the operation through the database
    /// profiler, currentOp and logs.
    pub comment: Option<Bson>,
}

#[derive(Clone, Debug, Serialize)]
pub(super) enum Modification {
    #[serde(rename = "remove", serialize_with = "self::serialize_true")]
    Delete,
    #[serde(rename = "update")]
    Update(UpdateModifications),
}

fn serialize_true<S: Serializer>(s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_bool(true)
}

/// Every option of the `findandmodify` command, as sent on the wire.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FindAndModifyOptions {
    #[serde(flatten)]
    pub(super) modification: Modification,

    pub(super) sort: Option<Document>,

    pub(super) new: Option<bool>,

    pub(super) upsert: Option<bool>,

    pub(super) bypass_document_validation: Option<bool>,

    #[serde(skip)]
    pub(super) write_concern: Option<WriteConcern>,

    pub(super) array_filters: Option<Vec<Document>>,

    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis"
    )]
    pub(super) max_time: Option<Duration>,

    #[serde(rename = "fields")]
    pub(super) projection: Option<Document>,

    pub(super) collation: Option<Collation>,

    pub(super) hint: Option<Hint>,

    #[serde(rename = "let")]
    pub(super) let_vars: Option<Document>,

    pub(super) comment: Option<Bson>,
}

impl FindAndModifyOptions {
    fn new(modification: Modification) -> Self {
        Self {
            modification,
            sort: None,
            new: None,
            upsert: None,
            bypass_document_validation: None,
            write_concern: None,
            array_filters: None,
            max_time: None,
            projection: None,
            collation: None,
            hint: None,
            let_vars: None,
            comment: None,
        }
    }

    pub(super) fn from_delete_options(opts: FindAndDeleteOptions) -> Self {
        Self {
            sort: opts.sort,
            write_concern: opts.write_concern,
            max_time: opts.max_time,
            projection: opts.projection,
            collation: opts.collation,
            hint: opts.hint,
            let_vars: opts.let_vars,
            comment: opts.comment,
            ..Self::new(Modification::Delete)
        }
    }

    pub(super) fn from_replace_options(replacement: Document, opts: FindAndReplaceOptions) -> Self {
        Self {
            sort: opts.sort,
            new: return_document_to_bool(opts.return_document),
            upsert: opts.upsert,
            bypass_document_validation: opts.bypass_document_validation,
            write_concern: opts.write_concern,
            max_time: opts.max_time,
            projection: opts.projection,
            collation: opts.collation,
            hint: opts.hint,
            let_vars: opts.let_vars,
            comment: opts.comment,
            ..Self::new(Modification::Update(UpdateModifications::Document(
                replacement,
            )))
        }
    }

    pub(super) fn from_update_options(
        update: UpdateModifications,
        opts: FindAndUpdateOptions,
    ) -> Self {
        Self {
            sort: opts.sort,
            new: return_document_to_bool(opts.return_document),
            upsert: opts.upsert,
            bypass_document_validation: opts.bypass_document_validation,
            write_concern: opts.write_concern,
            array_filters: opts.array_filters,
            max_time: opts.max_time,
            projection: opts.projection,
            collation: opts.collation,
            hint: opts.hint,
            let_vars: opts.let_vars,
            comment: opts.comment,
            ..Self::new(Modification::Update(update))
        }
    }
}

fn return_document_to_bool(return_document: Option<ReturnDocument>) -> Option<bool> {
    return_document.map(|rd| rd == ReturnDocument::After)
}
